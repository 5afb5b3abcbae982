pub mod api;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod sensors;
pub mod stats;
pub mod store;

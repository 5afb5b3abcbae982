//! Writes the slope monitor OpenAPI document.
//!
//! Usage:
//!   cargo run --bin generate_openapi > openapi.json
//!   cargo run --bin generate_openapi -- --output docs/openapi.json

use std::{
    env, fs,
    io::{self, Write},
    path::PathBuf,
    process,
};

use slope_monitor_service::api::handlers::ApiDoc;
use utoipa::OpenApi;

fn main() {
    let json = match ApiDoc::openapi().to_pretty_json() {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Failed to serialise OpenAPI document: {e}");
            process::exit(1);
        }
    };

    let output_path = output_arg(env::args().skip(1));

    let written = match &output_path {
        Some(path) => fs::write(path, &json),
        None => io::stdout().write_all(json.as_bytes()),
    };
    if let Err(e) = written {
        let target = output_path.map_or_else(|| "stdout".to_owned(), |p| p.display().to_string());
        eprintln!("Error writing to {target}: {e}");
        process::exit(1);
    }
    if let Some(path) = output_path {
        eprintln!("OpenAPI document written to {}", path.display());
    }
}

/// Value of `--output <path>` or `--output=<path>`.
fn output_arg(args: impl Iterator<Item = String>) -> Option<PathBuf> {
    let mut args = args.peekable();
    while let Some(arg) = args.next() {
        if let Some(path) = arg.strip_prefix("--output=") {
            return Some(PathBuf::from(path));
        }
        if arg == "--output" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

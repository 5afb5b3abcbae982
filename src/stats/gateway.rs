use std::{sync::Arc, time::Duration};

use chrono::{FixedOffset, NaiveDate, Utc};
use tracing::{debug, warn};

use super::{
    cache::{daily_key, CacheLookup, StatsCache},
    day_span, DailyStats, Provenance,
};
use crate::store::{Repository, StoreError};

/// Serves the daily snapshot from the stats cache when it can and from the
/// reading store when it cannot. Cache trouble never fails a request; only
/// a storage failure during the fallback does.
pub struct DailyStatsGateway {
    repo: Arc<dyn Repository>,
    cache: Option<Arc<dyn StatsCache>>,
    offset: FixedOffset,
    ttl: Duration,
}

impl DailyStatsGateway {
    pub fn new(
        repo: Arc<dyn Repository>,
        cache: Option<Arc<dyn StatsCache>>,
        offset: FixedOffset,
        ttl: Duration,
    ) -> Self {
        Self {
            repo,
            cache,
            offset,
            ttl,
        }
    }

    /// The current calendar day in the configured offset.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.offset).date_naive()
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub async fn snapshot_for(&self, day: NaiveDate) -> Result<DailyStats, StoreError> {
        let key = daily_key(day);
        let mut cache_reachable = true;

        if let Some(cache) = &self.cache {
            match cache.read(&key).await {
                CacheLookup::Hit(stats) => {
                    debug!(key = %key, "Daily stats served from cache");
                    return Ok(DailyStats {
                        source: Provenance::Cache,
                        ..stats
                    });
                }
                CacheLookup::Miss => debug!(key = %key, "Daily stats cache miss"),
                CacheLookup::Malformed(reason) => {
                    warn!(key = %key, reason = %reason, "Ignoring malformed cached daily stats")
                }
                CacheLookup::Unreachable(reason) => {
                    cache_reachable = false;
                    warn!(key = %key, reason = %reason, "Stats cache unreachable; computing from store")
                }
            }
        }

        let aggregate = self.repo.aggregate(day_span(day, self.offset)).await?;
        let stats = DailyStats::from_aggregate(&aggregate);

        if let Some(cache) = self.cache.as_ref().filter(|_| cache_reachable) {
            if let Err(e) = cache.write(&key, &stats, self.ttl).await {
                warn!(key = %key, error = %e, "Failed to write daily stats to cache");
            }
        }

        Ok(stats)
    }
}

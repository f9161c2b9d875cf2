//! Distance estimator: map service first, geometric fallback second, both
//! behind a bounded LRU cache keyed by rounded coordinate pairs.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::config::DistanceConfig;
use crate::haversine::GeometricEstimator;
use crate::model::{Accuracy, Coordinates};
use crate::traits::{MapService, TravelLeg};

/// Travel estimate between two coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub distance_km: f64,
    pub duration_secs: i64,
    pub accuracy: Accuracy,
}

impl Estimate {
    fn from_leg(leg: TravelLeg, accuracy: Accuracy) -> Self {
        Self {
            distance_km: leg.distance_km,
            duration_secs: leg.duration_secs.max(0),
            accuracy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey([i64; 4]);

#[derive(Debug, Clone, Copy)]
struct CachedEstimate {
    estimate: Estimate,
    stored_at: Instant,
}

/// Counters for cache diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fallbacks: u64,
}

pub struct DistanceEstimator {
    map: Option<Arc<dyn MapService>>,
    fallback: GeometricEstimator,
    cache: Mutex<LruCache<CacheKey, CachedEstimate>>,
    config: DistanceConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    fallbacks: AtomicU64,
}

impl std::fmt::Debug for DistanceEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistanceEstimator")
            .field("has_map_service", &self.map.is_some())
            .field("fallback", &self.fallback)
            .field("stats", &self.stats())
            .finish()
    }
}

impl DistanceEstimator {
    pub fn new(map: Option<Arc<dyn MapService>>, config: DistanceConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            map,
            fallback: GeometricEstimator::from_config(&config),
            cache: Mutex::new(LruCache::new(capacity)),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
        }
    }

    /// Estimator without an external provider; every estimate is degraded.
    pub fn geometric_only(config: DistanceConfig) -> Self {
        Self::new(None, config)
    }

    pub fn estimate(&self, origin: Coordinates, destination: Coordinates) -> Estimate {
        let key = self.cache_key(origin, destination);
        if key.0[..2] == key.0[2..] {
            return Estimate::from_leg(TravelLeg::ZERO, Accuracy::Exact);
        }

        if let Some(hit) = self.cached(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return hit;
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let estimate = match self.query_map(origin, destination) {
            Some(leg) => Estimate::from_leg(leg, Accuracy::Exact),
            None => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                Estimate::from_leg(self.fallback.estimate(origin, destination), Accuracy::Degraded)
            }
        };

        self.cache.lock().put(
            key,
            CachedEstimate {
                estimate,
                stored_at: Instant::now(),
            },
        );
        estimate
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    fn cached(&self, key: &CacheKey) -> Option<Estimate> {
        let mut cache = self.cache.lock();
        let entry = *cache.get(key)?;
        let ttl = match entry.estimate.accuracy {
            Accuracy::Exact => Duration::from_secs(self.config.cache_ttl_secs),
            Accuracy::Degraded => Duration::from_secs(self.config.degraded_ttl_secs),
        };
        if entry.stored_at.elapsed() < ttl {
            Some(entry.estimate)
        } else {
            cache.pop(key);
            None
        }
    }

    /// Bounded retries with exponential backoff. `None` means fall back.
    fn query_map(&self, origin: Coordinates, destination: Coordinates) -> Option<TravelLeg> {
        let map = self.map.as_ref()?;
        let attempts = self.config.map_retries + 1;
        for attempt in 0..attempts {
            match map.distance_duration(origin, destination) {
                Ok(leg) => return Some(leg),
                Err(err) => {
                    tracing::debug!(attempt, error = %err, "map service call failed");
                    if attempt + 1 < attempts && self.config.retry_backoff_ms > 0 {
                        let backoff = self.config.retry_backoff_ms.saturating_mul(1 << attempt.min(10));
                        std::thread::sleep(Duration::from_millis(backoff));
                    }
                }
            }
        }
        tracing::warn!(
            from_lat = origin.lat,
            from_lng = origin.lng,
            to_lat = destination.lat,
            to_lng = destination.lng,
            "map service unavailable; using geometric estimate"
        );
        None
    }

    fn cache_key(&self, origin: Coordinates, destination: Coordinates) -> CacheKey {
        let scale = 10f64.powi(self.config.coordinate_precision as i32);
        let round = |value: f64| (value * scale).round() as i64;
        CacheKey([
            round(origin.lat),
            round(origin.lng),
            round(destination.lat),
            round(destination.lng),
        ])
    }
}

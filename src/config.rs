//! Engine configuration.
//!
//! Every section has defaults so a partial TOML file is enough:
//!
//! ```toml
//! skills = ["HVAC", "ELECTRICAL", "PLUMBING"]
//!
//! [candidates]
//! service_radius_km = 40.0
//!
//! [weights]
//! load_per_stop = 120.0
//!
//! [osrm]
//! base_url = "http://osrm.internal:5000"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::osrm::OsrmConfig;
use crate::skills::{MAX_SKILLS, SkillCatalog};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// The organization's closed set of capability tags.
    pub skills: Vec<String>,
    pub distance: DistanceConfig,
    pub candidates: CandidateConfig,
    pub sequencer: SequencerConfig,
    pub optimizer: OptimizerConfig,
    pub rebalancer: RebalancerConfig,
    pub weights: ObjectiveWeights,
    /// Road-network map service. Absent means geometric estimates only.
    pub osrm: Option<OsrmConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanceConfig {
    /// Multiplier from great-circle distance to road distance.
    pub road_factor: f64,
    /// Assumed driving speed for the geometric fallback.
    pub fallback_speed_kmh: f64,
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
    /// TTL for fallback estimates, so the map service is retried soon.
    pub degraded_ttl_secs: u64,
    /// Decimal places kept when rounding coordinates into cache keys.
    pub coordinate_precision: u32,
    /// Additional attempts after the first failed map call.
    pub map_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for DistanceConfig {
    fn default() -> Self {
        Self {
            road_factor: 1.3,
            fallback_speed_kmh: 40.0,
            cache_capacity: 10_000,
            cache_ttl_secs: 3600,
            degraded_ttl_secs: 60,
            coordinate_precision: 5,
            map_retries: 2,
            retry_backoff_ms: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateConfig {
    pub service_radius_km: f64,
    pub max_candidates: usize,
    /// How many service dates of a multi-day window are considered.
    pub horizon_days: u32,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            service_radius_km: 50.0,
            max_candidates: 8,
            horizon_days: 7,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Lateness past a window's end that is tolerated and recorded as a breach.
    pub window_grace_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Consecutive failed attempts before a work order becomes unschedulable.
    pub max_deferrals: u32,
    pub max_commit_retries: u32,
    pub cycle_budget_ms: u64,
    pub improvement_budget_ms: u64,
    pub improvement_max_iterations: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_deferrals: 3,
            max_commit_retries: 3,
            cycle_budget_ms: 2000,
            improvement_budget_ms: 2000,
            improvement_max_iterations: 10_000,
        }
    }
}

impl OptimizerConfig {
    pub fn cycle_budget(&self) -> Duration {
        Duration::from_millis(self.cycle_budget_ms)
    }

    pub fn improvement_budget(&self) -> Duration {
        Duration::from_millis(self.improvement_budget_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebalancerConfig {
    pub budget_ms: u64,
    /// Reassign orphans only where existing stops keep their times.
    pub preserve_committed: bool,
    /// Priority at or above which an arrival may displace lower-priority work.
    pub urgent_priority: u8,
    /// Longest unavailability interval accepted in one call.
    pub max_unavailable_days: u32,
}

impl Default for RebalancerConfig {
    fn default() -> Self {
        Self {
            budget_ms: 2000,
            preserve_committed: true,
            urgent_priority: 8,
            max_unavailable_days: 366,
        }
    }
}

impl RebalancerConfig {
    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }

    pub fn max_unavailable_secs(&self) -> i64 {
        i64::from(self.max_unavailable_days) * 86_400
    }
}

/// Tunable objective. Costs are in "weighted seconds".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectiveWeights {
    pub travel_per_second: f64,
    /// Penalty per already committed stop when ranking candidates.
    pub load_per_stop: f64,
    /// Penalty per second of recorded window breach.
    pub lateness_per_second: f64,
}

impl Default for ObjectiveWeights {
    fn default() -> Self {
        Self {
            travel_per_second: 1.0,
            load_per_stop: 300.0,
            lateness_per_second: 10.0,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(input).map_err(|err| EngineError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|err| EngineError::Config(format!("{}: {}", path.display(), err)))?;
        Self::from_toml_str(&contents)
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn skill_catalog(&self) -> Result<SkillCatalog> {
        SkillCatalog::new(&self.skills)
    }

    pub fn validate(&self) -> Result<()> {
        if self.skills.is_empty() {
            return Err(EngineError::Config("skill catalog is empty".to_string()));
        }
        if self.skills.len() > MAX_SKILLS {
            return Err(EngineError::Config(format!(
                "skill catalog holds at most {} tags",
                MAX_SKILLS
            )));
        }
        let distance = &self.distance;
        if !(distance.road_factor >= 1.0) {
            return Err(EngineError::Config("distance.road_factor must be >= 1".to_string()));
        }
        if !(distance.fallback_speed_kmh > 0.0) {
            return Err(EngineError::Config(
                "distance.fallback_speed_kmh must be positive".to_string(),
            ));
        }
        if distance.cache_capacity == 0 {
            return Err(EngineError::Config("distance.cache_capacity must be positive".to_string()));
        }
        if distance.coordinate_precision > 7 {
            return Err(EngineError::Config(
                "distance.coordinate_precision must be at most 7".to_string(),
            ));
        }
        if !(self.candidates.service_radius_km > 0.0) {
            return Err(EngineError::Config(
                "candidates.service_radius_km must be positive".to_string(),
            ));
        }
        if self.candidates.max_candidates == 0 {
            return Err(EngineError::Config(
                "candidates.max_candidates must be positive".to_string(),
            ));
        }
        if self.sequencer.window_grace_secs < 0 {
            return Err(EngineError::Config(
                "sequencer.window_grace_secs must not be negative".to_string(),
            ));
        }
        if self.rebalancer.max_unavailable_days == 0 {
            return Err(EngineError::Config(
                "rebalancer.max_unavailable_days must be positive".to_string(),
            ));
        }
        if let Some(osrm) = &self.osrm {
            if osrm.base_url.trim().is_empty() {
                return Err(EngineError::Config("osrm.base_url must not be empty".to_string()));
            }
            if osrm.timeout_secs == 0 {
                return Err(EngineError::Config("osrm.timeout_secs must be positive".to_string()));
            }
        }
        if self.optimizer.max_deferrals == 0 {
            return Err(EngineError::Config("optimizer.max_deferrals must be positive".to_string()));
        }
        let weights = &self.weights;
        if [weights.travel_per_second, weights.load_per_stop, weights.lateness_per_second]
            .iter()
            .any(|w| !w.is_finite() || *w < 0.0)
        {
            return Err(EngineError::Config("weights must be finite and non-negative".to_string()));
        }
        self.skill_catalog().map(|_| ())
    }
}

use serde::{Deserialize, Serialize};

use crate::features::LONGEST_LOOKBACK;
use crate::types::ModelSelector;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub database: DatabaseSettings,
    pub schedule: ScheduleSettings,
    pub universe: UniverseSettings,
    pub features: FeatureSettings,
    pub forecast: ForecastSettings,
    pub baseline: BaselineSettings,
    pub advanced: AdvancedSettings,
    pub orchestrator: OrchestratorSettings,
    pub retention: RetentionSettings,
    pub ingest: IngestSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseSettings::default(),
            schedule: ScheduleSettings::default(),
            universe: UniverseSettings::default(),
            features: FeatureSettings::default(),
            forecast: ForecastSettings::default(),
            baseline: BaselineSettings::default(),
            advanced: AdvancedSettings::default(),
            orchestrator: OrchestratorSettings::default(),
            retention: RetentionSettings::default(),
            ingest: IngestSettings::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.database.max_connections == 0 {
            errors.push("database.max_connections must be > 0".to_string());
        }
        if self.schedule.run_time().is_none() {
            errors.push(format!(
                "schedule.run_time_utc '{}' is not HH:MM",
                self.schedule.run_time_utc
            ));
        }

        // Universe
        if self.universe.symbols.is_empty() {
            errors.push("universe.symbols must not be empty".to_string());
        }
        if self.universe.symbols.iter().any(|s| s.trim().is_empty()) {
            errors.push("universe.symbols must not contain blank entries".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for symbol in &self.universe.symbols {
            if !seen.insert(symbol.as_str()) {
                errors.push(format!("universe.symbols lists {} more than once", symbol));
            }
        }

        // Features
        if self.features.correlation_window < 3 {
            errors.push("features.correlation_window must be >= 3".to_string());
        }
        if self.features.relative_strength_window == 0 {
            errors.push("features.relative_strength_window must be > 0".to_string());
        }
        if self.features.volatility_threshold <= 0.0 {
            errors.push("features.volatility_threshold must be > 0".to_string());
        }
        if self.features.volatility_multiplier <= 1.0 {
            errors.push("features.volatility_multiplier must be > 1".to_string());
        }
        if self.features.trend_saturation <= 0.0 {
            errors.push("features.trend_saturation must be > 0".to_string());
        }
        if !(0.0..1.0).contains(&self.features.trend_threshold) {
            errors.push("features.trend_threshold must be in [0, 1)".to_string());
        }

        // Forecast
        if self.forecast.horizon_days == 0 {
            errors.push("forecast.horizon_days must be > 0".to_string());
        }
        if self.forecast.confidence_level <= 0.0 || self.forecast.confidence_level >= 1.0 {
            errors.push("forecast.confidence_level must be between 0 and 1".to_string());
        }
        if self.forecast.neutral_band < 0.0 {
            errors.push("forecast.neutral_band must be >= 0".to_string());
        }
        if self.forecast.models.is_empty() {
            errors.push("forecast.models must name at least one model".to_string());
        }

        // Models
        if self.baseline.p == 0 && self.baseline.q == 0 && self.baseline.seasonal_p == 0 {
            errors.push("baseline: at least one of p, q, seasonal_p must be > 0".to_string());
        }
        if self.baseline.d > 1 {
            errors.push("baseline.d must be 0 or 1".to_string());
        }
        if self.advanced.n_estimators == 0 {
            errors.push("advanced.n_estimators must be > 0".to_string());
        }
        if self.advanced.learning_rate <= 0.0 || self.advanced.learning_rate > 1.0 {
            errors.push("advanced.learning_rate must be in (0, 1]".to_string());
        }
        if self.advanced.max_depth == 0 {
            errors.push("advanced.max_depth must be > 0".to_string());
        }
        if self.advanced.validation_fraction <= 0.0 || self.advanced.validation_fraction >= 0.5 {
            errors.push("advanced.validation_fraction must be in (0, 0.5)".to_string());
        }
        if self.advanced.min_history < LONGEST_LOOKBACK + 2 {
            errors.push(format!(
                "advanced.min_history must be >= {} (longest feature lookback + 2)",
                LONGEST_LOOKBACK + 2
            ));
        }

        // Orchestrator
        if self.orchestrator.max_parallel_symbols == 0 {
            errors.push("orchestrator.max_parallel_symbols must be > 0".to_string());
        }
        if self.orchestrator.lock_ttl_secs == 0 {
            errors.push("orchestrator.lock_ttl_secs must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Forecast symbols followed by reference instruments, without duplicates.
    pub fn all_instruments(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let reference = self.universe.sector_index.iter().chain(self.universe.peers.iter());
        for symbol in self.universe.symbols.iter().chain(reference) {
            if !out.contains(symbol) {
                out.push(symbol.clone());
            }
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://forecast.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    /// Daily run time, `HH:MM` in UTC.
    pub run_time_utc: String,
    pub weekdays_only: bool,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            run_time_utc: "21:30".to_string(),
            weekdays_only: true,
        }
    }
}

impl ScheduleSettings {
    pub fn run_time(&self) -> Option<chrono::NaiveTime> {
        chrono::NaiveTime::parse_from_str(&self.run_time_utc, "%H:%M").ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UniverseSettings {
    pub symbols: Vec<String>,
    pub sector_index: Option<String>,
    pub peers: Vec<String>,
}

impl Default for UniverseSettings {
    fn default() -> Self {
        Self {
            symbols: vec!["HDFCBANK.NS".to_string()],
            sector_index: Some("^NSEBANK".to_string()),
            peers: vec![
                "ICICIBANK.NS".to_string(),
                "KOTAKBANK.NS".to_string(),
                "AXISBANK.NS".to_string(),
                "SBIN.NS".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSettings {
    pub correlation_window: usize,
    pub relative_strength_window: usize,
    /// Absolute daily-return standard deviation above which a window is high-volatility.
    pub volatility_threshold: f64,
    pub volatility_multiplier: f64,
    pub volatility_lookback: usize,
    pub trend_threshold: f64,
    /// Raw `|sma_5 - sma_50| / sma_50` that maps to trend strength 1.0.
    pub trend_saturation: f64,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            correlation_window: 20,
            relative_strength_window: 20,
            volatility_threshold: 0.04,
            volatility_multiplier: 1.5,
            volatility_lookback: 50,
            trend_threshold: 0.2,
            trend_saturation: 0.10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastSettings {
    pub horizon_days: usize,
    pub confidence_level: f64,
    /// Relative move below which a forecast is NEUTRAL.
    pub neutral_band: f64,
    pub models: Vec<ModelSelector>,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            horizon_days: 5,
            confidence_level: 0.95,
            neutral_band: 0.001,
            models: ModelSelector::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineSettings {
    pub p: usize,
    pub d: usize,
    pub q: usize,
    pub seasonal_p: usize,
    pub seasonal_period: usize,
    /// Most recent bars used for fitting.
    pub training_window: usize,
    pub min_history: usize,
    pub ridge: f64,
}

impl Default for BaselineSettings {
    fn default() -> Self {
        Self {
            p: 2,
            d: 1,
            q: 2,
            seasonal_p: 1,
            seasonal_period: 5,
            training_window: 500,
            min_history: 30,
            ridge: 1e-4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedSettings {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub validation_fraction: f64,
    pub min_history: usize,
    pub top_features: usize,
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_leaf: 3,
            validation_fraction: 0.2,
            min_history: 60,
            top_features: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub max_parallel_symbols: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub lock_ttl_secs: i64,
    /// Calendar days requested from the quote provider on each ingest.
    pub ingest_lookback_days: i64,
    /// Bars loaded for featurizing and forecasting.
    pub history_window_days: i64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_parallel_symbols: 4,
            max_retries: 3,
            retry_base_delay_ms: 500,
            lock_ttl_secs: 3600,
            ingest_lookback_days: 30,
            history_window_days: 730,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    /// Bars older than this many days are pruned; disabled when unset.
    pub bars_days: Option<i64>,
    pub job_runs_days: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Directory holding `<SYMBOL>.csv` daily files.
    pub csv_dir: String,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            csv_dir: "data".to_string(),
        }
    }
}

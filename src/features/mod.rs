pub mod engine;
pub mod patterns;
pub mod reference;
pub mod regime;

pub use engine::{FeatureEngine, LONGEST_LOOKBACK};
pub use patterns::detect_patterns;
pub use reference::ReferenceData;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::UniverseSettings;
use crate::database::Database;
use crate::error::Result;
use crate::types::BarSeries;

/// Outcome of one feature materialisation pass for a symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureRunSummary {
    pub computed: usize,
    pub inserted: u64,
    pub patterns: u64,
    pub latest: Option<DateTime<Utc>>,
}

/// Sector and peer series for `symbol` over `[since, until]`. The symbol itself is
/// never its own peer.
pub async fn load_reference(
    db: &Database,
    universe: &UniverseSettings,
    symbol: &str,
    since: Option<DateTime<Utc>>,
    until: DateTime<Utc>,
    window: usize,
) -> Result<ReferenceData> {
    let sector = match universe.sector_index.as_deref() {
        Some(index) if index != symbol => Some(db.get_bars(index, since, until).await?),
        _ => None,
    };

    let mut peers: Vec<BarSeries> = Vec::new();
    for peer in universe.peers.iter().filter(|p| p.as_str() != symbol) {
        let series = db.get_bars(peer, since, until).await?;
        if !series.is_empty() {
            peers.push(series);
        }
    }

    Ok(ReferenceData::new(sector.as_ref().filter(|s| !s.is_empty()), &peers, window))
}

/// Computes features for every stored bar of `symbol` in `[since, as_of]` and
/// writes them with any detected patterns. Already-stored rows are left as-is.
pub async fn materialize_features(
    db: &Database,
    engine: &FeatureEngine,
    universe: &UniverseSettings,
    symbol: &str,
    since: Option<DateTime<Utc>>,
    as_of: DateTime<Utc>,
) -> Result<FeatureRunSummary> {
    let series = db.get_bars(symbol, since, as_of).await?;
    if series.is_empty() {
        debug!(symbol, "No bars to featurize");
        return Ok(FeatureRunSummary::default());
    }

    let window = engine
        .settings()
        .correlation_window
        .max(engine.settings().relative_strength_window);
    let reference = load_reference(db, universe, symbol, since, as_of, window).await?;

    let vectors = engine.compute_series(&series.bars, &reference);
    let inserted = db.insert_features(&vectors).await?;
    let patterns = db.insert_patterns(&detect_patterns(&series.bars, &vectors)).await?;

    let summary = FeatureRunSummary {
        computed: vectors.len(),
        inserted,
        patterns,
        latest: vectors.last().map(|v| v.timestamp),
    };
    info!(
        symbol,
        computed = summary.computed,
        inserted = summary.inserted,
        patterns = summary.patterns,
        "Materialized features"
    );
    Ok(summary)
}

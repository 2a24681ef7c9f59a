// crates/features/src/lib.rs
//! Feature derivation: turns an aggregated asset report into the
//! categorized inputs the scoring engine consumes.

use common::*;
use std::collections::HashSet;

/// Thresholds on the std-dev of recent total scores
#[derive(Debug, Clone, Copy)]
pub struct RegimeThresholds {
    pub high: f64,
    pub low: f64,
    pub min_points: usize,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            high: 0.30,
            low: 0.05,
            min_points: 3,
        }
    }
}

/// Map a signal source name onto a scoring category.
pub fn categorize_source(source: &str) -> Option<Category> {
    let source = source.to_lowercase();
    if source.contains("social") {
        Some(Category::Social)
    } else if source.contains("news") {
        Some(Category::News)
    } else if source.contains("deriv") {
        Some(Category::Derivatives)
    } else if source.contains("onchain") || source.contains("on-chain") {
        Some(Category::OnChain)
    } else {
        None
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeatureBuilder {
    regime: RegimeThresholds,
}

impl FeatureBuilder {
    pub fn new(regime: RegimeThresholds) -> Self {
        Self { regime }
    }

    pub fn volatility_regime(&self, history: &[f64]) -> Option<VolatilityRegime> {
        if history.len() < self.regime.min_points {
            return None;
        }
        let spread = universe::std_dev(history)?;
        Some(if spread > self.regime.high {
            VolatilityRegime::High
        } else if spread < self.regime.low {
            VolatilityRegime::Low
        } else {
            VolatilityRegime::Normal
        })
    }

    /// Build scoring inputs from a report and the asset's previous snapshot.
    pub fn derive(&self, report: &AssetReport, previous: Option<&SnapshotAsset>) -> FeatureSet {
        let mut counts = CategoryMap::new();
        let mut sources = HashSet::new();

        for signal in &report.top_signals {
            if let Some(category) = categorize_source(&signal.source) {
                *counts.entry(category).or_insert(0.0) += 1.0;
            }
            sources.insert(signal.source.as_str());
        }

        let total = report.top_signals.len().max(1) as f64;
        let mut features = FeatureSet::default();

        for category in [Category::Social, Category::News, Category::Derivatives, Category::OnChain] {
            let share = counts.get(&category).copied().unwrap_or(0.0) / total;
            features.set(category, clamp_signed(share * 2.0 - 1.0));
        }
        features.set(Category::Price, clamp_signed(clamp01(report.score) * 2.0 - 1.0));

        features.diversity = Some((sources.len() as f64 / 3.0).min(1.0));
        features.score_history = previous.map(|p| p.history.clone()).unwrap_or_default();
        features.volatility_regime = self.volatility_regime(&features.score_history);

        tracing::debug!(
            "Derived features for {}: {} signals, {} sources, regime {:?}",
            report.symbol,
            report.top_signals.len(),
            sources.len(),
            features.volatility_regime
        );

        features
    }
}

// crates/universe/src/scoring.rs
use common::config::ScoringSection;
use common::*;
use itertools::Itertools;
use ordered_float::OrderedFloat;

const SEVERITY_NEWS_BOOST: f64 = 0.05;
const HIGH_VOL_DERIVATIVES_BOOST: f64 = 0.05;
const LOW_VOL_BOOST: f64 = 0.04;
const MAX_REASONS: usize = 3;

/// Default category weights
pub fn base_weights() -> CategoryMap {
    CategoryMap::from([
        (Category::Social, 0.25),
        (Category::News, 0.15),
        (Category::Derivatives, 0.25),
        (Category::OnChain, 0.20),
        (Category::Price, 0.15),
    ])
}

/// Add `boost` to each target and take the total evenly from the others,
/// flooring each at zero.
fn shift(weights: &mut CategoryMap, targets: &[Category], boost: f64) {
    let others: Vec<Category> = Category::ALL.into_iter().filter(|c| !targets.contains(c)).collect();
    let deduction = boost * targets.len() as f64 / others.len() as f64;

    for target in targets {
        *weights.entry(*target).or_insert(0.0) += boost;
    }
    for other in others {
        let w = weights.entry(other).or_insert(0.0);
        *w = (*w - deduction).max(0.0);
    }
}

fn normalize(weights: CategoryMap, fallback: &CategoryMap) -> CategoryMap {
    let sum: f64 = Category::ALL.iter().map(|c| weights.get(c).copied().unwrap_or(0.0)).sum();
    if !sum.is_finite() || sum <= 0.0 {
        return fallback.clone();
    }
    Category::ALL
        .iter()
        .map(|c| (*c, weights.get(c).copied().unwrap_or(0.0) / sum))
        .collect()
}

/// Apply the event-severity and volatility-regime shifts to `base`, then
/// normalize to sum 1. Pure; `base` is left untouched.
pub fn adjust_weights(
    base: &CategoryMap,
    event_severity: Option<f64>,
    regime: Option<VolatilityRegime>,
) -> CategoryMap {
    let mut weights: CategoryMap = Category::ALL
        .iter()
        .map(|c| (*c, base.get(c).copied().unwrap_or(0.0).max(0.0)))
        .collect();

    if let Some(severity) = event_severity.filter(|s| *s > 0.0) {
        shift(&mut weights, &[Category::News], severity.min(1.0) * SEVERITY_NEWS_BOOST);
    }

    match regime {
        Some(VolatilityRegime::High) => {
            shift(&mut weights, &[Category::Derivatives], HIGH_VOL_DERIVATIVES_BOOST);
        }
        Some(VolatilityRegime::Low) => {
            shift(&mut weights, &[Category::OnChain, Category::Social], LOW_VOL_BOOST);
        }
        Some(VolatilityRegime::Normal) | None => {}
    }

    normalize(weights, &normalize(base.clone(), &base_weights()))
}

/// Hysteresis bands on the 0-100 scale.
///
/// `bullish_exit`/`bearish_exit` are the plain thresholds; a new label is
/// only entered once the score is `margin` points past them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelBands {
    pub bullish_exit: u8,
    pub bearish_exit: u8,
    pub margin: u8,
}

impl Default for LabelBands {
    fn default() -> Self {
        Self {
            bullish_exit: 55,
            bearish_exit: 45,
            margin: 10,
        }
    }
}

impl LabelBands {
    fn bullish_enter(&self) -> u8 {
        self.bullish_exit.saturating_add(self.margin).min(100)
    }

    fn bearish_enter(&self) -> u8 {
        self.bearish_exit.saturating_sub(self.margin)
    }
}

pub fn determine_label(score01: u8, previous: Option<ScoreLabel>, bands: &LabelBands) -> ScoreLabel {
    match previous {
        Some(ScoreLabel::Bullish) => {
            if score01 <= bands.bearish_enter() {
                ScoreLabel::Bearish
            } else if score01 < bands.bearish_exit {
                ScoreLabel::Neutral
            } else {
                ScoreLabel::Bullish
            }
        }
        Some(ScoreLabel::Bearish) => {
            if score01 >= bands.bullish_enter() {
                ScoreLabel::Bullish
            } else if score01 > bands.bullish_exit {
                ScoreLabel::Neutral
            } else {
                ScoreLabel::Bearish
            }
        }
        Some(ScoreLabel::Neutral) | None => {
            if score01 >= bands.bullish_enter() {
                ScoreLabel::Bullish
            } else if score01 <= bands.bearish_enter() {
                ScoreLabel::Bearish
            } else {
                ScoreLabel::Neutral
            }
        }
    }
}

/// Context carried over from earlier runs
#[derive(Debug, Clone, Default)]
pub struct ScoreContext {
    pub previous_label: Option<ScoreLabel>,
}

fn agreement(subscores: &CategoryMap) -> f64 {
    match subscores.values().copied().map(OrderedFloat).minmax().into_option() {
        Some((min, max)) => clamp01(1.0 - ((max.0 - min.0) / 2.0).max(0.0)),
        None => 1.0,
    }
}

/// Population std-dev; `None` below two points.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some(variance.sqrt())
}

fn stability(history: &[f64]) -> f64 {
    std_dev(history).map(|sd| clamp01(1.0 - sd)).unwrap_or(0.5)
}

fn strength(value: f64) -> &'static str {
    let value = value.abs();
    if value >= 0.6 {
        "strongly"
    } else if value >= 0.25 {
        "moderately"
    } else {
        "slightly"
    }
}

/// Human-readable drivers, ordered by absolute weighted contribution.
pub fn build_reasons(subscores: &CategoryMap, weights: &CategoryMap) -> Vec<String> {
    let reasons: Vec<String> = Category::ALL
        .iter()
        .filter_map(|c| {
            let sub = subscores.get(c).copied().unwrap_or(0.0);
            let weight = weights.get(c).copied().unwrap_or(0.0);
            let contribution = sub * weight;
            (contribution != 0.0).then_some((*c, sub, weight, contribution))
        })
        .sorted_by_key(|(_, _, _, contribution)| std::cmp::Reverse(OrderedFloat(contribution.abs())))
        .take(MAX_REASONS)
        .map(|(category, sub, weight, _)| {
            format!(
                "{} {} {} ({:+.2}, weight {:.0}%)",
                category.label(),
                strength(sub),
                if sub > 0.0 { "positive" } else { "negative" },
                sub,
                weight * 100.0
            )
        })
        .collect();

    if reasons.is_empty() {
        return vec!["all signals neutral".to_string()];
    }
    reasons
}

/// Weighted multi-factor scorer
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    base: CategoryMap,
    bands: LabelBands,
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self {
            base: base_weights(),
            bands: LabelBands::default(),
        }
    }
}

impl ScoringEngine {
    pub fn new(base: CategoryMap, bands: LabelBands) -> Self {
        Self {
            base: normalize(base, &base_weights()),
            bands,
        }
    }

    pub fn from_config(config: &ScoringSection) -> Self {
        let base = CategoryMap::from([
            (Category::Social, config.social_weight),
            (Category::News, config.news_weight),
            (Category::Derivatives, config.derivatives_weight),
            (Category::OnChain, config.onchain_weight),
            (Category::Price, config.price_weight),
        ]);
        Self::new(
            base,
            LabelBands {
                bullish_exit: config.bullish_threshold,
                bearish_exit: config.bearish_threshold,
                margin: config.decisive_margin,
            },
        )
    }

    pub fn base_weights(&self) -> &CategoryMap {
        &self.base
    }

    pub fn compute_score(&self, asset: &str, features: &FeatureSet, context: &ScoreContext) -> ScoreResult {
        let subscores: CategoryMap = Category::ALL
            .iter()
            .map(|c| (*c, features.get(*c).map(clamp_signed).unwrap_or(0.0)))
            .collect();

        let weights = adjust_weights(&self.base, features.event_severity, features.volatility_regime);

        let total_score = clamp_signed(Category::ALL.iter().map(|c| subscores[c] * weights[c]).sum());
        let score01 = (((total_score + 1.0) / 2.0) * 100.0).round().clamp(0.0, 100.0) as u8;

        let provided = Category::ALL.iter().filter(|c| features.get(**c).is_some()).count();
        let coverage = provided as f64 / Category::ALL.len() as f64;
        let confidence_details = ConfidenceDetails {
            coverage,
            diversity: clamp01(features.diversity.unwrap_or(0.5)),
            agreement: agreement(&subscores),
            stability: stability(&features.score_history),
        };

        let confidence = if features.diversity.is_none() && features.score_history.is_empty() {
            coverage
        } else {
            0.4 * confidence_details.coverage
                + 0.2 * confidence_details.diversity
                + 0.2 * confidence_details.agreement
                + 0.2 * confidence_details.stability
        };

        let label = determine_label(score01, context.previous_label, &self.bands);
        let reasons = build_reasons(&subscores, &weights);

        tracing::debug!(
            "Scored {}: total={:.3} score01={} label={:?} confidence={:.2}",
            asset,
            total_score,
            score01,
            label,
            confidence
        );

        ScoreResult {
            asset: asset.to_string(),
            subscores,
            weights,
            total_score,
            score01,
            confidence: clamp01(confidence),
            confidence_details,
            label,
            reasons,
        }
    }
}

// crates/universe/src/lib.rs
//! Which assets the pipeline may touch, and how their features are scored.

pub mod scoring;
pub mod whitelist;

pub use scoring::{
    LabelBands, ScoreContext, ScoringEngine, adjust_weights, base_weights, build_reasons, determine_label, std_dev,
};
pub use whitelist::{AssetWhitelist, HasTicker};

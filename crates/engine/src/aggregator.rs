// crates/engine/src/aggregator.rs
use crate::lexicon::{Lexicon, fallback_rationale, heuristic_confidence};
use crate::summarizer::{Summarizer, Summary};
use adapters::SourceMerger;
use common::config::AggregatorSection;
use common::time::{parse_timestamp_ms, today_utc};
use common::*;
use futures::stream::{self, StreamExt};
use metrics::{counter, histogram};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use universe::AssetWhitelist;

const BASE_METHOD_NOTE: &str = "Aggregated signals from social, news and on-chain sources.";

/// Parameters of one aggregation
#[derive(Debug, Clone, Default)]
pub struct AggregateRequest {
    /// Requested tickers; `None` or nothing valid means the full whitelist.
    pub universe: Option<Vec<String>>,
    /// Keep entries at or after this instant. Unparsable values are ignored.
    pub since: Option<String>,
    /// Report date; defaults to the current UTC date.
    pub date: Option<String>,
}

/// Report plus everything that degraded along the way
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub report: AggregatedReport,
    pub warnings: Vec<String>,
}

/// Heuristic result for one asset, before refinement
#[derive(Debug, Clone)]
struct Draft {
    report: AssetReport,
}

/// Order by engagement desc, then recency desc. Stable.
pub fn select_top_signals(posts: &[NormalizedEntry], limit: usize) -> Vec<TopSignal> {
    let mut ranked: Vec<&NormalizedEntry> = posts.iter().collect();
    ranked.sort_by(|a, b| {
        b.engagement_or_zero()
            .partial_cmp(&a.engagement_or_zero())
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.timestamp_ms().cmp(&a.timestamp_ms()))
    });

    ranked
        .into_iter()
        .take(limit)
        .map(|post| TopSignal {
            source: post.source_name.clone(),
            evidence: post.summary.trim().to_string(),
        })
        .collect()
}

pub struct Aggregator {
    merger: SourceMerger,
    whitelist: AssetWhitelist,
    lexicon: Lexicon,
    summarizer: Option<Arc<dyn Summarizer>>,
    top_signals: usize,
    summarize_timeout: Duration,
    max_concurrent_summaries: usize,
}

impl Aggregator {
    pub fn new(merger: SourceMerger, whitelist: AssetWhitelist) -> Self {
        let defaults = AggregatorSection::default();
        Self {
            merger,
            whitelist,
            lexicon: Lexicon::default(),
            summarizer: None,
            top_signals: defaults.top_signals,
            summarize_timeout: Duration::from_millis(defaults.summarize_timeout_ms),
            max_concurrent_summaries: defaults.max_concurrent_summaries,
        }
    }

    pub fn with_lexicon(mut self, lexicon: Lexicon) -> Self {
        self.lexicon = lexicon;
        self
    }

    /// `None` runs heuristic-only.
    pub fn with_summarizer(mut self, summarizer: Option<Arc<dyn Summarizer>>) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn with_settings(mut self, settings: &AggregatorSection) -> Self {
        self.top_signals = settings.top_signals.max(1);
        self.summarize_timeout = Duration::from_millis(settings.summarize_timeout_ms);
        self.max_concurrent_summaries = settings.max_concurrent_summaries.max(1);
        self
    }

    pub fn whitelist(&self) -> &AssetWhitelist {
        &self.whitelist
    }

    /// Fetch from every source and build the day's report. Never fails:
    /// degraded sources and summaries show up as warnings and in the note.
    pub async fn aggregate(&self, request: &AggregateRequest) -> Aggregation {
        let start = Instant::now();
        let merged = self.merger.fetch_all().await;

        let mut aggregation = self.aggregate_entries(merged.entries, request).await;

        let mut warnings = merged.warnings;
        warnings.append(&mut aggregation.warnings);
        aggregation.warnings = warnings;

        let elapsed = start.elapsed();
        histogram!(common::telemetry::AGGREGATION_DURATION_MS).record(elapsed.as_millis() as f64);
        info!(
            "Aggregated {} assets for {} in {:?} ({} warnings)",
            aggregation.report.assets.len(),
            aggregation.report.date,
            elapsed,
            aggregation.warnings.len()
        );

        aggregation
    }

    /// Build a report from already merged entries.
    pub async fn aggregate_entries(&self, entries: Vec<NormalizedEntry>, request: &AggregateRequest) -> Aggregation {
        let universe = self.whitelist.resolve_universe(request.universe.as_deref());
        let date = request.date.clone().unwrap_or_else(today_utc);

        let since = request.since.as_deref().and_then(|raw| {
            let parsed = parse_timestamp_ms(raw);
            if parsed.is_none() {
                warn!("Ignoring unparsable since value: {}", raw);
            }
            parsed
        });

        let survivors: Vec<NormalizedEntry> = self
            .whitelist
            .filter(entries)
            .into_iter()
            .filter(|e| universe.iter().any(|t| t.eq_ignore_ascii_case(&e.asset)))
            .filter(|e| since.is_none_or(|s| e.timestamp_ms() >= s))
            .collect();

        if survivors.is_empty() {
            debug!("No entries survived filtering for {}", date);
            return Aggregation {
                report: AggregatedReport::empty(date, universe),
                warnings: Vec::new(),
            };
        }

        let mut buckets: HashMap<String, Vec<NormalizedEntry>> = HashMap::new();
        for entry in survivors {
            buckets.entry(entry.asset.to_uppercase()).or_default().push(entry);
        }

        let drafts: Vec<Draft> = universe
            .iter()
            .filter_map(|symbol| {
                let posts = buckets.get(symbol).filter(|p| !p.is_empty())?;
                Some(self.draft(symbol, posts))
            })
            .collect();

        let refined: Vec<(AssetReport, Option<String>)> = stream::iter(drafts)
            .map(|draft| self.refine(draft))
            .buffered(self.max_concurrent_summaries)
            .collect()
            .await;

        let mut fallback_assets = Vec::new();
        let mut warnings = Vec::new();
        let mut assets = Vec::with_capacity(refined.len());

        for (report, failure) in refined {
            if let Some(reason) = failure {
                fallback_assets.push(report.symbol.clone());
                if !reason.is_empty() {
                    warnings.push(format!("summary for {} fell back: {}", report.symbol, reason));
                }
            }
            assets.push(report.clamped());
        }

        let mut assets = self.whitelist.filter(assets);
        if assets.is_empty() {
            return Aggregation {
                report: AggregatedReport::empty(date, universe),
                warnings,
            };
        }

        assets.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

        let mut method_note = BASE_METHOD_NOTE.to_string();
        if !fallback_assets.is_empty() {
            method_note.push_str(&format!(
                " Summarizer fallback for {}; heuristic rationale used.",
                fallback_assets.join(", ")
            ));
        }

        Aggregation {
            report: AggregatedReport {
                date,
                universe,
                assets,
                method_note,
            },
            warnings,
        }
    }

    fn draft(&self, symbol: &str, posts: &[NormalizedEntry]) -> Draft {
        let top_signals = select_top_signals(posts, self.top_signals);
        let (score, sentiment) = self.lexicon.score(&top_signals);
        let confidence = heuristic_confidence(posts);

        debug!(
            "{}: {} posts, heuristic score {:.2} ({:?}), confidence {:.2}",
            symbol,
            posts.len(),
            score,
            sentiment,
            confidence
        );

        Draft {
            report: AssetReport {
                symbol: symbol.to_string(),
                sentiment,
                score,
                confidence,
                rationale: fallback_rationale(symbol, &top_signals),
                top_signals,
            },
        }
    }

    /// Returns the refined report and, on fallback, why. An empty reason
    /// means no summarizer is configured.
    async fn refine(&self, draft: Draft) -> (AssetReport, Option<String>) {
        let mut report = draft.report;

        let Some(summarizer) = self.summarizer.as_ref() else {
            counter!(common::telemetry::SUMMARIZER_FALLBACKS).increment(1);
            return (report, Some(String::new()));
        };

        let outcome = tokio::time::timeout(
            self.summarize_timeout,
            summarizer.summarize(&report.symbol, &report.top_signals),
        )
        .await
        .map_err(|_| Error::Timeout(format!("summary after {}ms", self.summarize_timeout.as_millis())))
        .and_then(|result| result);

        match outcome {
            Ok(summary) => {
                apply_summary(&mut report, summary);
                (report, None)
            }
            Err(e) => {
                warn!("Summarizer failed for {}: {}", report.symbol, e);
                counter!(common::telemetry::SUMMARIZER_FALLBACKS).increment(1);
                (report, Some(e.to_string()))
            }
        }
    }
}

/// Override heuristic fields with whatever the summary carries.
fn apply_summary(report: &mut AssetReport, summary: Summary) {
    if !summary.rationale.trim().is_empty() {
        report.rationale = summary.rationale;
    }
    if let Some(sentiment) = summary.sentiment {
        report.sentiment = sentiment;
    }
    if let Some(score) = summary.score {
        report.score = clamp01(score);
    }
    if let Some(confidence) = summary.confidence {
        report.confidence = clamp01(confidence);
    }
}

// crates/engine/src/lexicon.rs
use common::config::LexiconSection;
use common::*;
use std::collections::HashSet;

const KEYWORD_STEP: f64 = 0.08;
const ENGAGEMENT_SATURATION: f64 = 1500.0;
const SOURCE_SATURATION: f64 = 3.0;

/// Keyword tally used when no summarizer answer is available.
#[derive(Debug, Clone)]
pub struct Lexicon {
    positive: Vec<String>,
    negative: Vec<String>,
}

impl Default for Lexicon {
    fn default() -> Self {
        Self::from_config(&LexiconSection::default())
    }
}

impl Lexicon {
    pub fn new<P, N>(positive: P, negative: N) -> Self
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
        N: IntoIterator,
        N::Item: AsRef<str>,
    {
        fn prepare<I>(words: I) -> Vec<String>
        where
            I: IntoIterator,
            I::Item: AsRef<str>,
        {
            words
                .into_iter()
                .map(|w| w.as_ref().trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect()
        }

        Self {
            positive: prepare(positive),
            negative: prepare(negative),
        }
    }

    pub fn from_config(section: &LexiconSection) -> Self {
        Self::new(&section.positive, &section.negative)
    }

    /// Net keyword hits in one piece of text. Each keyword counts once.
    pub fn bias(&self, text: &str) -> i32 {
        let lower = text.to_lowercase();
        let pos = self.positive.iter().filter(|k| lower.contains(k.as_str())).count() as i32;
        let neg = self.negative.iter().filter(|k| lower.contains(k.as_str())).count() as i32;
        pos - neg
    }

    /// Score around 0.5, moved 0.08 per net hit and clamped to [0,1].
    pub fn score(&self, signals: &[TopSignal]) -> (f64, Sentiment) {
        let hits: i32 = signals.iter().map(|s| self.bias(&s.evidence)).sum();
        let score = clamp01(0.5 + hits as f64 * KEYWORD_STEP);
        (score, Sentiment::from_score(score))
    }
}

/// Confidence from total engagement and source spread over the whole bucket.
pub fn heuristic_confidence(posts: &[NormalizedEntry]) -> f64 {
    let engagement: f64 = posts.iter().map(NormalizedEntry::engagement_or_zero).sum();
    let sources: HashSet<&str> = posts.iter().map(|p| p.source_name.as_str()).collect();

    let engagement_factor = clamp01(engagement / ENGAGEMENT_SATURATION);
    let source_factor = clamp01(sources.len() as f64 / SOURCE_SATURATION);
    clamp01(0.3 + engagement_factor * 0.55 + source_factor * 0.25)
}

/// Rationale used when no summarizer answer is available.
pub fn fallback_rationale(symbol: &str, signals: &[TopSignal]) -> String {
    if signals.is_empty() {
        return format!("No recent signals for {}.", symbol);
    }
    let samples = signals
        .iter()
        .take(3)
        .map(|s| format!("{}: {}", s.source, s.evidence))
        .collect::<Vec<_>>()
        .join(" | ");
    format!("Heuristic summary for {}: {}", symbol, samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(source: &str, evidence: &str) -> TopSignal {
        TopSignal {
            source: source.to_string(),
            evidence: evidence.to_string(),
        }
    }

    fn post(source: &str, engagement: Option<f64>) -> NormalizedEntry {
        NormalizedEntry {
            id: source.to_string(),
            source_kind: SourceKind::Social,
            source_name: source.to_string(),
            asset: "BTC".to_string(),
            title: None,
            summary: "x".to_string(),
            url: None,
            timestamp: "2025-03-01T00:00:00Z".to_string(),
            engagement,
        }
    }

    #[test]
    fn test_keyword_tally() {
        let lexicon = Lexicon::new(["rally", "surge"], ["dump"]);
        let (score, sentiment) = lexicon.score(&[
            signal("a", "BTC rally continues"),
            signal("b", "Volume SURGE after rally"),
        ]);
        assert!((score - 0.74).abs() < 1e-9);
        assert_eq!(sentiment, Sentiment::Bullish);

        let (score, sentiment) = lexicon.score(&[signal("a", "whales dump"), signal("b", "quiet day")]);
        assert!((score - 0.42).abs() < 1e-9);
        assert_eq!(sentiment, Sentiment::Neutral);
    }

    #[test]
    fn test_score_clamped() {
        let lexicon = Lexicon::new(Vec::<String>::new(), ["dump", "drop", "sink", "bear"]);
        let signals: Vec<TopSignal> = (0..5).map(|i| signal(&i.to_string(), "bear dump drop sink")).collect();
        assert_eq!(lexicon.score(&signals), (0.0, Sentiment::Bearish));
    }

    #[test]
    fn test_default_lexicon_is_bilingual() {
        let lexicon = Lexicon::default();
        assert!(lexicon.bias("Kurs steigt stark") > 0);
        assert!(lexicon.bias("Exchange hack triggers outflow") < 0);
    }

    #[test]
    fn test_heuristic_confidence() {
        assert!((heuristic_confidence(&[post("a", None)]) - (0.3 + 0.25 / 3.0)).abs() < 1e-9);

        let saturated = [post("a", Some(1000.0)), post("b", Some(900.0)), post("c", None)];
        assert_eq!(heuristic_confidence(&saturated), 1.0);
    }

    #[test]
    fn test_fallback_rationale_uses_three_signals() {
        let signals = [signal("a", "one"), signal("b", "two"), signal("c", "three"), signal("d", "four")];
        assert_eq!(
            fallback_rationale("ETH", &signals),
            "Heuristic summary for ETH: a: one | b: two | c: three"
        );
        assert_eq!(fallback_rationale("ETH", &[]), "No recent signals for ETH.");
    }
}

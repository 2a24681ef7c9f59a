// crates/adapters/src/normalize.rs
use common::time::{now_rfc3339, parse_timestamp, to_rfc3339};
use common::{NormalizedEntry, SourceKind};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Entry as delivered by a feed, before normalization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEntry {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, alias = "type")]
    pub kind: Option<SourceKind>,
    pub asset: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub engagement: Option<f64>,
    #[serde(default, alias = "externalId")]
    pub external_id: Option<String>,
}

const ASSET_ALIASES: &[(&str, &str)] = &[
    ("BITCOIN", "BTC"),
    ("ETHEREUM", "ETH"),
    ("SOLANA", "SOL"),
    ("RIPPLE", "XRP"),
];

pub fn normalize_asset(asset: &str) -> Option<String> {
    let upper = asset.trim().to_uppercase();
    if upper.is_empty() {
        return None;
    }
    let resolved = ASSET_ALIASES
        .iter()
        .find(|(alias, _)| *alias == upper)
        .map(|(_, ticker)| ticker.to_string())
        .unwrap_or(upper);
    Some(resolved)
}

/// Missing timestamps become "now"; unparsable ones are kept verbatim so
/// ordering treats them as epoch 0.
pub fn normalize_timestamp(value: Option<&str>) -> String {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => now_rfc3339(),
        Some(raw) => parse_timestamp(raw).map(to_rfc3339).unwrap_or_else(|| raw.to_string()),
    }
}

fn clean(value: Option<&String>) -> Option<String> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty()).map(str::to_string)
}

pub fn entry_id(
    source: &str,
    asset: &str,
    timestamp: &str,
    external_id: Option<&str>,
    url: Option<&str>,
    summary: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(
        format!(
            "{}|{}|{}|{}|{}|{}",
            source,
            asset,
            timestamp,
            external_id.unwrap_or(""),
            url.unwrap_or(""),
            summary
        )
        .as_bytes(),
    );
    hex::encode(hasher.finalize())
}

/// Normalize a raw feed record. Returns `None` for records without an
/// asset or without any text.
pub fn normalize_entry(raw: &RawEntry, default_source: &str, default_kind: SourceKind) -> Option<NormalizedEntry> {
    let asset = normalize_asset(&raw.asset)?;
    let title = clean(raw.title.as_ref());
    let summary = clean(raw.summary.as_ref()).or_else(|| title.clone())?;
    let source_name = clean(raw.source.as_ref()).unwrap_or_else(|| default_source.to_string());
    let url = clean(raw.url.as_ref());
    let timestamp = normalize_timestamp(raw.timestamp.as_deref());
    let engagement = raw.engagement.filter(|e| e.is_finite() && *e >= 0.0);

    let id = entry_id(
        &source_name,
        &asset,
        &timestamp,
        raw.external_id.as_deref(),
        url.as_deref(),
        &summary,
    );

    Some(NormalizedEntry {
        id,
        source_kind: raw.kind.unwrap_or(default_kind),
        source_name,
        asset,
        title,
        summary,
        url,
        timestamp,
        engagement,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(asset: &str, summary: Option<&str>) -> RawEntry {
        RawEntry {
            asset: asset.to_string(),
            summary: summary.map(str::to_string),
            timestamp: Some("2025-03-01T12:00:00Z".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_aliases_and_case() {
        assert_eq!(normalize_asset(" bitcoin "), Some("BTC".to_string()));
        assert_eq!(normalize_asset("eth"), Some("ETH".to_string()));
        assert_eq!(normalize_asset("doge"), Some("DOGE".to_string()));
        assert_eq!(normalize_asset("  "), None);
    }

    #[test]
    fn test_summary_falls_back_to_title() {
        let mut entry = raw("SOL", Some("   "));
        entry.title = Some("Solana TVL record".to_string());
        let normalized = normalize_entry(&entry, "news-wire", SourceKind::News).unwrap();
        assert_eq!(normalized.summary, "Solana TVL record");
        assert_eq!(normalized.source_name, "news-wire");
        assert_eq!(normalized.source_kind, SourceKind::News);

        assert!(normalize_entry(&raw("SOL", None), "news-wire", SourceKind::News).is_none());
    }

    #[test]
    fn test_timestamp_handling() {
        assert_eq!(
            normalize_timestamp(Some("2025-03-01T13:00:00+01:00")),
            "2025-03-01T12:00:00.000Z"
        );
        assert_eq!(normalize_timestamp(Some("last tuesday")), "last tuesday");
        assert!(parse_timestamp(&normalize_timestamp(None)).is_some());
    }

    #[test]
    fn test_id_is_deterministic() {
        let a = normalize_entry(&raw("BTC", Some("ETF inflows")), "news", SourceKind::News).unwrap();
        let b = normalize_entry(&raw("BTC", Some("ETF inflows")), "news", SourceKind::News).unwrap();
        let c = normalize_entry(&raw("BTC", Some("ETF outflows")), "news", SourceKind::News).unwrap();
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.id.len(), 64);
    }

    #[test]
    fn test_negative_engagement_dropped() {
        let mut entry = raw("ETH", Some("fees low"));
        entry.engagement = Some(-5.0);
        let normalized = normalize_entry(&entry, "social", SourceKind::Social).unwrap();
        assert_eq!(normalized.engagement, None);
    }

    #[test]
    fn test_kind_alias_deserializes() {
        let entry: RawEntry = serde_json::from_str(
            r#"{"type":"onchain","asset":"XRP","summary":"Bridge inflows","externalId":"x-1"}"#,
        )
        .unwrap();
        assert_eq!(entry.kind, Some(SourceKind::Onchain));
        assert_eq!(entry.external_id.as_deref(), Some("x-1"));
    }
}

// crates/universe/src/whitelist.rs
use common::*;
use std::collections::HashMap;

/// Anything keyed by an asset ticker
pub trait HasTicker {
    fn ticker(&self) -> &str;
}

impl HasTicker for NormalizedEntry {
    fn ticker(&self) -> &str {
        &self.asset
    }
}

impl HasTicker for AssetReport {
    fn ticker(&self) -> &str {
        &self.symbol
    }
}

impl HasTicker for ScoreResult {
    fn ticker(&self) -> &str {
        &self.asset
    }
}

impl HasTicker for SnapshotAsset {
    fn ticker(&self) -> &str {
        &self.result.asset
    }
}

impl HasTicker for String {
    fn ticker(&self) -> &str {
        self
    }
}

/// Fixed, ordered, case-insensitive set of allowed tickers
#[derive(Debug, Clone)]
pub struct AssetWhitelist {
    order: Vec<String>,
    index: HashMap<String, usize>,
}

impl AssetWhitelist {
    pub fn new<I, S>(tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut order = Vec::new();
        let mut index = HashMap::new();

        for ticker in tickers {
            let ticker = ticker.as_ref().trim().to_uppercase();
            if ticker.is_empty() || index.contains_key(&ticker) {
                continue;
            }
            index.insert(ticker.clone(), order.len());
            order.push(ticker);
        }

        Self { order, index }
    }

    /// Enabled definitions only, in configured order.
    pub fn from_definitions(definitions: &[AssetDefinition]) -> Self {
        Self::new(definitions.iter().filter(|d| d.enabled).map(|d| d.ticker.as_str()))
    }

    /// Canonical order
    pub fn tickers(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn position(&self, ticker: &str) -> Option<usize> {
        self.index.get(&ticker.trim().to_uppercase()).copied()
    }

    pub fn is_allowed(&self, ticker: &str) -> bool {
        self.position(ticker).is_some()
    }

    pub fn filter<T: HasTicker>(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().filter(|item| self.is_allowed(item.ticker())).collect()
    }

    /// Order by whitelist index; unknown tickers go last. Stable.
    pub fn sort_by_order<T: HasTicker>(&self, items: &mut [T]) {
        items.sort_by_key(|item| self.position(item.ticker()).unwrap_or(usize::MAX));
    }

    /// Restrict a stored snapshot to the current whitelist. Scored assets
    /// come back in whitelist order; report assets keep their score order.
    pub fn restrict_snapshot(&self, mut snapshot: Snapshot) -> Snapshot {
        snapshot.assets = self.filter(snapshot.assets);
        self.sort_by_order(&mut snapshot.assets);

        snapshot.report.assets = self.filter(snapshot.report.assets);
        snapshot.report.universe = self.filter(snapshot.report.universe);
        self.sort_by_order(&mut snapshot.report.universe);
        snapshot
    }

    /// Requested tickers (uppercased, deduplicated, whitelisted) in the order
    /// given, or the full whitelist when nothing valid was requested.
    pub fn resolve_universe(&self, requested: Option<&[String]>) -> Vec<String> {
        let mut resolved: Vec<String> = Vec::new();

        for ticker in requested.unwrap_or_default() {
            let ticker = ticker.trim().to_uppercase();
            if self.is_allowed(&ticker) && !resolved.contains(&ticker) {
                resolved.push(ticker);
            }
        }

        if resolved.is_empty() {
            return self.order.clone();
        }
        resolved
    }
}

impl Default for AssetWhitelist {
    fn default() -> Self {
        Self::from_definitions(&common::config::default_assets())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tickers(items: &[String]) -> Vec<&str> {
        items.iter().map(|s| s.as_str()).collect()
    }

    #[test]
    fn test_case_insensitive_membership() {
        let whitelist = AssetWhitelist::new(["BTC", "eth", "SOL"]);
        assert!(whitelist.is_allowed("btc"));
        assert!(whitelist.is_allowed(" ETH "));
        assert!(!whitelist.is_allowed("DOGE"));
        assert_eq!(whitelist.position("sol"), Some(2));
    }

    #[test]
    fn test_disabled_definitions_excluded() {
        let mut defs = vec![AssetDefinition::new("BTC", "Bitcoin"), AssetDefinition::new("ETH", "Ethereum")];
        defs[0].enabled = false;
        let whitelist = AssetWhitelist::from_definitions(&defs);
        assert_eq!(tickers(whitelist.tickers()), vec!["ETH"]);
    }

    #[test]
    fn test_filter_and_sort_idempotent() {
        let whitelist = AssetWhitelist::new(["BTC", "ETH", "SOL", "XRP"]);
        let items: Vec<String> = ["xrp", "DOGE", "BTC", "sol", "PEPE", "ETH"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let mut once = whitelist.filter(items);
        whitelist.sort_by_order(&mut once);
        assert_eq!(tickers(&once), vec!["BTC", "ETH", "sol", "xrp"]);

        let mut twice = whitelist.filter(once.clone());
        whitelist.sort_by_order(&mut twice);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_unknown_sort_last_stably() {
        let whitelist = AssetWhitelist::new(["BTC", "ETH"]);
        let mut items: Vec<String> = ["DOGE", "ETH", "PEPE", "BTC"].iter().map(|s| s.to_string()).collect();
        whitelist.sort_by_order(&mut items);
        assert_eq!(tickers(&items), vec!["BTC", "ETH", "DOGE", "PEPE"]);
    }

    #[test]
    fn test_resolve_universe() {
        let whitelist = AssetWhitelist::default();
        let requested = vec!["sol".to_string(), "DOGE".to_string(), "btc".to_string(), "SOL".to_string()];
        assert_eq!(tickers(&whitelist.resolve_universe(Some(&requested))), vec!["SOL", "BTC"]);

        let invalid = vec!["DOGE".to_string()];
        assert_eq!(
            tickers(&whitelist.resolve_universe(Some(&invalid))),
            vec!["BTC", "ETH", "SOL", "XRP"]
        );
        assert_eq!(whitelist.resolve_universe(None).len(), 4);
    }
}

use crate::types::{Denom, Denoms};
use std::collections::BTreeMap;

/// Maps chain denoms to human-readable tickers. Built once at startup
/// from config and passed by reference wherever labels are rendered.
#[derive(Debug, Clone, Default)]
pub struct SymbolRegistry {
    map: BTreeMap<Denom, String>,
}

impl SymbolRegistry {
    pub fn new(overrides: BTreeMap<String, String>) -> Self {
        Self { map: overrides }
    }

    pub fn register(&mut self, denom: impl Into<Denom>, symbol: impl Into<String>) {
        self.map.insert(denom.into(), symbol.into());
    }

    pub fn symbol(&self, denom: &str) -> String {
        if let Some(symbol) = self.map.get(denom) {
            return symbol.clone();
        }
        // ukuji -> KUJI, factory/.../uusk -> UUSK stays explicit via overrides.
        denom
            .strip_prefix('u')
            .unwrap_or(denom)
            .to_uppercase()
    }

    pub fn pair_label(&self, denoms: &Denoms) -> String {
        format!("{}/{}", self.symbol(&denoms.base), self.symbol(&denoms.quote))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_denom_heuristic() {
        let registry = SymbolRegistry::default();
        assert_eq!(registry.symbol("ukuji"), "KUJI");
        assert_eq!(registry.symbol("wbtc"), "WBTC");
    }

    #[test]
    fn overrides_win() {
        let mut registry = SymbolRegistry::default();
        registry.register("factory/kujira1abc/uusk", "USK");
        assert_eq!(registry.symbol("factory/kujira1abc/uusk"), "USK");
        let denoms = Denoms {
            base: "ukuji".to_string(),
            quote: "factory/kujira1abc/uusk".to_string(),
        };
        assert_eq!(registry.pair_label(&denoms), "KUJI/USK");
    }
}

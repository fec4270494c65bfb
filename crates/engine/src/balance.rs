use anyhow::{Context, Result};
use shared::types::{Coin, Contract};

/// Base/quote holdings in human units. Pure value object; the step
/// executor rebuilds it from the venue balance snapshot every time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradingBalance {
    pub base_amount: f64,
    pub quote_amount: f64,
}

impl TradingBalance {
    pub fn new(base_amount: f64, quote_amount: f64) -> Self {
        Self {
            base_amount,
            quote_amount,
        }
    }

    pub fn from_coins(coins: &[Coin], contract: &Contract) -> Result<Self> {
        let scale = contract.amount_scale();
        let mut base_amount = None;
        let mut quote_amount = None;
        for coin in coins {
            if coin.denom != contract.denoms.base && coin.denom != contract.denoms.quote {
                continue;
            }
            let amount = coin
                .amount
                .parse::<f64>()
                .with_context(|| format!("malformed balance amount for {}: {}", coin.denom, coin.amount))?
                / scale;
            if coin.denom == contract.denoms.base {
                base_amount = Some(amount);
            } else {
                quote_amount = Some(amount);
            }
        }
        let base_amount = base_amount
            .with_context(|| format!("no balance for base denom {}", contract.denoms.base))?;
        let quote_amount = quote_amount
            .with_context(|| format!("no balance for quote denom {}", contract.denoms.quote))?;
        Ok(Self {
            base_amount,
            quote_amount,
        })
    }

    /// Share of total value held in the base asset at the given price.
    pub fn rate(&self, price: f64) -> f64 {
        let base_value = self.base_amount * price;
        base_value / (base_value + self.quote_amount)
    }

    /// Total value in quote units at the given price.
    pub fn value(&self, price: f64) -> f64 {
        self.base_amount * price + self.quote_amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::types::Denoms;

    fn contract(decimal_delta: i32) -> Contract {
        Contract {
            address: "kujira1pair".to_string(),
            denoms: Denoms {
                base: "ukuji".to_string(),
                quote: "uusdc".to_string(),
            },
            price_decimals: 3,
            decimal_delta,
            is_bootstrapping: false,
            owner: String::new(),
        }
    }

    #[test]
    fn rate_and_value_at_price() {
        let balance = TradingBalance::new(10.0, 10.0);
        assert_eq!(balance.value(100.0), 1010.0);
        assert!((balance.rate(100.0) - 1000.0 / 1010.0).abs() < 1e-12);
    }

    #[test]
    fn rate_grows_with_price() {
        let balance = TradingBalance::new(5.0, 100.0);
        let mut prev = balance.rate(0.5);
        for price in [1.0, 2.0, 4.0, 8.0] {
            let rate = balance.rate(price);
            assert!(rate > prev);
            prev = rate;
        }
    }

    #[test]
    fn value_grows_with_price() {
        let balance = TradingBalance::new(5.0, 100.0);
        let mut prev = balance.value(0.5);
        for price in [1.0, 2.0, 4.0, 8.0] {
            let value = balance.value(price);
            assert!(value > prev);
            prev = value;
        }
    }

    #[test]
    fn from_coins_scales_and_ignores_other_denoms() {
        let coins = vec![
            Coin {
                denom: "ukuji".to_string(),
                amount: "2500000".to_string(),
            },
            Coin {
                denom: "uusdc".to_string(),
                amount: "7000000".to_string(),
            },
            Coin {
                denom: "uatom".to_string(),
                amount: "999".to_string(),
            },
        ];
        let balance = TradingBalance::from_coins(&coins, &contract(0)).expect("parse coins");
        assert_eq!(balance.base_amount, 2.5);
        assert_eq!(balance.quote_amount, 7.0);
    }

    #[test]
    fn from_coins_requires_both_denoms() {
        let base_only = vec![Coin {
            denom: "ukuji".to_string(),
            amount: "2500000".to_string(),
        }];
        let err = TradingBalance::from_coins(&base_only, &contract(0)).expect_err("missing quote");
        assert!(err.to_string().contains("uusdc"));
        assert!(TradingBalance::from_coins(&[], &contract(0)).is_err());
    }

    #[test]
    fn from_coins_rejects_malformed_amount() {
        let coins = vec![Coin {
            denom: "ukuji".to_string(),
            amount: "not-a-number".to_string(),
        }];
        assert!(TradingBalance::from_coins(&coins, &contract(0)).is_err());
    }
}

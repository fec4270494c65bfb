use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Denom = String;
pub type OrderId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderState {
    Open,
    Partial,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Coin {
    pub denom: Denom,
    pub amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: OrderId,
    pub side: Side,
    pub price: f64,
    pub original_amount: f64,
    pub filled_amount: f64,
    pub remaining_amount: f64,
}

impl Order {
    pub fn state(&self) -> OrderState {
        if self.filled_amount > 0.0 && self.remaining_amount == 0.0 {
            OrderState::Closed
        } else if self.filled_amount > 0.0 {
            OrderState::Partial
        } else {
            OrderState::Open
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Denoms {
    pub base: Denom,
    pub quote: Denom,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contract {
    pub address: String,
    pub denoms: Denoms,
    pub price_decimals: u32,
    #[serde(default)]
    pub decimal_delta: i32,
    #[serde(default)]
    pub is_bootstrapping: bool,
    #[serde(default)]
    pub owner: String,
}

impl Contract {
    // Raw chain amounts carry 6 + decimal_delta decimals.
    pub fn amount_scale(&self) -> f64 {
        10f64.powi(6 + self.decimal_delta)
    }
}

// amount is base units for a Sell, quote units for a Buy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderRequest {
    pub id: String,
    pub contract: String,
    pub side: Side,
    pub price: f64,
    pub amount: f64,
}

impl OrderRequest {
    pub fn new(contract: String, side: Side, price: f64, amount: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            contract,
            side,
            price,
            amount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(filled: f64, remaining: f64) -> Order {
        Order {
            id: "1".to_string(),
            side: Side::Buy,
            price: 1.0,
            original_amount: filled + remaining,
            filled_amount: filled,
            remaining_amount: remaining,
        }
    }

    #[test]
    fn order_state_derivation() {
        assert_eq!(order(0.0, 10.0).state(), OrderState::Open);
        assert_eq!(order(4.0, 6.0).state(), OrderState::Partial);
        assert_eq!(order(10.0, 0.0).state(), OrderState::Closed);
    }

    #[test]
    fn amount_scale_honors_decimal_delta() {
        let mut contract = Contract {
            address: "kujira1pair".to_string(),
            denoms: Denoms {
                base: "ukuji".to_string(),
                quote: "uusdc".to_string(),
            },
            price_decimals: 3,
            decimal_delta: 0,
            is_bootstrapping: false,
            owner: String::new(),
        };
        assert_eq!(contract.amount_scale(), 1_000_000.0);
        contract.decimal_delta = 12;
        assert_eq!(contract.amount_scale(), 1e18);
    }
}

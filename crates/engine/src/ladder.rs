use shared::types::{Contract, OrderRequest, Side};
use tracing::warn;

use crate::balance::TradingBalance;

/// One price level of the rebalancing ladder before it is turned into
/// order requests.
#[derive(Debug, Clone, PartialEq)]
pub struct LadderEntry {
    pub price: f64,
    pub target_base: f64,
    /// Base quantity to trade to reach the target at this price;
    /// positive buys, negative sells.
    pub dq: f64,
    pub side: Side,
    pub consistent: bool,
}

pub fn ladder_entries(
    pair: &str,
    market_price: f64,
    balance: &TradingBalance,
    offsets: &[f64],
    target_rate: f64,
) -> Vec<LadderEntry> {
    offsets
        .iter()
        .map(|&offset| {
            let price = market_price * (1.0 + offset);
            let value = balance.value(price);
            let target_base = value * target_rate / price;
            let dq = target_base - balance.base_amount;
            let side = if dq > 0.0 { Side::Buy } else { Side::Sell };
            // An offset above market normally sells and one below buys;
            // the product is negative when that holds.
            let consistent = offset * dq < 0.0;
            if !consistent {
                warn!(
                    pair = %pair,
                    offset,
                    dq,
                    "ladder level trades against its offset direction"
                );
            }
            LadderEntry {
                price,
                target_base,
                dq,
                side,
                consistent,
            }
        })
        .collect()
}

/// Builds the order batch for one reconciliation: sells nearest to
/// market first, then buys nearest first, with incremental amounts so
/// each level only adds what the previous levels did not cover.
pub fn plan(
    contract: &Contract,
    pair: &str,
    market_price: f64,
    balance: &TradingBalance,
    offsets: &[f64],
    target_rate: f64,
    order_min: f64,
) -> Vec<OrderRequest> {
    let entries = ladder_entries(pair, market_price, balance, offsets, target_rate);

    let mut sells: Vec<&LadderEntry> = entries
        .iter()
        .filter(|entry| entry.side == Side::Sell && entry.dq.abs() >= order_min)
        .collect();
    let mut buys: Vec<&LadderEntry> = entries
        .iter()
        .filter(|entry| entry.side == Side::Buy && entry.dq.abs() >= order_min)
        .collect();
    sells.sort_by(|a, b| a.price.total_cmp(&b.price));
    buys.sort_by(|a, b| b.price.total_cmp(&a.price));

    let mut requests = Vec::with_capacity(sells.len() + buys.len());
    push_side(&mut requests, contract, Side::Sell, &sells);
    push_side(&mut requests, contract, Side::Buy, &buys);
    requests
}

fn push_side(
    requests: &mut Vec<OrderRequest>,
    contract: &Contract,
    side: Side,
    entries: &[&LadderEntry],
) {
    let mut previous = 0.0;
    for entry in entries {
        let magnitude = entry.dq.abs();
        let increment = magnitude - previous;
        previous = magnitude;
        if increment <= 0.0 {
            continue;
        }
        let price = round_price(entry.price, contract.price_decimals);
        let amount = match side {
            Side::Sell => increment,
            Side::Buy => increment * price,
        };
        if amount <= 0.0 {
            continue;
        }
        requests.push(OrderRequest::new(
            contract.address.clone(),
            side,
            price,
            amount,
        ));
    }
}

fn round_price(price: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (price * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::types::Denoms;

    fn contract() -> Contract {
        Contract {
            address: "kujira1pair".to_string(),
            denoms: Denoms {
                base: "ukuji".to_string(),
                quote: "uusk".to_string(),
            },
            price_decimals: 3,
            decimal_delta: 0,
            is_bootstrapping: false,
            owner: String::new(),
        }
    }

    /// Base amount a request represents, regardless of side.
    fn base_amount(request: &OrderRequest) -> f64 {
        match request.side {
            Side::Sell => request.amount,
            Side::Buy => request.amount / request.price,
        }
    }

    #[test]
    fn offset_above_market_sells_and_below_buys() {
        let balance = TradingBalance::new(10.0, 10.0);
        // Target equals the current rate, so each level nudges back
        // toward it from the offset price.
        let target = balance.rate(100.0);
        let entries = ladder_entries("KUJI/USK", 100.0, &balance, &[0.01, -0.01], target);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].side, Side::Sell);
        assert!((entries[0].price - 101.0).abs() < 1e-9);
        assert!(entries[0].consistent);
        assert_eq!(entries[1].side, Side::Buy);
        assert!((entries[1].price - 99.0).abs() < 1e-9);
        assert!(entries[1].consistent);
    }

    #[test]
    fn drops_levels_below_order_min() {
        let balance = TradingBalance::new(10.0, 10.0);
        let target = balance.rate(100.0);
        // dq at ±1% offsets is around a thousandth of a unit here.
        let requests = plan(
            &contract(),
            "KUJI/USK",
            100.0,
            &balance,
            &[0.01, -0.01],
            target,
            1.0,
        );
        assert!(requests.is_empty());
    }

    #[test]
    fn sells_ascend_and_buys_descend() {
        let balance = TradingBalance::new(100.0, 10_000.0);
        let requests = plan(
            &contract(),
            "KUJI/USK",
            100.0,
            &balance,
            &[-0.03, -0.02, -0.01, 0.01, 0.02, 0.03],
            0.5,
            0.0,
        );

        let sells: Vec<&OrderRequest> = requests
            .iter()
            .filter(|request| request.side == Side::Sell)
            .collect();
        let buys: Vec<&OrderRequest> = requests
            .iter()
            .filter(|request| request.side == Side::Buy)
            .collect();
        assert!(!sells.is_empty());
        assert!(!buys.is_empty());
        // Output lists all sells before the first buy.
        let first_buy = requests
            .iter()
            .position(|request| request.side == Side::Buy)
            .expect("buy present");
        assert!(requests[..first_buy]
            .iter()
            .all(|request| request.side == Side::Sell));
        for pair in sells.windows(2) {
            assert!(pair[0].price < pair[1].price);
        }
        for pair in buys.windows(2) {
            assert!(pair[0].price > pair[1].price);
        }
        for request in &requests {
            assert!(request.amount > 0.0);
        }
    }

    #[test]
    fn side_increments_telescope_to_outermost_level() {
        // Portfolio sits below its 50% target, so every level buys even
        // above market (logged as inconsistent, still planned).
        let balance = TradingBalance::new(9298.168, 15_694.561);
        let market_price = 1.62;
        let offsets = [-0.03, -0.02, -0.01, 0.01, 0.02, 0.03];
        let requests = plan(
            &contract(),
            "KUJI/USK",
            market_price,
            &balance,
            &offsets,
            0.5,
            0.0,
        );

        assert_eq!(requests.len(), 6);
        assert!(requests.iter().all(|request| request.side == Side::Buy));
        for pair in requests.windows(2) {
            assert!(pair[0].price > pair[1].price);
        }

        // The per-level increments telescope: their sum is the dq of the
        // outermost (largest) level.
        let entries = ladder_entries("KUJI/USK", market_price, &balance, &offsets, 0.5);
        let outermost = entries
            .iter()
            .map(|entry| entry.dq.abs())
            .fold(0.0f64, f64::max);
        let total: f64 = requests.iter().map(base_amount).sum();
        assert!((total - outermost).abs() < 1e-6);
    }
}

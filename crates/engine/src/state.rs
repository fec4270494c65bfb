use notify::{Notification, NotificationSink, SubmittedOrder};
use shared::symbols::SymbolRegistry;
use shared::types::Order;
use tracing::{debug, info};
use venue::VenueClient;

use crate::balance::TradingBalance;
use crate::book::OpenOrders;
use crate::error::{StepError, StepResult};
use crate::ladder;
use crate::trading::{Trading, TradingState};

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Fulfilled fraction of the book that triggers a full reset.
    pub fulfilled_fraction: f64,
    /// One-sided gap fraction that triggers a reset.
    pub gap_threshold: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            fulfilled_fraction: 0.5,
            gap_threshold: 0.02,
        }
    }
}

pub struct StepContext<'a> {
    pub venue: &'a VenueClient,
    pub sink: &'a dyn NotificationSink,
    pub symbols: &'a SymbolRegistry,
    pub thresholds: Thresholds,
}

enum Flow {
    /// Keep executing the new phase within this step.
    Continue,
    Done,
}

/// Runs one reconciliation step for the controller, following phase
/// transitions that are marked to continue within the same step.
pub async fn step(trading: &mut Trading, ctx: &StepContext<'_>) -> StepResult<()> {
    loop {
        let flow = match trading.state {
            TradingState::Initialize => initialize(trading, ctx).await?,
            TradingState::Order => order(trading, ctx).await?,
            TradingState::OrderPrepared => order_prepared(trading, ctx).await?,
            TradingState::OrderCheck => order_check(trading, ctx).await?,
            TradingState::OrderEmptySideWithGap
            | TradingState::CloseOrders
            | TradingState::CloseForStop => close(trading, ctx).await?,
            TradingState::Stop => Flow::Done,
        };
        if matches!(flow, Flow::Done) {
            return Ok(());
        }
    }
}

async fn initialize(trading: &mut Trading, ctx: &StepContext<'_>) -> StepResult<Flow> {
    let pair = ctx.symbols.pair_label(&trading.contract.denoms);
    let price = ctx
        .venue
        .get_market_price(&trading.wallet, &trading.contract)
        .await?;
    let coins = ctx.venue.get_balances(&trading.wallet).await?;
    let balance = TradingBalance::from_coins(&coins, &trading.contract)?;
    let rate = balance.rate(price);

    let target = match trading.target_rate() {
        Some(target) => target,
        None => {
            info!(pair = %pair, rate, "seeding target rate from observed balance");
            trading
                .seed_target_rate(rate)
                .map_err(|err| StepError::Config(err.to_string()))?;
            rate
        }
    };
    let tolerance = trading.min_offset_magnitude();
    if (rate - target).abs() >= tolerance {
        return Err(StepError::Config(format!(
            "balance rate {rate:.4} deviates from target {target:.4} beyond the innermost offset {tolerance}"
        )));
    }
    trading.last_balance = Some(balance);

    let orders = ctx
        .venue
        .get_orders(&trading.wallet, &trading.contract)
        .await?;
    trading.state = match orders.len() {
        0 => TradingState::Order,
        1 => TradingState::CloseOrders,
        _ => {
            let book = OpenOrders::new(orders);
            trading.fulfilled_ids = book
                .fulfilled()
                .iter()
                .map(|order| order.id.clone())
                .collect();
            TradingState::OrderCheck
        }
    };
    info!(pair = %pair, state = %trading.state, "controller initialized");
    Ok(Flow::Done)
}

async fn order(trading: &mut Trading, ctx: &StepContext<'_>) -> StepResult<Flow> {
    let pair = ctx.symbols.pair_label(&trading.contract.denoms);
    let orders = ctx
        .venue
        .get_orders(&trading.wallet, &trading.contract)
        .await?;
    if !orders.is_empty() {
        debug!(pair = %pair, count = orders.len(), "book not clean, closing before replacing");
        trading.state = TradingState::CloseOrders;
        return Ok(Flow::Done);
    }

    let price = ctx
        .venue
        .get_market_price(&trading.wallet, &trading.contract)
        .await?;
    let coins = ctx.venue.get_balances(&trading.wallet).await?;
    let balance = TradingBalance::from_coins(&coins, &trading.contract)?;
    trading.last_balance = Some(balance);

    ctx.sink
        .notify(Notification::Statistics {
            pair: pair.clone(),
            value: balance.value(price),
            rate: balance.rate(price),
            base_symbol: ctx.symbols.symbol(&trading.contract.denoms.base),
            base_amount: balance.base_amount,
            quote_symbol: ctx.symbols.symbol(&trading.contract.denoms.quote),
            quote_amount: balance.quote_amount,
        })
        .await;

    let target = trading
        .target_rate()
        .ok_or_else(|| StepError::Config("target rate is not set".to_string()))?;
    let requests = ladder::plan(
        &trading.contract,
        &pair,
        price,
        &balance,
        trading.offsets(),
        target,
        trading.order_min(),
    );
    if requests.is_empty() {
        info!(pair = %pair, "ladder produced no levels above the order minimum");
        return Ok(Flow::Done);
    }
    trading.prepared = requests;
    trading.state = TradingState::OrderPrepared;
    Ok(Flow::Continue)
}

async fn order_prepared(trading: &mut Trading, ctx: &StepContext<'_>) -> StepResult<Flow> {
    let pair = ctx.symbols.pair_label(&trading.contract.denoms);
    if trading.prepared.is_empty() {
        trading.state = TradingState::Order;
        return Ok(Flow::Done);
    }
    ctx.venue
        .submit_orders(&trading.wallet, &trading.prepared)
        .await?;

    let mut submitted: Vec<SubmittedOrder> = trading
        .prepared
        .iter()
        .map(|request| SubmittedOrder {
            side: request.side,
            price: request.price,
            amount: request.amount,
        })
        .collect();
    submitted.sort_by(|a, b| b.price.total_cmp(&a.price));
    ctx.sink
        .notify(Notification::OrdersSubmitted {
            pair,
            orders: submitted,
        })
        .await;

    // The transition owns the working sets: a fresh batch starts with
    // nothing prepared and nothing recorded as fulfilled.
    trading.prepared.clear();
    trading.fulfilled_ids.clear();
    trading.state = TradingState::OrderCheck;
    Ok(Flow::Done)
}

async fn order_check(trading: &mut Trading, ctx: &StepContext<'_>) -> StepResult<Flow> {
    let pair = ctx.symbols.pair_label(&trading.contract.denoms);
    let price = ctx
        .venue
        .get_market_price(&trading.wallet, &trading.contract)
        .await?;
    if trading.last_price == Some(price) {
        debug!(pair = %pair, price, "market price unchanged, skipping check");
        return Ok(Flow::Done);
    }
    trading.last_price = Some(price);

    let orders = ctx
        .venue
        .get_orders(&trading.wallet, &trading.contract)
        .await?;
    if orders.is_empty() {
        trading.state = TradingState::Order;
        return Ok(Flow::Done);
    }
    let book = OpenOrders::new(orders);

    let new_fills: Vec<String> = book
        .fulfilled()
        .iter()
        .map(|order| order.id.clone())
        .filter(|id| !trading.fulfilled_ids.contains(id))
        .collect();
    if !new_fills.is_empty() {
        ctx.sink
            .notify(Notification::OrdersFilled {
                pair: pair.clone(),
                order_ids: new_fills.clone(),
            })
            .await;
        trading.fulfilled_ids.extend(new_fills);
    }

    let fulfilled = trading.fulfilled_ids.len();
    let total = book.len();
    if fulfilled as f64 >= ctx.thresholds.fulfilled_fraction * total as f64 {
        info!(pair = %pair, fulfilled, total, "enough orders fulfilled, resetting ladder");
        trading.state = TradingState::CloseOrders;
        return Ok(Flow::Done);
    }

    if book.is_remains_one_side() {
        if let Some(percent) = book.gap_percent(price) {
            if percent > ctx.thresholds.gap_threshold {
                info!(pair = %pair, gap_percent = percent, "one-sided book drifted, resetting ladder");
                trading.state = TradingState::OrderEmptySideWithGap;
                return Ok(Flow::Done);
            }
        }
    }

    debug!(pair = %pair, fulfilled, total, "orders awaiting fills");
    Ok(Flow::Done)
}

async fn close(trading: &mut Trading, ctx: &StepContext<'_>) -> StepResult<Flow> {
    let pair = ctx.symbols.pair_label(&trading.contract.denoms);
    let orders = ctx
        .venue
        .get_orders(&trading.wallet, &trading.contract)
        .await?;
    let book = OpenOrders::new(orders);

    let filled: Vec<Order> = book.filled().into_iter().cloned().collect();
    if !filled.is_empty() {
        ctx.venue
            .withdraw_orders(&trading.wallet, &trading.contract, &filled)
            .await?;
        ctx.sink
            .notify(Notification::OrdersWithdrawn {
                pair: pair.clone(),
                order_ids: filled.iter().map(|order| order.id.clone()).collect(),
            })
            .await;
    }

    let unfulfilled: Vec<Order> = book.unfulfilled().into_iter().cloned().collect();
    if !unfulfilled.is_empty() {
        ctx.venue
            .cancel_orders(&trading.wallet, &trading.contract, &unfulfilled)
            .await?;
        ctx.sink
            .notify(Notification::OrdersCancelled {
                pair: pair.clone(),
                order_ids: unfulfilled.iter().map(|order| order.id.clone()).collect(),
            })
            .await;
    }

    trading.state = if trading.state == TradingState::CloseForStop {
        TradingState::Stop
    } else {
        TradingState::Order
    };
    info!(pair = %pair, state = %trading.state, "book closed");
    Ok(Flow::Done)
}

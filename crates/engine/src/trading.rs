use anyhow::{Result, ensure};
use shared::types::{Contract, OrderRequest};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use venue::Wallet;

use crate::balance::TradingBalance;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingState {
    Initialize,
    Order,
    OrderPrepared,
    OrderCheck,
    OrderEmptySideWithGap,
    CloseOrders,
    CloseForStop,
    Stop,
}

impl fmt::Display for TradingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TradingState::Initialize => "Initialize",
            TradingState::Order => "Order",
            TradingState::OrderPrepared => "OrderPrepared",
            TradingState::OrderCheck => "OrderCheck",
            TradingState::OrderEmptySideWithGap => "OrderEmptySideWithGap",
            TradingState::CloseOrders => "CloseOrders",
            TradingState::CloseForStop => "CloseForStop",
            TradingState::Stop => "Stop",
        };
        f.write_str(name)
    }
}

impl FromStr for TradingState {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "Initialize" => Ok(TradingState::Initialize),
            "Order" => Ok(TradingState::Order),
            "OrderPrepared" => Ok(TradingState::OrderPrepared),
            "OrderCheck" => Ok(TradingState::OrderCheck),
            "OrderEmptySideWithGap" => Ok(TradingState::OrderEmptySideWithGap),
            "CloseOrders" => Ok(TradingState::CloseOrders),
            "CloseForStop" => Ok(TradingState::CloseForStop),
            "Stop" => Ok(TradingState::Stop),
            other => anyhow::bail!("unknown trading state: {other}"),
        }
    }
}

/// Requested changes from the management surface. `None` leaves a field
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct TradingConfigUpdate {
    pub offsets: Option<Vec<f64>>,
    pub target_rate: Option<f64>,
    pub order_min: Option<f64>,
}

/// One market-making controller: its pair, ladder parameters and the
/// reconciliation phase it is in.
#[derive(Debug, Clone)]
pub struct Trading {
    pub id: String,
    pub wallet: Wallet,
    pub contract: Contract,
    offsets: Vec<f64>,
    target_rate: Option<f64>,
    order_min: f64,
    pub state: TradingState,
    pub last_balance: Option<TradingBalance>,
    pub prepared: Vec<OrderRequest>,
    pub fulfilled_ids: HashSet<String>,
    pub last_price: Option<f64>,
}

impl Trading {
    pub fn new(
        id: String,
        wallet: Wallet,
        contract: Contract,
        offsets: Vec<f64>,
        target_rate: Option<f64>,
        order_min: f64,
    ) -> Result<Self> {
        validate_offsets(&offsets)?;
        if let Some(rate) = target_rate {
            validate_target_rate(rate)?;
        }
        ensure!(order_min >= 0.0, "order_min must not be negative");
        Ok(Self {
            id,
            wallet,
            contract,
            offsets,
            target_rate,
            order_min,
            state: TradingState::Initialize,
            last_balance: None,
            prepared: Vec::new(),
            fulfilled_ids: HashSet::new(),
            last_price: None,
        })
    }

    pub fn offsets(&self) -> &[f64] {
        &self.offsets
    }

    pub fn target_rate(&self) -> Option<f64> {
        self.target_rate
    }

    pub fn order_min(&self) -> f64 {
        self.order_min
    }

    /// Smallest deviation the ladder can correct; the target check at
    /// Initialize uses it as the tolerance.
    pub fn min_offset_magnitude(&self) -> f64 {
        self.offsets
            .iter()
            .map(|offset| offset.abs())
            .fold(f64::INFINITY, f64::min)
    }

    pub fn seed_target_rate(&mut self, rate: f64) -> Result<()> {
        validate_target_rate(rate)?;
        self.target_rate = Some(rate);
        Ok(())
    }

    /// Applies a management update after validating it whole, returning
    /// a human-readable change list for the notification. An empty list
    /// means nothing changed.
    pub fn apply_config(&mut self, update: TradingConfigUpdate) -> Result<Vec<String>> {
        if let Some(offsets) = &update.offsets {
            validate_offsets(offsets)?;
        }
        if let Some(rate) = update.target_rate {
            validate_target_rate(rate)?;
        }
        if let Some(order_min) = update.order_min {
            ensure!(order_min >= 0.0, "order_min must not be negative");
        }

        let mut changes = Vec::new();
        if let Some(offsets) = update.offsets {
            if offsets != self.offsets {
                changes.push(format!("offsets: {:?} -> {:?}", self.offsets, offsets));
                self.offsets = offsets;
            }
        }
        if let Some(rate) = update.target_rate {
            if self.target_rate != Some(rate) {
                changes.push(format!(
                    "target_rate: {} -> {rate}",
                    self.target_rate
                        .map(|value| value.to_string())
                        .unwrap_or_else(|| "unset".to_string())
                ));
                self.target_rate = Some(rate);
            }
        }
        if let Some(order_min) = update.order_min {
            if order_min != self.order_min {
                changes.push(format!("order_min: {} -> {order_min}", self.order_min));
                self.order_min = order_min;
            }
        }
        Ok(changes)
    }
}

fn validate_offsets(offsets: &[f64]) -> Result<()> {
    ensure!(offsets.len() >= 2, "at least two price offsets are required");
    for &offset in offsets {
        ensure!(
            offset > -1.0 && offset < 1.0 && offset != 0.0,
            "price offsets must lie in (-1, 1) and be non-zero, got {offset}"
        );
    }
    let mut distinct = offsets.to_vec();
    distinct.sort_by(f64::total_cmp);
    distinct.dedup();
    ensure!(distinct.len() == offsets.len(), "price offsets must be distinct");
    Ok(())
}

fn validate_target_rate(rate: f64) -> Result<()> {
    ensure!(
        rate > 0.0 && rate < 1.0,
        "target_rate must lie in (0, 1), got {rate}"
    );
    Ok(())
}

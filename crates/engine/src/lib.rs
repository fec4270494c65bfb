pub mod balance;
pub mod book;
pub mod error;
pub mod ladder;
pub mod state;
pub mod trading;

pub use balance::TradingBalance;
pub use book::OpenOrders;
pub use error::{StepError, StepResult};
pub use state::{StepContext, Thresholds, step};
pub use trading::{Trading, TradingConfigUpdate, TradingState};

use thiserror::Error;

use crate::models::TradeStatus;

/// Errors surfaced by the scoring, risk, lifecycle and analytics layers.
///
/// `DataUnavailable` and `InvalidProposal` are recovered locally by the cycle;
/// `ExecutionRejected` fails a single trade attempt; `Configuration` is fatal
/// at startup.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("invalid proposal: {0}")]
    InvalidProposal(String),

    #[error("execution rejected: {0}")]
    ExecutionRejected(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown trade #{0}")]
    UnknownTrade(u64),

    #[error("trade #{trade_id} is {status}, cannot {action}")]
    InvalidTransition {
        trade_id: u64,
        status: TradeStatus,
        action: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;

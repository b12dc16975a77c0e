use thiserror::Error;

use crate::config::ConfigError;
use crate::ledger::LedgerError;

/// Failures surfaced by platform operations.
///
/// The display strings of the first nine variants are the names callers
/// match on, so they are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("Only registered")]
    OnlyRegistered,
    #[error("AlreadyRegistered")]
    AlreadyRegistered,
    #[error("IncorrectAddress")]
    IncorrectAddress,
    #[error("RoundNotSale")]
    RoundNotSale,
    #[error("RoundNotTrade")]
    RoundNotTrade,
    #[error("RoundNotProgress")]
    RoundNotProgress,
    #[error("IncorrectAmount")]
    IncorrectAmount,
    #[error("NoSupply")]
    NoSupply,
    #[error("NotEnoughFunds")]
    NotEnoughFunds,

    #[error("order {id} does not exist")]
    OrderNotFound { id: u64 },
    #[error("order {id} is already finished")]
    OrderNotActive { id: u64 },
    #[error("arithmetic overflow")]
    Overflow,

    #[error("ledger rejected the operation: {0}")]
    Ledger(#[from] LedgerError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T, E = PlatformError> = std::result::Result<T, E>;

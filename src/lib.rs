//! Referral-aware token platform with alternating Sale and Trade rounds.
//!
//! The crate is organised around a handful of small building blocks:
//!
//! * [`ledger`] holds token and native balances and applies batches of
//!   mutations atomically, chaining a receipt per batch.
//! * [`referral`] keeps the registration tree and the two-level commission
//!   schedule.
//! * [`round`] owns the round lifecycle: Sale rounds sell platform-held
//!   tokens at a fixed price, Trade rounds host a peer order book.
//! * [`platform`] composes the three into the public operations, and
//!   [`deploy`] wires a fresh ledger and platform together.
//!
//! Every operation takes a [`Call`] describing the caller, the attached
//! native payment and the current time, so the whole system stays
//! deterministic and can be driven from tests or the bundled CLI alike.

pub mod address;
pub mod config;
pub mod deploy;
pub mod error;
pub mod ledger;
pub mod platform;
pub mod referral;
pub mod round;

pub use address::Address;
pub use config::{ConfigError, PlatformConfig};
pub use deploy::deploy;
pub use error::PlatformError;
pub use ledger::{Amount, LedgerError, LedgerState, TokenLedger};
pub use platform::{Call, Platform};
pub use referral::{Participant, ReferralPayout};
pub use round::{Order, OrderStatus, Round, RoundKind, RoundTag};

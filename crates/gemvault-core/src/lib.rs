//! # Gemvault Core
//!
//! Shared building blocks for the Gemvault reward & protection ledger:
//!
//! - `types` - account ids, the four currencies, tiers, fixed-point multipliers
//! - `error` - the error taxonomy every engine reports through
//! - `clock` - injected time source
//! - `ledger` - the append-only, per-account currency ledger
//!
//! ```text
//!   caller ──► rule engine ──► Ledger::transact(account)
//!                                   │  (per-account lock)
//!                                   ▼
//!                         AccountBook { balances, entries[] }
//! ```

pub mod clock;
pub mod error;
pub mod ledger;
pub mod types;

pub use clock::*;
pub use error::*;
pub use ledger::*;
pub use types::*;

//! # hedgepool-ledger
//!
//! **Ledger plane**: the storage seam, per-provider balance accounting, and
//! the pending transaction state machine for capital movements.
//!
//! ## Architecture
//!
//! 1. **PoolStore**: single-record atomic steps over all pool state
//! 2. **InMemoryStore**: `RwLock`-backed store for tests and embedding
//! 3. **BalanceLedger**: invariant-checked balance primitives
//! 4. **PendingTransactions**: request → submit → outcome → finalize
//!
//! ## Capital Flow
//!
//! ```text
//! request_withdrawal → reserve_withdrawal → PENDING → SUBMITTED
//!     → CONFIRMED → FINALIZING → finalize_transfer → PROCESSED
//!     → FAILED    → release_withdrawal → (retry → PENDING)
//! ```
//!
//! Balances change only through [`BalanceLedger`]; nothing else writes
//! balance records.

pub mod balance_ledger;
pub mod memory;
pub mod pending;
pub mod store;

pub use balance_ledger::BalanceLedger;
pub use memory::InMemoryStore;
pub use pending::{OutcomeDisposition, PendingTransactions, gating_operation};
pub use store::{MissingBalance, PoolStore};

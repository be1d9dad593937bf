//! Core engine: the host-ledger contract, per-mint state, the
//! transfer guard and the batch executor.

pub mod engine;
pub mod ledger;
pub mod mint_state;
pub mod transfer_guard;

pub use engine::PolicyEngine;
pub use transfer_guard::TransferGuard;

// TokenGate Library Entry Point

// Module declarations - expose all modules through the library
pub mod core;
pub mod policy;
pub mod types;

// Re-export key components for easier access
pub use crate::core::engine::PolicyEngine;
pub use crate::core::ledger::{MemoryLedger, TokenLedger, TOKEN_ACCOUNT_SIZE};
pub use crate::core::mint_state::{MintState, MintStateStore};
pub use crate::core::transfer_guard::{AccountBalance, BatchPhase, TransferBatch, TransferGuard};
pub use policy::action::ActionCtx;
pub use policy::policy_store::PolicyStore;
pub use policy::policy_types::{MintManager, Policy, Ruleset, RULE_TREE_MAX_LEN};
pub use policy::royalty::{DynamicRoyalty, PriceLinear, DYNAMIC_ROYALTY_KIND_PRICE_LINEAR};
pub use policy::rule::{FactValue, Facts, RuleLeaf, RuleNode, RuleOperator, RuleValue};
pub use types::account::{Address, MetadataInfo, MintRecord, TokenAccountRecord};
pub use types::error::TokenGateError;
pub use types::operations::{Batch, Operation};

/// Returns the version of the library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

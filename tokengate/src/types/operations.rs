//! The operation surface of the engine.
//!
//! A caller submits a [`Batch`] of operations that either fully commits
//! or has no observable effect. Signatures are modeled as signer
//! addresses: the host has already verified them cryptographically by
//! the time a batch reaches the engine, so the engine checks identity,
//! not signatures.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::policy::royalty::DynamicRoyalty;
use crate::policy::rule::RuleNode;
use crate::types::account::Address;

/// One operation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    InitPolicy {
        uuid: Address,
        authority: Address,
        collector: Address,
        rule_tree: Option<RuleNode>,
        dynamic_royalty: Option<DynamicRoyalty>,
    },
    UpdatePolicy {
        policy: Address,
        signer: Address,
        authority: Address,
        collector: Address,
        rule_tree: Option<RuleNode>,
        dynamic_royalty: Option<DynamicRoyalty>,
    },
    InitRuleset {
        name: String,
        authority: Address,
        collector: Address,
        check_seller_fee_basis_points: bool,
        disallowed_addresses: Vec<Address>,
        allowed_programs: Vec<Address>,
    },
    UpdateRuleset {
        ruleset: Address,
        signer: Address,
        authority: Address,
        collector: Address,
        check_seller_fee_basis_points: bool,
        disallowed_addresses: Vec<Address>,
        allowed_programs: Vec<Address>,
    },
    /// Bind an existing mint to a ruleset. The signer must be the
    /// mint's current authority; mint and freeze authority move to the
    /// engine-derived manager authority.
    InitMintManager {
        mint: Address,
        ruleset: Address,
        authority: Address,
        collector: Address,
    },
    UpdateMintManager {
        mint_manager: Address,
        signer: Address,
        authority: Address,
        ruleset: Address,
    },
    /// Create a fresh wrapped mint bound to a ruleset and mint the
    /// single token to `target`.
    InitMint {
        mint: Address,
        ruleset: Address,
        authority: Address,
        collector: Address,
        target: Address,
    },
    /// Bind an existing, not-yet-minted mint to a rule-tree policy.
    Wrap {
        mint: Address,
        policy: Address,
        mint_authority: Address,
        freeze_authority: Address,
    },
    InitAccount {
        owner: Address,
        mint: Address,
    },
    MintTo {
        mint: Address,
        signer: Address,
        target: Address,
    },
    Approve {
        mint: Address,
        holder: Address,
        delegate: Address,
    },
    Revoke {
        mint: Address,
        holder: Address,
    },
    Lock {
        mint: Address,
        signer: Address,
    },
    Unlock {
        mint: Address,
        signer: Address,
    },
    /// Capture pre-transfer balances for the listed participants.
    PreTransfer {
        participants: Vec<Address>,
    },
    /// Native value movement inside the batch, the analog of a system
    /// transfer instruction in the host transaction (e.g. the sale
    /// payment between capture and reconcile).
    SystemTransfer {
        from: Address,
        to: Address,
        lamports: u64,
    },
    Transfer {
        mint: Address,
        from: Address,
        to: Address,
    },
    /// Reconcile balances and collect the computed fee.
    PostTransfer,
    Burn {
        mint: Address,
        holder: Address,
    },
    Close {
        mint: Address,
        owner: Address,
    },
}

impl Operation {
    /// Action name exposed to rule evaluation and logs.
    pub fn action_name(&self) -> &'static str {
        match self {
            Operation::InitPolicy { .. } => "init_policy",
            Operation::UpdatePolicy { .. } => "update_policy",
            Operation::InitRuleset { .. } => "init_ruleset",
            Operation::UpdateRuleset { .. } => "update_ruleset",
            Operation::InitMintManager { .. } => "init_mint_manager",
            Operation::UpdateMintManager { .. } => "update_mint_manager",
            Operation::InitMint { .. } => "init_mint",
            Operation::Wrap { .. } => "wrap",
            Operation::InitAccount { .. } => "init_account",
            Operation::MintTo { .. } => "mint_to",
            Operation::Approve { .. } => "approve",
            Operation::Revoke { .. } => "revoke",
            Operation::Lock { .. } => "lock",
            Operation::Unlock { .. } => "unlock",
            Operation::PreTransfer { .. } => "pre_transfer",
            Operation::SystemTransfer { .. } => "system_transfer",
            Operation::Transfer { .. } => "transfer",
            Operation::PostTransfer => "post_transfer",
            Operation::Burn { .. } => "burn",
            Operation::Close { .. } => "close",
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(bytes).ok()
    }
}

/// An atomic unit of operations submitted by a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Batch {
    pub operations: Vec<Operation>,
    /// Programs invoked anywhere in the enclosing host transaction,
    /// fed to allow/deny checks and rule evaluation.
    pub program_ids: Vec<Address>,
    /// Full account list of the enclosing host transaction. When empty
    /// the capture operation's own participant list stands in for it.
    pub accounts: Vec<Address>,
}

impl Batch {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self {
            operations,
            program_ids: Vec::new(),
            accounts: Vec::new(),
        }
    }

    pub fn with_program_ids(mut self, program_ids: Vec<Address>) -> Self {
        self.program_ids = program_ids;
        self
    }

    pub fn with_accounts(mut self, accounts: Vec<Address>) -> Self {
        self.accounts = accounts;
        self
    }

    /// The address set balance capture must cover exactly.
    pub fn declared_accounts(&self) -> HashSet<Address> {
        if !self.accounts.is_empty() {
            return self.accounts.iter().copied().collect();
        }
        let mut declared = HashSet::new();
        for operation in &self.operations {
            if let Operation::PreTransfer { participants } = operation {
                declared.extend(participants.iter().copied());
            }
        }
        declared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_roundtrip() {
        let operation = Operation::Transfer {
            mint: Address::new_unique(),
            from: Address::new_unique(),
            to: Address::new_unique(),
        };
        let bytes = operation.to_bytes();
        let decoded = Operation::from_bytes(&bytes).expect("Failed to decode operation");
        assert_eq!(operation, decoded);
    }

    #[test]
    fn test_action_names() {
        assert_eq!(
            Operation::PostTransfer.action_name(),
            "post_transfer",
            "Action names feed rule evaluation and must stay stable"
        );
        assert_eq!(
            Operation::Lock {
                mint: Address::default(),
                signer: Address::default(),
            }
            .action_name(),
            "lock"
        );
    }

    #[test]
    fn test_declared_accounts_fall_back_to_capture_list() {
        let participants = vec![Address::new_unique(), Address::new_unique()];
        let batch = Batch::new(vec![Operation::PreTransfer {
            participants: participants.clone(),
        }]);
        let declared = batch.declared_accounts();
        assert_eq!(declared.len(), 2);
        assert!(participants.iter().all(|p| declared.contains(p)));

        let explicit = Address::new_unique();
        let batch = batch.with_accounts(vec![explicit]);
        let declared = batch.declared_accounts();
        assert_eq!(declared.len(), 1);
        assert!(declared.contains(&explicit));
    }
}

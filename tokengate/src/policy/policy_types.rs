//! Policy, ruleset and mint manager records.
//!
//! These are the durable records the engine persists in the host
//! account store. Every record identifier is derived deterministically
//! from a seed string plus the record's natural key, so a record can be
//! located without an index and two rulesets can never share a name.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::policy::action::ActionCtx;
use crate::policy::royalty::DynamicRoyalty;
use crate::policy::rule::RuleNode;
use crate::types::account::Address;
use crate::types::error::TokenGateError;

/// Hard ceiling on the serialized rule tree, matching the host
/// environment's per-operation payload budget. Roughly 18
/// address-valued leaf entries or a couple dozen scalar leaves fit.
pub const RULE_TREE_MAX_LEN: usize = 1500;

fn derive_record_id(seed: &str, key: &[u8]) -> Address {
    let mut hasher = blake3::Hasher::new();
    hasher.update(seed.as_bytes());
    hasher.update(key);
    Address(*hasher.finalize().as_bytes())
}

/// Rich rule-tree policy governing every action on the mints bound to
/// it. Created once, updated wholesale by its authority, never deleted;
/// deactivation is modeled by an always-failing rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    pub version: u8,
    /// Caller-supplied unique seed the record identifier derives from.
    pub uuid: Address,
    pub authority: Address,
    /// Recipient of assessed fees. May differ from the authority.
    pub collector: Address,
    pub rule_tree: Option<RuleNode>,
    pub dynamic_royalty: Option<DynamicRoyalty>,
}

impl Policy {
    pub const SEED: &'static str = "policy";

    pub fn derive_id(uuid: &Address) -> Address {
        derive_record_id(Self::SEED, uuid.as_ref())
    }

    pub fn id(&self) -> Address {
        Self::derive_id(&self.uuid)
    }

    pub fn valid(&self) -> Result<(), TokenGateError> {
        if let Some(rule_tree) = &self.rule_tree {
            let len = rule_tree.serialized_len()?;
            if len > RULE_TREE_MAX_LEN {
                return Err(TokenGateError::invalid_policy_creation(format!(
                    "rule tree is {} bytes, the limit is {}",
                    len, RULE_TREE_MAX_LEN
                )));
            }
        }
        if let Some(dynamic_royalty) = &self.dynamic_royalty {
            dynamic_royalty.valid()?;
        }
        Ok(())
    }

    /// Evaluate the rule tree against an action's fact set. A policy
    /// without a rule tree matches everything.
    pub fn matches(&self, ctx: &ActionCtx) -> Result<(), TokenGateError> {
        let rule_tree = match &self.rule_tree {
            Some(rule_tree) => rule_tree,
            None => return Ok(()),
        };
        let facts = ctx.to_facts();
        if !rule_tree.evaluate(&facts) {
            debug!(
                policy = %self.id(),
                action = %ctx.action,
                "policy rule tree rejected action"
            );
            return Err(TokenGateError::policy_violation(
                self.id().to_hex(),
                format!("rule tree rejected action {}", ctx.action),
            ));
        }
        Ok(())
    }
}

/// Allow/deny-list policy variant, bound 1:1 to a mint through a
/// [`MintManager`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ruleset {
    pub version: u8,
    pub authority: Address,
    pub collector: Address,
    /// When set, transfers of bound mints must run the balance
    /// capture/reconcile pair so the seller fee can be assessed.
    pub check_seller_fee_basis_points: bool,
    /// Human-readable name; the record identifier derives from it, so
    /// names are unique by construction.
    pub name: String,
    pub disallowed_addresses: Vec<Address>,
    pub allowed_programs: Vec<Address>,
}

impl Ruleset {
    pub const SEED: &'static str = "ruleset";

    pub fn derive_id(name: &str) -> Address {
        derive_record_id(Self::SEED, name.as_bytes())
    }

    pub fn id(&self) -> Address {
        Self::derive_id(&self.name)
    }

    /// Enforce the allow-list over invoked programs and the deny-list
    /// over both programs and participants. The deny-list is checked
    /// even when the allow-list is empty.
    pub fn verify_programs(
        &self,
        program_ids: &[Address],
        participants: &[Address],
    ) -> Result<(), TokenGateError> {
        if !self.allowed_programs.is_empty() {
            let allowed: HashSet<&Address> = self.allowed_programs.iter().collect();
            for program_id in program_ids {
                if !allowed.contains(program_id) {
                    warn!(ruleset = %self.name, program = %program_id, "program not allowed");
                    return Err(TokenGateError::ProgramNotAllowed);
                }
            }
        }

        if !self.disallowed_addresses.is_empty() {
            let disallowed: HashSet<&Address> = self.disallowed_addresses.iter().collect();
            for program_id in program_ids {
                if disallowed.contains(program_id) {
                    warn!(ruleset = %self.name, program = %program_id, "program disallowed");
                    return Err(TokenGateError::ProgramDisallowed);
                }
            }
            for participant in participants {
                if disallowed.contains(participant) {
                    warn!(ruleset = %self.name, participant = %participant, "participant disallowed");
                    return Err(TokenGateError::ProgramDisallowed);
                }
            }
        }

        Ok(())
    }
}

/// Binds exactly one mint to exactly one ruleset and one authority.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MintManager {
    pub version: u8,
    pub mint: Address,
    pub authority: Address,
    pub ruleset: Address,
}

impl MintManager {
    pub const SEED: &'static str = "mint-manager";

    pub fn derive_id(mint: &Address) -> Address {
        derive_record_id(Self::SEED, mint.as_ref())
    }

    pub fn id(&self) -> Address {
        Self::derive_id(&self.mint)
    }
}

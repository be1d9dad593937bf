//! Balance capture, reconciliation and the transfer guard.
//!
//! A guarded transfer is a three-step protocol inside one atomic
//! batch: `pre_transfer` snapshots the balances of every participant,
//! the token-ledger transfer executes, and `post_transfer` re-reads the
//! balances, derives the sale price from the native inflow, evaluates
//! the governing rules against the full fact set, and collects the
//! computed royalty fee into the collector account.
//!
//! The scratch state lives in a stack-scoped [`TransferBatch`] that
//! the caller threads through the three calls. Nothing here survives
//! the batch, and a batch that captures without reconciling is
//! rejected when it tries to finish.

use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::core::ledger::TokenLedger;
use crate::core::mint_state::MintStateStore;
use crate::policy::action::ActionCtx;
use crate::policy::policy_store::PolicyStore;
use crate::policy::policy_types::{MintManager, Policy, Ruleset};
use crate::types::account::Address;
use crate::types::error::TokenGateError;

/// Phases of one atomic batch, in required order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Idle,
    Captured,
    Transferred,
    Reconciled,
    Aborted,
}

/// Balance snapshot row for one (account, mint) pair. The all-zero
/// mint marks the native row carrying lamports and storage size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountBalance {
    pub address: Address,
    pub mint: Address,
    pub size: u64,
    pub balance: u64,
}

/// Scratch state of one atomic batch. Never persists across batches.
#[derive(Debug)]
pub struct TransferBatch {
    phase: BatchPhase,
    balances: Vec<AccountBalance>,
    participants: Vec<Address>,
    mint: Option<Address>,
    from: Option<Address>,
    to: Option<Address>,
}

impl Default for TransferBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferBatch {
    pub fn new() -> Self {
        Self {
            phase: BatchPhase::Idle,
            balances: Vec::new(),
            participants: Vec::new(),
            mint: None,
            from: None,
            to: None,
        }
    }

    pub fn phase(&self) -> BatchPhase {
        self.phase
    }

    /// Whether a capture is still waiting for its reconcile.
    pub fn has_live_capture(&self) -> bool {
        matches!(self.phase, BatchPhase::Captured | BatchPhase::Transferred)
    }

    pub(crate) fn mark_aborted(&mut self) {
        self.phase = BatchPhase::Aborted;
        self.balances.clear();
    }
}

/// Orchestrates capture, rule evaluation, the ledger transfer and
/// reconciliation with fee collection.
pub struct TransferGuard<'a, L: TokenLedger> {
    ledger: &'a L,
    policy_store: &'a PolicyStore,
    mint_states: &'a MintStateStore,
}

struct Governance {
    ruleset: Option<Ruleset>,
    policy: Option<Policy>,
}

impl<'a, L: TokenLedger> TransferGuard<'a, L> {
    pub fn new(
        ledger: &'a L,
        policy_store: &'a PolicyStore,
        mint_states: &'a MintStateStore,
    ) -> Self {
        Self {
            ledger,
            policy_store,
            mint_states,
        }
    }

    /// Capture pre-transfer balances for every participant.
    ///
    /// `declared` is the address set referenced by the enclosing batch.
    /// The participant list must match it exactly: a participant the
    /// batch never mentions is `UnknownAccount`, a declared address
    /// with no captured participant is `AccountNotFound`.
    pub fn pre_transfer(
        &self,
        batch: &mut TransferBatch,
        participants: &[Address],
        declared: &HashSet<Address>,
    ) -> Result<(), TokenGateError> {
        if batch.phase != BatchPhase::Idle {
            return Err(TokenGateError::InvalidPreTransferInstruction);
        }

        let mut remaining = declared.clone();
        let mut start_balances = Vec::new();
        for participant in participants {
            if !remaining.remove(participant) {
                return Err(TokenGateError::UnknownAccount);
            }

            let native_balance = self.ledger.native_balance(participant);
            let token_account = self.ledger.token_account(participant);
            if native_balance.is_none() && token_account.is_none() {
                return Err(TokenGateError::AccountNotFound);
            }

            if let Some(balance) = native_balance {
                start_balances.push(AccountBalance {
                    address: *participant,
                    mint: Address::default(),
                    size: self.ledger.account_size(participant).unwrap_or(0),
                    balance,
                });
            }
            if let Some(token_account) = token_account {
                start_balances.push(AccountBalance {
                    address: *participant,
                    mint: token_account.mint,
                    size: 0,
                    balance: token_account.amount,
                });
            }
        }
        if !remaining.is_empty() {
            return Err(TokenGateError::AccountNotFound);
        }

        debug!(rows = start_balances.len(), "pre-transfer balances captured");
        batch.balances = start_balances;
        batch.participants = participants.to_vec();
        batch.phase = BatchPhase::Captured;
        Ok(())
    }

    /// Execute the guarded transfer itself.
    ///
    /// Enforces the lock state, the ruleset's allow/deny lists, and,
    /// when no balance capture is in play, the policy rule tree. When
    /// the governance requires fee assessment the batch must already be
    /// in the captured phase.
    pub fn transfer(
        &self,
        batch: &mut TransferBatch,
        mint: &Address,
        from: &Address,
        to: &Address,
        program_ids: &[Address],
    ) -> Result<(), TokenGateError> {
        let mint_state = self.mint_states.get(mint)?;
        if mint_state.is_locked() {
            warn!(mint = %mint, "transfer of a locked mint rejected");
            return Err(TokenGateError::MintStateLocked);
        }

        let governance = self.resolve_governance(mint)?;

        if let Some(ruleset) = &governance.ruleset {
            ruleset.verify_programs(program_ids, &[*from, *to])?;
        }

        let needs_capture = governance
            .ruleset
            .as_ref()
            .map(|r| r.check_seller_fee_basis_points)
            .unwrap_or(false)
            || governance
                .policy
                .as_ref()
                .map(|p| p.dynamic_royalty.is_some())
                .unwrap_or(false);

        if needs_capture && batch.phase != BatchPhase::Captured {
            return Err(TokenGateError::InvalidPreTransferInstruction);
        }

        // Holder and target account constraints.
        let from_address = self.ledger.token_account_address(from, mint);
        let from_account = self
            .ledger
            .token_account(&from_address)
            .ok_or(TokenGateError::InvalidHolderTokenAccount)?;
        if from_account.owner != *from || from_account.mint != *mint || from_account.amount < 1 {
            return Err(TokenGateError::InvalidHolderTokenAccount);
        }
        let to_address = self.ledger.token_account_address(to, mint);
        if self.ledger.token_account(&to_address).is_none() {
            return Err(TokenGateError::InvalidTargetTokenAccount);
        }

        // Without a capture the rule tree is evaluated right here;
        // with one, evaluation happens at reconcile time where the
        // price facts are known.
        if batch.phase != BatchPhase::Captured {
            if let Some(policy) = &governance.policy {
                let ctx = self.action_ctx("transfer", mint, Some(from), Some(to), program_ids)?;
                policy.matches(&ctx)?;
            }
        }

        let manager_authority = MintManager::derive_id(mint);
        self.ledger.thaw_account(from, mint, &manager_authority)?;
        let to_account = self
            .ledger
            .token_account(&to_address)
            .ok_or(TokenGateError::InvalidTargetTokenAccount)?;
        if to_account.frozen {
            self.ledger.thaw_account(to, mint, &manager_authority)?;
        }
        self.ledger.transfer_tokens(mint, from, to, 1)?;
        self.ledger.freeze_account(to, mint, &manager_authority)?;

        self.mint_states.record_transfer(mint)?;
        debug!(mint = %mint, from = %from, to = %to, "guarded transfer executed");

        if batch.phase == BatchPhase::Captured {
            batch.mint = Some(*mint);
            batch.from = Some(*from);
            batch.to = Some(*to);
            batch.phase = BatchPhase::Transferred;
        }
        Ok(())
    }

    /// Reconcile post-transfer balances, evaluate the governing rules
    /// against the priced fact set, and collect the royalty fee.
    pub fn post_transfer(
        &self,
        batch: &mut TransferBatch,
        program_ids: &[Address],
    ) -> Result<(), TokenGateError> {
        if batch.phase != BatchPhase::Transferred {
            return Err(TokenGateError::InvalidPostTransferInstruction);
        }
        let mint = batch
            .mint
            .ok_or(TokenGateError::InvalidPostTransferInstruction)?;
        let from = batch
            .from
            .ok_or(TokenGateError::InvalidPostTransferInstruction)?;

        // Re-read every captured participant.
        let mut end_balances: HashMap<(Address, Address), AccountBalance> = HashMap::new();
        for participant in &batch.participants {
            let native_balance = self.ledger.native_balance(participant);
            let token_account = self.ledger.token_account(participant);
            if native_balance.is_none() && token_account.is_none() {
                return Err(TokenGateError::AccountNotFound);
            }
            if let Some(balance) = native_balance {
                end_balances.insert(
                    (*participant, Address::default()),
                    AccountBalance {
                        address: *participant,
                        mint: Address::default(),
                        size: self.ledger.account_size(participant).unwrap_or(0),
                        balance,
                    },
                );
            }
            if let Some(token_account) = token_account {
                end_balances.insert(
                    (*participant, token_account.mint),
                    AccountBalance {
                        address: *participant,
                        mint: token_account.mint,
                        size: 0,
                        balance: token_account.amount,
                    },
                );
            }
        }

        // Positive delta per mint, rent netted out of native rows.
        let mut balance_change_by_mint: HashMap<Address, u64> = HashMap::new();
        for start in &batch.balances {
            let end = match end_balances.get(&(start.address, start.mint)) {
                Some(end) => end,
                None => return Err(TokenGateError::AccountNotFound),
            };
            let diff = if start.mint.is_native() {
                let rent_exempt_minimum = self.ledger.rent_exempt_minimum(start.size);
                end.balance
                    .saturating_sub(rent_exempt_minimum)
                    .saturating_sub(start.balance.saturating_sub(rent_exempt_minimum))
            } else {
                end.balance.saturating_sub(start.balance)
            };
            let entry = balance_change_by_mint.entry(start.mint).or_insert(0);
            *entry = entry
                .checked_add(diff)
                .ok_or(TokenGateError::NumericalOverflow)?;
        }

        let price = balance_change_by_mint
            .get(&Address::default())
            .copied()
            .unwrap_or(0);

        let governance = self.resolve_governance(&mint)?;
        let base_bp = self
            .ledger
            .metadata(&mint)
            .map(|m| m.seller_fee_basis_points)
            .unwrap_or(0);

        let dynamic_royalty = governance
            .policy
            .as_ref()
            .and_then(|p| p.dynamic_royalty.as_ref());
        let fee_bp = match dynamic_royalty {
            Some(dynamic_royalty) => dynamic_royalty.compute_fee_bp(price),
            None => {
                let check_seller_fee = governance
                    .ruleset
                    .as_ref()
                    .map(|r| r.check_seller_fee_basis_points)
                    .unwrap_or(false);
                if check_seller_fee {
                    base_bp
                } else {
                    0
                }
            }
        };
        let fee = (price as u128 * fee_bp as u128 / 10000) as u64;

        if let Some(policy) = &governance.policy {
            let mut ctx =
                self.action_ctx("transfer", &mint, Some(&from), batch.to.as_ref(), program_ids)?;
            ctx.price = Some(price);
            ctx.royalty_fee_bp = Some(fee_bp);
            ctx.royalty_fee = Some(fee);
            policy.matches(&ctx)?;
        }

        if fee > 0 {
            let collector = match (&governance.policy, &governance.ruleset) {
                (Some(policy), _) if policy.dynamic_royalty.is_some() => policy.collector,
                (_, Some(ruleset)) => ruleset.collector,
                (Some(policy), None) => policy.collector,
                (None, None) => return Err(TokenGateError::InvalidCollector),
            };
            debug!(mint = %mint, price, fee_bp, fee, collector = %collector, "collecting royalty fee");
            self.ledger.transfer_native(&from, &collector, fee)?;
        }

        batch.balances.clear();
        batch.phase = BatchPhase::Reconciled;
        Ok(())
    }

    fn resolve_governance(&self, mint: &Address) -> Result<Governance, TokenGateError> {
        let mint_manager = self.policy_store.mint_manager_for_mint(mint);
        let ruleset = match &mint_manager {
            Some(mint_manager) => Some(self.policy_store.get_ruleset(&mint_manager.ruleset)?),
            None => None,
        };
        let mint_state = self.mint_states.get(mint)?;
        let policy = match &mint_state.policy {
            Some(policy_id) => Some(self.policy_store.get_policy(policy_id)?),
            None => None,
        };
        Ok(Governance { ruleset, policy })
    }

    /// Assemble the fact-set context for an action on `mint`.
    pub(crate) fn action_ctx(
        &self,
        action: &str,
        mint: &Address,
        from: Option<&Address>,
        to: Option<&Address>,
        program_ids: &[Address],
    ) -> Result<ActionCtx, TokenGateError> {
        let mint_state = self.mint_states.get(mint)?;
        let mut ctx = ActionCtx::new(action, *mint);
        ctx.program_ids = program_ids.to_vec();
        ctx.mint_state = (&mint_state).into();
        ctx.mint_account = self.ledger.mint_record(mint).as_ref().map(Into::into);
        ctx.metadata = self.ledger.metadata(mint).as_ref().map(Into::into);
        ctx.from = from.copied();
        ctx.to = to.copied();
        Ok(ctx)
    }
}

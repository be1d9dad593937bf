//! Batch execution and the administrative operation surface.
//!
//! [`PolicyEngine`] owns the ledger, the policy store and the mint
//! states, and executes caller-submitted [`Batch`]es all-or-nothing:
//! every store is snapshotted before the first operation and restored
//! wholesale if any operation fails, so no partial effect is ever
//! observable. Within a batch, capture must precede the transfer,
//! which must precede reconcile; the phase machine in the transfer
//! guard rejects anything out of order.

use tracing::{debug, warn};

use crate::core::ledger::{MemoryLedger, TokenLedger};
use crate::core::mint_state::{MintState, MintStateStore};
use crate::core::transfer_guard::{TransferBatch, TransferGuard};
use crate::policy::policy_store::PolicyStore;
use crate::policy::policy_types::MintManager;
use crate::types::account::Address;
use crate::types::error::TokenGateError;
use crate::types::operations::{Batch, Operation};

/// The engine facade: governance records, mint states and the ledger
/// behind one atomic operation surface.
pub struct PolicyEngine<L: TokenLedger = MemoryLedger> {
    ledger: L,
    policy_store: PolicyStore,
    mint_states: MintStateStore,
}

impl PolicyEngine<MemoryLedger> {
    /// Engine over a fresh in-memory ledger, for tests and hosts
    /// without a real ledger.
    pub fn new_in_memory() -> Self {
        Self::new(MemoryLedger::new())
    }
}

impl<L: TokenLedger> PolicyEngine<L> {
    pub fn new(ledger: L) -> Self {
        Self {
            ledger,
            policy_store: PolicyStore::new(),
            mint_states: MintStateStore::new(),
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn policy_store(&self) -> &PolicyStore {
        &self.policy_store
    }

    pub fn mint_states(&self) -> &MintStateStore {
        &self.mint_states
    }

    fn guard(&self) -> TransferGuard<'_, L> {
        TransferGuard::new(&self.ledger, &self.policy_store, &self.mint_states)
    }

    /// Execute a batch atomically. On any failure every effect is
    /// rolled back and the error surfaces verbatim.
    pub fn execute_batch(&self, batch: &Batch) -> Result<(), TokenGateError> {
        let ledger_snapshot = self.ledger.snapshot();
        let store_snapshot = self.policy_store.snapshot();
        let mint_snapshot = self.mint_states.snapshot();

        let mut transfer_batch = TransferBatch::new();
        let result = self
            .apply_operations(batch, &mut transfer_batch)
            .and_then(|()| {
                if transfer_batch.has_live_capture() {
                    // A capture with no matching reconcile invalidates
                    // the whole batch.
                    Err(TokenGateError::InvalidPostTransferInstruction)
                } else {
                    Ok(())
                }
            });

        if let Err(e) = result {
            transfer_batch.mark_aborted();
            self.ledger.restore(ledger_snapshot);
            self.policy_store.restore(store_snapshot);
            self.mint_states.restore(mint_snapshot);
            warn!(error = %e, "batch aborted, all effects rolled back");
            return Err(e);
        }
        Ok(())
    }

    fn apply_operations(
        &self,
        batch: &Batch,
        transfer_batch: &mut TransferBatch,
    ) -> Result<(), TokenGateError> {
        for operation in &batch.operations {
            debug!(action = operation.action_name(), "applying operation");
            self.apply(operation, batch, transfer_batch)?;
        }
        Ok(())
    }

    fn apply(
        &self,
        operation: &Operation,
        batch: &Batch,
        transfer_batch: &mut TransferBatch,
    ) -> Result<(), TokenGateError> {
        match operation {
            Operation::InitPolicy {
                uuid,
                authority,
                collector,
                rule_tree,
                dynamic_royalty,
            } => self
                .policy_store
                .init_policy(
                    *uuid,
                    *authority,
                    *collector,
                    rule_tree.clone(),
                    dynamic_royalty.clone(),
                )
                .map(|_| ()),
            Operation::UpdatePolicy {
                policy,
                signer,
                authority,
                collector,
                rule_tree,
                dynamic_royalty,
            } => self.policy_store.update_policy(
                policy,
                signer,
                *authority,
                *collector,
                rule_tree.clone(),
                dynamic_royalty.clone(),
            ),
            Operation::InitRuleset {
                name,
                authority,
                collector,
                check_seller_fee_basis_points,
                disallowed_addresses,
                allowed_programs,
            } => self
                .policy_store
                .init_ruleset(
                    name.clone(),
                    *authority,
                    *collector,
                    *check_seller_fee_basis_points,
                    disallowed_addresses.clone(),
                    allowed_programs.clone(),
                )
                .map(|_| ()),
            Operation::UpdateRuleset {
                ruleset,
                signer,
                authority,
                collector,
                check_seller_fee_basis_points,
                disallowed_addresses,
                allowed_programs,
            } => self.policy_store.update_ruleset(
                ruleset,
                signer,
                *authority,
                *collector,
                *check_seller_fee_basis_points,
                disallowed_addresses.clone(),
                allowed_programs.clone(),
            ),
            Operation::InitMintManager {
                mint,
                ruleset,
                authority,
                collector,
            } => self.init_mint_manager(mint, ruleset, authority, collector),
            Operation::UpdateMintManager {
                mint_manager,
                signer,
                authority,
                ruleset,
            } => self
                .policy_store
                .update_mint_manager(mint_manager, signer, *authority, ruleset),
            Operation::InitMint {
                mint,
                ruleset,
                authority,
                collector,
                target,
            } => self.init_mint(mint, ruleset, authority, collector, target),
            Operation::Wrap {
                mint,
                policy,
                mint_authority,
                freeze_authority,
            } => self.wrap(mint, policy, mint_authority, freeze_authority, batch),
            Operation::InitAccount { owner, mint } => {
                self.ledger.init_token_account(*owner, *mint).map(|_| ())
            }
            Operation::MintTo {
                mint,
                signer,
                target,
            } => self.mint_to(mint, signer, target, batch),
            Operation::Approve {
                mint,
                holder,
                delegate,
            } => self.approve(mint, holder, delegate, batch),
            Operation::Revoke { mint, holder } => self.revoke(mint, holder, batch),
            Operation::Lock { mint, signer } => self.lock(mint, signer, batch),
            Operation::Unlock { mint, signer } => self.unlock(mint, signer, batch),
            Operation::PreTransfer { participants } => self.guard().pre_transfer(
                transfer_batch,
                participants,
                &batch.declared_accounts(),
            ),
            Operation::SystemTransfer {
                from,
                to,
                lamports,
            } => self.ledger.transfer_native(from, to, *lamports),
            Operation::Transfer { mint, from, to } => {
                self.guard()
                    .transfer(transfer_batch, mint, from, to, &batch.program_ids)
            }
            Operation::PostTransfer => self
                .guard()
                .post_transfer(transfer_batch, &batch.program_ids),
            Operation::Burn { mint, holder } => self.burn(mint, holder, batch),
            Operation::Close { mint, owner } => self.close(mint, owner),
        }
    }

    /// Evaluate the governing rule-tree policy for an action on a
    /// policy-bound mint. Mints without a policy binding pass.
    fn check_policy(
        &self,
        action: &str,
        mint: &Address,
        from: Option<&Address>,
        to: Option<&Address>,
        batch: &Batch,
    ) -> Result<(), TokenGateError> {
        let mint_state = self.mint_states.get(mint)?;
        let policy_id = match mint_state.policy {
            Some(policy_id) => policy_id,
            None => return Ok(()),
        };
        let policy = self.policy_store.get_policy(&policy_id)?;
        let ctx = self
            .guard()
            .action_ctx(action, mint, from, to, &batch.program_ids)?;
        policy.matches(&ctx)
    }

    fn init_mint_manager(
        &self,
        mint: &Address,
        ruleset_id: &Address,
        authority: &Address,
        collector: &Address,
    ) -> Result<(), TokenGateError> {
        let ruleset = self
            .policy_store
            .get_ruleset(ruleset_id)
            .map_err(|_| TokenGateError::InvalidRuleset)?;
        if ruleset.collector != *collector {
            return Err(TokenGateError::InvalidCollector);
        }

        let record = self
            .ledger
            .mint_record(mint)
            .ok_or(TokenGateError::InvalidMint)?;
        if record.supply != 1 || record.decimals != 0 {
            return Err(TokenGateError::InvalidMint);
        }

        // The engine takes over both authorities of the wrapped mint.
        let manager_authority = MintManager::derive_id(mint);
        self.ledger
            .set_mint_authority(mint, authority, manager_authority)?;
        self.ledger
            .set_freeze_authority(mint, authority, manager_authority)?;

        self.policy_store
            .init_mint_manager(*mint, ruleset_id, *authority)?;
        if !self.mint_states.contains(mint) {
            self.mint_states.init(MintState::new(*mint, None))?;
        }
        Ok(())
    }

    fn init_mint(
        &self,
        mint: &Address,
        ruleset_id: &Address,
        authority: &Address,
        collector: &Address,
        target: &Address,
    ) -> Result<(), TokenGateError> {
        let ruleset = self
            .policy_store
            .get_ruleset(ruleset_id)
            .map_err(|_| TokenGateError::InvalidRuleset)?;
        if ruleset.collector != *collector {
            return Err(TokenGateError::InvalidCollector);
        }

        let manager_authority = MintManager::derive_id(mint);
        self.ledger
            .init_mint(*mint, 0, manager_authority, manager_authority)?;
        self.policy_store
            .init_mint_manager(*mint, ruleset_id, *authority)?;
        self.mint_states.init(MintState::new(*mint, None))?;

        self.ledger.init_token_account(*target, *mint)?;
        self.ledger.mint_to(mint, &manager_authority, target, 1)?;
        self.ledger
            .freeze_account(target, mint, &manager_authority)?;
        debug!(mint = %mint, target = %target, "wrapped mint initialized");
        Ok(())
    }

    fn wrap(
        &self,
        mint: &Address,
        policy_id: &Address,
        mint_authority: &Address,
        freeze_authority: &Address,
        batch: &Batch,
    ) -> Result<(), TokenGateError> {
        // The policy must exist before anything binds to it.
        let _ = self.policy_store.get_policy(policy_id)?;

        let record = self
            .ledger
            .mint_record(mint)
            .ok_or(TokenGateError::InvalidMint)?;
        if record.decimals != 0 || record.supply != 0 {
            return Err(TokenGateError::InvalidMint);
        }
        if record.mint_authority.as_ref() != Some(mint_authority)
            || record.freeze_authority.as_ref() != Some(freeze_authority)
        {
            return Err(TokenGateError::InvalidMint);
        }

        let manager_authority = MintManager::derive_id(mint);
        self.ledger
            .set_mint_authority(mint, mint_authority, manager_authority)?;
        self.ledger
            .set_freeze_authority(mint, freeze_authority, manager_authority)?;

        self.mint_states
            .init(MintState::new(*mint, Some(*policy_id)))?;
        self.check_policy("wrap", mint, Some(mint_authority), None, batch)?;
        debug!(mint = %mint, policy = %policy_id, "mint wrapped under policy");
        Ok(())
    }

    fn mint_to(
        &self,
        mint: &Address,
        signer: &Address,
        target: &Address,
        batch: &Batch,
    ) -> Result<(), TokenGateError> {
        // Ruleset-bound mints gate on the mint manager's authority,
        // policy-bound mints on the policy's.
        match self.policy_store.mint_manager_for_mint(mint) {
            Some(mint_manager) => {
                if mint_manager.authority != *signer {
                    return Err(TokenGateError::InvalidAuthority);
                }
            }
            None => {
                let mint_state = self
                    .mint_states
                    .get(mint)
                    .map_err(|_| TokenGateError::InvalidMintManager)?;
                let policy_id = mint_state
                    .policy
                    .ok_or(TokenGateError::InvalidMintManager)?;
                let policy = self.policy_store.get_policy(&policy_id)?;
                if policy.authority != *signer {
                    return Err(TokenGateError::InvalidAuthority);
                }
            }
        }

        let record = self
            .ledger
            .mint_record(mint)
            .ok_or(TokenGateError::InvalidMint)?;
        if record.supply != 0 {
            return Err(TokenGateError::InvalidMint);
        }

        let target_account = self.ledger.token_account_address(target, mint);
        if self.ledger.token_account(&target_account).is_none() {
            return Err(TokenGateError::InvalidTargetTokenAccount);
        }

        self.check_policy("mint_to", mint, Some(signer), Some(target), batch)?;

        let manager_authority = MintManager::derive_id(mint);
        self.ledger.mint_to(mint, &manager_authority, target, 1)?;
        self.ledger
            .freeze_account(target, mint, &manager_authority)?;
        Ok(())
    }

    fn approve(
        &self,
        mint: &Address,
        holder: &Address,
        delegate: &Address,
        batch: &Batch,
    ) -> Result<(), TokenGateError> {
        let address = self.ledger.token_account_address(holder, mint);
        let account = self
            .ledger
            .token_account(&address)
            .ok_or(TokenGateError::InvalidHolderTokenAccount)?;
        if account.owner != *holder
            || account.mint != *mint
            || account.amount != 1
            || account.delegate.is_some()
        {
            return Err(TokenGateError::InvalidHolderTokenAccount);
        }

        self.check_policy("approve", mint, Some(holder), Some(delegate), batch)?;

        let manager_authority = MintManager::derive_id(mint);
        if account.frozen {
            self.ledger.thaw_account(holder, mint, &manager_authority)?;
        }
        self.ledger
            .approve_delegate(holder, mint, *delegate, 1)?;
        self.ledger
            .freeze_account(holder, mint, &manager_authority)?;

        self.mint_states.approve(mint, *delegate)
    }

    fn revoke(
        &self,
        mint: &Address,
        holder: &Address,
        batch: &Batch,
    ) -> Result<(), TokenGateError> {
        let address = self.ledger.token_account_address(holder, mint);
        let account = self
            .ledger
            .token_account(&address)
            .ok_or(TokenGateError::InvalidHolderTokenAccount)?;
        if account.owner != *holder
            || account.mint != *mint
            || account.amount != 1
            || account.delegate.is_none()
        {
            return Err(TokenGateError::InvalidHolderTokenAccount);
        }

        // Rejected while the delegate holds the lock.
        self.mint_states.revoke(mint)?;
        self.check_policy("revoke", mint, Some(holder), None, batch)?;

        let manager_authority = MintManager::derive_id(mint);
        if account.frozen {
            self.ledger.thaw_account(holder, mint, &manager_authority)?;
        }
        self.ledger.revoke_delegate(holder, mint)?;
        self.ledger
            .freeze_account(holder, mint, &manager_authority)?;
        Ok(())
    }

    fn lock(&self, mint: &Address, signer: &Address, batch: &Batch) -> Result<(), TokenGateError> {
        self.check_policy("lock", mint, Some(signer), None, batch)?;
        self.mint_states.lock(mint, signer)
    }

    fn unlock(
        &self,
        mint: &Address,
        signer: &Address,
        batch: &Batch,
    ) -> Result<(), TokenGateError> {
        self.check_policy("unlock", mint, Some(signer), None, batch)?;

        let admin_authority = match self.policy_store.mint_manager_for_mint(mint) {
            Some(mint_manager) => Some(mint_manager.authority),
            None => {
                let mint_state = self.mint_states.get(mint)?;
                match mint_state.policy {
                    Some(policy_id) => {
                        Some(self.policy_store.get_policy(&policy_id)?.authority)
                    }
                    None => None,
                }
            }
        };
        self.mint_states
            .unlock(mint, signer, admin_authority.as_ref())
    }

    fn burn(&self, mint: &Address, holder: &Address, batch: &Batch) -> Result<(), TokenGateError> {
        let mint_state = self.mint_states.get(mint)?;
        if mint_state.is_locked() {
            return Err(TokenGateError::MintStateLocked);
        }

        let address = self.ledger.token_account_address(holder, mint);
        let account = self
            .ledger
            .token_account(&address)
            .ok_or(TokenGateError::InvalidHolderTokenAccount)?;
        if account.owner != *holder || account.mint != *mint || account.amount != 1 {
            return Err(TokenGateError::InvalidHolderTokenAccount);
        }

        let record = self
            .ledger
            .mint_record(mint)
            .ok_or(TokenGateError::InvalidMint)?;
        if record.supply > 1 || record.supply != account.amount {
            return Err(TokenGateError::InvalidMint);
        }

        self.check_policy("burn", mint, Some(holder), None, batch)?;

        let manager_authority = MintManager::derive_id(mint);
        if account.frozen {
            self.ledger.thaw_account(holder, mint, &manager_authority)?;
        }
        self.ledger.burn(holder, mint, 1)?;
        self.ledger.close_token_account(holder, mint)?;

        // Burn finality: the mint state and the manager binding are
        // gone, later operations against the mint fail to resolve.
        self.mint_states.remove(mint)?;
        if self.policy_store.mint_manager_for_mint(mint).is_some() {
            self.policy_store.remove_mint_manager(mint)?;
        }
        debug!(mint = %mint, "mint burned and unwrapped");
        Ok(())
    }

    fn close(&self, mint: &Address, owner: &Address) -> Result<(), TokenGateError> {
        let address = self.ledger.token_account_address(owner, mint);
        let account = self
            .ledger
            .token_account(&address)
            .ok_or(TokenGateError::InvalidCloseTokenAccount)?;
        if account.owner != *owner || account.amount != 0 {
            return Err(TokenGateError::InvalidCloseTokenAccount);
        }

        if account.frozen {
            let manager_authority = MintManager::derive_id(mint);
            self.ledger.thaw_account(owner, mint, &manager_authority)?;
        }
        self.ledger.close_token_account(owner, mint)
    }
}

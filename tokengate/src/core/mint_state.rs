//! Per-mint state and the lock/unlock machine.
//!
//! Every wrapped mint owns exactly one [`MintState`] record, created at
//! wrap time and deleted at burn. The record tracks the governing
//! policy binding, the approved delegate, and the domain-level lock: a
//! locked mint cannot move until the locking delegate (or the mint's
//! administrative authority) releases it. This lock is business state,
//! not a concurrency primitive; conflicting writers are serialized by
//! the host.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::types::account::Address;
use crate::types::error::TokenGateError;

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Durable per-mint record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MintState {
    pub version: u8,
    pub mint: Address,
    /// Set when the mint is governed by the rule-tree policy variant.
    pub policy: Option<Address>,
    pub locked_by: Option<Address>,
    /// Recorded at approve time; the only address permitted to lock.
    pub delegate: Option<Address>,
    pub last_approved_at: i64,
    pub last_transferred_at: i64,
    pub transferred_count: u32,
}

impl MintState {
    pub const SEED: &'static str = "mint_state";

    pub fn new(mint: Address, policy: Option<Address>) -> Self {
        Self {
            version: 0,
            mint,
            policy,
            ..Default::default()
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked_by.is_some()
    }

    pub fn record_transfer(&mut self) {
        self.last_transferred_at = unix_now();
        self.transferred_count = self.transferred_count.checked_add(1).unwrap_or(u32::MAX);
    }

    pub fn record_approve(&mut self) {
        self.last_approved_at = unix_now();
    }
}

/// In-memory store of mint states, shared behind a lock the way the
/// token store is.
#[derive(Debug, Clone, Default)]
pub struct MintStateStore {
    states: Arc<RwLock<HashMap<Address, MintState>>>,
}

impl MintStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the state record for a freshly wrapped mint.
    pub fn init(&self, state: MintState) -> Result<(), TokenGateError> {
        let mut states = self.states.write();
        if states.contains_key(&state.mint) {
            return Err(TokenGateError::validation(
                format!("Mint {} is already wrapped", state.mint),
                None::<std::convert::Infallible>,
            ));
        }
        debug!(mint = %state.mint, "mint state initialized");
        states.insert(state.mint, state);
        Ok(())
    }

    pub fn get(&self, mint: &Address) -> Result<MintState, TokenGateError> {
        self.states
            .read()
            .get(mint)
            .cloned()
            .ok_or_else(|| TokenGateError::not_found("MintState", Some(mint.to_hex())))
    }

    pub fn contains(&self, mint: &Address) -> bool {
        self.states.read().contains_key(mint)
    }

    /// Record `delegate` as the address permitted to lock this mint.
    pub fn approve(&self, mint: &Address, delegate: Address) -> Result<(), TokenGateError> {
        let mut states = self.states.write();
        let state = states
            .get_mut(mint)
            .ok_or_else(|| TokenGateError::not_found("MintState", Some(mint.to_hex())))?;
        state.delegate = Some(delegate);
        state.record_approve();
        debug!(mint = %mint, delegate = %delegate, "delegate approved");
        Ok(())
    }

    /// Clear the recorded delegate. Rejected while the delegate holds
    /// the lock, otherwise nobody could ever release it.
    pub fn revoke(&self, mint: &Address) -> Result<(), TokenGateError> {
        let mut states = self.states.write();
        let state = states
            .get_mut(mint)
            .ok_or_else(|| TokenGateError::not_found("MintState", Some(mint.to_hex())))?;
        if state.is_locked() && state.locked_by == state.delegate {
            return Err(TokenGateError::MintStateLocked);
        }
        state.delegate = None;
        debug!(mint = %mint, "delegate revoked");
        Ok(())
    }

    /// `Unlocked -> Locked(signer)`, callable only by the recorded
    /// delegate.
    pub fn lock(&self, mint: &Address, signer: &Address) -> Result<(), TokenGateError> {
        let mut states = self.states.write();
        let state = states
            .get_mut(mint)
            .ok_or_else(|| TokenGateError::not_found("MintState", Some(mint.to_hex())))?;
        if state.is_locked() {
            return Err(TokenGateError::MintStateLocked);
        }
        if state.delegate.as_ref() != Some(signer) {
            return Err(TokenGateError::InvalidLockedBy);
        }
        state.locked_by = Some(*signer);
        debug!(mint = %mint, locked_by = %signer, "mint locked");
        Ok(())
    }

    /// `Locked -> Unlocked`, callable by the locking delegate or the
    /// mint's administrative authority.
    pub fn unlock(
        &self,
        mint: &Address,
        signer: &Address,
        admin_authority: Option<&Address>,
    ) -> Result<(), TokenGateError> {
        let mut states = self.states.write();
        let state = states
            .get_mut(mint)
            .ok_or_else(|| TokenGateError::not_found("MintState", Some(mint.to_hex())))?;
        let by_delegate = state.locked_by.as_ref() == Some(signer);
        let by_authority = state.locked_by.is_some() && admin_authority == Some(signer);
        if !by_delegate && !by_authority {
            return Err(TokenGateError::InvalidLockedBy);
        }
        state.locked_by = None;
        debug!(mint = %mint, signer = %signer, "mint unlocked");
        Ok(())
    }

    pub fn record_transfer(&self, mint: &Address) -> Result<(), TokenGateError> {
        let mut states = self.states.write();
        let state = states
            .get_mut(mint)
            .ok_or_else(|| TokenGateError::not_found("MintState", Some(mint.to_hex())))?;
        state.record_transfer();
        Ok(())
    }

    /// Delete the record. After a burn the mint is no longer readable
    /// as an active state.
    pub fn remove(&self, mint: &Address) -> Result<(), TokenGateError> {
        let mut states = self.states.write();
        states
            .remove(mint)
            .map(|_| ())
            .ok_or_else(|| TokenGateError::not_found("MintState", Some(mint.to_hex())))
    }

    pub(crate) fn snapshot(&self) -> HashMap<Address, MintState> {
        self.states.read().clone()
    }

    pub(crate) fn restore(&self, snapshot: HashMap<Address, MintState>) {
        *self.states.write() = snapshot;
    }
}

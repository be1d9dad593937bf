//! Host token-ledger contract and the in-memory implementation.
//!
//! The engine treats the underlying token bookkeeping as an external
//! collaborator reached through [`TokenLedger`]: mint, burn, transfer,
//! approve, revoke, freeze and thaw, plus native value movement and the
//! rent model that balance reconciliation nets out. [`MemoryLedger`]
//! is the reference implementation used by tests and by hosts without
//! a real ledger; its whole-state snapshot is what makes a batch
//! all-or-nothing.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::types::account::{Address, MetadataInfo, MintRecord, TokenAccountRecord};
use crate::types::error::TokenGateError;

/// Storage size of a token holding account, used for rent sizing.
pub const TOKEN_ACCOUNT_SIZE: u64 = 165;

const ACCOUNT_STORAGE_OVERHEAD: u64 = 128;
const LAMPORTS_PER_BYTE_YEAR: u64 = 3480;
const RENT_EXEMPTION_THRESHOLD: u64 = 2;

/// The operations the engine requires from the host ledger.
pub trait TokenLedger {
    type Snapshot;

    fn snapshot(&self) -> Self::Snapshot;
    fn restore(&self, snapshot: Self::Snapshot);

    fn create_account(
        &self,
        address: Address,
        lamports: u64,
        size: u64,
    ) -> Result<(), TokenGateError>;
    fn account_exists(&self, address: &Address) -> bool;
    fn native_balance(&self, address: &Address) -> Option<u64>;
    fn account_size(&self, address: &Address) -> Option<u64>;
    fn transfer_native(
        &self,
        from: &Address,
        to: &Address,
        amount: u64,
    ) -> Result<(), TokenGateError>;
    fn rent_exempt_minimum(&self, size: u64) -> u64;

    fn init_mint(
        &self,
        mint: Address,
        decimals: u8,
        mint_authority: Address,
        freeze_authority: Address,
    ) -> Result<(), TokenGateError>;
    fn mint_record(&self, mint: &Address) -> Option<MintRecord>;
    fn set_mint_authority(
        &self,
        mint: &Address,
        current: &Address,
        new: Address,
    ) -> Result<(), TokenGateError>;
    fn set_freeze_authority(
        &self,
        mint: &Address,
        current: &Address,
        new: Address,
    ) -> Result<(), TokenGateError>;
    fn set_metadata(&self, mint: Address, metadata: MetadataInfo) -> Result<(), TokenGateError>;
    fn metadata(&self, mint: &Address) -> Option<MetadataInfo>;

    /// Deterministic associated-account derivation, provided by the
    /// host.
    fn token_account_address(&self, owner: &Address, mint: &Address) -> Address;
    fn init_token_account(&self, owner: Address, mint: Address) -> Result<Address, TokenGateError>;
    fn token_account(&self, address: &Address) -> Option<TokenAccountRecord>;
    fn mint_to(
        &self,
        mint: &Address,
        authority: &Address,
        to_owner: &Address,
        amount: u64,
    ) -> Result<(), TokenGateError>;
    fn transfer_tokens(
        &self,
        mint: &Address,
        from_owner: &Address,
        to_owner: &Address,
        amount: u64,
    ) -> Result<(), TokenGateError>;
    fn approve_delegate(
        &self,
        owner: &Address,
        mint: &Address,
        delegate: Address,
        amount: u64,
    ) -> Result<(), TokenGateError>;
    fn revoke_delegate(&self, owner: &Address, mint: &Address) -> Result<(), TokenGateError>;
    fn freeze_account(
        &self,
        owner: &Address,
        mint: &Address,
        authority: &Address,
    ) -> Result<(), TokenGateError>;
    fn thaw_account(
        &self,
        owner: &Address,
        mint: &Address,
        authority: &Address,
    ) -> Result<(), TokenGateError>;
    fn burn(&self, owner: &Address, mint: &Address, amount: u64) -> Result<(), TokenGateError>;
    fn close_token_account(&self, owner: &Address, mint: &Address) -> Result<(), TokenGateError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NativeAccount {
    lamports: u64,
    size: u64,
}

/// In-memory ledger fake.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    accounts: Arc<RwLock<HashMap<Address, NativeAccount>>>,
    token_accounts: Arc<RwLock<HashMap<Address, TokenAccountRecord>>>,
    mints: Arc<RwLock<HashMap<Address, MintRecord>>>,
    metadata: Arc<RwLock<HashMap<Address, MetadataInfo>>>,
}

/// Full-state copy taken at batch start and restored on failure.
#[derive(Debug)]
pub struct LedgerSnapshot {
    accounts: HashMap<Address, NativeAccount>,
    token_accounts: HashMap<Address, TokenAccountRecord>,
    mints: HashMap<Address, MintRecord>,
    metadata: HashMap<Address, MetadataInfo>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn token_account_mut<R>(
        &self,
        address: &Address,
        f: impl FnOnce(&mut TokenAccountRecord) -> Result<R, TokenGateError>,
    ) -> Result<R, TokenGateError> {
        let mut token_accounts = self.token_accounts.write();
        let account = token_accounts
            .get_mut(address)
            .ok_or_else(|| TokenGateError::not_found("TokenAccount", Some(address.to_hex())))?;
        f(account)
    }

    fn check_frozen(account: &TokenAccountRecord) -> Result<(), TokenGateError> {
        if account.frozen {
            return Err(TokenGateError::validation(
                format!("Token account of {} is frozen", account.owner),
                None::<std::convert::Infallible>,
            ));
        }
        Ok(())
    }
}

impl TokenLedger for MemoryLedger {
    type Snapshot = LedgerSnapshot;

    fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            accounts: self.accounts.read().clone(),
            token_accounts: self.token_accounts.read().clone(),
            mints: self.mints.read().clone(),
            metadata: self.metadata.read().clone(),
        }
    }

    fn restore(&self, snapshot: LedgerSnapshot) {
        *self.accounts.write() = snapshot.accounts;
        *self.token_accounts.write() = snapshot.token_accounts;
        *self.mints.write() = snapshot.mints;
        *self.metadata.write() = snapshot.metadata;
    }

    fn create_account(
        &self,
        address: Address,
        lamports: u64,
        size: u64,
    ) -> Result<(), TokenGateError> {
        let mut accounts = self.accounts.write();
        if accounts.contains_key(&address) {
            return Err(TokenGateError::validation(
                format!("Account {} already exists", address),
                None::<std::convert::Infallible>,
            ));
        }
        accounts.insert(address, NativeAccount { lamports, size });
        Ok(())
    }

    fn account_exists(&self, address: &Address) -> bool {
        self.accounts.read().contains_key(address)
    }

    fn native_balance(&self, address: &Address) -> Option<u64> {
        self.accounts.read().get(address).map(|a| a.lamports)
    }

    fn account_size(&self, address: &Address) -> Option<u64> {
        self.accounts.read().get(address).map(|a| a.size)
    }

    fn transfer_native(
        &self,
        from: &Address,
        to: &Address,
        amount: u64,
    ) -> Result<(), TokenGateError> {
        if amount == 0 {
            return Ok(());
        }
        let mut accounts = self.accounts.write();
        let from_balance = accounts
            .get(from)
            .map(|a| a.lamports)
            .ok_or_else(|| TokenGateError::not_found("Account", Some(from.to_hex())))?;
        if from_balance < amount {
            return Err(TokenGateError::insufficient_balance(
                Address::default().to_hex(),
                from_balance,
                amount,
            ));
        }
        if !accounts.contains_key(to) {
            accounts.insert(*to, NativeAccount { lamports: 0, size: 0 });
        }
        if let Some(from_account) = accounts.get_mut(from) {
            from_account.lamports -= amount;
        }
        if let Some(to_account) = accounts.get_mut(to) {
            to_account.lamports = to_account.lamports.saturating_add(amount);
        }
        debug!(from = %from, to = %to, amount, "native transfer");
        Ok(())
    }

    fn rent_exempt_minimum(&self, size: u64) -> u64 {
        (ACCOUNT_STORAGE_OVERHEAD + size) * LAMPORTS_PER_BYTE_YEAR * RENT_EXEMPTION_THRESHOLD
    }

    fn init_mint(
        &self,
        mint: Address,
        decimals: u8,
        mint_authority: Address,
        freeze_authority: Address,
    ) -> Result<(), TokenGateError> {
        let mut mints = self.mints.write();
        if mints.contains_key(&mint) {
            return Err(TokenGateError::validation(
                format!("Mint {} already exists", mint),
                None::<std::convert::Infallible>,
            ));
        }
        mints.insert(
            mint,
            MintRecord {
                mint_authority: Some(mint_authority),
                freeze_authority: Some(freeze_authority),
                supply: 0,
                decimals,
                is_initialized: true,
            },
        );
        Ok(())
    }

    fn mint_record(&self, mint: &Address) -> Option<MintRecord> {
        self.mints.read().get(mint).cloned()
    }

    fn set_mint_authority(
        &self,
        mint: &Address,
        current: &Address,
        new: Address,
    ) -> Result<(), TokenGateError> {
        let mut mints = self.mints.write();
        let record = mints
            .get_mut(mint)
            .ok_or_else(|| TokenGateError::not_found("Mint", Some(mint.to_hex())))?;
        if record.mint_authority.as_ref() != Some(current) {
            return Err(TokenGateError::InvalidAuthority);
        }
        record.mint_authority = Some(new);
        Ok(())
    }

    fn set_freeze_authority(
        &self,
        mint: &Address,
        current: &Address,
        new: Address,
    ) -> Result<(), TokenGateError> {
        let mut mints = self.mints.write();
        let record = mints
            .get_mut(mint)
            .ok_or_else(|| TokenGateError::not_found("Mint", Some(mint.to_hex())))?;
        if record.freeze_authority.as_ref() != Some(current) {
            return Err(TokenGateError::InvalidAuthority);
        }
        record.freeze_authority = Some(new);
        Ok(())
    }

    fn set_metadata(&self, mint: Address, metadata: MetadataInfo) -> Result<(), TokenGateError> {
        if !self.mints.read().contains_key(&mint) {
            return Err(TokenGateError::not_found("Mint", Some(mint.to_hex())));
        }
        self.metadata.write().insert(mint, metadata);
        Ok(())
    }

    fn metadata(&self, mint: &Address) -> Option<MetadataInfo> {
        self.metadata.read().get(mint).cloned()
    }

    fn token_account_address(&self, owner: &Address, mint: &Address) -> Address {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"token-account");
        hasher.update(owner.as_ref());
        hasher.update(mint.as_ref());
        Address(*hasher.finalize().as_bytes())
    }

    fn init_token_account(&self, owner: Address, mint: Address) -> Result<Address, TokenGateError> {
        if !self.mints.read().contains_key(&mint) {
            return Err(TokenGateError::not_found("Mint", Some(mint.to_hex())));
        }
        let address = self.token_account_address(&owner, &mint);
        let mut token_accounts = self.token_accounts.write();
        if token_accounts.contains_key(&address) {
            return Err(TokenGateError::validation(
                format!("Token account {} already exists", address),
                None::<std::convert::Infallible>,
            ));
        }
        token_accounts.insert(address, TokenAccountRecord::new(owner, mint));
        drop(token_accounts);

        // The holding account itself is a rent-funded ledger account.
        let mut accounts = self.accounts.write();
        accounts.entry(address).or_insert(NativeAccount {
            lamports: self.rent_exempt_minimum(TOKEN_ACCOUNT_SIZE),
            size: TOKEN_ACCOUNT_SIZE,
        });
        Ok(address)
    }

    fn token_account(&self, address: &Address) -> Option<TokenAccountRecord> {
        self.token_accounts.read().get(address).cloned()
    }

    fn mint_to(
        &self,
        mint: &Address,
        authority: &Address,
        to_owner: &Address,
        amount: u64,
    ) -> Result<(), TokenGateError> {
        {
            let mints = self.mints.read();
            let record = mints
                .get(mint)
                .ok_or_else(|| TokenGateError::not_found("Mint", Some(mint.to_hex())))?;
            if record.mint_authority.as_ref() != Some(authority) {
                return Err(TokenGateError::InvalidAuthority);
            }
        }
        let address = self.token_account_address(to_owner, mint);
        self.token_account_mut(&address, |account| {
            Self::check_frozen(account)?;
            account.amount = account
                .amount
                .checked_add(amount)
                .ok_or(TokenGateError::NumericalOverflow)?;
            Ok(())
        })?;
        let mut mints = self.mints.write();
        if let Some(record) = mints.get_mut(mint) {
            record.supply = record
                .supply
                .checked_add(amount)
                .ok_or(TokenGateError::NumericalOverflow)?;
        }
        debug!(mint = %mint, to = %to_owner, amount, "mint_to");
        Ok(())
    }

    fn transfer_tokens(
        &self,
        mint: &Address,
        from_owner: &Address,
        to_owner: &Address,
        amount: u64,
    ) -> Result<(), TokenGateError> {
        let from_address = self.token_account_address(from_owner, mint);
        let to_address = self.token_account_address(to_owner, mint);

        self.token_account_mut(&from_address, |account| {
            Self::check_frozen(account)?;
            if account.amount < amount {
                return Err(TokenGateError::insufficient_balance(
                    mint.to_hex(),
                    account.amount,
                    amount,
                ));
            }
            account.amount -= amount;
            Ok(())
        })?;
        self.token_account_mut(&to_address, |account| {
            Self::check_frozen(account)?;
            account.amount = account.amount.saturating_add(amount);
            Ok(())
        })?;
        debug!(mint = %mint, from = %from_owner, to = %to_owner, amount, "token transfer");
        Ok(())
    }

    fn approve_delegate(
        &self,
        owner: &Address,
        mint: &Address,
        delegate: Address,
        amount: u64,
    ) -> Result<(), TokenGateError> {
        let address = self.token_account_address(owner, mint);
        self.token_account_mut(&address, |account| {
            Self::check_frozen(account)?;
            account.delegate = Some(delegate);
            account.delegated_amount = amount;
            Ok(())
        })
    }

    fn revoke_delegate(&self, owner: &Address, mint: &Address) -> Result<(), TokenGateError> {
        let address = self.token_account_address(owner, mint);
        self.token_account_mut(&address, |account| {
            Self::check_frozen(account)?;
            account.delegate = None;
            account.delegated_amount = 0;
            Ok(())
        })
    }

    fn freeze_account(
        &self,
        owner: &Address,
        mint: &Address,
        authority: &Address,
    ) -> Result<(), TokenGateError> {
        {
            let mints = self.mints.read();
            let record = mints
                .get(mint)
                .ok_or_else(|| TokenGateError::not_found("Mint", Some(mint.to_hex())))?;
            if record.freeze_authority.as_ref() != Some(authority) {
                return Err(TokenGateError::InvalidAuthority);
            }
        }
        let address = self.token_account_address(owner, mint);
        self.token_account_mut(&address, |account| {
            account.frozen = true;
            Ok(())
        })
    }

    fn thaw_account(
        &self,
        owner: &Address,
        mint: &Address,
        authority: &Address,
    ) -> Result<(), TokenGateError> {
        {
            let mints = self.mints.read();
            let record = mints
                .get(mint)
                .ok_or_else(|| TokenGateError::not_found("Mint", Some(mint.to_hex())))?;
            if record.freeze_authority.as_ref() != Some(authority) {
                return Err(TokenGateError::InvalidAuthority);
            }
        }
        let address = self.token_account_address(owner, mint);
        self.token_account_mut(&address, |account| {
            account.frozen = false;
            Ok(())
        })
    }

    fn burn(&self, owner: &Address, mint: &Address, amount: u64) -> Result<(), TokenGateError> {
        let address = self.token_account_address(owner, mint);
        self.token_account_mut(&address, |account| {
            Self::check_frozen(account)?;
            if account.amount < amount {
                return Err(TokenGateError::insufficient_balance(
                    mint.to_hex(),
                    account.amount,
                    amount,
                ));
            }
            account.amount -= amount;
            Ok(())
        })?;
        let mut mints = self.mints.write();
        if let Some(record) = mints.get_mut(mint) {
            record.supply = record.supply.saturating_sub(amount);
        }
        debug!(mint = %mint, owner = %owner, amount, "burn");
        Ok(())
    }

    fn close_token_account(&self, owner: &Address, mint: &Address) -> Result<(), TokenGateError> {
        let address = self.token_account_address(owner, mint);
        {
            let token_accounts = self.token_accounts.read();
            let account = token_accounts
                .get(&address)
                .ok_or_else(|| TokenGateError::not_found("TokenAccount", Some(address.to_hex())))?;
            if account.amount != 0 {
                return Err(TokenGateError::validation(
                    "Cannot close a token account holding tokens",
                    None::<std::convert::Infallible>,
                ));
            }
        }
        self.token_accounts.write().remove(&address);

        // Rent lamports flow back to the owner.
        let mut accounts = self.accounts.write();
        let reclaimed = accounts.remove(&address).map(|a| a.lamports).unwrap_or(0);
        if reclaimed > 0 {
            let entry = accounts
                .entry(*owner)
                .or_insert(NativeAccount { lamports: 0, size: 0 });
            entry.lamports = entry.lamports.saturating_add(reclaimed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with_mint() -> (MemoryLedger, Address, Address) {
        let ledger = MemoryLedger::new();
        let mint = Address::new_unique();
        let authority = Address::new_unique();
        ledger
            .init_mint(mint, 0, authority, authority)
            .expect("Failed to init mint");
        (ledger, mint, authority)
    }

    #[test]
    fn test_mint_and_transfer() {
        let (ledger, mint, authority) = ledger_with_mint();
        let alice = Address::new_unique();
        let bob = Address::new_unique();
        ledger.init_token_account(alice, mint).unwrap();
        ledger.init_token_account(bob, mint).unwrap();

        ledger.mint_to(&mint, &authority, &alice, 1).unwrap();
        assert_eq!(ledger.mint_record(&mint).unwrap().supply, 1);

        ledger.transfer_tokens(&mint, &alice, &bob, 1).unwrap();
        let bob_account = ledger
            .token_account(&ledger.token_account_address(&bob, &mint))
            .unwrap();
        assert_eq!(bob_account.amount, 1);
    }

    #[test]
    fn test_mint_to_requires_authority() {
        let (ledger, mint, _) = ledger_with_mint();
        let alice = Address::new_unique();
        ledger.init_token_account(alice, mint).unwrap();
        let outsider = Address::new_unique();
        assert!(matches!(
            ledger.mint_to(&mint, &outsider, &alice, 1),
            Err(TokenGateError::InvalidAuthority)
        ));
    }

    #[test]
    fn test_frozen_account_cannot_move() {
        let (ledger, mint, authority) = ledger_with_mint();
        let alice = Address::new_unique();
        let bob = Address::new_unique();
        ledger.init_token_account(alice, mint).unwrap();
        ledger.init_token_account(bob, mint).unwrap();
        ledger.mint_to(&mint, &authority, &alice, 1).unwrap();

        ledger.freeze_account(&alice, &mint, &authority).unwrap();
        assert!(ledger.transfer_tokens(&mint, &alice, &bob, 1).is_err());

        ledger.thaw_account(&alice, &mint, &authority).unwrap();
        assert!(ledger.transfer_tokens(&mint, &alice, &bob, 1).is_ok());
    }

    #[test]
    fn test_insufficient_token_balance() {
        let (ledger, mint, authority) = ledger_with_mint();
        let alice = Address::new_unique();
        let bob = Address::new_unique();
        ledger.init_token_account(alice, mint).unwrap();
        ledger.init_token_account(bob, mint).unwrap();
        ledger.mint_to(&mint, &authority, &alice, 1).unwrap();

        assert!(matches!(
            ledger.transfer_tokens(&mint, &alice, &bob, 2),
            Err(TokenGateError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_native_transfer_and_balance() {
        let ledger = MemoryLedger::new();
        let alice = Address::new_unique();
        let bob = Address::new_unique();
        ledger.create_account(alice, 1_000, 0).unwrap();
        ledger.create_account(bob, 0, 0).unwrap();

        ledger.transfer_native(&alice, &bob, 400).unwrap();
        assert_eq!(ledger.native_balance(&alice), Some(600));
        assert_eq!(ledger.native_balance(&bob), Some(400));

        assert!(matches!(
            ledger.transfer_native(&alice, &bob, 601),
            Err(TokenGateError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_close_requires_empty_account() {
        let (ledger, mint, authority) = ledger_with_mint();
        let alice = Address::new_unique();
        ledger.init_token_account(alice, mint).unwrap();
        ledger.mint_to(&mint, &authority, &alice, 1).unwrap();

        assert!(ledger.close_token_account(&alice, &mint).is_err());
        ledger.burn(&alice, &mint, 1).unwrap();
        ledger.close_token_account(&alice, &mint).unwrap();
        assert!(ledger
            .token_account(&ledger.token_account_address(&alice, &mint))
            .is_none());
    }

    #[test]
    fn test_close_reclaims_rent_to_owner() {
        let (ledger, mint, _) = ledger_with_mint();
        let alice = Address::new_unique();
        ledger.create_account(alice, 0, 0).unwrap();
        ledger.init_token_account(alice, mint).unwrap();
        let rent = ledger.rent_exempt_minimum(TOKEN_ACCOUNT_SIZE);

        ledger.close_token_account(&alice, &mint).unwrap();
        assert_eq!(ledger.native_balance(&alice), Some(rent));
    }

    #[test]
    fn test_snapshot_restore() {
        let (ledger, mint, authority) = ledger_with_mint();
        let alice = Address::new_unique();
        ledger.init_token_account(alice, mint).unwrap();
        let snapshot = ledger.snapshot();

        ledger.mint_to(&mint, &authority, &alice, 1).unwrap();
        assert_eq!(ledger.mint_record(&mint).unwrap().supply, 1);

        ledger.restore(snapshot);
        assert_eq!(
            ledger.mint_record(&mint).unwrap().supply,
            0,
            "Restore discards every effect since the snapshot"
        );
    }
}

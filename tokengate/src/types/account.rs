//! Account primitives shared across the engine.
//!
//! The engine never manipulates ledger storage directly. Everything it
//! observes about the outside world arrives as one of the views defined
//! here: an opaque [`Address`], a token account, a mint, or the metadata
//! attached to a mint.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::error::TokenGateError;

/// Opaque 32-byte key identifying any participant in the system:
/// accounts, mints, programs, authorities, collectors and derived
/// record identifiers all share this type.
///
/// The all-zero address doubles as the native-value sentinel in balance
/// accounting, mirroring the host ledger's convention.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub fn new(bytes: [u8; 32]) -> Self {
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to a hex string for identification
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Create from a hex string
    pub fn from_hex(hex_str: &str) -> Result<Self, TokenGateError> {
        let bytes = hex::decode(hex_str).map_err(|e| {
            TokenGateError::validation(format!("Invalid address hex: {}", e), Some(e))
        })?;

        if bytes.len() != 32 {
            return Err(TokenGateError::validation(
                format!("Invalid address length: {}", bytes.len()),
                None::<std::convert::Infallible>,
            ));
        }

        let mut address = [0u8; 32];
        address.copy_from_slice(&bytes);
        Ok(Address(address))
    }

    /// Generate a fresh random address. Used by tests and callers that
    /// need a unique key outside any derivation scheme.
    pub fn new_unique() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Address(bytes)
    }

    /// Whether this is the all-zero native-value sentinel.
    pub fn is_native(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Host-ledger view of a token holding account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenAccountRecord {
    pub owner: Address,
    pub mint: Address,
    pub amount: u64,
    pub delegate: Option<Address>,
    pub delegated_amount: u64,
    /// Frozen accounts cannot move tokens until thawed by the freeze
    /// authority.
    pub frozen: bool,
}

impl TokenAccountRecord {
    pub fn new(owner: Address, mint: Address) -> Self {
        Self {
            owner,
            mint,
            amount: 0,
            delegate: None,
            delegated_amount: 0,
            frozen: false,
        }
    }
}

/// Host-ledger view of a mint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MintRecord {
    pub mint_authority: Option<Address>,
    pub freeze_authority: Option<Address>,
    pub supply: u64,
    pub decimals: u8,
    pub is_initialized: bool,
}

/// Metadata attached to a mint, as exposed to rule evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetadataInfo {
    pub name: String,
    pub symbol: String,
    pub uri: String,
    pub seller_fee_basis_points: u16,
    pub update_authority: Address,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_hex_roundtrip() {
        let address = Address::new_unique();
        let hex_str = address.to_hex();
        let parsed = Address::from_hex(&hex_str).expect("Failed to parse hex");
        assert_eq!(address, parsed, "Address should survive a hex roundtrip");
    }

    #[test]
    fn test_address_rejects_bad_hex() {
        assert!(Address::from_hex("zz").is_err(), "Non-hex input should fail");
        assert!(
            Address::from_hex("ab").is_err(),
            "Short input should fail the length check"
        );
    }

    #[test]
    fn test_native_sentinel() {
        assert!(Address::default().is_native());
        assert!(!Address::new_unique().is_native());
    }
}

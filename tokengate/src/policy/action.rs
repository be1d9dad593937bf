//! Action context: the fact set a rule tree is evaluated against.
//!
//! Every guarded operation assembles an [`ActionCtx`] describing the
//! attempt: the action name, the programs invoked in the batch, the
//! participants, and snapshots of the mint, its metadata and its state.
//! `to_facts` flattens the context into slash-separated field paths so
//! rule leaves can address any part of it.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::mint_state::MintState;
use crate::policy::rule::Facts;
use crate::types::account::{Address, MetadataInfo, MintRecord, TokenAccountRecord};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MetadataCtx {
    pub name: String,
    pub symbol: String,
    pub uri: String,
    pub seller_fee_basis_points: u16,
    pub update_authority: String,
}

impl From<&MetadataInfo> for MetadataCtx {
    fn from(metadata: &MetadataInfo) -> Self {
        Self {
            name: metadata.name.clone(),
            symbol: metadata.symbol.clone(),
            uri: metadata.uri.clone(),
            seller_fee_basis_points: metadata.seller_fee_basis_points,
            update_authority: metadata.update_authority.to_hex(),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TokenAccountCtx {
    pub owner: String,
    pub amount: u64,
    pub delegate: Option<String>,
    pub delegated_amount: u64,
}

impl From<&TokenAccountRecord> for TokenAccountCtx {
    fn from(account: &TokenAccountRecord) -> Self {
        Self {
            owner: account.owner.to_hex(),
            amount: account.amount,
            delegate: account.delegate.map(|d| d.to_hex()),
            delegated_amount: account.delegated_amount,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MintAccountCtx {
    pub mint_authority: Option<String>,
    pub supply: u64,
    pub decimals: u8,
    pub is_initialized: bool,
    pub freeze_authority: Option<String>,
}

impl From<&MintRecord> for MintAccountCtx {
    fn from(mint: &MintRecord) -> Self {
        Self {
            mint_authority: mint.mint_authority.map(|a| a.to_hex()),
            supply: mint.supply,
            decimals: mint.decimals,
            is_initialized: mint.is_initialized,
            freeze_authority: mint.freeze_authority.map(|a| a.to_hex()),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
pub struct DatetimeCtx {
    pub utc_timestamp: i64,
    pub utc_hour: u8,
}

impl From<i64> for DatetimeCtx {
    fn from(secs: i64) -> Self {
        Self {
            utc_timestamp: secs,
            utc_hour: (secs / 3600 % 24) as u8,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MintStateCtx {
    pub version: u8,
    pub policy: Option<String>,
    pub locked_by: Option<String>,
    pub last_approved_at: i64,
    pub last_transferred_at: i64,
    pub transferred_count: u32,

    // derived from existing fields
    pub derived_cooldown: i64,
    pub derived_datetime: DatetimeCtx,
}

impl From<&MintState> for MintStateCtx {
    fn from(mint_state: &MintState) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        MintStateCtx {
            version: mint_state.version,
            policy: mint_state.policy.map(|p| p.to_hex()),
            locked_by: mint_state.locked_by.map(|l| l.to_hex()),
            last_approved_at: mint_state.last_approved_at,
            last_transferred_at: mint_state.last_transferred_at,
            transferred_count: mint_state.transferred_count,

            derived_cooldown: (now - mint_state.last_approved_at)
                .clamp(0, std::cmp::max(0, now - mint_state.last_transferred_at)),
            derived_datetime: now.into(),
        }
    }
}

/// Everything a rule tree may observe about one attempted action.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ActionCtx {
    pub action: String,
    pub program_ids: Vec<Address>,
    pub mint: Address,
    pub mint_state: MintStateCtx,
    pub mint_account: Option<MintAccountCtx>,
    pub metadata: Option<MetadataCtx>,
    pub payer: Option<Address>,
    /// Owner of the from account, and many actions' initiator.
    pub from: Option<Address>,
    /// Owner of the to account.
    pub to: Option<Address>,
    pub last_memo_signer: Option<Address>,
    pub last_memo_data: Option<String>,
    /// Sale price observed by balance reconciliation, in native base
    /// units. Only present for captured transfers.
    pub price: Option<u64>,
    pub royalty_fee_bp: Option<u16>,
    pub royalty_fee: Option<u64>,
}

impl ActionCtx {
    pub fn new(action: impl Into<String>, mint: Address) -> Self {
        Self {
            action: action.into(),
            mint,
            ..Default::default()
        }
    }

    /// Flatten the context into the fact map consumed by rule
    /// evaluation. Optional fields that are not present are simply
    /// omitted so they read back as the absent sentinel.
    pub fn to_facts(&self) -> Facts {
        let mut facts = Facts::new();
        facts.insert_str("action", self.action.clone());
        facts.insert_str_list(
            "program_ids",
            self.program_ids.iter().map(|p| p.to_hex()).collect(),
        );
        facts.insert_str("mint", self.mint.to_hex());

        if let Some(payer) = &self.payer {
            facts.insert_str("payer", payer.to_hex());
        }
        if let Some(from) = &self.from {
            facts.insert_str("from", from.to_hex());
        }
        if let Some(to) = &self.to {
            facts.insert_str("to", to.to_hex());
        }
        if let Some(signer) = &self.last_memo_signer {
            facts.insert_str("last_memo_signer", signer.to_hex());
        }
        if let Some(data) = &self.last_memo_data {
            facts.insert_str("last_memo_data", data.clone());
        }
        if let Some(price) = self.price {
            facts.insert_int("price", price as i64);
        }
        if let Some(fee_bp) = self.royalty_fee_bp {
            facts.insert_int("royalty_fee_bp", fee_bp as i64);
        }
        if let Some(fee) = self.royalty_fee {
            facts.insert_int("royalty_fee", fee as i64);
        }

        if let Some(metadata) = &self.metadata {
            facts.insert_str("metadata/name", metadata.name.clone());
            facts.insert_str("metadata/symbol", metadata.symbol.clone());
            facts.insert_str("metadata/uri", metadata.uri.clone());
            facts.insert_int(
                "metadata/seller_fee_basis_points",
                metadata.seller_fee_basis_points as i64,
            );
            facts.insert_str(
                "metadata/update_authority",
                metadata.update_authority.clone(),
            );
        }

        if let Some(mint_account) = &self.mint_account {
            facts.insert_int("mint_account/supply", mint_account.supply as i64);
            facts.insert_int("mint_account/decimals", mint_account.decimals as i64);
            if let Some(mint_authority) = &mint_account.mint_authority {
                facts.insert_str("mint_account/mint_authority", mint_authority.clone());
            }
            if let Some(freeze_authority) = &mint_account.freeze_authority {
                facts.insert_str("mint_account/freeze_authority", freeze_authority.clone());
            }
        }

        facts.insert_int("mint_state/version", self.mint_state.version as i64);
        if let Some(policy) = &self.mint_state.policy {
            facts.insert_str("mint_state/policy", policy.clone());
        }
        if let Some(locked_by) = &self.mint_state.locked_by {
            facts.insert_str("mint_state/locked_by", locked_by.clone());
        }
        facts.insert_int(
            "mint_state/last_approved_at",
            self.mint_state.last_approved_at,
        );
        facts.insert_int(
            "mint_state/last_transferred_at",
            self.mint_state.last_transferred_at,
        );
        facts.insert_int(
            "mint_state/transferred_count",
            self.mint_state.transferred_count as i64,
        );
        facts.insert_int(
            "mint_state/derived_cooldown",
            self.mint_state.derived_cooldown,
        );
        facts.insert_int(
            "mint_state/derived_datetime/utc_timestamp",
            self.mint_state.derived_datetime.utc_timestamp,
        );
        facts.insert_int(
            "mint_state/derived_datetime/utc_hour",
            self.mint_state.derived_datetime.utc_hour as i64,
        );

        facts
    }
}

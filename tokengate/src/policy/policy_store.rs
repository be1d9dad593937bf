//! Policy, ruleset and mint manager storage.
//!
//! Records live in address-keyed maps backed by the host account store
//! abstraction. Lookups of hot policies go through an LRU cache with
//! time-based expiration so repeated guard evaluations do not reread
//! the backing store.
//!
//! All mutation is authority-gated: updates replace the mutable fields
//! wholesale and require the signer to be the record's current
//! authority, so a stale update replayed after an authority rotation
//! fails.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::RwLock;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::policy::policy_types::{MintManager, Policy, Ruleset};
use crate::policy::royalty::DynamicRoyalty;
use crate::policy::rule::RuleNode;
use crate::types::account::Address;
use crate::types::error::TokenGateError;

/// Cache entry with expiration time
#[derive(Debug)]
struct CacheEntry {
    policy: Policy,
    added: Instant,
    last_access: Instant,
}

/// Storage, retrieval and authority-gated mutation of the governance
/// records.
#[derive(Debug, Clone)]
pub struct PolicyStore {
    policies: Arc<RwLock<HashMap<Address, Policy>>>,
    rulesets: Arc<RwLock<HashMap<Address, Ruleset>>>,
    mint_managers: Arc<RwLock<HashMap<Address, MintManager>>>,

    /// In-memory cache of policies with expiration
    cache: Arc<RwLock<HashMap<Address, CacheEntry>>>,
    /// Access order for implementing LRU eviction
    access_order: Arc<RwLock<VecDeque<Address>>>,
    max_cache_size: usize,
    cache_ttl: Duration,
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

fn authority_matches(expected: &Address, signer: &Address) -> bool {
    bool::from(expected.as_ref().ct_eq(signer.as_ref()))
}

impl PolicyStore {
    /// Create a new policy store with default cache settings
    pub fn new() -> Self {
        Self::with_cache_settings(1000, Duration::from_secs(3600))
    }

    /// Create a new policy store with specified cache settings
    pub fn with_cache_settings(max_cache_size: usize, cache_ttl: Duration) -> Self {
        Self {
            policies: Arc::new(RwLock::new(HashMap::new())),
            rulesets: Arc::new(RwLock::new(HashMap::new())),
            mint_managers: Arc::new(RwLock::new(HashMap::new())),
            cache: Arc::new(RwLock::new(HashMap::new())),
            access_order: Arc::new(RwLock::new(VecDeque::with_capacity(max_cache_size))),
            max_cache_size,
            cache_ttl,
        }
    }

    // ------------------------------------------------------------------
    //                              Policy
    // ------------------------------------------------------------------

    /// Create a new policy at its uuid-derived identifier.
    pub fn init_policy(
        &self,
        uuid: Address,
        authority: Address,
        collector: Address,
        rule_tree: Option<RuleNode>,
        dynamic_royalty: Option<DynamicRoyalty>,
    ) -> Result<Address, TokenGateError> {
        let policy = Policy {
            version: 0,
            uuid,
            authority,
            collector,
            rule_tree,
            dynamic_royalty,
        };
        policy.valid()?;

        let id = policy.id();
        let mut policies = self.policies.write();
        if policies.contains_key(&id) {
            return Err(TokenGateError::invalid_policy_creation(format!(
                "policy {} already exists",
                id
            )));
        }
        debug!(policy = %id, "policy initialized");
        policies.insert(id, policy.clone());
        drop(policies);

        self.add_to_cache(id, policy);
        Ok(id)
    }

    /// Replace a policy's mutable fields wholesale. The signer must be
    /// the current authority; the update may hand authority to a new
    /// address, which takes effect for subsequent calls.
    pub fn update_policy(
        &self,
        policy_id: &Address,
        signer: &Address,
        authority: Address,
        collector: Address,
        rule_tree: Option<RuleNode>,
        dynamic_royalty: Option<DynamicRoyalty>,
    ) -> Result<(), TokenGateError> {
        let mut policies = self.policies.write();
        let policy = policies
            .get_mut(policy_id)
            .ok_or_else(|| TokenGateError::not_found("Policy", Some(policy_id.to_hex())))?;

        if !authority_matches(&policy.authority, signer) {
            return Err(TokenGateError::InvalidAuthority);
        }

        let updated = Policy {
            version: policy.version,
            uuid: policy.uuid,
            authority,
            collector,
            rule_tree,
            dynamic_royalty,
        };
        updated.valid()?;

        debug!(policy = %policy_id, "policy updated");
        *policy = updated.clone();
        drop(policies);

        self.add_to_cache(*policy_id, updated);
        Ok(())
    }

    /// Retrieve a policy by its identifier, via the cache when warm.
    pub fn get_policy(&self, policy_id: &Address) -> Result<Policy, TokenGateError> {
        if let Some(policy) = self.get_from_cache(policy_id) {
            return Ok(policy);
        }

        let policy = self
            .policies
            .read()
            .get(policy_id)
            .cloned()
            .ok_or_else(|| TokenGateError::not_found("Policy", Some(policy_id.to_hex())))?;

        self.add_to_cache(*policy_id, policy.clone());
        Ok(policy)
    }

    // ------------------------------------------------------------------
    //                             Ruleset
    // ------------------------------------------------------------------

    /// Create a ruleset at its name-derived identifier. The derivation
    /// is the uniqueness mechanism: a second init with the same name
    /// lands on the same identifier and is rejected.
    #[allow(clippy::too_many_arguments)]
    pub fn init_ruleset(
        &self,
        name: impl Into<String>,
        authority: Address,
        collector: Address,
        check_seller_fee_basis_points: bool,
        disallowed_addresses: Vec<Address>,
        allowed_programs: Vec<Address>,
    ) -> Result<Address, TokenGateError> {
        let ruleset = Ruleset {
            version: 0,
            authority,
            collector,
            check_seller_fee_basis_points,
            name: name.into(),
            disallowed_addresses,
            allowed_programs,
        };

        let id = ruleset.id();
        let mut rulesets = self.rulesets.write();
        if rulesets.contains_key(&id) {
            return Err(TokenGateError::invalid_policy_creation(format!(
                "ruleset named {} already exists",
                ruleset.name
            )));
        }
        debug!(ruleset = %ruleset.name, id = %id, "ruleset initialized");
        rulesets.insert(id, ruleset);
        Ok(id)
    }

    /// Replace a ruleset's mutable fields wholesale, authority-gated.
    /// The name (and therefore the identifier) is immutable.
    #[allow(clippy::too_many_arguments)]
    pub fn update_ruleset(
        &self,
        ruleset_id: &Address,
        signer: &Address,
        authority: Address,
        collector: Address,
        check_seller_fee_basis_points: bool,
        disallowed_addresses: Vec<Address>,
        allowed_programs: Vec<Address>,
    ) -> Result<(), TokenGateError> {
        let mut rulesets = self.rulesets.write();
        let ruleset = rulesets
            .get_mut(ruleset_id)
            .ok_or_else(|| TokenGateError::not_found("Ruleset", Some(ruleset_id.to_hex())))?;

        if !authority_matches(&ruleset.authority, signer) {
            return Err(TokenGateError::InvalidAuthority);
        }

        ruleset.authority = authority;
        ruleset.collector = collector;
        ruleset.check_seller_fee_basis_points = check_seller_fee_basis_points;
        ruleset.disallowed_addresses = disallowed_addresses;
        ruleset.allowed_programs = allowed_programs;
        debug!(ruleset = %ruleset.name, "ruleset updated");
        Ok(())
    }

    pub fn get_ruleset(&self, ruleset_id: &Address) -> Result<Ruleset, TokenGateError> {
        self.rulesets
            .read()
            .get(ruleset_id)
            .cloned()
            .ok_or_else(|| TokenGateError::not_found("Ruleset", Some(ruleset_id.to_hex())))
    }

    // ------------------------------------------------------------------
    //                           Mint manager
    // ------------------------------------------------------------------

    /// Bind a mint to a ruleset. One manager per mint, at the
    /// mint-derived identifier.
    pub fn init_mint_manager(
        &self,
        mint: Address,
        ruleset_id: &Address,
        authority: Address,
    ) -> Result<Address, TokenGateError> {
        if !self.rulesets.read().contains_key(ruleset_id) {
            return Err(TokenGateError::InvalidRuleset);
        }

        let mint_manager = MintManager {
            version: 0,
            mint,
            authority,
            ruleset: *ruleset_id,
        };
        let id = mint_manager.id();
        let mut mint_managers = self.mint_managers.write();
        if mint_managers.contains_key(&id) {
            return Err(TokenGateError::validation(
                format!("Mint {} already has a mint manager", mint),
                None::<std::convert::Infallible>,
            ));
        }
        debug!(mint = %mint, "mint manager initialized");
        mint_managers.insert(id, mint_manager);
        Ok(id)
    }

    /// Rotate the authority and/or rebind the ruleset, authority-gated.
    pub fn update_mint_manager(
        &self,
        mint_manager_id: &Address,
        signer: &Address,
        authority: Address,
        ruleset_id: &Address,
    ) -> Result<(), TokenGateError> {
        if !self.rulesets.read().contains_key(ruleset_id) {
            return Err(TokenGateError::InvalidRuleset);
        }

        let mut mint_managers = self.mint_managers.write();
        let mint_manager = mint_managers.get_mut(mint_manager_id).ok_or_else(|| {
            TokenGateError::not_found("MintManager", Some(mint_manager_id.to_hex()))
        })?;

        if !authority_matches(&mint_manager.authority, signer) {
            return Err(TokenGateError::InvalidAuthority);
        }

        mint_manager.authority = authority;
        mint_manager.ruleset = *ruleset_id;
        debug!(mint = %mint_manager.mint, "mint manager updated");
        Ok(())
    }

    pub fn get_mint_manager(
        &self,
        mint_manager_id: &Address,
    ) -> Result<MintManager, TokenGateError> {
        self.mint_managers
            .read()
            .get(mint_manager_id)
            .cloned()
            .ok_or_else(|| TokenGateError::not_found("MintManager", Some(mint_manager_id.to_hex())))
    }

    /// Resolve the manager governing a mint, if the mint is bound.
    pub fn mint_manager_for_mint(&self, mint: &Address) -> Option<MintManager> {
        self.mint_managers
            .read()
            .get(&MintManager::derive_id(mint))
            .cloned()
    }

    /// Remove the manager binding, as part of burning the mint.
    pub fn remove_mint_manager(&self, mint: &Address) -> Result<(), TokenGateError> {
        let id = MintManager::derive_id(mint);
        self.mint_managers
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| TokenGateError::not_found("MintManager", Some(id.to_hex())))
    }

    // ------------------------------------------------------------------
    //                              Cache
    // ------------------------------------------------------------------

    /// Get a policy from cache if present and not expired.
    pub fn get_from_cache(&self, policy_id: &Address) -> Option<Policy> {
        let mut cache = self.cache.write();
        let mut access_order = self.access_order.write();

        if let Some(entry) = cache.get_mut(policy_id) {
            let now = Instant::now();

            if now.duration_since(entry.added) > self.cache_ttl {
                cache.remove(policy_id);
                if let Some(pos) = access_order.iter().position(|a| a == policy_id) {
                    access_order.remove(pos);
                }
                return None;
            }

            entry.last_access = now;
            if let Some(pos) = access_order.iter().position(|a| a == policy_id) {
                access_order.remove(pos);
            }
            access_order.push_back(*policy_id);

            return Some(entry.policy.clone());
        }

        None
    }

    fn add_to_cache(&self, policy_id: Address, policy: Policy) {
        let mut cache = self.cache.write();
        let mut access_order = self.access_order.write();

        if cache.len() >= self.max_cache_size && !cache.contains_key(&policy_id) {
            // Evict least recently used
            if let Some(lru_id) = access_order.pop_front() {
                cache.remove(&lru_id);
            }
        }

        let now = Instant::now();
        let entry = CacheEntry {
            policy,
            added: now,
            last_access: now,
        };

        if let Some(pos) = access_order.iter().position(|a| a == &policy_id) {
            access_order.remove(pos);
        }
        access_order.push_back(policy_id);
        cache.insert(policy_id, entry);
    }

    /// Evict expired entries from the cache.
    pub fn evict_expired(&self) {
        let mut cache = self.cache.write();
        let mut access_order = self.access_order.write();
        let now = Instant::now();

        let expired: Vec<Address> = cache
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.added) > self.cache_ttl)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            cache.remove(id);
            if let Some(pos) = access_order.iter().position(|a| a == id) {
                access_order.remove(pos);
            }
        }
    }

    /// Clear the policy cache.
    pub fn clear_cache(&self) {
        self.cache.write().clear();
        self.access_order.write().clear();
    }

    // ------------------------------------------------------------------
    //                        Batch atomicity hooks
    // ------------------------------------------------------------------

    pub(crate) fn snapshot(&self) -> PolicyStoreSnapshot {
        PolicyStoreSnapshot {
            policies: self.policies.read().clone(),
            rulesets: self.rulesets.read().clone(),
            mint_managers: self.mint_managers.read().clone(),
        }
    }

    pub(crate) fn restore(&self, snapshot: PolicyStoreSnapshot) {
        *self.policies.write() = snapshot.policies;
        *self.rulesets.write() = snapshot.rulesets;
        *self.mint_managers.write() = snapshot.mint_managers;
        self.clear_cache();
    }
}

#[derive(Debug)]
pub(crate) struct PolicyStoreSnapshot {
    policies: HashMap<Address, Policy>,
    rulesets: HashMap<Address, Ruleset>,
    mint_managers: HashMap<Address, MintManager>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PolicyStore {
        PolicyStore::new()
    }

    #[test]
    fn test_policy_roundtrip() {
        let store = store();
        let uuid = Address::new_unique();
        let authority = Address::new_unique();
        let collector = Address::new_unique();

        let id = store
            .init_policy(uuid, authority, collector, None, None)
            .expect("Failed to init policy");
        assert_eq!(id, Policy::derive_id(&uuid));

        let policy = store.get_policy(&id).expect("Failed to read policy back");
        assert_eq!(policy.authority, authority);
        assert_eq!(policy.collector, collector);
        assert_eq!(policy.rule_tree, None);
    }

    #[test]
    fn test_duplicate_policy_rejected() {
        let store = store();
        let uuid = Address::new_unique();
        store
            .init_policy(uuid, Address::new_unique(), Address::new_unique(), None, None)
            .unwrap();
        let second = store.init_policy(
            uuid,
            Address::new_unique(),
            Address::new_unique(),
            None,
            None,
        );
        assert!(second.is_err(), "Same uuid derives the same identifier");
    }

    #[test]
    fn test_authority_rotation() {
        let store = store();
        let authority_a = Address::new_unique();
        let authority_b = Address::new_unique();
        let collector = Address::new_unique();
        let id = store
            .init_policy(Address::new_unique(), authority_a, collector, None, None)
            .unwrap();

        // Rotate authority from A to B.
        store
            .update_policy(&id, &authority_a, authority_b, collector, None, None)
            .expect("Update signed by current authority should pass");

        // A stale update signed by A replays and must fail, twice, with
        // the same error.
        for _ in 0..2 {
            let replay =
                store.update_policy(&id, &authority_a, authority_a, collector, None, None);
            assert!(matches!(replay, Err(TokenGateError::InvalidAuthority)));
        }

        // B can update.
        store
            .update_policy(&id, &authority_b, authority_b, collector, None, None)
            .expect("Update signed by new authority should pass");
    }

    #[test]
    fn test_ruleset_roundtrip_with_empty_lists() {
        let store = store();
        let authority = Address::new_unique();
        let collector = Address::new_unique();
        let id = store
            .init_ruleset("empty-lists", authority, collector, true, vec![], vec![])
            .expect("Failed to init ruleset");

        let ruleset = store.get_ruleset(&id).expect("Failed to read ruleset back");
        assert_eq!(ruleset.authority, authority);
        assert_eq!(ruleset.collector, collector);
        assert!(ruleset.check_seller_fee_basis_points);
        assert_eq!(
            ruleset.disallowed_addresses.len(),
            0,
            "Empty list reads back zero-length, not absent"
        );
        assert_eq!(ruleset.allowed_programs.len(), 0);
    }

    #[test]
    fn test_ruleset_name_collision() {
        let store = store();
        store
            .init_ruleset(
                "taken",
                Address::new_unique(),
                Address::new_unique(),
                false,
                vec![],
                vec![],
            )
            .unwrap();
        let second = store.init_ruleset(
            "taken",
            Address::new_unique(),
            Address::new_unique(),
            false,
            vec![],
            vec![],
        );
        assert!(second.is_err(), "Two rulesets cannot share a name");
    }

    #[test]
    fn test_mint_manager_requires_ruleset() {
        let store = store();
        let missing_ruleset = Address::new_unique();
        let result = store.init_mint_manager(
            Address::new_unique(),
            &missing_ruleset,
            Address::new_unique(),
        );
        assert!(matches!(result, Err(TokenGateError::InvalidRuleset)));
    }

    #[test]
    fn test_mint_manager_update_authority_gated() {
        let store = store();
        let authority = Address::new_unique();
        let ruleset_id = store
            .init_ruleset(
                "mm",
                authority,
                Address::new_unique(),
                false,
                vec![],
                vec![],
            )
            .unwrap();
        let mint = Address::new_unique();
        let id = store
            .init_mint_manager(mint, &ruleset_id, authority)
            .unwrap();

        let outsider = Address::new_unique();
        assert!(matches!(
            store.update_mint_manager(&id, &outsider, outsider, &ruleset_id),
            Err(TokenGateError::InvalidAuthority)
        ));

        let new_authority = Address::new_unique();
        store
            .update_mint_manager(&id, &authority, new_authority, &ruleset_id)
            .expect("Authority update should pass");
        assert_eq!(
            store.get_mint_manager(&id).unwrap().authority,
            new_authority
        );
        assert_eq!(
            store.mint_manager_for_mint(&mint).unwrap().authority,
            new_authority
        );
    }

    #[test]
    fn test_cache_expiry_and_clear() {
        let store = PolicyStore::with_cache_settings(10, Duration::from_secs(0));
        let id = store
            .init_policy(
                Address::new_unique(),
                Address::new_unique(),
                Address::new_unique(),
                None,
                None,
            )
            .unwrap();

        // Zero TTL: the entry expires immediately but the backing store
        // still serves the read.
        assert!(store.get_from_cache(&id).is_none());
        assert!(store.get_policy(&id).is_ok());

        store.clear_cache();
        assert!(store.get_from_cache(&id).is_none());
        assert!(store.get_policy(&id).is_ok());
    }

    #[test]
    fn test_cache_lru_eviction() {
        let store = PolicyStore::with_cache_settings(2, Duration::from_secs(3600));
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(
                store
                    .init_policy(
                        Address::new_unique(),
                        Address::new_unique(),
                        Address::new_unique(),
                        None,
                        None,
                    )
                    .unwrap(),
            );
        }
        // The first policy was evicted by the third insert.
        assert!(store.get_from_cache(&ids[0]).is_none());
        assert!(store.get_from_cache(&ids[2]).is_some());
    }
}

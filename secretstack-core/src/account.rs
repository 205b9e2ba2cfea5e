//! Account and region scoped state management

use dashmap::DashMap;
use std::fmt;
use std::hash::Hash;

/// Account id used when a request does not carry one
pub const DEFAULT_ACCOUNT_ID: &str = "000000000000";

/// Region used when a request does not carry one
pub const DEFAULT_REGION: &str = "us-east-1";

/// Key for account and region scoped state
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountRegionKey {
    pub account_id: String,
    pub region: String,
}

impl AccountRegionKey {
    pub fn new(account_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            region: region.into(),
        }
    }
}

impl Default for AccountRegionKey {
    fn default() -> Self {
        Self::new(DEFAULT_ACCOUNT_ID, DEFAULT_REGION)
    }
}

impl fmt::Display for AccountRegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account_id, self.region)
    }
}

/// Thread-safe state store with account/region scoping
pub struct StateStore<T> {
    data: DashMap<AccountRegionKey, T>,
}

impl<T> Default for StateStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> StateStore<T> {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Get the state for a scope, building it with `init` on first use
    pub fn get_or_create_with<F>(
        &self,
        key: &AccountRegionKey,
        init: F,
    ) -> dashmap::mapref::one::RefMut<'_, AccountRegionKey, T>
    where
        F: FnOnce(&AccountRegionKey) -> T,
    {
        self.data
            .entry(key.clone())
            .or_insert_with(|| init(key))
    }

    /// Get state for an account/region if it exists
    pub fn get(
        &self,
        key: &AccountRegionKey,
    ) -> Option<dashmap::mapref::one::Ref<'_, AccountRegionKey, T>> {
        self.data.get(key)
    }

    /// Number of scopes that hold state
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Clear all state
    pub fn clear(&self) {
        self.data.clear();
    }
}

//! Rule store shared by the admin surface and concurrently running flows.

use crate::error::{MitmError, RuleKind};
use crate::rules::{position_of_alias, DelayEntry, OverrideEntry, RuleSet, StatusEntry};
use crate::Result;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

/// Administration and lookup contract for interception rules.
///
/// Mutations are atomic relative to `snapshot()`: a caller either sees the
/// state before a mutation or after it, never in between. Removal misses
/// return `MitmError::NotFound` and leave the store untouched.
pub trait RuleStore: Send + Sync + std::fmt::Debug {
    fn add_block(&self, url: &str);
    fn remove_block(&self, url: &str) -> Result<()>;

    fn add_override(&self, entry: OverrideEntry);
    fn remove_override(&self, alias: &str) -> Result<OverrideEntry>;

    fn add_status_override(&self, entry: StatusEntry);
    fn remove_status_override(&self, alias: &str) -> Result<StatusEntry>;

    /// Delays can only be dropped through `clear_all`.
    fn add_delay(&self, entry: DelayEntry);

    fn clear_all(&self);

    /// Installs `rules` in place of everything currently loaded.
    fn replace_all(&self, rules: RuleSet);

    fn snapshot(&self) -> Arc<RuleSet>;
}

/// In-memory, copy-on-write rule store.
///
/// Readers clone an `Arc` under a short read lock and evaluate without any
/// lock held. Writers build the next `RuleSet` and swap it in.
#[derive(Debug, Default)]
pub struct InMemoryRuleStore {
    current: RwLock<Arc<RuleSet>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `mutate` to a private copy and publishes it.
    ///
    /// The write lock is held across copy and swap so concurrent writers do not
    /// lose each other's updates.
    fn update<T>(&self, mutate: impl FnOnce(&mut RuleSet) -> T) -> T {
        let mut guard = self.current.write();
        let mut next = RuleSet::clone(&**guard);
        let out = mutate(&mut next);
        *guard = Arc::new(next);
        out
    }
}

impl RuleStore for InMemoryRuleStore {
    fn add_block(&self, url: &str) {
        self.update(|rules| rules.block_list.push(url.to_string()));
        info!("Added '{}' to block list", url);
    }

    fn remove_block(&self, url: &str) -> Result<()> {
        let removed = self.update(|rules| {
            let index = rules.block_list.iter().position(|entry| entry == url)?;
            Some(rules.block_list.remove(index))
        });
        match removed {
            Some(_) => {
                info!("Removed '{}' from block list", url);
                Ok(())
            }
            None => {
                warn!("{} was not found in block list", url);
                Err(MitmError::not_found(RuleKind::Block, url))
            }
        }
    }

    fn add_override(&self, entry: OverrideEntry) {
        info!(
            "Added custom response '{}' for '{}' (status {})",
            entry.alias, entry.url, entry.status_code
        );
        self.update(|rules| rules.custom_responses.push(entry));
    }

    fn remove_override(&self, alias: &str) -> Result<OverrideEntry> {
        let removed = self.update(|rules| {
            let index = position_of_alias(&rules.custom_responses, alias)?;
            Some(rules.custom_responses.remove(index))
        });
        removed.ok_or_else(|| {
            warn!("Custom response with alias '{}' not found", alias);
            MitmError::not_found(RuleKind::Override, alias)
        })
    }

    fn add_status_override(&self, entry: StatusEntry) {
        info!(
            "Added custom status '{}' for '{}' -> {}",
            entry.alias, entry.url, entry.status_code
        );
        self.update(|rules| rules.custom_statuses.push(entry));
    }

    fn remove_status_override(&self, alias: &str) -> Result<StatusEntry> {
        let removed = self.update(|rules| {
            let index = position_of_alias(&rules.custom_statuses, alias)?;
            Some(rules.custom_statuses.remove(index))
        });
        removed.ok_or_else(|| {
            warn!("Custom response status with alias '{}' not found", alias);
            MitmError::not_found(RuleKind::Status, alias)
        })
    }

    fn add_delay(&self, entry: DelayEntry) {
        info!(
            "Added response delay '{}' for '{}' ({})",
            entry.alias, entry.url, entry.delay
        );
        self.update(|rules| rules.response_delays.push(entry));
    }

    fn clear_all(&self) {
        *self.current.write() = Arc::new(RuleSet::default());
        info!("Cleared all proxy rules");
    }

    fn replace_all(&self, rules: RuleSet) {
        let count = rules.len();
        *self.current.write() = Arc::new(rules);
        info!("Loaded {} proxy rules", count);
    }

    fn snapshot(&self) -> Arc<RuleSet> {
        self.current.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove_block() {
        let store = InMemoryRuleStore::new();
        store.add_block("http://example.com");
        store.add_block("http://example.com");
        assert_eq!(store.snapshot().block_list.len(), 2);

        store.remove_block("http://example.com").unwrap();
        assert_eq!(
            store.snapshot().block_list,
            vec!["http://example.com".to_string()]
        );
    }

    #[test]
    fn test_remove_missing_block_is_not_found() {
        let store = InMemoryRuleStore::new();
        store.add_block("a.example");
        let err = store.remove_block("b.example").unwrap_err();
        assert!(matches!(err, MitmError::NotFound { collection: RuleKind::Block, .. }));
        assert_eq!(store.snapshot().block_list.len(), 1);
    }

    #[test]
    fn test_remove_override_takes_first_duplicate_alias() {
        let store = InMemoryRuleStore::new();
        store.add_override(OverrideEntry::new("alias", "one.example"));
        store.add_override(OverrideEntry::new("alias", "two.example"));

        let removed = store.remove_override("alias").unwrap();
        assert_eq!(removed.url, "one.example");

        let rules = store.snapshot();
        assert_eq!(rules.custom_responses.len(), 1);
        assert_eq!(rules.custom_responses[0].url, "two.example");
    }

    #[test]
    fn test_alias_namespaces_are_independent() {
        let store = InMemoryRuleStore::new();
        store.add_override(OverrideEntry::new("X", "api.example"));
        store.add_status_override(StatusEntry::new("X", "api.example", 503));

        store.remove_status_override("X").unwrap();
        let rules = store.snapshot();
        assert_eq!(rules.custom_responses.len(), 1);
        assert!(rules.custom_statuses.is_empty());
        assert!(store.remove_status_override("X").is_err());
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_writes() {
        let store = InMemoryRuleStore::new();
        store.add_block("a.example");
        let before = store.snapshot();

        store.add_block("b.example");
        store.clear_all();

        assert_eq!(before.block_list, vec!["a.example".to_string()]);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_clear_all_empties_every_collection() {
        let store = InMemoryRuleStore::new();
        store.add_block("http://example.com");
        store.add_override(OverrideEntry::new("alias", "http://example.com").with_body("OK"));
        store.add_status_override(StatusEntry::new("alias", "http://example.com", 500));
        store.add_delay(DelayEntry::new("alias", "http://example.com", "2s").unwrap());

        store.clear_all();
        assert_eq!(*store.snapshot(), RuleSet::default());
    }

    #[test]
    fn test_replace_all_installs_rules() {
        let store = InMemoryRuleStore::new();
        store.add_block("old.example");
        store.replace_all(RuleSet {
            block_list: vec!["new.example".to_string()],
            ..Default::default()
        });
        assert_eq!(store.snapshot().block_list, vec!["new.example".to_string()]);
    }

    #[test]
    fn test_concurrent_writers_do_not_lose_updates() {
        let store = Arc::new(InMemoryRuleStore::new());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.add_block(&format!("host-{}-{}.example", worker, i));
                        let _ = store.snapshot();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.snapshot().block_list.len(), 400);
    }
}

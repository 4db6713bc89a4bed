//! Process-wide cancel registry
//!
//! Maps the (process_id, secret_key) pair from BackendKeyData to a cancel
//! hook for the owning session. A CancelRequest arrives on its own TCP
//! connection; the listener resolves it here. The registry holds only a
//! weak reference to the hook so a dying session can never be kept alive,
//! or resurrected, by a late cancel.

use log::{debug, warn};
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use subtle::ConstantTimeEq;

/// The identity a session presents for out-of-band cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendKey {
    /// Synthetic backend pid
    pub process_id: i32,
    /// Random secret proving ownership
    pub secret_key: i32,
}

/// Cancel hook: signals the session's executor to abort the running
/// statement. A no-op when nothing is running.
pub type CancelHook = dyn Fn() + Send + Sync;

struct Entry {
    secret_key: i32,
    hook: Weak<CancelHook>,
}

/// Concurrency-safe pid → (secret, hook) table.
pub struct CancelRegistry {
    entries: Mutex<HashMap<i32, Entry>>,
}

impl CancelRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a session's cancel hook under a fresh (pid, secret) pair.
    pub fn register(&self, hook: Weak<CancelHook>) -> BackendKey {
        let mut rng = rand::thread_rng();
        let mut entries = self.entries.lock().expect("cancel registry lock");
        loop {
            let process_id = rng.gen_range(1..=i32::MAX);
            if entries.contains_key(&process_id) {
                continue;
            }
            let secret_key = rng.gen::<i32>();
            entries.insert(
                process_id,
                Entry {
                    secret_key,
                    hook: hook.clone(),
                },
            );
            debug!("registered backend key pid={}", process_id);
            return BackendKey {
                process_id,
                secret_key,
            };
        }
    }

    /// Remove a session's entry. Called on session teardown.
    pub fn unregister(&self, process_id: i32) {
        self.entries
            .lock()
            .expect("cancel registry lock")
            .remove(&process_id);
        debug!("unregistered backend key pid={}", process_id);
    }

    /// Handle a CancelRequest. The secret comparison is constant-time; the
    /// caller learns nothing either way (PostgreSQL sends no reply to
    /// cancel connections), the return value feeds the log only.
    pub fn cancel(&self, process_id: i32, secret_key: i32) -> bool {
        let hook = {
            let entries = self.entries.lock().expect("cancel registry lock");
            let Some(entry) = entries.get(&process_id) else {
                warn!("cancel request for unknown pid {}", process_id);
                return false;
            };
            let matches: bool = entry
                .secret_key
                .to_be_bytes()
                .ct_eq(&secret_key.to_be_bytes())
                .into();
            if !matches {
                warn!("cancel request with bad secret for pid {}", process_id);
                return false;
            }
            entry.hook.clone()
        };

        match hook.upgrade() {
            Some(hook) => {
                debug!("firing cancel hook for pid {}", process_id);
                hook();
                true
            }
            None => {
                debug!("cancel hook for pid {} already gone", process_id);
                false
            }
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("cancel registry lock").len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CancelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII wrapper: unregisters the key when the session drops.
pub struct RegisteredKey {
    registry: Arc<CancelRegistry>,
    /// The (pid, secret) pair announced in BackendKeyData
    pub key: BackendKey,
}

impl RegisteredKey {
    /// Register `hook` and tie the entry's lifetime to the returned guard.
    pub fn new(registry: Arc<CancelRegistry>, hook: Weak<CancelHook>) -> Self {
        let key = registry.register(hook);
        Self { registry, key }
    }
}

impl Drop for RegisteredKey {
    fn drop(&mut self) {
        self.registry.unregister(self.key.process_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_hook() -> (Arc<CancelHook>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let hook: Arc<CancelHook> = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (hook, count)
    }

    #[test]
    fn test_register_cancel_unregister() {
        let registry = CancelRegistry::new();
        let (hook, count) = counting_hook();
        let key = registry.register(Arc::downgrade(&hook));

        assert!(registry.cancel(key.process_id, key.secret_key));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        registry.unregister(key.process_id);
        assert!(!registry.cancel(key.process_id, key.secret_key));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wrong_secret_does_not_fire() {
        let registry = CancelRegistry::new();
        let (hook, count) = counting_hook();
        let key = registry.register(Arc::downgrade(&hook));

        assert!(!registry.cancel(key.process_id, key.secret_key.wrapping_add(1)));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dead_hook_is_a_noop() {
        let registry = CancelRegistry::new();
        let (hook, count) = counting_hook();
        let key = registry.register(Arc::downgrade(&hook));
        drop(hook);

        assert!(!registry.cancel(key.process_id, key.secret_key));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_registered_key_guard_unregisters_on_drop() {
        let registry = Arc::new(CancelRegistry::new());
        let (hook, _) = counting_hook();
        {
            let _guard = RegisteredKey::new(Arc::clone(&registry), Arc::downgrade(&hook));
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unique_pids() {
        let registry = CancelRegistry::new();
        let (hook, _) = counting_hook();
        let a = registry.register(Arc::downgrade(&hook));
        let b = registry.register(Arc::downgrade(&hook));
        assert_ne!(a.process_id, b.process_id);
    }
}

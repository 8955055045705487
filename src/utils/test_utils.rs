use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

// Process environment is global; tests that touch it must not interleave.
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Serializes env-mutating tests and restores every touched variable on drop.
pub struct TestEnvVarGuard {
    _lock: MutexGuard<'static, ()>,
    saved: HashMap<String, Option<String>>,
}

impl TestEnvVarGuard {
    pub fn new() -> Self {
        let lock = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        Self {
            _lock: lock,
            saved: HashMap::new(),
        }
    }

    pub fn set_var(&mut self, key: &str, value: &str) {
        self.remember(key);
        std::env::set_var(key, value);
    }

    pub fn remove_var(&mut self, key: &str) {
        self.remember(key);
        std::env::remove_var(key);
    }

    fn remember(&mut self, key: &str) {
        self.saved
            .entry(key.to_string())
            .or_insert_with(|| std::env::var(key).ok());
    }
}

impl Drop for TestEnvVarGuard {
    fn drop(&mut self) {
        for (key, previous) in self.saved.drain() {
            match previous {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

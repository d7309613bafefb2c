//! Scoped environment changes for tests.
//!
//! `EnvVarGuard` records the previous values of the variables it touches and
//! restores them on drop. Tests using it must run under
//! `#[serial_test::serial]`.

use std::env;

#[derive(Debug)]
pub struct EnvVarGuard {
    saved: Vec<(String, Option<String>)>,
}

impl EnvVarGuard {
    /// Set `key` to `value` for the lifetime of the returned guard.
    pub fn set(key: &str, value: &str) -> Self {
        let guard = Self::saving([key.to_owned()]);
        set_env_var(key, value);
        guard
    }

    /// Remove `key` for the lifetime of the returned guard.
    pub fn remove(key: &str) -> Self {
        let guard = Self::saving([key.to_owned()]);
        remove_env_var(key);
        guard
    }

    /// Remove every variable whose name starts with `prefix`.
    ///
    /// Keeps variables from the host environment from leaking into tests
    /// that read a whole prefix.
    pub fn clear_prefixed(prefix: &str) -> Self {
        let keys: Vec<String> = env::vars_os()
            .filter_map(|(key, _)| key.into_string().ok())
            .filter(|key| key.starts_with(prefix))
            .collect();
        let guard = Self::saving(keys);
        for (key, _) in &guard.saved {
            remove_env_var(key);
        }
        guard
    }

    fn saving(keys: impl IntoIterator<Item = String>) -> Self {
        let saved = keys
            .into_iter()
            .map(|key| {
                let original = env::var(&key).ok();
                (key, original)
            })
            .collect();
        Self { saved }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        for (key, original) in self.saved.iter().rev() {
            match original {
                Some(v) => set_env_var(key, v),
                None => remove_env_var(key),
            }
        }
    }
}

/// SAFETY: callers run serially, so no other thread reads the environment.
fn set_env_var(key: &str, value: &str) {
    unsafe { env::set_var(key, value) };
}

/// SAFETY: callers run serially, so no other thread reads the environment.
fn remove_env_var(key: &str) {
    unsafe { env::remove_var(key) };
}

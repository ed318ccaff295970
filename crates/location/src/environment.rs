//! Access to environment variables holding backend credentials.
use std::collections::{BTreeMap, HashMap};

use crate::config::Secret;

/// A source of environment variables.
///
/// Credential resolution reads variables only through this trait, so callers can inject a
/// fixed set of variables instead of the process environment.
pub trait Environment: Send + Sync {
    /// The value of the variable `key`, if it is set.
    fn var(&self, key: &str) -> Option<String>;

    /// The value of the variable `key`, treating an empty value like an unset one.
    fn non_empty_var(&self, key: &str) -> Option<String> {
        self.var(key).filter(|value| !value.is_empty())
    }
}

/// The environment of the running process.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl Environment for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl Environment for BTreeMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Fill `field` from the variable `key` if `field` is empty.
pub(crate) fn fill_from_env(field: &mut String, env: &dyn Environment, key: &str) {
    if field.is_empty() {
        if let Some(value) = env.non_empty_var(key) {
            *field = value;
        }
    }
}

/// Fill the secret `field` from the variable `key` if `field` is empty.
pub(crate) fn fill_secret_from_env(field: &mut Secret, env: &dyn Environment, key: &str) {
    if field.is_empty() {
        if let Some(value) = env.non_empty_var(key) {
            *field = Secret::new(value);
        }
    }
}

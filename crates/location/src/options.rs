//! Extended backend options given as `<scheme>.<key>=<value>`.
use std::collections::BTreeMap;

use log::trace;

use crate::{
    config::ApplyOptions,
    error::{ErrorKind, RusticError, RusticResult},
};

/// A set of backend options, keyed by `<scheme>.<key>`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Options(BTreeMap<String, String>);

impl Options {
    /// Create an empty set of options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from a list of `key=value` strings.
    ///
    /// # Errors
    ///
    /// * If an entry has no `=`, an empty key or a key is given more than once.
    pub fn parse<I, S>(items: I) -> RusticResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = Self::new();
        for item in items {
            let item = item.as_ref();
            let Some((key, value)) = item.split_once('=') else {
                return Err(RusticError::new(
                    ErrorKind::OptionApplication,
                    "Invalid option `{option}`, missing `=`. Options must be given as `key=value`.",
                )
                .attach_context("option", item));
            };
            options.insert(key.trim(), value.trim())?;
        }
        Ok(options)
    }

    /// Add a single option.
    ///
    /// # Errors
    ///
    /// * If the key is empty or already present.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> RusticResult<()> {
        let key = key.into();
        if key.is_empty() {
            return Err(RusticError::new(
                ErrorKind::OptionApplication,
                "Empty key is not a valid option.",
            ));
        }
        if self.0.contains_key(&key) {
            return Err(RusticError::new(
                ErrorKind::OptionApplication,
                "Key `{option}` present more than once.",
            )
            .attach_context("option", key));
        }
        _ = self.0.insert(key, value.into());
        Ok(())
    }

    /// Returns the options for the namespace `ns`, with the `<ns>.` prefix removed.
    #[must_use]
    pub fn extract(&self, ns: &str) -> Self {
        let prefix = format!("{ns}.");
        Self(
            self.0
                .iter()
                .filter_map(|(key, value)| {
                    key.strip_prefix(&prefix)
                        .map(|key| (key.to_string(), value.clone()))
                })
                .collect(),
        )
    }

    /// Set all options on `cfg`.
    ///
    /// The options are expected to be extracted already, i.e. have no `<ns>.` prefix.
    ///
    /// # Errors
    ///
    /// * If `cfg` doesn't know a key or cannot parse its value.
    pub fn apply<C: ApplyOptions + ?Sized>(&self, ns: &str, cfg: &mut C) -> RusticResult<()> {
        for (key, value) in &self.0 {
            trace!("applying option {ns}.{key}");
            cfg.apply_option(key, value)
                .map_err(|err| err.attach_context("namespace", ns))?;
        }
        Ok(())
    }

    /// Iterate over all options.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The value of `key`, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether there are no options.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The number of options.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

//! Error types and Result module.
//!
//! Every fallible operation of this crate returns a boxed [`RusticError`]. It carries an
//! [`ErrorKind`], a guidance message which may contain `{key}` placeholders, a list of
//! context entries filling those placeholders and an optional source error.
//!
//! Locations in guidance or context are always given in their password-stripped form.

use std::{
    error::Error as StdError,
    fmt::{self, Display},
};

use ecow::EcoString;

/// Result type that is being returned from methods that can fail and thus have [`RusticError`]s.
pub type RusticResult<T, E = Box<RusticError>> = Result<T, E>;

/// Errors that can result from resolving or opening a backend.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub struct RusticError {
    /// The kind of the error.
    kind: ErrorKind,

    /// The error message with guidance.
    guidance: EcoString,

    /// The context of the error.
    context: Box<[(&'static str, EcoString)]>,

    /// Chain to the cause of the error.
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Display for RusticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} occurred in `rustic_location`", self.kind)?;

        write!(f, "\n\nMessage:\n{}", self.display_guidance())?;

        if !self.context.is_empty() {
            write!(f, "\n\nContext:\n")?;
            write!(
                f,
                "{}",
                self.context
                    .iter()
                    .map(|(k, v)| format!("{k}: {v}"))
                    .collect::<Vec<_>>()
                    .join(",\n")
            )?;
        }

        if let Some(cause) = &self.source {
            write!(f, "\n\nCaused by:\n{cause}")?;
        }

        Ok(())
    }
}

impl RusticError {
    /// Creates a new error with the given kind and guidance.
    pub fn new(kind: ErrorKind, guidance: impl Into<String>) -> Box<Self> {
        Box::new(Self {
            kind,
            guidance: guidance.into().into(),
            context: Box::default(),
            source: None,
        })
    }

    /// Creates a new error with the given kind and guidance, caused by `source`.
    pub fn with_source(
        kind: ErrorKind,
        guidance: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Box<Self> {
        Box::new(Self {
            kind,
            guidance: guidance.into().into(),
            context: Box::default(),
            source: Some(source.into()),
        })
    }

    /// Attach a context entry to the error.
    ///
    /// The value replaces the `{key}` placeholder in the guidance when the error is displayed.
    #[must_use]
    pub fn attach_context(
        mut self: Box<Self>,
        key: &'static str,
        value: impl Into<String>,
    ) -> Box<Self> {
        let mut context = self.context.into_vec();
        context.push((key, value.into().into()));
        self.context = context.into_boxed_slice();
        self
    }

    /// Replace the source of the error.
    #[must_use]
    pub fn attach_source(
        mut self: Box<Self>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Box<Self> {
        self.source = Some(source.into());
        self
    }

    /// The kind of the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Checks if the error is of the given kind.
    #[must_use]
    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// The value of the context entry `key`, if present.
    #[must_use]
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The guidance with all `{key}` placeholders replaced by their context values.
    #[must_use]
    pub fn display_guidance(&self) -> String {
        self.context
            .iter()
            .fold(self.guidance.to_string(), |guidance, (key, value)| {
                guidance.replace(&format!("{{{key}}}"), value)
            })
    }
}

/// [`ErrorKind`] describes the errors that can happen while resolving and opening a backend.
///
/// This is a non-exhaustive enum, so additional variants may be added in future. It is
/// recommended to match against the wildcard `_` instead of listing all possible variants,
/// to avoid problems when new variants are added.
#[non_exhaustive]
#[derive(thiserror::Error, Debug, displaydoc::Display, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Ambiguous Location
    AmbiguousLocation,
    /// Unknown Scheme
    UnknownScheme,
    /// Malformed Backend Configuration
    MalformedConfig,
    /// Missing Credential
    MissingCredential,
    /// Option Application Error
    OptionApplication,
    /// Backend Construction Error
    BackendConstruction,
    /// Cancelled Operation
    Cancelled,
    /// Backend Error
    Backend,
    /// Input/Output Error
    InputOutput,
    /// Invalid Input
    InvalidInput,
    /// External Command Error
    ExternalCommand,
    /// Internal Error
    Internal,
    /// Something is not supported
    Unsupported,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_display_fills_placeholders_from_context() {
        let err = RusticError::new(
            ErrorKind::AmbiguousLocation,
            "Invalid backend `{location}`.",
        )
        .attach_context("location", "foo:bar");

        assert_eq!(
            err.to_string(),
            "Ambiguous Location occurred in `rustic_location`\n\nMessage:\nInvalid backend `foo:bar`.\n\nContext:\nlocation: foo:bar"
        );
    }

    #[test]
    fn test_display_includes_cause() {
        let err = RusticError::with_source(
            ErrorKind::InputOutput,
            "Reading failed.",
            std::io::Error::other("disk on fire"),
        );

        assert!(err.to_string().ends_with("Caused by:\ndisk on fire"));
        assert!(std::error::Error::source(&*err).is_some());
    }

    #[rstest]
    #[case(ErrorKind::Cancelled, true)]
    #[case(ErrorKind::Backend, false)]
    fn test_is_kind(#[case] kind: ErrorKind, #[case] expected: bool) {
        let err = RusticError::new(kind, "something happened");
        assert_eq!(err.is_kind(ErrorKind::Cancelled), expected);
        assert_eq!(err.kind(), kind);
    }

    #[test]
    fn test_context_value_lookup() {
        let err = RusticError::new(ErrorKind::Internal, "x")
            .attach_context("a", "1")
            .attach_context("b", "2");
        assert_eq!(err.context_value("b"), Some("2"));
        assert_eq!(err.context_value("c"), None);
    }
}

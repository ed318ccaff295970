//! Telling filesystem paths apart from `<scheme>:<body>` locations.

/// Checks whether `s` unambiguously refers to a filesystem path.
///
/// A string is a path if it
/// * starts with `../` or `..\`,
/// * starts with `/` or `\` (this includes UNC paths like `\\server\share` and `\\?\` paths) or
/// * starts with a drive letter followed by `:` and a path separator, e.g. `C:\` or `c:/`.
///
/// # Notes
///
/// A bare drive like `C:` is not treated as a path. Such a location needs an explicit `local:` prefix.
#[must_use]
pub fn is_path(s: &str) -> bool {
    if s.starts_with("../") || s.starts_with(r"..\") {
        return true;
    }

    if s.starts_with('/') || s.starts_with('\\') {
        return true;
    }

    matches!(
        s.as_bytes(),
        [letter, b':', b'/' | b'\\', ..] if letter.is_ascii_alphabetic()
    )
}

/// Returns the scheme of `s`, i.e. everything before the first `:`.
///
/// If `s` contains no `:`, the whole string is returned.
#[must_use]
pub fn extract_scheme(s: &str) -> &str {
    s.split_once(':').map_or(s, |(scheme, _)| scheme)
}

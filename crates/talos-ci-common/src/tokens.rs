//! Whole-token matching over tool output
//!
//! Status columns printed by talosctl and kubectl are matched token by token,
//! never by substring: `NotReady` and `NotReady-canary` do not contain the
//! token `Ready`, while `Ready` and `Ready,SchedulingDisabled` do.

/// Split a line into tokens on whitespace and commas
pub fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
}

/// Whether `text` contains `token` as a standalone token
pub fn has_token(text: &str, token: &str) -> bool {
    tokens(text).any(|t| t == token)
}

/// Whether `text` contains any of `wanted` as a standalone token
pub fn has_any_token(text: &str, wanted: &[&str]) -> bool {
    tokens(text).any(|t| wanted.contains(&t))
}

/// Count values carrying any of `wanted` as a standalone token.
///
/// An empty input counts as zero.
pub fn count_with_any_token<'a>(
    values: impl IntoIterator<Item = &'a str>,
    wanted: &[&str],
) -> usize {
    values
        .into_iter()
        .filter(|v| has_any_token(v, wanted))
        .count()
}

/// Find the first line whose leading token is `key` (e.g. `STATE` in
/// `talosctl service` output)
pub fn field_row<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    text.lines().find(|line| tokens(line).next() == Some(key))
}

//! Form-body event parser.
//!
//! Scans a decoded `field=value&field=value` body left to right without a
//! general-purpose form decoder, enforcing the pair-count and token-size
//! bounds from [`CaptureConfig`](crate::config::CaptureConfig).
//!
//! # Rules
//!
//! - A field runs until `=`, even across `&`. Reaching the end of input
//!   first aborts the whole event with [`CaptureError::MalformedPair`].
//! - A value runs until the next `&` or the end of input.
//! - Tokens longer than `max_field_size - 1` bytes are truncated, not rejected.
//! - Literal spaces become `+` so the text stays form-encoded when it is
//!   re-emitted to the broker.
//! - `user` and `path` are captured on first occurrence only.
//! - Scanning stops after `max_pairs` pairs; the remainder is ignored.

use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::models::ParsedEvent;

/// Bounds applied by [`parse_event`].
#[derive(Debug, Clone, Copy)]
pub struct ParseLimits {
    pub max_pairs: usize,
    pub max_field_size: usize,
    pub unknown_key: char,
}

impl From<&CaptureConfig> for ParseLimits {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            max_pairs: config.max_pairs,
            max_field_size: config.max_field_size,
            unknown_key: config.unknown_key,
        }
    }
}

impl ParseLimits {
    /// Longest token kept, in bytes.
    fn token_limit(&self) -> usize {
        self.max_field_size.saturating_sub(1)
    }
}

/// Parses a decoded event body.
///
/// The input is not modified; all rewriting happens on the returned copies.
pub fn parse_event(input: &str, limits: &ParseLimits) -> Result<ParsedEvent, CaptureError> {
    let bytes = input.as_bytes();
    let token_limit = limits.token_limit();

    let mut pairs = Vec::new();
    let mut user: Option<String> = None;
    let mut path: Option<String> = None;
    let mut pos = 0;

    while pos < bytes.len() && pairs.len() < limits.max_pairs {
        let field_end = find_delimiter(bytes, pos, |b| b == b'=');
        if field_end >= bytes.len() {
            return Err(CaptureError::MalformedPair {
                position: field_end,
            });
        }
        let field = copy_token(&input[pos..field_end], token_limit);
        pos = field_end + 1;

        let value_end = find_delimiter(bytes, pos, |b| b == b'&');
        let value = copy_token(&input[pos..value_end], token_limit);
        // Skip the '&', or land exactly on the end of input.
        pos = (value_end + 1).min(bytes.len());

        match field.as_str() {
            "user" if user.is_none() => user = Some(value.clone()),
            "path" if path.is_none() => path = Some(value.clone()),
            _ => {}
        }
        pairs.push((field, value));
    }

    let placeholder = limits.unknown_key.to_string();
    Ok(ParsedEvent {
        pairs,
        user: user.unwrap_or_else(|| placeholder.clone()),
        path: path.unwrap_or(placeholder),
    })
}

/// Index of the first byte at or after `start` matching `is_delim`, or `bytes.len()`.
fn find_delimiter(bytes: &[u8], start: usize, is_delim: impl Fn(u8) -> bool) -> usize {
    bytes[start..]
        .iter()
        .position(|&b| is_delim(b))
        .map_or(bytes.len(), |offset| start + offset)
}

/// Copies at most `limit` bytes of `token` (backing off to a char boundary),
/// rewriting spaces to `+`.
fn copy_token(token: &str, limit: usize) -> String {
    let mut end = token.len().min(limit);
    while !token.is_char_boundary(end) {
        end -= 1;
    }
    token[..end].replace(' ', "+")
}

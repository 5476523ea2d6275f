//! HTTP Basic auth decoding for rover connections
//!
//! Mirrors, in reverse, the Basic-auth encoding the teacher's
//! `credentials.rs` performs when *acting* as an NTRIP client: here we are
//! the server, decoding what a rover sent.

use base64::{engine::general_purpose, Engine as _};

/// Decode an `Authorization: Basic <token>` header value into `(user, pass)`
///
/// Returns `None` on anything other than the `Basic` scheme, invalid
/// base64, non-UTF8 payload, or a payload missing the `:` separator. The
/// caller must turn `None` into a 401 with no further detail (spec: no
/// account enumeration in the response body).
pub fn decode_basic(header_value: &str) -> Option<(String, String)> {
    let token = header_value.trim();
    let rest = token.strip_prefix("Basic ").or_else(|| {
        // case-insensitive scheme match
        let (scheme, rest) = token.split_once(' ')?;
        scheme.eq_ignore_ascii_case("basic").then_some(rest)
    })?;

    let decoded = general_purpose::STANDARD.decode(rest.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;

    Some((user.to_string(), pass.to_string()))
}

/// Encode `(user, pass)` into a `Basic <token>` value, as used by the
/// upstream client when authenticating against a remote caster.
pub fn encode_basic(user: &str, pass: &str) -> String {
    let raw = format!("{user}:{pass}");
    format!("Basic {}", general_purpose::STANDARD.encode(raw))
}

/// Find a header's value by case-insensitive name match over raw
/// `Name: value` lines (as produced by a hand-parsed HTTP-like request)
pub fn find_header<'a>(lines: impl Iterator<Item = &'a str>, name: &str) -> Option<String> {
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case(name) {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

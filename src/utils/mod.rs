//! Utility functions and helpers

use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Characters Envoy accepts in resource and stat names without escaping
pub static ENVOY_NAME_INVALID_CHARS: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.\-]").unwrap());

/// RFC 3986 "pchar" set plus percent-encoded octets
pub static VALID_PATH_REGEX: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    Regex::new(r"^(?:[A-Za-z0-9/:@._~!$&'()*+,=;\-]|%[0-9a-fA-F]{2})*$").unwrap()
});

const INVALID_PATH_SEQUENCES: [&str; 6] = ["//", "/./", "/../", "%2f", "%2F", "#"];
const INVALID_PATH_SUFFIXES: [&str; 2] = ["/..", "/."];

/// Replace every character outside `[A-Za-z0-9_.-]` with `_`.
pub fn sanitize_for_envoy(name: &str) -> String {
    ENVOY_NAME_INVALID_CHARS.replace_all(name, "_").into_owned()
}

/// Returns `Ok(true)` for a plain IPv4 address and `Ok(false)` for IPv6.
pub fn is_ipv4_address(bind_address: &str) -> std::result::Result<bool, String> {
    match bind_address.parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => Ok(true),
        Ok(IpAddr::V6(_)) => Ok(false),
        Err(_) => Err(format!("bind address {} is not a valid IP address", bind_address)),
    }
}

/// Validate a path-like route field; empty values are always valid.
pub fn validate_route_path(path: &str) -> std::result::Result<(), String> {
    if path.is_empty() {
        return Ok(());
    }
    if !VALID_PATH_REGEX.is_match(path) {
        return Err(format!(
            "the path is invalid: {}: must only contain valid characters matching pattern {}",
            path,
            VALID_PATH_REGEX.as_str()
        ));
    }
    if let Some(seq) = INVALID_PATH_SEQUENCES.iter().find(|seq| path.contains(**seq)) {
        return Err(format!("the path is invalid: {}: contains invalid sequence '{}'", path, seq));
    }
    if let Some(suffix) = INVALID_PATH_SUFFIXES.iter().find(|suffix| path.ends_with(**suffix)) {
        return Err(format!("the path is invalid: {}: ends with invalid suffix '{}'", path, suffix));
    }
    Ok(())
}

/// Validate a prefix rewrite. Only the path portion is checked, any query is ignored.
pub fn validate_prefix_rewrite(rewrite: &str) -> std::result::Result<(), String> {
    let path = rewrite.split(['?', '#']).next().unwrap_or_default();
    validate_route_path(path).map_err(|e| format!("the rewrite is invalid: {}: {}", rewrite, e))
}

/// First 8 bytes of the SHA-256 digest, big-endian.
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let digest = Sha256::digest(bytes);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Hash a sequence of string parts, each terminated by a NUL so `("ab","c")` and `("a","bc")` differ.
pub fn hash_parts<'a, I>(parts: I) -> u64
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Order-independent hash of a label set
pub fn hash_labels(labels: &BTreeMap<String, String>) -> u64 {
    labels.iter().fold(0u64, |acc, (k, v)| acc ^ hash_parts([k.as_str(), v.as_str()]))
}

//! Environment variable utilities for configuration overrides

use std::str::FromStr;

/// Parse `key` as `T`, falling back to `default` when unset or malformed
#[inline]
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Boolean flag: "1", "true", "yes", "on" are true, "0", "false", "no",
/// "off" are false (case-insensitive); anything else yields `default`.
pub fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// String value, `None` when unset or empty
pub fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

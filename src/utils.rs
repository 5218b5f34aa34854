//! Environment helpers

use std::env::var;

/// Get the value of ENV var, or a default
///
/// Only when:
/// - It is set
/// - It is not empty
pub fn env_var_or_else<F>(var_name: &'static str, or_else: F) -> String
where
    F: FnOnce() -> String,
{
    match var(var_name) {
        Ok(value) if !value.is_empty() => value,
        _ => or_else(),
    }
}

/// Get the value of an ENV var, treating empty values as not set
pub fn env_var_optional(var_name: &'static str) -> Option<String> {
    var(var_name).ok().filter(|value| !value.is_empty())
}

//! Typed environment-variable lookup

use std::fmt::Display;
use std::str::FromStr;

use thiserror::Error;

/// A variable was present but could not be parsed
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid value for {key}: '{value}' ({reason})")]
pub struct EnvError {
    pub key: String,
    pub value: String,
    pub reason: String,
}

/// Read `key` and parse it, or return `default` when the variable is unset or empty.
pub fn env_or<T>(key: &str, default: T) -> Result<T, EnvError>
where
    T: FromStr,
    T::Err: Display,
{
    Ok(env_opt(key)?.unwrap_or(default))
}

/// Read and parse `key` if set.
pub fn env_opt<T>(key: &str) -> Result<Option<T>, EnvError>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| EnvError {
                    key: key.to_string(),
                    value: raw.clone(),
                    reason: e.to_string(),
                })
        }
        _ => Ok(None),
    }
}

/// Read a boolean flag (`1`, `true`, `yes`, `on`).
pub fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

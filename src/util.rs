use std::str::FromStr;

use anyhow::Context;

pub const ADDRESS: &str = "ADDRESS";
pub const KEY: &str = "KEY";
pub const POLL_INTERVAL: &str = "POLL_INTERVAL";
pub const REPORT_INTERVAL: &str = "REPORT_INTERVAL";
pub const RATE_LIMIT: &str = "RATE_LIMIT";
pub const STORE_INTERVAL: &str = "STORE_INTERVAL";
pub const FILE_STORAGE_PATH: &str = "FILE_STORAGE_PATH";
pub const RESTORE: &str = "RESTORE";
pub const DATABASE_DSN: &str = "DATABASE_DSN";

const DEFAULT_ADDRESS: &str = "localhost:8080";

pub fn get_default_address() -> String {
    DEFAULT_ADDRESS.to_string()
}

/// Read a process environment variable, treating empty values as unset
pub fn get_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// Parse a raw setting, naming the setting in the error
pub fn parse_setting<T>(name: &str, raw: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("invalid value for {name}: {raw:?}"))
}

/// Greatest common divisor; `gcd(0, n) == n`
pub fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 { a } else { gcd(b, a % b) }
}

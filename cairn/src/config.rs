//! Process-wide settings for the storage kernel.

use std::ops::RangeInclusive;
use std::time::Duration;

pub const DEFAULT_PAGE_SIZE: usize = 4096;
pub const DEFAULT_BUFFER_POOL_PAGES: usize = 50;
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 500;

/// Largest accepted page size. Even a page of 4-byte tuples stays under
/// `u16::MAX + 1` slots, so every slot fits in a [`RecordId`](crate::RecordId).
pub const MAX_PAGE_SIZE: usize = 256 * 1024;
pub const PAGE_SIZE_RANGE: RangeInclusive<usize> = 1..=MAX_PAGE_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Size of every page in every heap file, in bytes.
    pub page_size: usize,
    /// Maximum number of pages the buffer pool caches.
    pub buffer_pool_pages: usize,
    /// Longest a lock request waits before its transaction is aborted.
    pub lock_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            buffer_pool_pages: DEFAULT_BUFFER_POOL_PAGES,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
        }
    }
}

impl Config {
    /// Reads `CAIRN_PAGE_SIZE`, `CAIRN_BUFFER_POOL_PAGES` and `CAIRN_LOCK_TIMEOUT_MS`,
    /// keeping the default for anything unset, unparsable or out of range. The page
    /// size must lie in [`PAGE_SIZE_RANGE`] and the pool must hold at least one page.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            page_size: env_in("CAIRN_PAGE_SIZE", defaults.page_size, PAGE_SIZE_RANGE),
            buffer_pool_pages: env_in(
                "CAIRN_BUFFER_POOL_PAGES",
                defaults.buffer_pool_pages,
                1..=usize::MAX,
            ),
            lock_timeout: Duration::from_millis(env_in(
                "CAIRN_LOCK_TIMEOUT_MS",
                DEFAULT_LOCK_TIMEOUT_MS,
                0..=u64::MAX,
            )),
        }
    }
}

fn env_in<T>(key: &str, default: T, range: RangeInclusive<T>) -> T
where
    T: std::str::FromStr + PartialOrd,
{
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .filter(|value| range.contains(value))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_overrides_and_falls_back() {
        std::env::set_var("CAIRN_PAGE_SIZE", "1024");
        std::env::set_var("CAIRN_BUFFER_POOL_PAGES", "not-a-number");
        std::env::remove_var("CAIRN_LOCK_TIMEOUT_MS");

        let config = Config::from_env();
        assert_eq!(config.page_size, 1024);
        assert_eq!(config.buffer_pool_pages, DEFAULT_BUFFER_POOL_PAGES);
        assert_eq!(config.lock_timeout, Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS));

        std::env::remove_var("CAIRN_PAGE_SIZE");
        std::env::remove_var("CAIRN_BUFFER_POOL_PAGES");
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        std::env::remove_var("CAIRN_PAGE_SIZE");
        std::env::remove_var("CAIRN_BUFFER_POOL_PAGES");
        std::env::remove_var("CAIRN_LOCK_TIMEOUT_MS");
        assert_eq!(Config::from_env(), Config::default());
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_zero_and_oversized_values() {
        std::env::set_var("CAIRN_PAGE_SIZE", "0");
        std::env::set_var("CAIRN_BUFFER_POOL_PAGES", "0");
        assert_eq!(Config::from_env(), Config::default());

        std::env::set_var("CAIRN_PAGE_SIZE", (MAX_PAGE_SIZE + 1).to_string());
        assert_eq!(Config::from_env().page_size, DEFAULT_PAGE_SIZE);
        std::env::set_var("CAIRN_PAGE_SIZE", MAX_PAGE_SIZE.to_string());
        assert_eq!(Config::from_env().page_size, MAX_PAGE_SIZE);

        std::env::remove_var("CAIRN_PAGE_SIZE");
        std::env::remove_var("CAIRN_BUFFER_POOL_PAGES");
    }
}

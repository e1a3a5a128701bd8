//! Default on-disk locations for the object cache root.

use std::path::PathBuf;

/// Environment variable naming the cache root directory explicitly.
pub const CACHE_ROOT_ENV: &str = "DIAMOND_CACHE_ROOT";

/// Resolve the default cache root: `$DIAMOND_CACHE_ROOT` if set and
/// non-empty, else `$XDG_DATA_HOME/diamond/ocache` (or the platform's
/// `dirs::data_dir()` equivalent), else `./diamond-ocache` as a last
/// resort for environments without a resolvable home directory.
#[must_use]
pub fn default_cache_root() -> PathBuf {
    if let Ok(explicit) = std::env::var(CACHE_ROOT_ENV) {
        if !explicit.trim().is_empty() {
            return PathBuf::from(explicit);
        }
    }
    if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        if !xdg_data.trim().is_empty() {
            return PathBuf::from(xdg_data).join("diamond").join("ocache");
        }
    }
    if let Some(data_dir) = dirs::data_dir() {
        return data_dir.join("diamond").join("ocache");
    }
    PathBuf::from("diamond-ocache")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_env_wins() {
        // SAFETY: test runs single-threaded w.r.t. this env var.
        unsafe { std::env::set_var(CACHE_ROOT_ENV, "/tmp/explicit-root") };
        assert_eq!(default_cache_root(), PathBuf::from("/tmp/explicit-root"));
        unsafe { std::env::remove_var(CACHE_ROOT_ENV) };
    }
}

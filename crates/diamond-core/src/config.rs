//! Environment-driven configuration for the evaluation/caching core.
//!
//! All knobs are read once at [`Config::from_env`] time with
//! `DIAMOND_`-prefixed environment variables, falling back to defaults
//! (`pend_hw = 60`, `pend_lw = 55`, rings sized 1024) when unset or
//! unparseable.

use std::path::PathBuf;
use std::time::Duration;

use crate::paths::default_cache_root;

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Runtime configuration for one device-side core instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for per-filter `cache.log` / `oattr/` storage.
    pub cache_root: PathBuf,
    /// Capacity of each ring (`unproc`, `proc`, `bg_ops`). Default 1024.
    pub ring_capacity: usize,
    /// High-water mark: the odisk reader pauses when `pend_count` reaches
    /// this. Default 60.
    pub pend_hw: usize,
    /// Low-water mark: the odisk reader resumes when `pend_count` drops to
    /// this. Default 55.
    pub pend_lw: usize,
    /// Number of evaluator threads pulling from `unproc_ring`. Default 2.
    pub evaluator_threads: usize,
    /// A filter cache idle beyond this duration with no hits is evicted
    /// from memory (on-disk data is retained). Default 300s.
    pub cache_idle_eviction: Duration,
}

impl Config {
    /// Build configuration from environment variables, falling back to
    /// the defaults above for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        let pend_hw = env_usize("DIAMOND_PEND_HW", 60);
        let pend_lw = env_usize("DIAMOND_PEND_LW", 55);
        Self {
            cache_root: std::env::var("DIAMOND_CACHE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_cache_root()),
            ring_capacity: env_usize("DIAMOND_RING_CAPACITY", 1024),
            pend_hw,
            pend_lw: pend_lw.min(pend_hw),
            evaluator_threads: env_usize("DIAMOND_EVALUATOR_THREADS", 2).max(1),
            cache_idle_eviction: Duration::from_secs(env_u64(
                "DIAMOND_CACHE_IDLE_EVICTION_SECS",
                300,
            )),
        }
    }

    /// Configuration rooted at an arbitrary directory, with every other
    /// knob left at its default — the shape integration tests want (an
    /// isolated tempdir, defaults otherwise).
    #[must_use]
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            cache_root: root,
            ring_capacity: 1024,
            pend_hw: 60,
            pend_lw: 55,
            evaluator_threads: 2,
            cache_idle_eviction: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_water_never_exceeds_high_water() {
        // SAFETY: test env vars, not shared with other tests via name clash.
        unsafe {
            std::env::set_var("DIAMOND_PEND_HW", "10");
            std::env::set_var("DIAMOND_PEND_LW", "50");
        }
        let cfg = Config::from_env();
        assert!(cfg.pend_lw <= cfg.pend_hw);
        unsafe {
            std::env::remove_var("DIAMOND_PEND_HW");
            std::env::remove_var("DIAMOND_PEND_LW");
        }
    }

    #[test]
    fn with_root_matches_default_knobs() {
        let cfg = Config::with_root(PathBuf::from("/tmp/x"));
        assert_eq!(cfg.pend_hw, 60);
        assert_eq!(cfg.pend_lw, 55);
        assert_eq!(cfg.ring_capacity, 1024);
    }
}

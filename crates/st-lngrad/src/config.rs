// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Runtime tuning for the parallel engine.
//!
//! `partial_buckets` (P) sets how many disjoint partial sums phase 1 of the
//! parameter-gradient reduction produces per feature. A larger P gives phase 1
//! more parallelism and phase 2 more work; a smaller P does the opposite.
//! Results only differ by floating-point reduction order.
//!
//! Environment overrides: `ST_LNGRAD_PARTS`, `ST_LNGRAD_BLOCK`,
//! `ST_LNGRAD_BACKEND` (`auto`, `software`, `cuda`).

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::{LayerNormGradError, Result};

pub const DEFAULT_PARTIAL_BUCKETS: u32 = 16;
pub const DEFAULT_BLOCK_THREADS: u32 = 128;
/// CUDA caps `gridDim.y`, which carries the bucket index.
pub const MAX_PARTIAL_BUCKETS: u32 = 65_535;
pub const MIN_BLOCK_THREADS: u32 = 32;
pub const MAX_BLOCK_THREADS: u32 = 1024;

/// Which executor the parallel engine should run on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BackendPreference {
    /// CUDA when compiled in and a device opens, the host mirror otherwise.
    #[default]
    Auto,
    /// Host mirror of the device kernels.
    Software,
    /// CUDA only; fails when no device is usable.
    Cuda,
}

impl BackendPreference {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendPreference::Auto => "auto",
            BackendPreference::Software => "software",
            BackendPreference::Cuda => "cuda",
        }
    }
}

impl fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendPreference {
    type Err = LayerNormGradError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(BackendPreference::Auto),
            "software" | "host" | "cpu" => Ok(BackendPreference::Software),
            "cuda" | "gpu" => Ok(BackendPreference::Cuda),
            other => Err(LayerNormGradError::InvalidConfig {
                label: "backend",
                message: format!("unknown backend `{other}`"),
            }),
        }
    }
}

/// Launch geometry knobs for the parallel engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParallelConfig {
    /// Number of partial-sum buckets (P) used by phase 1.
    pub partial_buckets: u32,
    /// Threads per block for every kernel launch.
    pub block_threads: u32,
    pub backend: BackendPreference,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            partial_buckets: DEFAULT_PARTIAL_BUCKETS,
            block_threads: DEFAULT_BLOCK_THREADS,
            backend: BackendPreference::Auto,
        }
    }
}

impl ParallelConfig {
    /// Builds a snapshot from environment variables. Values that do not
    /// parse fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let partial_buckets = std::env::var("ST_LNGRAD_PARTS")
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(defaults.partial_buckets);
        let block_threads = std::env::var("ST_LNGRAD_BLOCK")
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(defaults.block_threads);
        let backend = std::env::var("ST_LNGRAD_BACKEND")
            .ok()
            .and_then(|v| v.parse::<BackendPreference>().ok())
            .unwrap_or(defaults.backend);
        Self {
            partial_buckets,
            block_threads,
            backend,
        }
    }

    pub fn with_partial_buckets(mut self, partial_buckets: u32) -> Self {
        self.partial_buckets = partial_buckets;
        self
    }

    pub fn with_block_threads(mut self, block_threads: u32) -> Self {
        self.block_threads = block_threads;
        self
    }

    pub fn with_backend(mut self, backend: BackendPreference) -> Self {
        self.backend = backend;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.partial_buckets == 0 || self.partial_buckets > MAX_PARTIAL_BUCKETS {
            return Err(LayerNormGradError::InvalidConfig {
                label: "partial_buckets",
                message: format!(
                    "{} is outside 1..={MAX_PARTIAL_BUCKETS}",
                    self.partial_buckets
                ),
            });
        }
        let block = self.block_threads;
        if !block.is_power_of_two() || !(MIN_BLOCK_THREADS..=MAX_BLOCK_THREADS).contains(&block) {
            return Err(LayerNormGradError::InvalidConfig {
                label: "block_threads",
                message: format!(
                    "{block} must be a power of two in {MIN_BLOCK_THREADS}..={MAX_BLOCK_THREADS}"
                ),
            });
        }
        Ok(())
    }
}

static CONFIG: OnceLock<ParallelConfig> = OnceLock::new();

/// Returns the lazily captured process configuration. The environment is
/// read on first use only.
pub fn config() -> &'static ParallelConfig {
    CONFIG.get_or_init(ParallelConfig::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
    use std::sync::Mutex;

    fn with_env(vars: &[(&str, Option<&str>)], test: impl FnOnce()) {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        let _lock = GUARD
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let snapshot: Vec<(String, Option<String>)> = vars
            .iter()
            .map(|(key, value)| {
                let previous = std::env::var(key).ok();
                match value {
                    Some(val) => std::env::set_var(key, val),
                    None => std::env::remove_var(key),
                }
                ((*key).to_string(), previous)
            })
            .collect();

        let result = catch_unwind(AssertUnwindSafe(test));

        for (key, value) in snapshot {
            match value {
                Some(val) => std::env::set_var(&key, val),
                None => std::env::remove_var(&key),
            }
        }

        if let Err(err) = result {
            resume_unwind(err);
        }
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        with_env(
            &[
                ("ST_LNGRAD_PARTS", None),
                ("ST_LNGRAD_BLOCK", None),
                ("ST_LNGRAD_BACKEND", None),
            ],
            || {
                let cfg = ParallelConfig::from_env();
                assert_eq!(cfg, ParallelConfig::default());
                assert_eq!(cfg.partial_buckets, 16);
                assert!(cfg.validate().is_ok());
            },
        );
    }

    #[test]
    fn environment_overrides_apply() {
        with_env(
            &[
                ("ST_LNGRAD_PARTS", Some("64")),
                ("ST_LNGRAD_BLOCK", Some("256")),
                ("ST_LNGRAD_BACKEND", Some("Software")),
            ],
            || {
                let cfg = ParallelConfig::from_env();
                assert_eq!(cfg.partial_buckets, 64);
                assert_eq!(cfg.block_threads, 256);
                assert_eq!(cfg.backend, BackendPreference::Software);
            },
        );
    }

    #[test]
    fn garbage_values_fall_back() {
        with_env(
            &[
                ("ST_LNGRAD_PARTS", Some("many")),
                ("ST_LNGRAD_BACKEND", Some("tpu")),
            ],
            || {
                let cfg = ParallelConfig::from_env();
                assert_eq!(cfg.partial_buckets, DEFAULT_PARTIAL_BUCKETS);
                assert_eq!(cfg.backend, BackendPreference::Auto);
            },
        );
    }

    #[test]
    fn process_snapshot_ignores_later_environment_changes() {
        let first = *config();
        with_env(&[("ST_LNGRAD_PARTS", Some("7"))], || {
            let again = config();
            assert_eq!(*again, first);
            assert!(std::ptr::eq(again, config()));
            assert_eq!(ParallelConfig::from_env().partial_buckets, 7);
        });
    }

    #[test]
    fn validation_bounds() {
        let base = ParallelConfig::default();
        assert!(base.with_partial_buckets(0).validate().is_err());
        assert!(base.with_partial_buckets(1).validate().is_ok());
        assert!(base.with_partial_buckets(MAX_PARTIAL_BUCKETS + 1).validate().is_err());
        assert!(base.with_block_threads(96).validate().is_err());
        assert!(base.with_block_threads(16).validate().is_err());
        assert!(base.with_block_threads(1024).validate().is_ok());
        assert!("cuda".parse::<BackendPreference>().unwrap() == BackendPreference::Cuda);
        assert!("quantum".parse::<BackendPreference>().is_err());
    }
}

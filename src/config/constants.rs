// Project-wide constants
//
// Defaults and lookup locations for configuration live here so they have
// one source of truth. Import via `use crate::config::constants::*;`.

/// Scheduler name used in log events when none is configured.
pub const DEFAULT_SCHEDULER_NAME: &str = "greedy-sched";

/// Default `tracing` filter directive, overridden by `RUST_LOG`.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "GREEDY_SCHED_CONFIG";

/// Directory under the home directory holding the default config file.
pub const CONFIG_DIR: &str = ".greedy-sched";

/// Default config file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "config.toml";

/// Upper bound for `early_tolerance_ms`.
///
/// Running a task more than a minute before it is due is never a timer
/// coarseness issue, so larger values are rejected.
pub const MAX_EARLY_TOLERANCE_MS: u64 = 60_000;

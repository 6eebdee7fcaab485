// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names, default values and the
//! [`CoreConfig`] thresholds handed to every subsystem through
//! [`crate::context::CoreContext`].
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Root directory for the node-local object store | `/data` |
//! | `LEDGER_PATH` | redb file backing the ledger key/value store | `/data/ledger.redb` |
//! | `NODE_PRIVATE_KEY` | Hex P-256 private key of this storage node | Required |
//! | `OWNER_PRIVATE_KEY` | Hex key of a file owner; runs the challenge scheduler and migration monitor for it | unset |
//! | `NODE_NAME` | Human-readable node name | `dstore-node` |
//! | `NODE_ADDRESS` | Public base URL of this node's blob API | `http://127.0.0.1:8080` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM files; TLS is enabled when both are set | unset |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `DSTORE_SLICE_SIZE` | Slice size in bytes | `4194304` |
//! | `DSTORE_PUSH_RETRIES` | Push retries per node | `3` |
//! | `DSTORE_HEARTBEAT_INTERVAL_SECS` | Heartbeat period | `30` |
//! | `DSTORE_HEARTBEAT_TIMEOUT_SECS` | Heartbeat lapse before a node counts as offline | `90` |
//! | `DSTORE_CHALLENGE_INTERVAL_SECS` | PDP scheduler period | `60` |
//! | `DSTORE_CHALLENGE_TIMEOUT_SECS` | Time a node has to answer a challenge | `600` |
//! | `DSTORE_PDP_ALGORITHM` | `pairing` or `merkle` | `pairing` |
//! | `DSTORE_MIGRATION_TRIGGER_SECS` | Offline time before slices are migrated | `600` |
//! | `DSTORE_FILE_RETAIN_SECS` | Retention after file expiry | `604800` |
//!
//! Every threshold in [`CoreConfig`] has a matching `DSTORE_*` variable; see
//! [`CoreConfig::from_env`].

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::pdp::PdpAlgorithm;

/// Environment variable name for the node-local data directory.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// Environment variable name for the ledger database file.
pub const LEDGER_PATH_ENV: &str = "LEDGER_PATH";

/// Environment variable name for the node's hex-encoded private key.
pub const NODE_PRIVATE_KEY_ENV: &str = "NODE_PRIVATE_KEY";

/// Optional owner key for the owner-side loops.
pub const OWNER_PRIVATE_KEY_ENV: &str = "OWNER_PRIVATE_KEY";

pub const NODE_NAME_ENV: &str = "NODE_NAME";
pub const NODE_ADDRESS_ENV: &str = "NODE_ADDRESS";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Default data directory.
pub const DEFAULT_DATA_DIR: &str = "/data";

/// Default outstanding slices per file write.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Thresholds shared by the slice pipeline, PDP engine, node maintainer and
/// migration monitor.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Plaintext bytes per slice; the last slice is zero-padded to this size.
    pub slice_size: usize,
    /// Largest plaintext accepted by a single write.
    pub max_file_size: u64,
    pub push_retries: u32,
    /// Base delay of the exponential push backoff.
    pub push_backoff: Duration,
    pub push_timeout: Duration,
    pub pull_timeout: Duration,
    /// Sliding window of outstanding slices per file write.
    pub write_concurrency: usize,
    /// Sliding window of outstanding slice fetches per file read.
    pub read_concurrency: usize,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    /// Accepted clock skew on signed node requests.
    pub request_skew: Duration,
    pub challenge_interval: Duration,
    /// `(slice, node)` pairs challenged per scheduler tick.
    pub challenge_fan_out: usize,
    /// Upper bound on challenges issued in one tick, across all files.
    pub challenge_max_per_round: usize,
    /// Slices covered by one challenge.
    pub challenge_slices: usize,
    pub challenge_timeout: Duration,
    /// How often storage nodes poll for challenges to answer.
    pub prove_interval: Duration,
    /// Length of one PDP round; sigmas are refreshed when the round changes.
    pub pdp_round_period: Duration,
    pub pdp_algorithm: PdpAlgorithm,
    /// Bytes per Merkle leaf range.
    pub merkle_range_size: usize,
    pub migration_interval: Duration,
    /// Offline time after which a node's replicas are rebuilt elsewhere.
    pub migration_trigger: Duration,
    /// Consecutive failed challenges before a replica is considered lost.
    pub max_fail_streak: usize,
    pub migrate_parallelism: usize,
    pub file_retain_period: Duration,
    pub clear_interval: Duration,
    /// Age after which a slice with no committed file is evicted.
    pub orphan_grace: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            slice_size: 4 * 1024 * 1024,
            max_file_size: 4 * 1024 * 1024 * 1024,
            push_retries: 3,
            push_backoff: Duration::from_millis(200),
            push_timeout: Duration::from_secs(30),
            pull_timeout: Duration::from_secs(30),
            write_concurrency: DEFAULT_CONCURRENCY,
            read_concurrency: DEFAULT_CONCURRENCY,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            request_skew: Duration::from_secs(300),
            challenge_interval: Duration::from_secs(60),
            challenge_fan_out: 10,
            challenge_max_per_round: 100,
            challenge_slices: 5,
            challenge_timeout: Duration::from_secs(600),
            prove_interval: Duration::from_secs(15),
            pdp_round_period: Duration::from_secs(24 * 3600),
            pdp_algorithm: PdpAlgorithm::Pairing,
            merkle_range_size: 1024,
            migration_interval: Duration::from_secs(60),
            migration_trigger: Duration::from_secs(600),
            max_fail_streak: 3,
            migrate_parallelism: 4,
            file_retain_period: Duration::from_secs(7 * 24 * 3600),
            clear_interval: Duration::from_secs(300),
            orphan_grace: Duration::from_secs(3600),
        }
    }
}

impl CoreConfig {
    /// Load thresholds from `DSTORE_*` environment variables, falling back
    /// to [`CoreConfig::default`] for anything unset or unparsable.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            slice_size: env_parse("DSTORE_SLICE_SIZE", d.slice_size),
            max_file_size: env_parse("DSTORE_MAX_FILE_SIZE", d.max_file_size),
            push_retries: env_parse("DSTORE_PUSH_RETRIES", d.push_retries),
            push_backoff: env_millis("DSTORE_PUSH_BACKOFF_MS", d.push_backoff),
            push_timeout: env_secs("DSTORE_PUSH_TIMEOUT_SECS", d.push_timeout),
            pull_timeout: env_secs("DSTORE_PULL_TIMEOUT_SECS", d.pull_timeout),
            write_concurrency: env_parse("DSTORE_WRITE_CONCURRENCY", d.write_concurrency),
            read_concurrency: env_parse("DSTORE_READ_CONCURRENCY", d.read_concurrency),
            heartbeat_interval: env_secs("DSTORE_HEARTBEAT_INTERVAL_SECS", d.heartbeat_interval),
            heartbeat_timeout: env_secs("DSTORE_HEARTBEAT_TIMEOUT_SECS", d.heartbeat_timeout),
            request_skew: env_secs("DSTORE_REQUEST_SKEW_SECS", d.request_skew),
            challenge_interval: env_secs("DSTORE_CHALLENGE_INTERVAL_SECS", d.challenge_interval),
            challenge_fan_out: env_parse("DSTORE_CHALLENGE_FAN_OUT", d.challenge_fan_out),
            challenge_max_per_round: env_parse(
                "DSTORE_CHALLENGE_MAX_PER_ROUND",
                d.challenge_max_per_round,
            ),
            challenge_slices: env_parse("DSTORE_CHALLENGE_SLICES", d.challenge_slices),
            challenge_timeout: env_secs("DSTORE_CHALLENGE_TIMEOUT_SECS", d.challenge_timeout),
            prove_interval: env_secs("DSTORE_PROVE_INTERVAL_SECS", d.prove_interval),
            pdp_round_period: env_secs("DSTORE_PDP_ROUND_SECS", d.pdp_round_period),
            pdp_algorithm: env_parse("DSTORE_PDP_ALGORITHM", d.pdp_algorithm),
            merkle_range_size: env_parse("DSTORE_MERKLE_RANGE_SIZE", d.merkle_range_size),
            migration_interval: env_secs("DSTORE_MIGRATION_INTERVAL_SECS", d.migration_interval),
            migration_trigger: env_secs("DSTORE_MIGRATION_TRIGGER_SECS", d.migration_trigger),
            max_fail_streak: env_parse("DSTORE_MAX_FAIL_STREAK", d.max_fail_streak),
            migrate_parallelism: env_parse("DSTORE_MIGRATE_PARALLELISM", d.migrate_parallelism),
            file_retain_period: env_secs("DSTORE_FILE_RETAIN_SECS", d.file_retain_period),
            clear_interval: env_secs("DSTORE_CLEAR_INTERVAL_SECS", d.clear_interval),
            orphan_grace: env_secs("DSTORE_ORPHAN_GRACE_SECS", d.orphan_grace),
        }
    }
}

/// Read an environment variable, or the default when unset.
pub fn env_or_default(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_millis(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CoreConfig::default();
        assert_eq!(config.write_concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(90));
        assert_eq!(config.pdp_algorithm, PdpAlgorithm::Pairing);
        assert!(config.heartbeat_interval < config.heartbeat_timeout);
    }

    #[test]
    fn unparsable_values_fall_back_to_default() {
        assert_eq!(env_parse("DSTORE_TEST_UNSET_VARIABLE_X", 7usize), 7);
        assert_eq!(
            env_secs("DSTORE_TEST_UNSET_VARIABLE_Y", Duration::from_secs(3)),
            Duration::from_secs(3)
        );
        assert_eq!(env_or_default("DSTORE_TEST_UNSET_VARIABLE_Z", "x"), "x");
    }
}

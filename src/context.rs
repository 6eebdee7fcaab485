// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Immutable context passed to every subsystem constructor.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::config::CoreConfig;
use crate::pdp::pairing::CurveParams;

/// Source of the current time in Unix nanoseconds.
pub trait Clock: Send + Sync {
    fn now_nanos(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_nanos(&self) -> i64 {
        Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_nanos: i64) -> Self {
        Self {
            now: AtomicI64::new(start_nanos),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(nanos(by), Ordering::SeqCst);
    }

    pub fn set(&self, nanos: i64) {
        self.now.store(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Convert a duration to signed nanoseconds, saturating.
pub fn nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

/// Thresholds, curve parameters and the time source.
#[derive(Clone)]
pub struct CoreContext {
    pub config: CoreConfig,
    pub curve: CurveParams,
    pub clock: Arc<dyn Clock>,
}

impl CoreContext {
    pub fn new(config: CoreConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            curve: CurveParams::default(),
            clock,
        }
    }

    /// Current time in Unix nanoseconds.
    pub fn now(&self) -> i64 {
        self.clock.now_nanos()
    }
}

impl std::fmt::Debug for CoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreContext")
            .field("config", &self.config)
            .field("now", &self.now())
            .finish()
    }
}

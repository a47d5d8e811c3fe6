// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime tunables.
//!
//! Read once from the environment at first use and held for the life of
//! the process. The identity checks can be switched off for workloads
//! that guarantee pool access discipline externally.

use std::sync::OnceLock;

/// Process-wide runtime configuration.
#[derive(Debug, Clone)]
pub struct RtConfig {
    /// Enforce single-producer identity on restricted pools.
    /// `WEFT_POOL_PRODUCER_CHECK`, default on.
    pub producer_check: bool,
    /// Enforce single-consumer identity on restricted pools.
    /// `WEFT_POOL_CONSUMER_CHECK`, default on.
    pub consumer_check: bool,
    /// Spins attempted in `WeftMutex::lock` before backing off
    /// cooperatively. `WEFT_MUTEX_SPIN`, default 64.
    pub mutex_spin: u32,
}

impl RtConfig {
    fn from_env() -> Self {
        Self {
            producer_check: env_flag("WEFT_POOL_PRODUCER_CHECK", true),
            consumer_check: env_flag("WEFT_POOL_CONSUMER_CHECK", true),
            mutex_spin: env_u32("WEFT_MUTEX_SPIN", 64),
        }
    }
}

static CONFIG: OnceLock<RtConfig> = OnceLock::new();

/// The process-wide configuration, initialized on first call.
pub fn config() -> &'static RtConfig {
    CONFIG.get_or_init(RtConfig::from_env)
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => parse_flag(&v, default),
        Err(_) => default,
    }
}

fn parse_flag(raw: &str, default: bool) -> bool {
    match raw.trim() {
        "1" | "true" | "on" | "yes" => true,
        "0" | "false" | "off" | "no" => false,
        _ => default,
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

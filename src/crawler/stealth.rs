//! Anti-detection policy for browser fetches
//!
//! Every fetch waits a random delay drawn from the configured window and
//! renders under a fresh identity: user agent and viewport are drawn from
//! configured sets, automation markers are hidden by an init script, and
//! heavy sub-resources are blocked.

use crate::config::BrowserConfig;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::Duration;

/// Script run before any page script to hide automation markers
pub const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
Object.defineProperty(navigator, 'languages', { get: () => ['vi-VN', 'vi', 'en-US', 'en'] });
window.chrome = { runtime: {} };
const originalQuery = window.navigator.permissions.query;
window.navigator.permissions.query = (parameters) => (
    parameters.name === 'notifications'
        ? Promise.resolve({ state: Notification.permission })
        : originalQuery(parameters)
);
"#;

/// Identity and restrictions applied to one browser execution context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextProfile {
    pub user_agent: String,
    pub viewport: (u32, u32),
    /// URL patterns the browser must not load (`*` wildcards)
    pub blocked_url_patterns: Vec<String>,
    pub init_script: &'static str,
}

/// Randomized timing and identity for fetches
#[derive(Debug)]
pub struct StealthPolicy {
    user_agents: Vec<String>,
    viewports: Vec<(u32, u32)>,
    blocked_url_patterns: Vec<String>,
    delay_min: Duration,
    delay_max: Duration,
    rng: Mutex<StdRng>,
}

impl StealthPolicy {
    /// Builds the policy from browser settings with an OS-seeded RNG
    pub fn from_config(config: &BrowserConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Builds the policy with a fixed seed, for reproducible runs
    pub fn seeded(config: &BrowserConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &BrowserConfig, rng: StdRng) -> Self {
        let mut blocked_url_patterns: Vec<String> = Vec::new();
        for category in &config.blocked_resources {
            for pattern in category.url_patterns() {
                if !blocked_url_patterns.iter().any(|p| p == pattern) {
                    blocked_url_patterns.push(pattern.to_string());
                }
            }
        }

        Self {
            user_agents: config.user_agents.clone(),
            viewports: config.viewports.iter().map(|[w, h]| (*w, *h)).collect(),
            blocked_url_patterns,
            delay_min: Duration::from_millis(config.delay_min_ms),
            delay_max: Duration::from_millis(config.delay_max_ms.max(config.delay_min_ms)),
            rng: Mutex::new(rng),
        }
    }

    fn with_rng_locked<R>(&self, f: impl FnOnce(&mut StdRng) -> R) -> R {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut rng)
    }

    /// Draws the pre-fetch delay uniformly from the configured window
    pub fn next_delay(&self) -> Duration {
        if self.delay_max <= self.delay_min {
            return self.delay_min;
        }
        let min = self.delay_min.as_millis() as u64;
        let max = self.delay_max.as_millis() as u64;
        Duration::from_millis(self.with_rng_locked(|rng| rng.random_range(min..=max)))
    }

    /// Draws a fresh identity for one execution context
    pub fn next_profile(&self) -> ContextProfile {
        let (user_agent, viewport) = self.with_rng_locked(|rng| {
            let agent = self.user_agents.choose(rng).cloned().unwrap_or_default();
            let viewport = self.viewports.choose(rng).copied().unwrap_or((1366, 768));
            (agent, viewport)
        });

        ContextProfile {
            user_agent,
            viewport,
            blocked_url_patterns: self.blocked_url_patterns.clone(),
            init_script: STEALTH_SCRIPT,
        }
    }
}

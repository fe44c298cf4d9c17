use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Escalating disablement thresholds for one backend.
///
/// With the defaults a consistently failing backend is disabled for
/// 1×120s after 3 failures, 2×120s after 6, ... and permanently after 18.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Failures before a disable cycle starts. `1` disables on the first failure.
    pub max_failures: u32,
    /// Base cooldown, multiplied by the cycle number.
    pub cooldown_base_secs: u64,
    /// Disable cycles before the backend is disabled until it is rebuilt.
    pub max_disable_cycles: u32,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            max_failures: 3,
            cooldown_base_secs: 120,
            max_disable_cycles: 6,
        }
    }
}

impl FailoverConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    /// Cooldown unit in whole seconds; the n-th disable cycle waits n units.
    pub fn with_cooldown_base_secs(mut self, secs: u64) -> Self {
        self.cooldown_base_secs = secs;
        self
    }

    pub fn with_max_disable_cycles(mut self, cycles: u32) -> Self {
        self.max_disable_cycles = cycles;
        self
    }

    pub fn cooldown_base(&self) -> Duration {
        Duration::from_secs(self.cooldown_base_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverStatus {
    Healthy,
    CoolingDown,
    PermanentlyDisabled,
}

#[derive(Debug, Clone)]
pub struct FailoverSnapshot {
    pub status: FailoverStatus,
    pub failures: u32,
    pub cooldown_multiplier: u32,
    pub disable_cycle_count: u32,
    /// Remaining cooldown, if currently cooling down.
    pub cooldown_remaining: Option<Duration>,
    pub permanently_disabled: bool,
}

#[derive(Debug)]
struct State {
    failures: u32,
    cooldown_multiplier: u32,
    disable_cycle_count: u32,
    disable_until: Option<Instant>,
    permanently_disabled: bool,
}

impl State {
    fn clean() -> Self {
        Self {
            failures: 0,
            cooldown_multiplier: 0,
            disable_cycle_count: 0,
            disable_until: None,
            permanently_disabled: false,
        }
    }

    fn is_dirty(&self) -> bool {
        self.failures > 0 || self.cooldown_multiplier > 0 || self.disable_cycle_count > 0
    }
}

/// Per-backend failure counter with escalating, time-boxed disablement.
///
/// All transitions happen under one lock; the handler is shared by every
/// in-flight call to the same backend.
#[derive(Debug)]
pub struct FailoverHandler {
    cfg: FailoverConfig,
    name: String,
    state: Mutex<State>,
}

impl FailoverHandler {
    pub fn new(name: impl Into<String>, cfg: FailoverConfig) -> Self {
        Self {
            cfg,
            name: name.into(),
            state: Mutex::new(State::clean()),
        }
    }

    pub fn config(&self) -> &FailoverConfig {
        &self.cfg
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding this lock leaves plain counters behind; keep using them.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reset every counter if any of them moved.
    ///
    /// An active cooldown window is left to expire on its own.
    pub fn on_success(&self) {
        let mut st = self.lock();
        if st.is_dirty() {
            let disable_until = st.disable_until;
            *st = State::clean();
            st.disable_until = disable_until;
            tracing::debug!(backend = %self.name, "failover state reset");
        }
    }

    /// Record a failure. Returns `true` when this failure disabled the backend.
    pub fn on_failure(&self) -> bool {
        self.on_failure_at(Instant::now())
    }

    pub(crate) fn on_failure_at(&self, now: Instant) -> bool {
        let mut st = self.lock();
        st.failures = st.failures.saturating_add(1);
        tracing::warn!(
            backend = %self.name,
            failures = st.failures,
            max_failures = self.cfg.max_failures,
            "backend failure recorded"
        );

        if st.failures < self.cfg.max_failures {
            return false;
        }

        st.failures = 0;
        st.cooldown_multiplier = st.cooldown_multiplier.saturating_add(1);
        st.disable_cycle_count = st.disable_cycle_count.saturating_add(1);

        if st.disable_cycle_count >= self.cfg.max_disable_cycles {
            st.permanently_disabled = true;
            tracing::error!(
                backend = %self.name,
                max_disable_cycles = self.cfg.max_disable_cycles,
                "reached maximum disable cycles, backend permanently disabled"
            );
            return true;
        }

        let cooldown = self
            .cfg
            .cooldown_base()
            .saturating_mul(st.cooldown_multiplier);
        st.disable_until = Some(now + cooldown);
        tracing::warn!(
            backend = %self.name,
            cooldown_secs = cooldown.as_secs(),
            cycle = st.disable_cycle_count,
            "reached maximum failures, backend disabled"
        );
        true
    }

    pub fn is_disabled(&self) -> bool {
        self.is_disabled_at(Instant::now())
    }

    pub(crate) fn is_disabled_at(&self, now: Instant) -> bool {
        let st = self.lock();
        st.permanently_disabled || st.disable_until.map_or(false, |until| now < until)
    }

    pub fn snapshot(&self) -> FailoverSnapshot {
        let now = Instant::now();
        let st = self.lock();
        let cooldown_remaining = st
            .disable_until
            .and_then(|until| (until > now).then(|| until - now));
        let status = if st.permanently_disabled {
            FailoverStatus::PermanentlyDisabled
        } else if cooldown_remaining.is_some() {
            FailoverStatus::CoolingDown
        } else {
            FailoverStatus::Healthy
        };
        FailoverSnapshot {
            status,
            failures: st.failures,
            cooldown_multiplier: st.cooldown_multiplier,
            disable_cycle_count: st.disable_cycle_count,
            cooldown_remaining,
            permanently_disabled: st.permanently_disabled,
        }
    }

    #[cfg(test)]
    fn disable_until(&self) -> Option<Instant> {
        self.lock().disable_until
    }
}

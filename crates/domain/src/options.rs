use std::time::Duration;

/// Lease applied when the caller does not configure one.
pub const DEFAULT_LEASE_SECONDS: u64 = 30;

/// Blocking wait applied when blocking mode has no explicit bound.
pub const DEFAULT_MAX_WAIT_SECONDS: u64 = 5;

/// Delay between two blocking acquisition attempts.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Delay between two lease renewal ticks.
pub const RENEWAL_INTERVAL: Duration = Duration::from_millis(50);

/// Seconds added on top of the lease on every renewal tick.
pub const RENEWAL_MARGIN_SECONDS: u64 = 5;

/// Caller-facing lock options before defaulting.
///
/// Zero values mean "not set".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockOptions {
    /// Explicit lease duration in seconds.
    pub lease_seconds: u64,
    /// Whether acquisition polls until the lock frees up.
    pub blocking: bool,
    /// Upper bound of a blocking acquisition, in seconds.
    pub max_wait_seconds: u64,
    /// Whether a renewal task keeps the lease alive while held.
    pub watchdog: bool,
}

impl LockOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an explicit lease duration.
    #[must_use]
    pub fn with_lease_seconds(mut self, lease_seconds: u64) -> Self {
        self.lease_seconds = lease_seconds;
        self
    }

    /// Enables blocking acquisition.
    #[must_use]
    pub fn with_blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    /// Bounds blocking acquisition.
    #[must_use]
    pub fn with_max_wait_seconds(mut self, max_wait_seconds: u64) -> Self {
        self.max_wait_seconds = max_wait_seconds;
        self
    }

    /// Enables lease renewal regardless of the lease duration.
    #[must_use]
    pub fn with_watchdog(mut self) -> Self {
        self.watchdog = true;
        self
    }

    /// Applies the defaulting rules and returns the effective configuration.
    ///
    /// Blocking without a bound waits [`DEFAULT_MAX_WAIT_SECONDS`]. Without an
    /// explicit lease the lease becomes [`DEFAULT_LEASE_SECONDS`] and renewal
    /// is forced on. The two rules are independent.
    #[must_use]
    pub fn resolve(self) -> LockConfiguration {
        let mut resolved = self;

        if resolved.blocking && resolved.max_wait_seconds == 0 {
            resolved.max_wait_seconds = DEFAULT_MAX_WAIT_SECONDS;
        }

        if resolved.lease_seconds == 0 {
            resolved.watchdog = true;
            resolved.lease_seconds = DEFAULT_LEASE_SECONDS;
        }

        LockConfiguration {
            lease_seconds: resolved.lease_seconds,
            blocking: resolved.blocking,
            max_wait_seconds: resolved.max_wait_seconds,
            watchdog: resolved.watchdog,
        }
    }
}

/// Effective lock configuration after defaulting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfiguration {
    lease_seconds: u64,
    blocking: bool,
    max_wait_seconds: u64,
    watchdog: bool,
}

impl LockConfiguration {
    /// Lease TTL written on acquisition, always greater than zero.
    #[must_use]
    pub fn lease_seconds(&self) -> u64 {
        self.lease_seconds
    }

    /// Whether acquisition polls on conflict.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Blocking wait bound. Only meaningful in blocking mode.
    #[must_use]
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_seconds)
    }

    /// Whether the renewal task starts after acquisition.
    #[must_use]
    pub fn watchdog_enabled(&self) -> bool {
        self.watchdog
    }

    /// TTL re-applied on each renewal tick.
    #[must_use]
    pub fn renewal_ttl_seconds(&self) -> u64 {
        self.lease_seconds.saturating_add(RENEWAL_MARGIN_SECONDS)
    }
}

impl From<LockOptions> for LockConfiguration {
    fn from(options: LockOptions) -> Self {
        options.resolve()
    }
}

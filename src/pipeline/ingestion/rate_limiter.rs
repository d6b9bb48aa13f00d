use crate::app::ports::Clock;
use crate::error::RateLimitError;
use crate::observability::metrics;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub time_window: Duration,
    /// How long a caller sleeps once the window is saturated.
    pub retry_delay: Duration,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, time_window: Duration, retry_delay: Duration) -> Self {
        Self {
            max_requests,
            time_window,
            retry_delay,
        }
    }
}

/// What `acquire` does for a source that was never registered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnregisteredPolicy {
    /// Fail with `RateLimitError::UnregisteredSource`.
    #[default]
    Reject,
    /// Warn and let the request through unthrottled.
    Allow,
}

#[derive(Debug)]
struct SourceWindow {
    config: RateLimitConfig,
    requests: VecDeque<Instant>,
}

impl SourceWindow {
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.requests.front() {
            if now.saturating_duration_since(oldest) >= self.config.time_window {
                self.requests.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Sliding-window limiter keyed by source name.
///
/// The source map lock is only held to look a window up; each source's window
/// has its own mutex, and that mutex is held across the saturation sleep so
/// callers of the same source queue up behind each other while other sources
/// proceed.
pub struct RateLimiter {
    windows: RwLock<HashMap<String, Arc<Mutex<SourceWindow>>>>,
    clock: Arc<dyn Clock>,
    unregistered: UnregisteredPolicy,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_policy(clock, UnregisteredPolicy::default())
    }

    pub fn with_policy(clock: Arc<dyn Clock>, unregistered: UnregisteredPolicy) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            clock,
            unregistered,
        }
    }

    /// Establish (or replace) the limit for `source`. Replacing drops the
    /// recorded history.
    pub fn register(&self, source: &str, config: RateLimitConfig) {
        info!(
            source,
            max_requests = config.max_requests,
            window_secs = config.time_window.as_secs_f64(),
            "Registered rate limit"
        );
        let window = Arc::new(Mutex::new(SourceWindow {
            config,
            requests: VecDeque::new(),
        }));
        let mut windows = self.windows.write().unwrap_or_else(|p| p.into_inner());
        windows.insert(source.to_string(), window);
    }

    pub fn is_registered(&self, source: &str) -> bool {
        self.window(source).is_some()
    }

    /// Block until a request slot for `source` is free, then record it.
    /// Returns whether the caller had to wait.
    pub fn acquire(&self, source: &str) -> Result<bool, RateLimitError> {
        let Some(window) = self.window(source) else {
            return match self.unregistered {
                UnregisteredPolicy::Reject => {
                    Err(RateLimitError::UnregisteredSource(source.to_string()))
                }
                UnregisteredPolicy::Allow => {
                    warn!(source, "No rate limit registered; proceeding unthrottled");
                    Ok(false)
                }
            };
        };

        let mut window = window.lock().unwrap_or_else(|p| {
            warn!(source, "Rate limit window lock poisoned; recovering");
            p.into_inner()
        });

        let now = self.clock.now();
        window.prune(now);

        let mut waited = false;
        if window.requests.len() >= window.config.max_requests as usize {
            let delay = window.config.retry_delay;
            warn!(
                source,
                in_window = window.requests.len(),
                delay_secs = delay.as_secs_f64(),
                "Rate limit reached, waiting"
            );
            self.clock.sleep(delay);
            window.requests.clear();
            metrics::rate_limiter::waited(source, delay.as_secs_f64());
            waited = true;
        }

        window.requests.push_back(self.clock.now());
        metrics::rate_limiter::acquired(source);
        debug!(source, in_window = window.requests.len(), "Request slot acquired");
        Ok(waited)
    }

    /// Forget the recorded requests for `source`.
    pub fn reset(&self, source: &str) {
        if let Some(window) = self.window(source) {
            window
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .requests
                .clear();
        }
    }

    /// Requests currently counted inside the window, pruned as of now.
    pub fn in_window(&self, source: &str) -> Option<usize> {
        let window = self.window(source)?;
        let mut window = window.lock().unwrap_or_else(|p| p.into_inner());
        window.prune(self.clock.now());
        Some(window.requests.len())
    }

    fn window(&self, source: &str) -> Option<Arc<Mutex<SourceWindow>>> {
        self.windows
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(source)
            .cloned()
    }
}

//! Tunables for a [`Registry`](crate::Registry).

use std::time::Duration;

/// Which strategy a registry uses to learn about file changes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum BackendKind {
    /// Use OS change notifications when they can be started, else polling.
    #[default]
    Auto,
    /// OS change notifications only; construction fails if unavailable.
    Notify,
    /// Readiness polling on a fixed interval.
    Poll,
}

#[derive(Clone, Debug)]
pub struct RegistryOptions {
    /// Lines of existing content sent to the first subscriber of a path.
    /// Zero skips the tail and starts reading from the current end.
    pub initial_lines: usize,
    /// Empty deliveries tolerated before updates fail with
    /// [`Error::ExcessiveEmptyEvents`](crate::Error::ExcessiveEmptyEvents).
    pub empty_event_limit: usize,
    pub backend: BackendKind,
    /// Tick rate of the polling backend.
    pub poll_interval: Duration,
}

impl RegistryOptions {
    /// Sets how many trailing lines the first subscriber of a path receives.
    pub fn with_initial_lines(mut self, initial_lines: usize) -> Self {
        self.initial_lines = initial_lines;
        self
    }

    /// Sets how many empty updates are tolerated before erroring.
    pub fn with_empty_event_limit(mut self, limit: usize) -> Self {
        self.empty_event_limit = limit;
        self
    }

    /// Sets which change-notification backend to use.
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Sets the tick rate of the polling backend.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for RegistryOptions {
    fn default() -> Self {
        RegistryOptions {
            initial_lines: 10,
            empty_event_limit: 10,
            backend: BackendKind::Auto,
            poll_interval: Duration::from_millis(100),
        }
    }
}

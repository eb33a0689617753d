use ctxwire_config::{ContextFiltersConfig, IntervalHintConfig};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Outcome class reported alongside each fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefetchHintKind {
    Initial,
    Success,
    /// Likely to clear up quickly, e.g. a dropped connection.
    Ephemeral,
    /// Backend trouble that may take a while to resolve.
    Transient,
    /// Will not change without a backend upgrade.
    Permanent,
}

impl RefetchHintKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Success => "success",
            Self::Ephemeral => "ephemeral",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }
}

/// How soon the rules may be fetched again.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefetchIntervalHint {
    pub kind: RefetchHintKind,
    pub initial_interval: Duration,
    pub backoff: f64,
}

impl RefetchIntervalHint {
    pub fn new(kind: RefetchHintKind, initial_interval: Duration, backoff: f64) -> Self {
        Self {
            kind,
            initial_interval,
            backoff,
        }
    }

    /// Hint for `kind` from the configured table.
    pub fn from_config(kind: RefetchHintKind, config: &ContextFiltersConfig) -> Self {
        let table = &config.refetch;
        let entry: &IntervalHintConfig = match kind {
            RefetchHintKind::Initial => &table.initial,
            RefetchHintKind::Success => &table.success,
            RefetchHintKind::Ephemeral => &table.ephemeral,
            RefetchHintKind::Transient => &table.transient,
            RefetchHintKind::Permanent => &table.permanent,
        };
        Self::new(kind, entry.initial_interval(), entry.backoff)
    }
}

/// Decides when the next fetch is allowed.
#[derive(Debug, Clone)]
pub struct RefreshSchedule {
    last_kind: RefetchHintKind,
    delay: Duration,
    max_delay: Duration,
    last_fetch_at: Option<Instant>,
}

impl RefreshSchedule {
    pub fn new(config: &ContextFiltersConfig) -> Self {
        let initial = RefetchIntervalHint::from_config(RefetchHintKind::Initial, config);
        Self {
            last_kind: initial.kind,
            delay: initial.initial_interval.min(config.max_refetch_interval()),
            max_delay: config.max_refetch_interval(),
            last_fetch_at: None,
        }
    }

    /// `now >= last fetch + delay`; always true before the first fetch.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_fetch_at {
            None => true,
            Some(last) => last
                .checked_add(self.delay)
                .is_none_or(|next| now >= next),
        }
    }

    /// Record a finished fetch and derive the next delay from its hint.
    pub fn complete(&mut self, hint: RefetchIntervalHint, now: Instant) {
        let next_delay = if hint.kind == self.last_kind {
            Duration::try_from_secs_f64(self.delay.as_secs_f64() * hint.backoff.max(1.0))
                .unwrap_or(self.max_delay)
        } else {
            hint.initial_interval
        };

        self.delay = next_delay.min(self.max_delay);
        self.last_kind = hint.kind;
        self.last_fetch_at = Some(now);

        debug!(
            hint = hint.kind.as_str(),
            delay_ms = self.delay.as_millis() as u64,
            "scheduled next context filters refresh"
        );
    }

    pub fn current_delay(&self) -> Duration {
        self.delay
    }

    pub fn last_kind(&self) -> RefetchHintKind {
        self.last_kind
    }

    pub fn next_refresh_at(&self) -> Option<Instant> {
        self.last_fetch_at
            .and_then(|last| last.checked_add(self.delay))
    }
}

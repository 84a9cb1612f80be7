//! Waiting for the directory table after a stage refresh.
//!
//! The refresh is eventually consistent. Instead of sleeping for a fixed time
//! and hoping, [`SettlePolicy::Poll`] asks the directory table whether the
//! uploaded names are listed yet, backing off exponentially between probes.
//! Running out of attempts is not an error: the caller reloads anyway and
//! tells the user the table may still be catching up.

use crate::config::SettleConfig;
use crate::error::CrowdError;
use crate::stage::{StageLocation, StageManager};
use backon::{ExponentialBuilder, Retryable};
use diagnostics::*;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlePolicy {
    /// Sleep once for the given time
    Fixed(Duration),
    /// Probe the directory table with bounded exponential backoff
    Poll {
        min_delay: Duration,
        max_delay: Duration,
        max_attempts: usize,
    },
}

impl From<&SettleConfig> for SettlePolicy {
    fn from(config: &SettleConfig) -> Self {
        match *config {
            SettleConfig::Fixed { delay_ms } => SettlePolicy::Fixed(Duration::from_millis(delay_ms)),
            SettleConfig::Poll {
                min_delay_ms,
                max_delay_ms,
                max_attempts,
            } => SettlePolicy::Poll {
                min_delay: Duration::from_millis(min_delay_ms),
                max_delay: Duration::from_millis(max_delay_ms),
                max_attempts,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    /// Every expected name is listed
    Ready { attempts: usize },
    /// Fixed wait elapsed; nothing was checked
    Waited(Duration),
    /// Attempts exhausted with names still missing
    TimedOut { missing: Vec<String> },
    /// The readiness probe itself failed
    Unconfirmed { reason: String },
}

impl SettleOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, SettleOutcome::Ready { .. } | SettleOutcome::Waited(_))
    }
}

impl fmt::Display for SettleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettleOutcome::Ready { attempts } => {
                write!(f, "directory table ready after {attempts} check(s)")
            }
            SettleOutcome::Waited(delay) => write!(f, "waited {} ms", delay.as_millis()),
            SettleOutcome::TimedOut { missing } => write!(
                f,
                "still refreshing, not yet listed: {}",
                missing.join(", ")
            ),
            SettleOutcome::Unconfirmed { reason } => {
                write!(f, "could not confirm refresh: {reason}")
            }
        }
    }
}

enum Probe {
    Pending(Vec<String>),
    Failed(CrowdError),
}

/// Wait until `expected` shows up in the stage's directory table
pub async fn settle(
    stage: &StageManager,
    location: &StageLocation,
    expected: &[String],
    policy: &SettlePolicy,
) -> SettleOutcome {
    match *policy {
        SettlePolicy::Fixed(delay) => {
            let ms = delay.as_millis() as u64;
            debug!("Settling for a fixed {ms} ms", ms: ms);
            tokio::time::sleep(delay).await;
            SettleOutcome::Waited(delay)
        }
        SettlePolicy::Poll {
            min_delay,
            max_delay,
            max_attempts,
        } => {
            if expected.is_empty() {
                return SettleOutcome::Ready { attempts: 0 };
            }

            let attempts = AtomicUsize::new(0);
            let probe = || async {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                let visible = stage
                    .visible_paths(location, expected)
                    .await
                    .map_err(Probe::Failed)?;
                let missing = missing_names(expected, &visible);
                let count = missing.len();
                debug!("Settle probe {attempt}: {count} file(s) not yet listed",
                    attempt: attempt, count: count);
                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(Probe::Pending(missing))
                }
            };

            let backoff = ExponentialBuilder::default()
                .with_min_delay(min_delay)
                .with_max_delay(max_delay)
                .with_max_times(max_attempts.saturating_sub(1));

            let result = probe
                .retry(backoff)
                .sleep(tokio::time::sleep)
                .when(|e| matches!(e, Probe::Pending(_)))
                .await;

            let attempts = attempts.load(Ordering::SeqCst);
            match result {
                Ok(()) => SettleOutcome::Ready { attempts },
                Err(Probe::Pending(missing)) => {
                    let count = missing.len();
                    warn!("Directory table still missing {count} file(s) after {attempts} probes",
                        count: count, attempts: attempts);
                    SettleOutcome::TimedOut { missing }
                }
                Err(Probe::Failed(e)) => {
                    let reason = e.to_string();
                    warn!("Settle probe failed: {reason}", reason: reason);
                    SettleOutcome::Unconfirmed { reason }
                }
            }
        }
    }
}

fn missing_names(expected: &[String], visible: &HashSet<String>) -> Vec<String> {
    expected
        .iter()
        .filter(|name| !visible.contains(*name))
        .cloned()
        .collect()
}

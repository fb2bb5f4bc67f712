//! Engine configuration.
//!
//! Defaults match the documented operational surface; every value can be
//! overridden from the process environment with strict validation (a value
//! that is present but unparseable is a configuration error, never silently
//! defaulted).

use chrono::Duration;
use std::time::Duration as StdDuration;

use crate::error::{Error, Result};

const ENV_INTAKE_BATCH_SIZE: &str = "DROVER_INTAKE_BATCH_SIZE";
const ENV_POLL_BATCH_SIZE: &str = "DROVER_POLL_BATCH_SIZE";
const ENV_LEASE_DURATION_SECS: &str = "DROVER_LEASE_DURATION_SECS";
const ENV_POLL_INTERVAL_SECS: &str = "DROVER_POLL_INTERVAL_SECS";
const ENV_MAX_SUBMIT_ATTEMPTS: &str = "DROVER_MAX_SUBMIT_ATTEMPTS";
const ENV_IDEMPOTENCY_LEASE_SECS: &str = "DROVER_IDEMPOTENCY_LEASE_SECS";
const ENV_DISCOVER_SCHEDULE_SECS: &str = "DROVER_DISCOVER_SCHEDULE_SECS";
const ENV_POLL_SCHEDULE_SECS: &str = "DROVER_POLL_SCHEDULE_SECS";
const ENV_EVENT_SOURCE: &str = "DROVER_EVENT_SOURCE";

const DEFAULT_INTAKE_BATCH_SIZE: usize = 50;
const DEFAULT_POLL_BATCH_SIZE: usize = 200;
const DEFAULT_LEASE_DURATION_SECS: u64 = 30 * 60;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5 * 60;
const DEFAULT_MAX_SUBMIT_ATTEMPTS: u32 = 3;
const DEFAULT_IDEMPOTENCY_LEASE_SECS: u64 = 2 * 60;
const DEFAULT_DISCOVER_SCHEDULE_SECS: u64 = 60;
const DEFAULT_POLL_SCHEDULE_SECS: u64 = 60;
const DEFAULT_EVENT_SOURCE: &str = "/drover/engine";

/// Configuration for the workflow engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum intake rows claimed per discovery pass.
    pub intake_batch_size: usize,

    /// Maximum due projections scheduled per poll-scheduler pass.
    pub poll_batch_size: usize,

    /// How long a claimed intake row is leased before discovery may reclaim
    /// it.
    pub lease_duration: Duration,

    /// Interval between polls of the external service for one job.
    pub poll_interval: Duration,

    /// Maximum number of submission attempts per work item.
    pub max_submit_attempts: u32,

    /// How long an idempotency lease is held before another worker may take
    /// it over.
    pub idempotency_lease_duration: Duration,

    /// Timer schedule for the discovery pass.
    pub discover_schedule: StdDuration,

    /// Timer schedule for the poll-scheduler pass.
    pub poll_schedule: StdDuration,

    /// Stable URI stamped as the `source` of published integration events.
    pub event_source: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            intake_batch_size: DEFAULT_INTAKE_BATCH_SIZE,
            poll_batch_size: DEFAULT_POLL_BATCH_SIZE,
            lease_duration: Duration::minutes(30),
            poll_interval: Duration::minutes(5),
            max_submit_attempts: DEFAULT_MAX_SUBMIT_ATTEMPTS,
            idempotency_lease_duration: Duration::minutes(2),
            discover_schedule: StdDuration::from_secs(DEFAULT_DISCOVER_SCHEDULE_SECS),
            poll_schedule: StdDuration::from_secs(DEFAULT_POLL_SCHEDULE_SECS),
            event_source: DEFAULT_EVENT_SOURCE.to_string(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from process environment variables.
    ///
    /// Supported env vars:
    /// - `DROVER_INTAKE_BATCH_SIZE`
    /// - `DROVER_POLL_BATCH_SIZE`
    /// - `DROVER_LEASE_DURATION_SECS`
    /// - `DROVER_POLL_INTERVAL_SECS`
    /// - `DROVER_MAX_SUBMIT_ATTEMPTS`
    /// - `DROVER_IDEMPOTENCY_LEASE_SECS`
    /// - `DROVER_DISCOVER_SCHEDULE_SECS`
    /// - `DROVER_POLL_SCHEDULE_SECS`
    /// - `DROVER_EVENT_SOURCE`
    ///
    /// # Errors
    ///
    /// Returns a configuration error when an environment value is present
    /// but is not a positive integer (or, for the event source, is blank).
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads configuration with a custom environment source.
    ///
    /// This entry point is test-friendly and accepts a key lookup function.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when an environment value is present
    /// but invalid.
    pub fn from_env_with<F>(get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let intake_batch_size = parse_positive_u64_env(
            &get_env,
            ENV_INTAKE_BATCH_SIZE,
            DEFAULT_INTAKE_BATCH_SIZE as u64,
        )?;
        let poll_batch_size = parse_positive_u64_env(
            &get_env,
            ENV_POLL_BATCH_SIZE,
            DEFAULT_POLL_BATCH_SIZE as u64,
        )?;
        let lease_duration_secs = parse_positive_u64_env(
            &get_env,
            ENV_LEASE_DURATION_SECS,
            DEFAULT_LEASE_DURATION_SECS,
        )?;
        let poll_interval_secs =
            parse_positive_u64_env(&get_env, ENV_POLL_INTERVAL_SECS, DEFAULT_POLL_INTERVAL_SECS)?;
        let max_submit_attempts = parse_positive_u64_env(
            &get_env,
            ENV_MAX_SUBMIT_ATTEMPTS,
            u64::from(DEFAULT_MAX_SUBMIT_ATTEMPTS),
        )?;
        let idempotency_lease_secs = parse_positive_u64_env(
            &get_env,
            ENV_IDEMPOTENCY_LEASE_SECS,
            DEFAULT_IDEMPOTENCY_LEASE_SECS,
        )?;
        let discover_schedule_secs = parse_positive_u64_env(
            &get_env,
            ENV_DISCOVER_SCHEDULE_SECS,
            DEFAULT_DISCOVER_SCHEDULE_SECS,
        )?;
        let poll_schedule_secs =
            parse_positive_u64_env(&get_env, ENV_POLL_SCHEDULE_SECS, DEFAULT_POLL_SCHEDULE_SECS)?;

        let event_source = match get_env(ENV_EVENT_SOURCE) {
            Some(value) if value.trim().is_empty() => {
                return Err(Error::configuration(format!(
                    "{ENV_EVENT_SOURCE} must not be blank"
                )));
            }
            Some(value) => value.trim().to_string(),
            None => defaults.event_source,
        };

        Ok(Self {
            intake_batch_size: usize::try_from(intake_batch_size).map_err(|_| {
                Error::configuration(format!(
                    "{ENV_INTAKE_BATCH_SIZE} value {intake_batch_size} exceeds supported range"
                ))
            })?,
            poll_batch_size: usize::try_from(poll_batch_size).map_err(|_| {
                Error::configuration(format!(
                    "{ENV_POLL_BATCH_SIZE} value {poll_batch_size} exceeds supported range"
                ))
            })?,
            lease_duration: seconds_env(ENV_LEASE_DURATION_SECS, lease_duration_secs)?,
            poll_interval: seconds_env(ENV_POLL_INTERVAL_SECS, poll_interval_secs)?,
            max_submit_attempts: u32::try_from(max_submit_attempts).map_err(|_| {
                Error::configuration(format!(
                    "{ENV_MAX_SUBMIT_ATTEMPTS} value {max_submit_attempts} exceeds supported range"
                ))
            })?,
            idempotency_lease_duration: seconds_env(
                ENV_IDEMPOTENCY_LEASE_SECS,
                idempotency_lease_secs,
            )?,
            discover_schedule: StdDuration::from_secs(discover_schedule_secs),
            poll_schedule: StdDuration::from_secs(poll_schedule_secs),
            event_source,
        })
    }
}

fn seconds_env(key: &str, secs: u64) -> Result<Duration> {
    i64::try_from(secs)
        .map(Duration::seconds)
        .map_err(|_| Error::configuration(format!("{key} value {secs} exceeds supported range")))
}

fn parse_positive_u64_env<F>(get_env: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(default);
    };

    let parsed = raw.trim().parse::<u64>().map_err(|_| {
        Error::configuration(format!("{key} must be a positive integer, got '{raw}'"))
    })?;
    if parsed == 0 {
        return Err(Error::configuration(format!(
            "{key} must be greater than zero"
        )));
    }
    Ok(parsed)
}

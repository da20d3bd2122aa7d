//! Simulation time.
//!
//! The simulation clock is shared by every manager and component. It is a
//! cheap cloneable handle over one mutex-guarded `(now, step)` pair.
//!
//! Time-like lookup coordinates use *fractional years*:
//! `year + day_of_year / 365.25`.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use crate::error::{ConfigurationError, SimError, SimResult};

/// Days per year used for fractional-year coordinates.
pub const DAYS_PER_YEAR: f64 = 365.25;

/// Days per year used when rescaling yearly rates to a time step.
pub const RATE_DAYS_PER_YEAR: f64 = 365.0;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Converts a timestamp into fractional-year units.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use microsim::time::fractional_year;
///
/// let t = Utc.with_ymd_and_hms(2005, 7, 1, 0, 0, 0).unwrap();
/// let y = fractional_year(t);
/// assert!(y > 2005.49 && y < 2005.51);
/// ```
#[must_use]
pub fn fractional_year(time: DateTime<Utc>) -> f64 {
    f64::from(time.year()) + f64::from(time.ordinal()) / DAYS_PER_YEAR
}

/// Length of a duration in (possibly fractional) days.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn duration_days(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / MILLIS_PER_DAY
}

/// Rescales a yearly rate to the given time step.
#[must_use]
pub fn from_yearly(rate: f64, step: Duration) -> f64 {
    rate * duration_days(step) / RATE_DAYS_PER_YEAR
}

/// Rescales a per-step rate to a yearly rate.
#[must_use]
pub fn to_yearly(rate: f64, step: Duration) -> f64 {
    let days = duration_days(step);
    if days == 0.0 {
        return 0.0;
    }
    rate * RATE_DAYS_PER_YEAR / days
}

/// Builds a step duration from a (possibly fractional) number of days.
///
/// # Errors
///
/// Returns `ConfigurationError::Invalid` if `days` is not a positive finite
/// number, rounds to less than a millisecond, or does not fit a duration.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn step_from_days(days: f64) -> Result<Duration, ConfigurationError> {
    let invalid = || ConfigurationError::Invalid {
        reason: format!("time step must be a positive number of days, got {days}"),
    };
    if !days.is_finite() || days <= 0.0 {
        return Err(invalid());
    }
    let millis = (days * MILLIS_PER_DAY).round();
    if !(1.0..i64::MAX as f64).contains(&millis) {
        return Err(invalid());
    }
    Ok(Duration::milliseconds(millis as i64))
}

/// `time + step`, if representable.
///
/// # Errors
///
/// Returns `ConfigurationError::Invalid` when the sum leaves the range of
/// representable timestamps.
pub fn checked_step(time: DateTime<Utc>, step: Duration) -> Result<DateTime<Utc>, ConfigurationError> {
    time.checked_add_signed(step)
        .ok_or_else(|| ConfigurationError::Invalid {
            reason: format!(
                "a step of {} days from {time} is out of range",
                duration_days(step)
            ),
        })
}

/// Midyear anchor (June 1st, midnight UTC) used for simulation start and stop.
///
/// # Errors
///
/// Returns `ConfigurationError::Invalid` if the year cannot be represented.
pub fn midyear(year: i32) -> Result<DateTime<Utc>, ConfigurationError> {
    NaiveDate::from_ymd_opt(year, 6, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| ConfigurationError::Invalid {
            reason: format!("year {year} is out of range"),
        })
}

#[derive(Debug, Clone, Copy)]
struct ClockState {
    now: DateTime<Utc>,
    step: Duration,
}

/// Shared simulation clock.
///
/// Clones observe the same time. Only the orchestrator advances it.
#[derive(Debug, Clone)]
pub struct Clock {
    state: Arc<Mutex<ClockState>>,
}

impl Clock {
    /// Creates a clock at `start` advancing by `step`.
    #[must_use]
    pub fn new(start: DateTime<Utc>, step: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState { now: start, step })),
        }
    }

    // The state is plain `Copy` data, so a poisoned lock still holds a
    // consistent value.
    fn state(&self) -> MutexGuard<'_, ClockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// The current simulation time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.state().now
    }

    /// The current step size.
    #[must_use]
    pub fn step(&self) -> Duration {
        self.state().step
    }

    /// The current time in fractional years.
    #[must_use]
    pub fn fractional_year(&self) -> f64 {
        fractional_year(self.now())
    }

    /// Moves the clock to `time`.
    pub fn set_time(&self, time: DateTime<Utc>) {
        self.state().now = time;
    }

    /// Changes the step size.
    pub fn set_step(&self, step: Duration) {
        self.state().step = step;
    }

    /// Advances the clock by one step and returns the new time.
    ///
    /// # Errors
    ///
    /// `ClockOverflow` if the next time is not representable. The clock is
    /// left where it was.
    pub fn advance(&self) -> SimResult<DateTime<Utc>> {
        let mut state = self.state();
        let next = state
            .now
            .checked_add_signed(state.step)
            .ok_or_else(|| SimError::ClockOverflow {
                time: state.now.to_string(),
                step_days: duration_days(state.step),
            })?;
        state.now = next;
        Ok(next)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(DateTime::UNIX_EPOCH, Duration::days(1))
    }
}

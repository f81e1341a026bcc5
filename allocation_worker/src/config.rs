use std::env;

use chrono::{Duration, FixedOffset};
use log::*;
use tas_common::parse_boolean_flag;
use ticket_allocation_engine::Timekeeper;

const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;
const DEFAULT_RECLAIM_GRACE_HOURS: i64 = 168;
const DEFAULT_UTC_OFFSET_HOURS: i32 = 0;
const DEFAULT_PAYMENT_GRACE_HOURS: i64 = 1;

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Time between reclaim passes.
    pub tick_interval: std::time::Duration,
    /// How long after a release closes the reclaim loop keeps visiting it.
    pub reclaim_grace: Duration,
    /// Wall-clock locale used when payment deadlines are rounded to the hour.
    pub utc_offset_hours: i32,
    /// Extra time added to every computed payment deadline.
    pub payment_grace: Duration,
    /// When false, releases that close without an allocation run are left for manual allocation.
    pub sweep_on_close: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_url: String::default(),
            tick_interval: std::time::Duration::from_secs(DEFAULT_TICK_INTERVAL_SECS),
            reclaim_grace: Duration::hours(DEFAULT_RECLAIM_GRACE_HOURS),
            utc_offset_hours: DEFAULT_UTC_OFFSET_HOURS,
            payment_grace: Duration::hours(DEFAULT_PAYMENT_GRACE_HOURS),
            sweep_on_close: true,
        }
    }
}

impl WorkerConfig {
    pub fn from_env_or_default() -> Self {
        let database_url = env::var("TAS_DATABASE_URL").unwrap_or_else(|_| {
            error!("🪛️ TAS_DATABASE_URL is not set. Defaulting to a temporary sqlite database.");
            "sqlite://data/ticket_store.db".to_string()
        });
        let tick_interval = std::time::Duration::from_secs(
            env_value("TAS_TICK_INTERVAL_SECS", DEFAULT_TICK_INTERVAL_SECS),
        );
        let reclaim_grace = Duration::hours(env_value("TAS_RECLAIM_GRACE_HOURS", DEFAULT_RECLAIM_GRACE_HOURS));
        let utc_offset_hours = env_value("TAS_UTC_OFFSET_HOURS", DEFAULT_UTC_OFFSET_HOURS);
        let payment_grace = Duration::hours(env_value("TAS_PAYMENT_GRACE_HOURS", DEFAULT_PAYMENT_GRACE_HOURS));
        let sweep_on_close = parse_boolean_flag(env::var("TAS_SWEEP_ON_CLOSE").ok(), true);
        Self { database_url, tick_interval, reclaim_grace, utc_offset_hours, payment_grace, sweep_on_close }
    }

    /// The timekeeper configured for this deployment's locale.
    pub fn timekeeper(&self) -> Timekeeper {
        let offset = FixedOffset::east_opt(self.utc_offset_hours * 3600).unwrap_or_else(|| {
            error!(
                "🪛️ {} is out of range for TAS_UTC_OFFSET_HOURS. Using UTC instead.",
                self.utc_offset_hours
            );
            FixedOffset::east_opt(0).expect("zero offset is valid")
        });
        Timekeeper::new(offset, self.payment_grace)
    }
}

fn env_value<T>(name: &str, default: T) -> T
where T: std::str::FromStr + std::fmt::Display + Copy, T::Err: std::fmt::Display {
    match env::var(name) {
        Ok(s) => s.parse::<T>().unwrap_or_else(|e| {
            error!("🪛️ {s} is not a valid value for {name}. {e} Using the default, {default}, instead.");
            default
        }),
        Err(_) => default,
    }
}

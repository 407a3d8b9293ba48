//! Client for Lennox S30/E30/S40/M30 thermostats, over the local LAN API or
//! the vendor cloud relay.

mod client;
mod config;
mod control;
mod diag;
mod diff;
mod endpoints;
mod error;
mod logger;
mod metrics;
mod observer;
mod protocol;
mod schedule;
mod system;
mod types;
mod zone;

pub use client::{S30Client, S30ClientBuilder};
pub use config::{Config, ConnectionConfig, ConnectionMode, LoggingConfig, PollingConfig};
pub use control::DEADBAND_C;
pub use diff::Scope;
pub use endpoints::CloudEndpoints;
pub use error::{Error, Result};
pub use logger::MessageLogMode;
pub use metrics::Metrics;
pub use observer::{Change, ChangeFilter};
pub use protocol::TARGET_LCC;
pub use schedule::{
    Period, Schedule, away_schedule_id, is_user_schedule, manual_schedule_id, override_schedule_id,
};
pub use system::{Alert, Descriptor, Equipment, Home, Parameter, System};
pub use types::*;
pub use zone::{ScheduleHold, SetpointLimits, Zone};

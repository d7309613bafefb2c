//! Test support utilities.
//!
//! Doubles and helpers shared by the daemon's integration tests and the
//! behavioural scenarios.

pub mod broker;
pub mod daemon;
pub mod env_guard;
pub mod logging;
pub mod timer;

pub use broker::{BrokerEvent, FakeBroker, PublishedMessage};
pub use daemon::{WORK_QUEUE, temp_config, write_job_file};
pub use logging::{LogCapture, capture_logs};
pub use timer::ScriptedTimer;

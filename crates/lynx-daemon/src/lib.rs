//! Lynx Daemon - Session orchestration
//!
//! Runs the mail client, sensor driver and credential store each on a
//! dedicated worker thread, and drives the login / registration / dashboard
//! state machine from their replies.

pub mod config;
pub mod console;
pub mod error;
pub mod maintenance;
pub mod messages;
pub mod orchestrator;
pub mod workers;

pub use config::{LynxConfig, MailConfig, SensorConfig};
pub use error::{DaemonError, Result};
pub use messages::{
    CheckOrigin, Event, MailCommand, MailReply, SensorCommand, SensorEvent, UiCommand, UiUpdate,
    VaultCommand, VaultReply,
};
pub use orchestrator::{Control, Orchestrator};
pub use workers::{
    spawn_mail_worker, spawn_sensor_worker, spawn_vault_worker, MailHandle, SensorHandle,
    Services, VaultHandle,
};

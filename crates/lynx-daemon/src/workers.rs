//! Service workers
//!
//! Each service runs on its own named OS thread and owns its state
//! exclusively. Commands arrive on an unbounded channel and are handled in
//! submission order; every outcome, including failures, goes back to the
//! orchestrator as an [`Event`]. A worker exits when its command channel
//! closes or the event channel is dropped.

use std::thread::{self, JoinHandle};

use lynx_mail::{MailClient, MailConnector};
use lynx_sensor::{Driver, LinkOpener, SensorError};
use lynx_vault::CredentialVault;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn, Span};

use crate::error::{DaemonError, Result};
use crate::messages::{
    Event, MailCommand, MailReply, SensorCommand, SensorEvent, VaultCommand, VaultReply,
};

/// Sender half of the mail worker's command channel
#[derive(Debug, Clone)]
pub struct MailHandle {
    tx: UnboundedSender<MailCommand>,
}

/// Sender half of the sensor worker's command channel
#[derive(Debug, Clone)]
pub struct SensorHandle {
    tx: UnboundedSender<SensorCommand>,
}

/// Sender half of the store worker's command channel
#[derive(Debug, Clone)]
pub struct VaultHandle {
    tx: UnboundedSender<VaultCommand>,
}

impl MailHandle {
    pub fn new(tx: UnboundedSender<MailCommand>) -> Self {
        Self { tx }
    }

    pub fn send(&self, command: MailCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| DaemonError::WorkerStopped("mail"))
    }
}

impl SensorHandle {
    pub fn new(tx: UnboundedSender<SensorCommand>) -> Self {
        Self { tx }
    }

    pub fn send(&self, command: SensorCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| DaemonError::WorkerStopped("sensor"))
    }
}

impl VaultHandle {
    pub fn new(tx: UnboundedSender<VaultCommand>) -> Self {
        Self { tx }
    }

    pub fn send(&self, command: VaultCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| DaemonError::WorkerStopped("store"))
    }
}

/// Handles to all three workers
#[derive(Debug, Clone)]
pub struct Services {
    pub mail: MailHandle,
    pub sensor: SensorHandle,
    pub vault: VaultHandle,
}

/// Start the mail worker
pub fn spawn_mail_worker<C>(
    mut client: MailClient<C>,
    events: UnboundedSender<Event>,
    span: Span,
) -> Result<(MailHandle, JoinHandle<()>)>
where
    C: MailConnector + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel();

    let join = thread::Builder::new()
        .name("lynx-mail".to_string())
        .spawn(move || {
            let _entered = span.enter();
            debug!("Mail worker started");

            while let Some(command) = rx.blocking_recv() {
                let delivered = match command {
                    MailCommand::CheckCredentials {
                        ticket,
                        credentials,
                    } => {
                        let valid = client.check_credentials(&credentials);
                        emit(&events, Event::Mail(MailReply::Auth { ticket, valid }))
                    }
                    MailCommand::FetchUnread { ticket } => {
                        let mut count = 0;
                        let mut delivered = true;
                        for message in client.fetch_unread() {
                            count += 1;
                            let reply = MailReply::Message { ticket, message };
                            delivered = emit(&events, Event::Mail(reply));
                            if !delivered {
                                break;
                            }
                        }
                        let done = MailReply::FetchDone { ticket, count };
                        delivered && emit(&events, Event::Mail(done))
                    }
                    MailCommand::Reset => {
                        client.reset();
                        true
                    }
                };
                if !delivered {
                    break;
                }
            }

            debug!("Mail worker stopped");
        })?;

    Ok((MailHandle::new(tx), join))
}

/// Start the sensor worker
pub fn spawn_sensor_worker<O>(
    mut driver: Driver<O>,
    events: UnboundedSender<Event>,
    span: Span,
) -> Result<(SensorHandle, JoinHandle<()>)>
where
    O: LinkOpener + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel();

    let join = thread::Builder::new()
        .name("lynx-sensor".to_string())
        .spawn(move || {
            let _entered = span.enter();
            debug!("Sensor worker started");

            while let Some(command) = rx.blocking_recv() {
                let event = run_sensor_command(&mut driver, command, &events);
                if !emit(&events, Event::Sensor(event)) {
                    break;
                }
            }

            driver.disconnect();
            debug!("Sensor worker stopped");
        })?;

    Ok((SensorHandle::new(tx), join))
}

fn run_sensor_command<O: LinkOpener>(
    driver: &mut Driver<O>,
    command: SensorCommand,
    events: &UnboundedSender<Event>,
) -> SensorEvent {
    match command {
        SensorCommand::Connect { delay } => {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            match driver.connect() {
                Ok(()) => SensorEvent::Connected,
                Err(e) => {
                    warn!("Connection attempt failed: {}", e);
                    SensorEvent::ConnectFailed {
                        message: e.to_string(),
                    }
                }
            }
        }
        SensorCommand::Scan { generation, token } => match driver.scan(&token) {
            Ok(outcome) => SensorEvent::ScanResult {
                generation,
                outcome,
            },
            Err(e) => operation_failed(generation, e),
        },
        SensorCommand::Enroll { generation, token } => {
            let stage_one = events.clone();
            let result = driver.enroll(&token, move || {
                emit(
                    &stage_one,
                    Event::Sensor(SensorEvent::StageOneComplete { generation }),
                );
            });
            match result {
                Ok(outcome) => SensorEvent::EnrollResult {
                    generation,
                    outcome,
                },
                Err(e) => operation_failed(generation, e),
            }
        }
        SensorCommand::ClearDatabase => match driver.clear_database() {
            Ok(()) => SensorEvent::DatabaseCleared,
            Err(e) => operation_failed(0, e),
        },
    }
}

fn operation_failed(generation: u64, e: SensorError) -> SensorEvent {
    match e {
        SensorError::CaptureTimeout => SensorEvent::TimedOut { generation },
        e => {
            error!("Sensor operation failed: {}", e);
            SensorEvent::DeviceError {
                message: e.to_string(),
            }
        }
    }
}

/// Start the credential store worker
pub fn spawn_vault_worker(
    mut vault: CredentialVault,
    events: UnboundedSender<Event>,
    span: Span,
) -> Result<(VaultHandle, JoinHandle<()>)> {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let join = thread::Builder::new()
        .name("lynx-vault".to_string())
        .spawn(move || {
            let _entered = span.enter();
            debug!("Store worker started");

            while let Some(command) = rx.blocking_recv() {
                let reply = match command {
                    VaultCommand::Add {
                        ticket,
                        credentials,
                        key,
                    } => match vault.add_credentials(&credentials, &key) {
                        Ok(()) => VaultReply::Added { ticket },
                        Err(e) => {
                            error!("Storing credentials failed: {}", e);
                            VaultReply::AddFailed {
                                ticket,
                                message: e.to_string(),
                            }
                        }
                    },
                    VaultCommand::Get { generation, key } => match vault.get_credentials(&key) {
                        Ok(credentials) => {
                            let found = if credentials.is_some() {
                                "matched"
                            } else {
                                "found nothing"
                            };
                            info!("Credential lookup {}", found);
                            VaultReply::Lookup {
                                generation,
                                credentials,
                            }
                        }
                        Err(e) => {
                            error!("Credential lookup failed: {}", e);
                            VaultReply::LookupFailed {
                                generation,
                                message: e.to_string(),
                            }
                        }
                    },
                };
                if !emit(&events, Event::Vault(reply)) {
                    break;
                }
            }

            debug!("Store worker stopped");
        })?;

    Ok((VaultHandle::new(tx), join))
}

/// Send an event; false once the orchestrator has gone away
fn emit(events: &UnboundedSender<Event>, event: Event) -> bool {
    events.send(event).is_ok()
}

//! Session orchestrator
//!
//! Owns the session phase and reacts to one [`Event`] at a time:
//!
//! ```text
//! LoggedOut(Login) <-> LoggedOut(Registration) -> Enrolling -> LoggedOut(Login)
//!        |                                                         ^
//!        +------------------------> LoggedIn ----------------------+
//! ```
//!
//! While on the login form the sensor is kept scanning. A match is looked up
//! in the store and the recovered credentials go through the same mail check
//! as a manual login. Every sensor command carries a generation number and a
//! fresh [`CancelToken`]; superseding a command cancels its token and bumps
//! the generation so any late reply is dropped.

use std::time::Duration;

use lynx_core::{Credentials, Form, SessionPhase};
use lynx_mail::Message;
use lynx_sensor::{CancelToken, ScanOutcome};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::messages::{
    CheckOrigin, Event, MailCommand, MailReply, SensorCommand, SensorEvent, UiCommand, UiUpdate,
    VaultCommand, VaultReply,
};
use crate::workers::Services;

/// Whether the event loop should keep going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
struct PendingCheck {
    ticket: u64,
    origin: CheckOrigin,
}

/// The controller
pub struct Orchestrator {
    services: Services,
    updates: UnboundedSender<UiUpdate>,
    reconnect_delay: Duration,

    phase: SessionPhase,
    next_ticket: u64,
    pending_check: Option<PendingCheck>,
    fetch_ticket: Option<u64>,

    /// Held from a valid registration check until the record is stored
    enrollment_credentials: Option<Credentials>,
    /// Ticket of the record write started by a successful enrollment
    store_ticket: Option<u64>,

    generation: u64,
    token: CancelToken,
    reconnect_pending: bool,

    inbox: Vec<Message>,
}

impl Orchestrator {
    pub fn new(
        services: Services,
        updates: UnboundedSender<UiUpdate>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            services,
            updates,
            reconnect_delay,
            phase: SessionPhase::default(),
            next_ticket: 0,
            pending_check: None,
            fetch_ticket: None,
            enrollment_credentials: None,
            store_ticket: None,
            generation: 0,
            token: CancelToken::new(),
            reconnect_pending: false,
            inbox: Vec::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Messages fetched for the dashboard
    pub fn inbox(&self) -> &[Message] {
        &self.inbox
    }

    /// Generation of the current sensor command
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Connect the sensor and start scanning on the login form
    pub fn start(&mut self) -> Result<()> {
        info!("Starting session in phase: {}", self.phase);
        self.services.sensor.send(SensorCommand::Connect {
            delay: Duration::ZERO,
        })?;
        self.issue_scan()?;
        self.notify(UiUpdate::PhaseChanged(self.phase));
        Ok(())
    }

    /// Drain `events` until shutdown or until every sender is gone
    pub async fn run(mut self, mut events: UnboundedReceiver<Event>) -> Result<()> {
        self.start()?;

        while let Some(event) = events.recv().await {
            if self.handle(event)? == Control::Shutdown {
                break;
            }
        }

        self.cancel_sensor();
        info!("Session ended");
        Ok(())
    }

    /// React to one event
    pub fn handle(&mut self, event: Event) -> Result<Control> {
        match event {
            Event::Ui(command) => return self.on_ui(command),
            Event::Mail(reply) => self.on_mail(reply)?,
            Event::Sensor(event) => self.on_sensor(event)?,
            Event::Vault(reply) => self.on_vault(reply)?,
        }
        Ok(Control::Continue)
    }

    fn on_ui(&mut self, command: UiCommand) -> Result<Control> {
        match (command, self.phase) {
            (UiCommand::SubmitLogin(credentials), SessionPhase::LoggedOut(Form::Login)) => {
                let superseded = self.pending_check.map(|p| p.origin);
                self.check_credentials(credentials, CheckOrigin::ManualLogin)?;
                if superseded == Some(CheckOrigin::Biometric) {
                    // The biometric chain was waiting on the dropped check
                    self.issue_scan()?;
                }
            }
            (UiCommand::OpenRegistration, SessionPhase::LoggedOut(Form::Login)) => {
                self.cancel_sensor();
                self.pending_check = None;
                self.set_phase(SessionPhase::LoggedOut(Form::Registration));
            }
            (UiCommand::OpenLogin, SessionPhase::LoggedOut(Form::Registration)) => {
                self.pending_check = None;
                self.enrollment_credentials = None;
                self.set_phase(SessionPhase::LoggedOut(Form::Login));
                self.issue_scan()?;
            }
            (UiCommand::OpenLogin, SessionPhase::Enrolling) => {
                info!("Enrollment abandoned");
                self.enrollment_credentials = None;
                self.store_ticket = None;
                self.set_phase(SessionPhase::LoggedOut(Form::Login));
                // Cancels the running enrollment
                self.issue_scan()?;
            }
            (
                UiCommand::SubmitRegistration(credentials),
                SessionPhase::LoggedOut(Form::Registration),
            ) => {
                self.enrollment_credentials = Some(credentials.clone());
                self.check_credentials(credentials, CheckOrigin::Registration)?;
            }
            (UiCommand::Logout, SessionPhase::LoggedIn) => {
                info!("Logging out");
                self.services.mail.send(MailCommand::Reset)?;
                self.inbox.clear();
                self.fetch_ticket = None;
                self.set_phase(SessionPhase::LoggedOut(Form::Login));
                self.issue_scan()?;
            }
            (UiCommand::Shutdown, _) => {
                info!("Shutdown requested");
                self.cancel_sensor();
                return Ok(Control::Shutdown);
            }
            (command, phase) => {
                warn!("Ignoring {:?} in phase {}", command, phase);
            }
        }
        Ok(Control::Continue)
    }

    fn on_mail(&mut self, reply: MailReply) -> Result<()> {
        match reply {
            MailReply::Auth { ticket, valid } => {
                let Some(pending) = self.pending_check.filter(|p| p.ticket == ticket) else {
                    debug!("Dropping stale credential check reply {}", ticket);
                    return Ok(());
                };
                self.pending_check = None;
                self.on_check_result(pending.origin, valid)?;
            }
            MailReply::Message { ticket, message } => {
                if self.phase == SessionPhase::LoggedIn && self.fetch_ticket == Some(ticket) {
                    self.inbox.push(message.clone());
                    self.notify(UiUpdate::NewMail(message));
                }
            }
            MailReply::FetchDone { ticket, count } => {
                if self.fetch_ticket == Some(ticket) {
                    info!("Fetched {} messages", count);
                }
            }
        }
        Ok(())
    }

    fn on_check_result(&mut self, origin: CheckOrigin, valid: bool) -> Result<()> {
        match (origin, valid) {
            (CheckOrigin::ManualLogin | CheckOrigin::Biometric, true) => {
                info!("Credentials accepted, logging in");
                self.cancel_sensor();
                self.set_phase(SessionPhase::LoggedIn);
                let ticket = self.take_ticket();
                self.fetch_ticket = Some(ticket);
                self.services.mail.send(MailCommand::FetchUnread { ticket })?;
            }
            (CheckOrigin::ManualLogin, false) => {
                self.notify(UiUpdate::InvalidCredentials);
            }
            (CheckOrigin::Biometric, false) => {
                warn!("Stored credentials for this fingerprint were rejected");
                self.notify(UiUpdate::InvalidCredentials);
                self.issue_scan()?;
            }
            (CheckOrigin::Registration, true) => {
                info!("Credentials accepted, starting enrollment");
                self.services.mail.send(MailCommand::Reset)?;
                self.set_phase(SessionPhase::Enrolling);
                self.issue_enroll()?;
            }
            (CheckOrigin::Registration, false) => {
                self.enrollment_credentials = None;
                self.notify(UiUpdate::InvalidCredentials);
            }
        }
        Ok(())
    }

    fn on_sensor(&mut self, event: SensorEvent) -> Result<()> {
        match event {
            SensorEvent::Connected => {
                if self.reconnect_pending {
                    info!("Sensor reconnected");
                    self.reconnect_pending = false;
                    self.rearm()?;
                }
            }
            SensorEvent::ConnectFailed { message } => {
                self.notify(UiUpdate::DeviceFault(message));
                self.request_reconnect()?;
            }
            SensorEvent::DeviceError { message } => {
                self.notify(UiUpdate::DeviceFault(message));
                // The failed operation is gone; nothing it sent later is current
                self.cancel_sensor();
                if !self.reconnect_pending {
                    self.request_reconnect()?;
                }
            }
            SensorEvent::ScanResult {
                generation,
                outcome,
            } => {
                if !self.is_current(generation, SessionPhase::LoggedOut(Form::Login)) {
                    debug!("Dropping stale scan result (generation {})", generation);
                    return Ok(());
                }
                match outcome {
                    ScanOutcome::Matched(key) => {
                        debug!("Fingerprint matched, looking up credentials");
                        self.services.vault.send(VaultCommand::Get { generation, key })?;
                    }
                    ScanOutcome::NoMatch => self.issue_scan()?,
                }
            }
            SensorEvent::StageOneComplete { generation } => {
                if self.is_current(generation, SessionPhase::Enrolling) {
                    self.notify(UiUpdate::ScanAgain);
                }
            }
            SensorEvent::EnrollResult {
                generation,
                outcome,
            } => {
                if !self.is_current(generation, SessionPhase::Enrolling) {
                    debug!("Dropping stale enrollment result (generation {})", generation);
                    return Ok(());
                }
                match outcome {
                    ScanOutcome::Matched(key) => match self.enrollment_credentials.clone() {
                        Some(credentials) => {
                            let ticket = self.take_ticket();
                            self.store_ticket = Some(ticket);
                            self.services.vault.send(VaultCommand::Add {
                                ticket,
                                credentials,
                                key,
                            })?;
                        }
                        None => {
                            warn!("Enrollment finished without pending credentials");
                            self.set_phase(SessionPhase::LoggedOut(Form::Registration));
                        }
                    },
                    ScanOutcome::NoMatch => {
                        self.notify(UiUpdate::EnrollmentRetry);
                        self.issue_enroll()?;
                    }
                }
            }
            SensorEvent::TimedOut { generation } => {
                if generation == self.generation {
                    debug!("No finger presented in time, trying again");
                    self.rearm()?;
                }
            }
            SensorEvent::DatabaseCleared => {
                info!("Sensor template database cleared");
            }
        }
        Ok(())
    }

    fn on_vault(&mut self, reply: VaultReply) -> Result<()> {
        match reply {
            VaultReply::Added { ticket } => {
                if !self.is_storing(ticket) {
                    debug!("Dropping stale store reply {}", ticket);
                    return Ok(());
                }
                info!("Enrollment complete");
                self.store_ticket = None;
                self.enrollment_credentials = None;
                self.notify(UiUpdate::EnrollmentComplete);
                self.set_phase(SessionPhase::LoggedOut(Form::Login));
                self.issue_scan()?;
            }
            VaultReply::AddFailed { ticket, message } => {
                if !self.is_storing(ticket) {
                    warn!("Abandoned record write {} failed: {}", ticket, message);
                    return Ok(());
                }
                self.notify(UiUpdate::StorageFailure(message));
                self.store_ticket = None;
                self.enrollment_credentials = None;
                self.set_phase(SessionPhase::LoggedOut(Form::Registration));
            }
            VaultReply::Lookup {
                generation,
                credentials,
            } => {
                if !self.is_current(generation, SessionPhase::LoggedOut(Form::Login)) {
                    return Ok(());
                }
                match credentials {
                    Some(credentials) if self.pending_check.is_none() => {
                        self.check_credentials(credentials, CheckOrigin::Biometric)?;
                    }
                    Some(_) => {
                        debug!("Manual login in progress, ignoring fingerprint match");
                        self.issue_scan()?;
                    }
                    None => {
                        debug!("No stored credentials for this fingerprint");
                        self.issue_scan()?;
                    }
                }
            }
            VaultReply::LookupFailed {
                generation,
                message,
            } => {
                if !self.is_current(generation, SessionPhase::LoggedOut(Form::Login)) {
                    warn!("Stale credential lookup failed: {}", message);
                    return Ok(());
                }
                self.notify(UiUpdate::StorageFailure(message));
                if self.pending_check.is_none() {
                    self.issue_scan()?;
                }
            }
        }
        Ok(())
    }

    fn check_credentials(&mut self, credentials: Credentials, origin: CheckOrigin) -> Result<()> {
        let ticket = self.take_ticket();
        debug!("Checking credentials for {} ({:?})", credentials.email(), origin);
        self.pending_check = Some(PendingCheck { ticket, origin });
        self.services.mail.send(MailCommand::CheckCredentials {
            ticket,
            credentials,
        })
    }

    /// Restart whatever the sensor should be doing in the current phase
    fn rearm(&mut self) -> Result<()> {
        match self.phase {
            SessionPhase::LoggedOut(Form::Login) if self.pending_check.is_none() => {
                self.issue_scan()
            }
            SessionPhase::Enrolling if self.store_ticket.is_none() => self.issue_enroll(),
            _ => Ok(()),
        }
    }

    fn issue_scan(&mut self) -> Result<()> {
        let token = self.fresh_token();
        debug!("Issuing scan (generation {})", self.generation);
        self.services.sensor.send(SensorCommand::Scan {
            generation: self.generation,
            token,
        })
    }

    fn issue_enroll(&mut self) -> Result<()> {
        let token = self.fresh_token();
        debug!("Issuing enrollment (generation {})", self.generation);
        self.services.sensor.send(SensorCommand::Enroll {
            generation: self.generation,
            token,
        })
    }

    fn request_reconnect(&mut self) -> Result<()> {
        self.reconnect_pending = true;
        self.services.sensor.send(SensorCommand::Connect {
            delay: self.reconnect_delay,
        })
    }

    /// Cancel the in-flight sensor command and invalidate its replies
    fn cancel_sensor(&mut self) {
        self.token.cancel();
        self.generation += 1;
    }

    fn fresh_token(&mut self) -> CancelToken {
        self.cancel_sensor();
        self.token = CancelToken::new();
        self.token.clone()
    }

    fn is_current(&self, generation: u64, phase: SessionPhase) -> bool {
        generation == self.generation && self.phase == phase
    }

    fn is_storing(&self, ticket: u64) -> bool {
        self.phase == SessionPhase::Enrolling && self.store_ticket == Some(ticket)
    }

    fn take_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            info!("Phase: {} -> {}", self.phase, phase);
            self.phase = phase;
            self.notify(UiUpdate::PhaseChanged(phase));
        }
    }

    fn notify(&self, update: UiUpdate) {
        if self.updates.send(update).is_err() {
            debug!("Front end is gone; dropping update");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::{MailHandle, SensorHandle, VaultHandle};
    use lynx_core::BiometricKey;
    use tokio::sync::mpsc::{self, error::TryRecvError};

    struct Harness {
        orchestrator: Orchestrator,
        mail: UnboundedReceiver<MailCommand>,
        sensor: UnboundedReceiver<SensorCommand>,
        vault: UnboundedReceiver<VaultCommand>,
        updates: UnboundedReceiver<UiUpdate>,
    }

    impl Harness {
        fn new() -> Self {
            let (mail_tx, mail) = mpsc::unbounded_channel();
            let (sensor_tx, sensor) = mpsc::unbounded_channel();
            let (vault_tx, vault) = mpsc::unbounded_channel();
            let (updates_tx, updates) = mpsc::unbounded_channel();
            let services = Services {
                mail: MailHandle::new(mail_tx),
                sensor: SensorHandle::new(sensor_tx),
                vault: VaultHandle::new(vault_tx),
            };
            Self {
                orchestrator: Orchestrator::new(services, updates_tx, Duration::from_millis(5)),
                mail,
                sensor,
                vault,
                updates,
            }
        }

        /// Started, with the startup connect and scan already drained
        fn started() -> (Self, u64, CancelToken) {
            let mut h = Self::new();
            h.orchestrator.start().unwrap();
            assert!(matches!(h.sensor.try_recv(), Ok(SensorCommand::Connect { .. })));
            let (generation, token) = h.expect_scan();
            h.drain_updates();
            (h, generation, token)
        }

        fn send(&mut self, event: Event) -> Control {
            self.orchestrator.handle(event).unwrap()
        }

        fn ui(&mut self, command: UiCommand) -> Control {
            self.send(Event::Ui(command))
        }

        fn expect_scan(&mut self) -> (u64, CancelToken) {
            match self.sensor.try_recv() {
                Ok(SensorCommand::Scan { generation, token }) => (generation, token),
                other => panic!("expected scan, got {:?}", other),
            }
        }

        fn expect_enroll(&mut self) -> (u64, CancelToken) {
            match self.sensor.try_recv() {
                Ok(SensorCommand::Enroll { generation, token }) => (generation, token),
                other => panic!("expected enroll, got {:?}", other),
            }
        }

        fn expect_check(&mut self) -> (u64, Credentials) {
            match self.mail.try_recv() {
                Ok(MailCommand::CheckCredentials {
                    ticket,
                    credentials,
                }) => (ticket, credentials),
                other => panic!("expected credential check, got {:?}", other),
            }
        }

        fn expect_add(&mut self) -> u64 {
            match self.vault.try_recv() {
                Ok(VaultCommand::Add { ticket, .. }) => ticket,
                other => panic!("expected add, got {:?}", other),
            }
        }

        fn drain_updates(&mut self) -> Vec<UiUpdate> {
            let mut out = Vec::new();
            while let Ok(update) = self.updates.try_recv() {
                out.push(update);
            }
            out
        }

        fn no_sensor_command(&mut self) {
            assert!(matches!(self.sensor.try_recv(), Err(TryRecvError::Empty)));
        }
    }

    fn creds(email: &str, secret: &str) -> Credentials {
        Credentials::new(email, secret)
    }

    fn key(seed: u8) -> BiometricKey {
        BiometricKey::from_characteristics(&[seed; 16])
    }

    fn auth(ticket: u64, valid: bool) -> Event {
        Event::Mail(MailReply::Auth { ticket, valid })
    }

    #[test]
    fn test_start_connects_then_scans() {
        let mut h = Harness::new();
        h.orchestrator.start().unwrap();

        assert!(matches!(
            h.sensor.try_recv(),
            Ok(SensorCommand::Connect { delay }) if delay.is_zero()
        ));
        h.expect_scan();
        assert!(matches!(
            h.drain_updates().as_slice(),
            [UiUpdate::PhaseChanged(SessionPhase::LoggedOut(Form::Login))]
        ));
    }

    #[test]
    fn test_manual_login_fetches_once() {
        let (mut h, _, token) = Harness::started();

        h.ui(UiCommand::SubmitLogin(creds("a@x.com", "secret1")));
        let (ticket, sent) = h.expect_check();
        assert_eq!(sent.email(), "a@x.com");

        h.send(auth(ticket, true));
        assert_eq!(h.orchestrator.phase(), SessionPhase::LoggedIn);
        assert!(token.is_cancelled());
        assert!(matches!(h.mail.try_recv(), Ok(MailCommand::FetchUnread { .. })));
        assert!(matches!(h.mail.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_invalid_manual_login_stays_put() {
        let (mut h, _, token) = Harness::started();

        h.ui(UiCommand::SubmitLogin(creds("a@x.com", "wrong")));
        let (ticket, _) = h.expect_check();
        h.send(auth(ticket, false));

        assert_eq!(h.orchestrator.phase(), SessionPhase::LoggedOut(Form::Login));
        assert!(matches!(h.drain_updates().as_slice(), [UiUpdate::InvalidCredentials]));
        assert!(!token.is_cancelled());
        h.no_sensor_command();
    }

    #[test]
    fn test_biometric_login_chain() {
        let (mut h, generation, _) = Harness::started();

        h.send(Event::Sensor(SensorEvent::ScanResult {
            generation,
            outcome: ScanOutcome::Matched(key(1)),
        }));
        let lookup_generation = match h.vault.try_recv() {
            Ok(VaultCommand::Get { generation, key: k }) => {
                assert_eq!(k, key(1));
                generation
            }
            other => panic!("expected lookup, got {:?}", other),
        };

        h.send(Event::Vault(VaultReply::Lookup {
            generation: lookup_generation,
            credentials: Some(creds("b@y.com", "secret2")),
        }));
        let (ticket, sent) = h.expect_check();
        assert_eq!(sent, creds("b@y.com", "secret2"));

        h.send(auth(ticket, true));
        assert_eq!(h.orchestrator.phase(), SessionPhase::LoggedIn);
    }

    #[test]
    fn test_no_match_and_unknown_key_keep_polling() {
        let (mut h, generation, _) = Harness::started();

        h.send(Event::Sensor(SensorEvent::ScanResult {
            generation,
            outcome: ScanOutcome::NoMatch,
        }));
        let (generation, _) = h.expect_scan();

        h.send(Event::Sensor(SensorEvent::ScanResult {
            generation,
            outcome: ScanOutcome::Matched(key(2)),
        }));
        assert!(h.vault.try_recv().is_ok());
        h.send(Event::Vault(VaultReply::Lookup {
            generation,
            credentials: None,
        }));
        h.expect_scan();
        assert!(matches!(h.mail.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_rejected_biometric_credentials_resume_scanning() {
        let (mut h, generation, _) = Harness::started();

        h.send(Event::Sensor(SensorEvent::ScanResult {
            generation,
            outcome: ScanOutcome::Matched(key(1)),
        }));
        h.send(Event::Vault(VaultReply::Lookup {
            generation,
            credentials: Some(creds("b@y.com", "old")),
        }));
        let (ticket, _) = h.expect_check();

        h.send(auth(ticket, false));
        assert_eq!(h.orchestrator.phase(), SessionPhase::LoggedOut(Form::Login));
        h.expect_scan();
    }

    #[test]
    fn test_open_registration_cancels_scan_and_drops_late_result() {
        let (mut h, generation, token) = Harness::started();

        h.ui(UiCommand::OpenRegistration);
        assert!(token.is_cancelled());
        assert_eq!(
            h.orchestrator.phase(),
            SessionPhase::LoggedOut(Form::Registration)
        );

        h.send(Event::Sensor(SensorEvent::ScanResult {
            generation,
            outcome: ScanOutcome::Matched(key(1)),
        }));
        assert!(matches!(h.vault.try_recv(), Err(TryRecvError::Empty)));
        h.no_sensor_command();
    }

    #[test]
    fn test_registration_flow() {
        let (mut h, _, _) = Harness::started();
        h.ui(UiCommand::OpenRegistration);
        h.ui(UiCommand::SubmitRegistration(creds("b@y.com", "secret2")));
        let (ticket, _) = h.expect_check();

        h.send(auth(ticket, true));
        assert_eq!(h.orchestrator.phase(), SessionPhase::Enrolling);
        assert!(matches!(h.mail.try_recv(), Ok(MailCommand::Reset)));
        let (generation, token) = h.expect_enroll();
        assert!(!token.is_cancelled());
        h.drain_updates();

        h.send(Event::Sensor(SensorEvent::StageOneComplete { generation }));
        assert!(matches!(h.drain_updates().as_slice(), [UiUpdate::ScanAgain]));

        h.send(Event::Sensor(SensorEvent::EnrollResult {
            generation,
            outcome: ScanOutcome::Matched(key(3)),
        }));
        let ticket = match h.vault.try_recv() {
            Ok(VaultCommand::Add {
                ticket,
                credentials,
                key: k,
            }) => {
                assert_eq!(credentials, creds("b@y.com", "secret2"));
                assert_eq!(k, key(3));
                ticket
            }
            other => panic!("expected add, got {:?}", other),
        };

        // A reply for some other write changes nothing
        h.send(Event::Vault(VaultReply::Added { ticket: ticket + 100 }));
        assert_eq!(h.orchestrator.phase(), SessionPhase::Enrolling);

        h.send(Event::Vault(VaultReply::Added { ticket }));
        assert_eq!(h.orchestrator.phase(), SessionPhase::LoggedOut(Form::Login));
        let updates = h.drain_updates();
        assert!(matches!(updates.first(), Some(UiUpdate::EnrollmentComplete)));
        h.expect_scan();
    }

    #[test]
    fn test_invalid_registration_stays_on_form() {
        let (mut h, _, _) = Harness::started();
        h.ui(UiCommand::OpenRegistration);
        h.ui(UiCommand::SubmitRegistration(creds("b@y.com", "bad")));
        let (ticket, _) = h.expect_check();
        h.drain_updates();

        h.send(auth(ticket, false));
        assert_eq!(
            h.orchestrator.phase(),
            SessionPhase::LoggedOut(Form::Registration)
        );
        assert!(matches!(h.drain_updates().as_slice(), [UiUpdate::InvalidCredentials]));
        h.no_sensor_command();
    }

    #[test]
    fn test_enrollment_mismatch_retries() {
        let (mut h, _, _) = Harness::started();
        h.ui(UiCommand::OpenRegistration);
        h.ui(UiCommand::SubmitRegistration(creds("b@y.com", "secret2")));
        let (ticket, _) = h.expect_check();
        h.send(auth(ticket, true));
        let (generation, _) = h.expect_enroll();
        h.drain_updates();

        h.send(Event::Sensor(SensorEvent::EnrollResult {
            generation,
            outcome: ScanOutcome::NoMatch,
        }));
        assert_eq!(h.orchestrator.phase(), SessionPhase::Enrolling);
        assert!(matches!(h.drain_updates().as_slice(), [UiUpdate::EnrollmentRetry]));
        let (retry, _) = h.expect_enroll();
        assert!(retry > generation);
        assert!(matches!(h.vault.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_store_failure_during_enrollment_returns_to_form() {
        let (mut h, _, _) = Harness::started();
        h.ui(UiCommand::OpenRegistration);
        h.ui(UiCommand::SubmitRegistration(creds("b@y.com", "secret2")));
        let (ticket, _) = h.expect_check();
        h.send(auth(ticket, true));
        let (generation, _) = h.expect_enroll();
        h.send(Event::Sensor(SensorEvent::EnrollResult {
            generation,
            outcome: ScanOutcome::Matched(key(3)),
        }));
        let ticket = h.expect_add();
        h.drain_updates();

        h.send(Event::Vault(VaultReply::AddFailed {
            ticket,
            message: "disk full".to_string(),
        }));
        assert_eq!(
            h.orchestrator.phase(),
            SessionPhase::LoggedOut(Form::Registration)
        );
        assert!(matches!(
            h.drain_updates().first(),
            Some(UiUpdate::StorageFailure(_))
        ));
    }

    #[test]
    fn test_lookup_failure_is_not_taken_for_a_write_failure() {
        let (mut h, scan_generation, _) = Harness::started();

        // A lookup from the login form is still queued on the store worker
        h.send(Event::Sensor(SensorEvent::ScanResult {
            generation: scan_generation,
            outcome: ScanOutcome::Matched(key(1)),
        }));
        assert!(matches!(h.vault.try_recv(), Ok(VaultCommand::Get { .. })));

        h.ui(UiCommand::OpenRegistration);
        h.ui(UiCommand::SubmitRegistration(creds("b@y.com", "secret2")));
        let (ticket, _) = h.expect_check();
        h.send(auth(ticket, true));
        let (generation, _) = h.expect_enroll();
        h.send(Event::Sensor(SensorEvent::EnrollResult {
            generation,
            outcome: ScanOutcome::Matched(key(3)),
        }));
        let store_ticket = h.expect_add();
        h.drain_updates();

        h.send(Event::Vault(VaultReply::LookupFailed {
            generation: scan_generation,
            message: "record #1 damaged".to_string(),
        }));
        assert_eq!(h.orchestrator.phase(), SessionPhase::Enrolling);
        assert!(h.drain_updates().is_empty());
        h.no_sensor_command();

        h.send(Event::Vault(VaultReply::Added {
            ticket: store_ticket,
        }));
        assert_eq!(h.orchestrator.phase(), SessionPhase::LoggedOut(Form::Login));
        assert!(matches!(
            h.drain_updates().first(),
            Some(UiUpdate::EnrollmentComplete)
        ));
    }

    #[test]
    fn test_lookup_failure_resumes_scanning() {
        let (mut h, generation, _) = Harness::started();
        h.send(Event::Sensor(SensorEvent::ScanResult {
            generation,
            outcome: ScanOutcome::Matched(key(1)),
        }));
        assert!(matches!(h.vault.try_recv(), Ok(VaultCommand::Get { .. })));

        h.send(Event::Vault(VaultReply::LookupFailed {
            generation,
            message: "record #1 damaged".to_string(),
        }));
        assert!(matches!(
            h.drain_updates().as_slice(),
            [UiUpdate::StorageFailure(_)]
        ));
        let (next, _) = h.expect_scan();
        assert!(next > generation);
    }

    #[test]
    fn test_back_to_login_abandons_enrollment() {
        let (mut h, _, _) = Harness::started();
        h.ui(UiCommand::OpenRegistration);
        h.ui(UiCommand::SubmitRegistration(creds("b@y.com", "secret2")));
        let (ticket, _) = h.expect_check();
        h.send(auth(ticket, true));
        let (generation, token) = h.expect_enroll();
        h.drain_updates();

        h.ui(UiCommand::OpenLogin);
        assert_eq!(h.orchestrator.phase(), SessionPhase::LoggedOut(Form::Login));
        assert!(token.is_cancelled());
        let (scan_generation, scan_token) = h.expect_scan();
        assert!(scan_generation > generation);
        assert!(!scan_token.is_cancelled());

        // The cancelled enrollment reports late; nothing is stored
        h.send(Event::Sensor(SensorEvent::EnrollResult {
            generation,
            outcome: ScanOutcome::Matched(key(3)),
        }));
        assert!(matches!(h.vault.try_recv(), Err(TryRecvError::Empty)));
        assert!(matches!(
            h.drain_updates().as_slice(),
            [UiUpdate::PhaseChanged(SessionPhase::LoggedOut(Form::Login))]
        ));
    }

    #[test]
    fn test_back_to_login_while_storing_drops_the_reply() {
        let (mut h, _, _) = Harness::started();
        h.ui(UiCommand::OpenRegistration);
        h.ui(UiCommand::SubmitRegistration(creds("b@y.com", "secret2")));
        let (ticket, _) = h.expect_check();
        h.send(auth(ticket, true));
        let (generation, _) = h.expect_enroll();
        h.send(Event::Sensor(SensorEvent::EnrollResult {
            generation,
            outcome: ScanOutcome::Matched(key(3)),
        }));
        let store_ticket = h.expect_add();

        h.ui(UiCommand::OpenLogin);
        h.expect_scan();
        h.drain_updates();

        h.send(Event::Vault(VaultReply::AddFailed {
            ticket: store_ticket,
            message: "disk full".to_string(),
        }));
        assert_eq!(h.orchestrator.phase(), SessionPhase::LoggedOut(Form::Login));
        assert!(h.drain_updates().is_empty());
    }

    #[test]
    fn test_logout_resets_and_rescans() {
        let (mut h, _, _) = Harness::started();
        h.ui(UiCommand::SubmitLogin(creds("a@x.com", "secret1")));
        let (ticket, _) = h.expect_check();
        h.send(auth(ticket, true));
        let fetch = match h.mail.try_recv() {
            Ok(MailCommand::FetchUnread { ticket }) => ticket,
            other => panic!("expected fetch, got {:?}", other),
        };
        h.send(Event::Mail(MailReply::Message {
            ticket: fetch,
            message: Message::new(vec![("Subject".to_string(), "hi".to_string())]),
        }));
        assert_eq!(h.orchestrator.inbox().len(), 1);

        h.ui(UiCommand::Logout);
        assert!(matches!(h.mail.try_recv(), Ok(MailCommand::Reset)));
        assert!(h.orchestrator.inbox().is_empty());
        assert_eq!(h.orchestrator.phase(), SessionPhase::LoggedOut(Form::Login));
        h.expect_scan();

        // Late messages from the old fetch are ignored
        h.send(Event::Mail(MailReply::Message {
            ticket: fetch,
            message: Message::default(),
        }));
        assert!(h.orchestrator.inbox().is_empty());
    }

    #[test]
    fn test_device_error_reconnects_once_then_rearms() {
        let (mut h, _, token) = Harness::started();

        h.send(Event::Sensor(SensorEvent::DeviceError {
            message: "broken pipe".to_string(),
        }));
        assert!(token.is_cancelled());
        assert!(matches!(
            h.sensor.try_recv(),
            Ok(SensorCommand::Connect { delay }) if delay == Duration::from_millis(5)
        ));

        // A second fault while reconnecting does not queue another connect
        h.send(Event::Sensor(SensorEvent::DeviceError {
            message: "not connected".to_string(),
        }));
        h.no_sensor_command();

        h.send(Event::Sensor(SensorEvent::ConnectFailed {
            message: "no such port".to_string(),
        }));
        assert!(matches!(h.sensor.try_recv(), Ok(SensorCommand::Connect { .. })));

        h.send(Event::Sensor(SensorEvent::Connected));
        h.expect_scan();
        assert_eq!(h.orchestrator.phase(), SessionPhase::LoggedOut(Form::Login));
    }

    #[test]
    fn test_startup_connect_does_not_double_scan() {
        let (mut h, _, _) = Harness::started();
        h.send(Event::Sensor(SensorEvent::Connected));
        h.no_sensor_command();
    }

    #[test]
    fn test_timeout_reissues_current_operation() {
        let (mut h, generation, _) = Harness::started();
        h.send(Event::Sensor(SensorEvent::TimedOut { generation }));
        h.expect_scan();

        // A timeout from an older command is ignored
        h.send(Event::Sensor(SensorEvent::TimedOut { generation }));
        h.no_sensor_command();
    }

    #[test]
    fn test_stale_auth_reply_is_dropped() {
        let (mut h, _, _) = Harness::started();
        h.ui(UiCommand::OpenRegistration);
        h.ui(UiCommand::SubmitRegistration(creds("b@y.com", "secret2")));
        let (ticket, _) = h.expect_check();
        h.ui(UiCommand::OpenLogin);
        h.expect_scan();

        h.send(auth(ticket, true));
        assert_eq!(h.orchestrator.phase(), SessionPhase::LoggedOut(Form::Login));
        assert!(matches!(h.mail.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_commands_out_of_phase_are_ignored() {
        let (mut h, _, _) = Harness::started();
        assert_eq!(h.ui(UiCommand::Logout), Control::Continue);
        h.ui(UiCommand::SubmitRegistration(creds("b@y.com", "secret2")));
        assert!(matches!(h.mail.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(h.orchestrator.phase(), SessionPhase::LoggedOut(Form::Login));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = Harness::new();
        let (events_tx, events) = mpsc::unbounded_channel();
        events_tx.send(Event::Ui(UiCommand::Shutdown)).unwrap();

        let Harness {
            orchestrator,
            mut sensor,
            ..
        } = h;
        orchestrator.run(events).await.unwrap();

        assert!(matches!(sensor.try_recv(), Ok(SensorCommand::Connect { .. })));
        match sensor.try_recv() {
            Ok(SensorCommand::Scan { token, .. }) => assert!(token.is_cancelled()),
            other => panic!("expected scan, got {:?}", other),
        }
    }
}

//! End-to-end session tests for the Lynx system
//!
//! Each test runs the real orchestrator and all three workers against an
//! in-memory mail server, a simulated sensor and a temporary store file.

use std::path::PathBuf;
use std::time::Duration;

use lynx_core::{BiometricKey, Credentials, Form, SessionPhase};
use lynx_daemon::{
    spawn_mail_worker, spawn_sensor_worker, spawn_vault_worker, Event, Orchestrator, Services,
    UiCommand, UiUpdate,
};
use lynx_mail::{InMemoryMailServer, MailClient};
use lynx_sensor::SimulatedSensor;
use lynx_tests::{fast_driver, finger, raw_message, TEST_RECONNECT_DELAY};
use lynx_vault::CredentialVault;
use tempfile::TempDir;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

struct Session {
    events: UnboundedSender<Event>,
    updates: UnboundedReceiver<UiUpdate>,
    sim: SimulatedSensor,
    server: InMemoryMailServer,
    store_path: PathBuf,
    task: JoinHandle<lynx_daemon::Result<()>>,
    _dir: TempDir,
}

impl Session {
    /// Start a session; `seed` may pre-populate the store and sensor
    fn start<F>(seed: F) -> Self
    where
        F: FnOnce(&mut CredentialVault, &SimulatedSensor),
    {
        let dir = TempDir::new().unwrap();
        let store_path = dir.path().join("database.json");

        let server = InMemoryMailServer::new();
        server.add_account("a@x.com", "secret1");
        server.add_account("b@y.com", "secret2");
        server.deliver(raw_message("news@x.com", "Weekly digest"), true);
        server.deliver(raw_message("boss@x.com", "Unread memo"), false);

        let sim = SimulatedSensor::new();
        let mut vault = CredentialVault::open(&store_path).unwrap();
        seed(&mut vault, &sim);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (updates_tx, updates) = mpsc::unbounded_channel();

        let (mail, _) = spawn_mail_worker(
            MailClient::new(server.clone()),
            events_tx.clone(),
            tracing::Span::none(),
        )
        .unwrap();
        let (sensor, _) =
            spawn_sensor_worker(fast_driver(&sim), events_tx.clone(), tracing::Span::none())
                .unwrap();
        let (vault, _) =
            spawn_vault_worker(vault, events_tx.clone(), tracing::Span::none()).unwrap();

        let orchestrator = Orchestrator::new(
            Services {
                mail,
                sensor,
                vault,
            },
            updates_tx,
            TEST_RECONNECT_DELAY,
        );
        let task = tokio::spawn(orchestrator.run(events_rx));

        Self {
            events: events_tx,
            updates,
            sim,
            server,
            store_path,
            task,
            _dir: dir,
        }
    }

    fn ui(&self, command: UiCommand) {
        self.events.send(Event::Ui(command)).unwrap();
    }

    /// Wait for the first update matching `want`, skipping others
    async fn expect<P>(&mut self, what: &str, want: P) -> UiUpdate
    where
        P: Fn(&UiUpdate) -> bool,
    {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            match tokio::time::timeout_at(deadline, self.updates.recv()).await {
                Ok(Some(update)) if want(&update) => return update,
                Ok(Some(_)) => continue,
                Ok(None) => panic!("session ended while waiting for {}", what),
                Err(_) => panic!("timed out waiting for {}", what),
            }
        }
    }

    async fn expect_phase(&mut self, phase: SessionPhase) {
        self.expect(&format!("phase {}", phase), |u| {
            matches!(u, UiUpdate::PhaseChanged(p) if *p == phase)
        })
        .await;
    }

    /// Records currently on disk
    fn stored_records(&self) -> usize {
        CredentialVault::open(&self.store_path).unwrap().len()
    }

    async fn shutdown(self) {
        self.ui(UiCommand::Shutdown);
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("orchestrator did not stop")
            .unwrap()
            .unwrap();
    }
}

fn login_phase() -> SessionPhase {
    SessionPhase::LoggedOut(Form::Login)
}

#[tokio::test]
async fn test_manual_login_reaches_dashboard() {
    let mut session = Session::start(|_, _| {});
    session.expect_phase(login_phase()).await;

    session.ui(UiCommand::SubmitLogin(Credentials::new("a@x.com", "secret1")));
    session.expect_phase(SessionPhase::LoggedIn).await;

    let update = session
        .expect("new mail", |u| matches!(u, UiUpdate::NewMail(_)))
        .await;
    match update {
        UiUpdate::NewMail(message) => assert_eq!(message.subject(), Some("Weekly digest")),
        other => panic!("unexpected {:?}", other),
    }

    // One login for the check and exactly one for the fetch
    assert_eq!(session.server.logins(), 2);
    session.shutdown().await;
}

#[tokio::test]
async fn test_wrong_password_is_reported() {
    let mut session = Session::start(|_, _| {});
    session.expect_phase(login_phase()).await;

    session.ui(UiCommand::SubmitLogin(Credentials::new("a@x.com", "nope")));
    session
        .expect("invalid credentials", |u| {
            matches!(u, UiUpdate::InvalidCredentials)
        })
        .await;

    assert_eq!(session.server.logins(), 0);
    session.shutdown().await;
}

#[tokio::test]
async fn test_register_then_log_in_with_fingerprint() {
    let mut session = Session::start(|_, _| {});
    session.expect_phase(login_phase()).await;

    session.ui(UiCommand::OpenRegistration);
    session
        .expect_phase(SessionPhase::LoggedOut(Form::Registration))
        .await;
    session.ui(UiCommand::SubmitRegistration(Credentials::new(
        "b@y.com", "secret2",
    )));
    session.expect_phase(SessionPhase::Enrolling).await;

    session.sim.place_finger(finger(1));
    session.sim.place_finger(finger(1));
    session
        .expect("scan again prompt", |u| matches!(u, UiUpdate::ScanAgain))
        .await;
    session
        .expect("enrollment complete", |u| {
            matches!(u, UiUpdate::EnrollmentComplete)
        })
        .await;
    session.expect_phase(login_phase()).await;

    assert_eq!(session.stored_records(), 1);
    assert_eq!(session.sim.template_count(), 1);

    // Same finger again: scan, lookup, credential check, dashboard
    let logins_before = session.server.logins();
    session.sim.place_finger(finger(1));
    session.expect_phase(SessionPhase::LoggedIn).await;
    assert!(session.server.logins() > logins_before);

    let stored = CredentialVault::open(&session.store_path)
        .unwrap()
        .get_credentials(&BiometricKey::from_characteristics(&finger(1)))
        .unwrap();
    assert_eq!(stored, Some(Credentials::new("b@y.com", "secret2")));

    session.shutdown().await;
}

#[tokio::test]
async fn test_mismatched_enrollment_stores_nothing() {
    let mut session = Session::start(|_, _| {});
    session.expect_phase(login_phase()).await;

    session.ui(UiCommand::OpenRegistration);
    session.ui(UiCommand::SubmitRegistration(Credentials::new(
        "b@y.com", "secret2",
    )));
    session.expect_phase(SessionPhase::Enrolling).await;

    session.sim.place_finger(finger(1));
    session.sim.place_finger(finger(2));
    session
        .expect("enrollment retry", |u| matches!(u, UiUpdate::EnrollmentRetry))
        .await;

    assert_eq!(session.stored_records(), 0);
    assert_eq!(session.sim.template_count(), 0);

    // Still enrolling: a matching pair now completes it
    session.sim.place_finger(finger(3));
    session.sim.place_finger(finger(3));
    session
        .expect("enrollment complete", |u| {
            matches!(u, UiUpdate::EnrollmentComplete)
        })
        .await;
    assert_eq!(session.stored_records(), 1);

    session.shutdown().await;
}

#[tokio::test]
async fn test_unknown_finger_keeps_scanning() {
    let mut session = Session::start(|vault, sim| {
        let known = finger(5);
        sim.enroll_template(known.clone());
        vault
            .add_credentials(
                &Credentials::new("a@x.com", "secret1"),
                &BiometricKey::from_characteristics(&known),
            )
            .unwrap();
    });
    session.expect_phase(login_phase()).await;

    session.sim.place_finger(finger(9));
    session.sim.place_finger(finger(5));
    session.expect_phase(SessionPhase::LoggedIn).await;
    assert_eq!(session.sim.pending_placements(), 0);

    session.shutdown().await;
}

#[tokio::test]
async fn test_logout_returns_to_scanning() {
    let mut session = Session::start(|vault, sim| {
        sim.enroll_template(finger(4));
        vault
            .add_credentials(
                &Credentials::new("b@y.com", "secret2"),
                &BiometricKey::from_characteristics(&finger(4)),
            )
            .unwrap();
    });
    session.expect_phase(login_phase()).await;

    session.ui(UiCommand::SubmitLogin(Credentials::new("a@x.com", "secret1")));
    session.expect_phase(SessionPhase::LoggedIn).await;

    session.ui(UiCommand::Logout);
    session.expect_phase(login_phase()).await;

    session.sim.place_finger(finger(4));
    session.expect_phase(SessionPhase::LoggedIn).await;

    session.shutdown().await;
}

#[tokio::test]
async fn test_leaving_enrollment_resumes_fingerprint_login() {
    let mut session = Session::start(|vault, sim| {
        sim.enroll_template(finger(7));
        vault
            .add_credentials(
                &Credentials::new("a@x.com", "secret1"),
                &BiometricKey::from_characteristics(&finger(7)),
            )
            .unwrap();
    });
    session.expect_phase(login_phase()).await;

    session.ui(UiCommand::OpenRegistration);
    session.ui(UiCommand::SubmitRegistration(Credentials::new(
        "b@y.com", "secret2",
    )));
    session.expect_phase(SessionPhase::Enrolling).await;

    session.ui(UiCommand::OpenLogin);
    session.expect_phase(login_phase()).await;

    // Let the cancelled enrollment notice its token before a finger shows up
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.sim.place_finger(finger(7));
    session.expect_phase(SessionPhase::LoggedIn).await;
    assert_eq!(session.sim.template_count(), 1);
    assert_eq!(session.stored_records(), 1);

    session.shutdown().await;
}

#[tokio::test]
async fn test_sensor_recovers_after_unplug() {
    let mut session = Session::start(|vault, sim| {
        sim.enroll_template(finger(6));
        vault
            .add_credentials(
                &Credentials::new("b@y.com", "secret2"),
                &BiometricKey::from_characteristics(&finger(6)),
            )
            .unwrap();
    });
    session.expect_phase(login_phase()).await;

    session.sim.set_unplugged(true);
    session
        .expect("device fault", |u| matches!(u, UiUpdate::DeviceFault(_)))
        .await;

    session.sim.set_unplugged(false);
    session.sim.place_finger(finger(6));
    session.expect_phase(SessionPhase::LoggedIn).await;
    assert!(session.sim.open_links() <= 1);

    session.shutdown().await;
}

#[tokio::test]
async fn test_opening_registration_keeps_one_link() {
    let mut session = Session::start(|_, _| {});
    session.expect_phase(login_phase()).await;

    for _ in 0..3 {
        session.ui(UiCommand::OpenRegistration);
        session
            .expect_phase(SessionPhase::LoggedOut(Form::Registration))
            .await;
        session.ui(UiCommand::OpenLogin);
        session.expect_phase(login_phase()).await;
    }

    assert!(session.sim.open_links() <= 1);
    session.shutdown().await;
}

#[test]
fn test_fetch_before_login_is_empty() {
    let server = InMemoryMailServer::new();
    server.deliver(raw_message("x@y.com", "hello"), true);

    let mut client = MailClient::new(server.clone());
    assert_eq!(client.fetch_unread().count(), 0);
    assert_eq!(server.logins(), 0);
}

//! Line-oriented console front end
//!
//! Reads commands from stdin and prints orchestrator updates. With a
//! simulated sensor, `touch <name>` places a finger identified by `name`.

use lynx_core::{Credentials, Form, SessionPhase};
use lynx_sensor::SimulatedSensor;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::error::Result;
use crate::messages::{Event, UiCommand, UiUpdate};

const HELP: &str = "\
Commands:
  login <email> <secret>     log in with a mail account
  register                   open the registration form
  submit <email> <secret>    register a mail account and enroll a finger
  back                       return to the login form
  logout                     leave the dashboard
  touch <name>               place a finger (simulated sensor only)
  quit                       exit";

/// Size of a simulated finger's characteristics
const SIM_FINGER_LEN: usize = 64;

/// One parsed console line
#[derive(Debug)]
pub enum ConsoleInput {
    Ui(UiCommand),
    Touch(String),
    Help,
}

/// Parse a console line; `Ok(None)` for blank input
pub fn parse_line(line: &str) -> std::result::Result<Option<ConsoleInput>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let input = match (verb, rest.as_slice()) {
        ("login", [email, secret]) => {
            ConsoleInput::Ui(UiCommand::SubmitLogin(form(email, secret)?))
        }
        ("submit", [email, secret]) => {
            ConsoleInput::Ui(UiCommand::SubmitRegistration(form(email, secret)?))
        }
        ("login" | "submit", _) => return Err(format!("usage: {} <email> <secret>", verb)),
        ("register", []) => ConsoleInput::Ui(UiCommand::OpenRegistration),
        ("back", []) => ConsoleInput::Ui(UiCommand::OpenLogin),
        ("logout", []) => ConsoleInput::Ui(UiCommand::Logout),
        ("quit" | "exit", []) => ConsoleInput::Ui(UiCommand::Shutdown),
        ("touch", [name]) => ConsoleInput::Touch(name.to_string()),
        ("help", _) => ConsoleInput::Help,
        _ => return Err(format!("unknown command '{}'; try 'help'", line.trim())),
    };
    Ok(Some(input))
}

fn form(email: &str, secret: &str) -> std::result::Result<Credentials, String> {
    Credentials::from_form(email, secret).map_err(|e| e.to_string())
}

/// Characteristics for a simulated finger named `name`
pub fn simulated_finger(name: &str) -> Vec<u8> {
    name.bytes().cycle().take(SIM_FINGER_LEN).collect()
}

/// Human-readable line for an update
pub fn render(update: &UiUpdate) -> String {
    match update {
        UiUpdate::PhaseChanged(SessionPhase::LoggedOut(Form::Login)) => {
            "== Login: enter credentials or place your finger on the sensor".to_string()
        }
        UiUpdate::PhaseChanged(SessionPhase::LoggedOut(Form::Registration)) => {
            "== Registration: submit the mail account to pair with a fingerprint".to_string()
        }
        UiUpdate::PhaseChanged(SessionPhase::Enrolling) => {
            "== Enrolling: place your finger on the sensor".to_string()
        }
        UiUpdate::PhaseChanged(SessionPhase::LoggedIn) => "== Logged in".to_string(),
        UiUpdate::InvalidCredentials => "Invalid credentials".to_string(),
        UiUpdate::ScanAgain => "Remove your finger and place it again".to_string(),
        UiUpdate::EnrollmentRetry => "Fingers did not match, please try again".to_string(),
        UiUpdate::EnrollmentComplete => "Fingerprint registered".to_string(),
        UiUpdate::NewMail(message) => format!(
            "  [mail] {} | {}",
            message.from().unwrap_or("(unknown sender)"),
            message.subject().unwrap_or("(no subject)")
        ),
        UiUpdate::StorageFailure(message) => format!("Store error: {}", message),
        UiUpdate::DeviceFault(message) => format!("Sensor problem: {}", message),
    }
}

/// Run the console until `quit` or end of input
pub async fn run_console(
    events: UnboundedSender<Event>,
    mut updates: UnboundedReceiver<UiUpdate>,
    sim: Option<SimulatedSensor>,
) -> Result<()> {
    let printer = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            println!("{}", render(&update));
        }
    });

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let input = match parse_line(&line) {
            Ok(Some(input)) => input,
            Ok(None) => continue,
            Err(message) => {
                println!("{}", message);
                continue;
            }
        };

        match input {
            ConsoleInput::Help => println!("{}", HELP),
            ConsoleInput::Touch(name) => match &sim {
                Some(sim) => {
                    sim.place_finger(simulated_finger(&name));
                    println!("Placed finger '{}'", name);
                }
                None => println!("touch needs `run --simulated-sensor`"),
            },
            ConsoleInput::Ui(command) => {
                let shutdown = matches!(command, UiCommand::Shutdown);
                if events.send(Event::Ui(command)).is_err() {
                    debug!("Orchestrator is gone");
                    break;
                }
                if shutdown {
                    break;
                }
            }
        }
    }

    // End of input behaves like quit
    let _ = events.send(Event::Ui(UiCommand::Shutdown));
    printer.abort();
    Ok(())
}

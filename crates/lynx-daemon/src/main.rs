//! Lynx - Main entry point
//!
//! Starts the mail, sensor and store workers, then runs the session
//! orchestrator with a console front end.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info, info_span, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lynx_daemon::maintenance::{clear_templates, count_templates};
use lynx_daemon::{
    console, spawn_mail_worker, spawn_sensor_worker, spawn_vault_worker, LynxConfig,
    Orchestrator, Services,
};
use lynx_mail::MailClient;
use lynx_sensor::{Driver, LinkOpener, SimulatedSensor};
use lynx_vault::CredentialVault;

#[derive(Parser)]
#[command(name = "lynx")]
#[command(about = "Fingerprint-unlocked mail reader")]
#[command(version)]
struct Cli {
    /// Config file (defaults to $LYNX_CONFIG or the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Run the interactive session (default)
    Run {
        /// Use an in-memory sensor instead of the serial device
        #[arg(long)]
        simulated_sensor: bool,
    },

    /// Delete every fingerprint template stored on the sensor
    SensorClear,

    /// Show how many templates the sensor holds
    SensorCount,

    /// Show how many credential records the store holds
    Records,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lynx=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(LynxConfig::default_path);
    let config = LynxConfig::load_or_create(&config_path)?;
    config.ensure_directories()?;

    let command = cli.command.unwrap_or(Commands::Run {
        simulated_sensor: false,
    });

    match command {
        Commands::Run { simulated_sensor } => {
            if simulated_sensor {
                let sim = SimulatedSensor::new();
                run_session(&config, sim.opener(), Some(sim)).await?;
            } else {
                let opener = config.sensor.opener()?;
                run_session(&config, opener, None).await?;
            }
        }
        Commands::SensorClear => {
            clear_templates(&config.sensor, config.sensor.opener()?)?;
            println!("Sensor template database cleared");
        }
        Commands::SensorCount => {
            let count = count_templates(&config.sensor, config.sensor.opener()?)?;
            println!("Stored templates: {}", count);
        }
        Commands::Records => {
            let vault = CredentialVault::open(&config.store_path)?;
            println!("Credential records: {} ({:?})", vault.len(), vault.path());
        }
    }

    Ok(())
}

async fn run_session<O>(
    config: &LynxConfig,
    opener: O,
    sim: Option<SimulatedSensor>,
) -> anyhow::Result<()>
where
    O: LinkOpener + 'static,
{
    info!("Starting Lynx v{}", env!("CARGO_PKG_VERSION"));
    info!("Sensor: {}", opener.describe());

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();

    let client =
        MailClient::with_search_query(config.mail.connector(), config.mail.search_query.clone());
    let (mail, mail_join) = spawn_mail_worker(client, events_tx.clone(), info_span!("mail"))?;

    let driver = Driver::new(opener, config.sensor.driver_config());
    let (sensor, sensor_join) =
        spawn_sensor_worker(driver, events_tx.clone(), info_span!("sensor"))?;

    let vault = CredentialVault::open(&config.store_path)?;
    let (vault, vault_join) = spawn_vault_worker(vault, events_tx.clone(), info_span!("vault"))?;

    let orchestrator = Orchestrator::new(
        Services { mail, sensor, vault },
        updates_tx,
        config.sensor.reconnect_delay(),
    );

    let session = tokio::spawn(
        orchestrator
            .run(events_rx)
            .instrument(info_span!("orchestrator")),
    );

    console::run_console(events_tx, updates_rx, sim).await?;
    session.await??;

    // Dropping the orchestrator closed every command channel
    for (name, join) in [
        ("mail", mail_join),
        ("sensor", sensor_join),
        ("vault", vault_join),
    ] {
        if join.join().is_err() {
            error!("{} worker panicked", name);
        }
    }

    info!("Goodbye");
    Ok(())
}

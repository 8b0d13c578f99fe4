use std::num::NonZeroU16;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use isl_live::camera_manager::NokhwaVideoSource;
use isl_live::config::{Settings, UserConfig};
use isl_live::inference::InferenceClient;
use isl_live::protocol::Domain;
use isl_live::server::{self, AppState};
use isl_live::session::{SessionHandle, SessionOptions, spawn_session};
use isl_live::{OurError, OurResult};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "isl-live")]
#[command(about = "Live sign-language recognition client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the inference service is up
    Health,
    /// Classify a recorded video
    Predict {
        /// Video file to upload
        #[arg(long)]
        video: PathBuf,
    },
    /// Run a live session from the local camera and log predictions
    Live {
        /// Gesture vocabulary to recognise
        #[arg(long, value_enum)]
        domain: Option<Domain>,
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Start the web server
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to
        #[arg(long)]
        port: Option<NonZeroU16>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show configuration
    Show,
    /// Remember a default domain
    SetDomain {
        #[arg(value_enum)]
        domain: Domain,
    },
    /// Reset the saved user configuration
    Reset,
}

#[tokio::main]
async fn main() -> OurResult<()> {
    let cli = Cli::parse();

    let settings = match Settings::new() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let log_level = if cli.debug || settings.debug {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .try_init()
        .map_err(|e| OurError::App(format!("Failed to set tracing subscriber: {e}")))?;

    debug!("Using inference service at {}", settings.api_base);

    match cli.command {
        Commands::Health => handle_health(&settings).await,
        Commands::Predict { video } => handle_predict(&settings, video).await,
        Commands::Live {
            domain,
            duration_secs,
        } => handle_live(settings, domain, duration_secs.map(Duration::from_secs)).await,
        Commands::Serve { host, port } => handle_serve(settings, host, port).await,
        Commands::Config { action } => handle_config_command(action, &settings),
    }
}

async fn handle_health(settings: &Settings) -> OurResult<()> {
    let client = InferenceClient::from_settings(settings)?;
    let health = client.health().await?;
    info!("Inference service ok: {}", health.ok);
    Ok(())
}

async fn handle_predict(settings: &Settings, video: PathBuf) -> OurResult<()> {
    let client = InferenceClient::from_settings(settings)?;
    let prediction = client.predict_video(&video).await?;
    println!("{} ({:.3})", prediction.label, prediction.score);
    Ok(())
}

fn start_local_session(settings: &Settings) -> OurResult<(SessionHandle, InferenceClient)> {
    let client = InferenceClient::from_settings(settings)?;
    let source = NokhwaVideoSource::new()?;
    let handle = spawn_session(
        source,
        Arc::new(client.clone()),
        SessionOptions::from(settings),
    );
    Ok((handle, client))
}

async fn handle_live(
    mut settings: Settings,
    domain: Option<Domain>,
    duration: Option<Duration>,
) -> OurResult<()> {
    if let Some(domain) = domain {
        settings.default_domain = domain;
    }
    let (session, _client) = start_local_session(&settings)?;
    session.start().await?;
    info!("Live session running for {}", settings.default_domain);

    let mut updates = session.subscribe();
    let mut last_label = String::new();
    let mut last_error = None;
    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                if !snapshot.is_live() {
                    info!("Session ended");
                    break;
                }
                if snapshot.current_label != last_label {
                    info!("Prediction: {}", snapshot.current_label);
                    last_label = snapshot.current_label;
                }
                if snapshot.last_error != last_error {
                    if let Some(error) = &snapshot.last_error {
                        warn!("{error}");
                    }
                    last_error = snapshot.last_error;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = &mut deadline => break,
        }
    }

    session.shutdown().await
}

async fn handle_serve(
    settings: Settings,
    host: Option<String>,
    port: Option<NonZeroU16>,
) -> OurResult<()> {
    let host = host.unwrap_or_else(|| settings.host.clone());
    let port = match port {
        Some(port) => port,
        None => NonZeroU16::new(settings.port)
            .ok_or_else(|| OurError::Config("Port must be non-zero".to_string()))?,
    };

    let (session, inference) = start_local_session(&settings)?;
    let state = Arc::new(AppState {
        settings,
        session: session.clone(),
        inference,
    });

    tokio::select! {
        result = server::start_server(host, port, state) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    session.shutdown().await
}

fn handle_config_command(action: ConfigAction, settings: &Settings) -> OurResult<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(settings)?);
            println!("User config: {}", Settings::get_config_path().display());
            Ok(())
        }
        ConfigAction::SetDomain { domain } => {
            let mut config = Settings::load_user_config();
            config.domain = Some(domain);
            let path = Settings::save_user_config(&config)?;
            println!("Default domain set to {domain} in {}", path.display());
            Ok(())
        }
        ConfigAction::Reset => {
            let path = Settings::save_user_config(&UserConfig::default())?;
            println!("Reset user config at {}", path.display());
            Ok(())
        }
    }
}

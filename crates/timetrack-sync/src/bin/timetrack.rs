//! timetrack - command line client for timetrackd
//!
//! Clocks in and out of projects and shows what the server holds, going
//! through the same sync client as every other device.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use timetrack_api::{Document, Session};
use timetrack_http::HttpClient;
use timetrack_sync::{SyncClient, SyncResult, SyncSettings};
use timetrack_util::{default_config_path, format_duration};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "timetrack")]
#[command(about = "Command line client for timetrackd", long_about = None)]
struct Args {
    /// Server URL
    #[arg(long, env = "TIMETRACK_SERVER", default_value = "http://127.0.0.1:3000")]
    server: String,

    #[arg(long, env = "TIMETRACK_USERNAME", default_value = "admin")]
    username: String,

    #[arg(long, env = "TIMETRACK_PASSWORD", default_value = "admin")]
    password: String,

    /// Configuration file for sync timings (default: ~/.config/timetrack/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the running session, project totals and connected clients
    Status,
    /// Start tracking a project
    Start {
        project: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Stop the running session and record it
    Stop,
    /// Print a line whenever another client changes the data
    Watch,
}

fn expect_document(result: SyncResult) -> Result<(u64, Document)> {
    match result {
        SyncResult::Success {
            version,
            document: Some(document),
        } => Ok((version, document)),
        SyncResult::Success { version, .. } => Ok((version, Document::starter())),
        SyncResult::Unauthorized => bail!("login rejected"),
        SyncResult::Conflict { version, .. } => bail!("conflict at version {version}"),
        SyncResult::Error(message) => bail!(message),
    }
}

async fn status(client: &SyncClient<HttpClient>) -> Result<()> {
    let (version, document) = expect_document(client.load_data().await)?;
    let now = timetrack_util::now();

    println!("Version {version}");
    match &document.current_session {
        Some(running) => println!(
            "Tracking {} for {}{}",
            running.project,
            format_duration(running.duration(now)),
            if running.description.is_empty() {
                String::new()
            } else {
                format!(" ({})", running.description)
            }
        ),
        None => println!("Not tracking"),
    }

    println!();
    for project in &document.projects {
        let total = document.total_for_project(&project.name, now);
        println!("  {:<20} {}", project.name, format_duration(total));
    }

    if let Some(last) = document.sessions_newest_first().first() {
        println!();
        println!("Last session: {} at {}", last.project, last.start.to_rfc3339());
    }

    let clients = client.transport().active_clients().await?;
    println!();
    println!("{} active client(s)", clients.len());
    Ok(())
}

async fn start(client: &SyncClient<HttpClient>, project: String, description: String) -> Result<()> {
    let (_, document) = expect_document(client.load_data().await)?;
    if document.project(&project).is_none() {
        bail!("unknown project {project:?}");
    }
    if let Some(running) = &document.current_session {
        bail!("already tracking {}", running.project);
    }

    let session = Session::start(project, description, timetrack_util::now());
    expect_document(client.save_current_session(&session).await)?;
    println!("Started {}", session.project);
    Ok(())
}

async fn stop(client: &SyncClient<HttpClient>) -> Result<()> {
    let (_, mut document) = expect_document(client.load_data().await)?;
    let Some(mut running) = document.current_session.take() else {
        bail!("not tracking anything");
    };

    running.stop(timetrack_util::now());
    let elapsed = running.duration(timetrack_util::now());
    let project = running.project.clone();
    document.sessions.insert(0, running);

    expect_document(client.save_data(&document).await)?;
    println!("Stopped {project} after {}", format_duration(elapsed));
    Ok(())
}

async fn watch(client: &SyncClient<HttpClient>) -> Result<()> {
    expect_document(client.load_data().await)?;
    println!(
        "Watching for changes every {:?} (Ctrl-C to quit)",
        client.poll_interval()
    );

    client.start_polling(|versioned| {
        let running = versioned
            .document
            .current_session
            .as_ref()
            .map(|s| s.project.as_str())
            .unwrap_or("nothing");
        println!("Version {}: tracking {running}", versioned.version);
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    client.stop_polling();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let settings = timetrack_config::load_config_or_default(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let http = HttpClient::new(&args.server).context("Failed to create HTTP client")?;
    http.login(&args.username, &args.password)
        .await
        .with_context(|| format!("Failed to log in to {}", args.server))?;

    let client = SyncClient::new(http, SyncSettings::from(&settings.sync));

    match args.command {
        Command::Status => status(&client).await,
        Command::Start {
            project,
            description,
        } => start(&client, project, description).await,
        Command::Stop => stop(&client).await,
        Command::Watch => watch(&client).await,
    }
}

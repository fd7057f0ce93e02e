use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use cadence_core::config::AppConfig;
use cadence_core::event::EventBus;
use cadence_core::traits::IntentClassifier;
use cadence_core::types::{CadenceEvent, Contact, ExecutionId, MailAccount};
use cadence_core::CadenceError;
use cadence_engine::{
    CadenceEngine, CadenceGraph, CancelOutcome, CancellationController, ExecutionRegistry,
    RunRequest,
};
use cadence_google::{GmailClient, GoogleAuth, GoogleCalendar};
use cadence_store::SqliteStore;

#[derive(Parser)]
#[command(name = "cadence", version, about = "Multi-step email cadences that stop when the contact replies")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "cadence.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resume stored executions and poll for replies until Ctrl-C
    Daemon {
        /// Also start the HTTP gateway
        #[arg(long)]
        gateway: bool,
    },
    /// Start a cadence for one contact
    Run {
        /// Owning user
        #[arg(long)]
        owner: String,
        /// Cadence identifier recorded on the execution
        #[arg(long)]
        cadence: String,
        /// Graph JSON file as saved by the editor
        #[arg(long)]
        graph: PathBuf,
        /// Contact JSON file; omit for a test run
        #[arg(long)]
        contact: Option<PathBuf>,
        /// Stay until every delayed step has fired
        #[arg(long)]
        wait: bool,
    },
    /// Run one poll cycle
    Poll {
        /// Only this user (default: every user with credentials)
        #[arg(long)]
        owner: Option<String>,
    },
    /// Cancel an execution
    Cancel {
        /// Execution ID
        #[arg(long, conflicts_with_all = ["owner", "contact", "cadence"])]
        execution: Option<String>,
        #[arg(long, requires_all = ["contact", "cadence"])]
        owner: Option<String>,
        #[arg(long)]
        contact: Option<String>,
        #[arg(long)]
        cadence: Option<String>,
    },
    /// Show an execution and its steps
    Status {
        /// Execution ID
        execution: String,
    },
    /// Send a one-off message outside any cadence
    SendTest {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        body: String,
    },
    /// Store mailbox credentials for a user
    Account {
        #[arg(long)]
        owner: String,
        /// Mailbox address messages are sent from
        #[arg(long)]
        address: String,
        #[arg(long, env = "CADENCE_ACCESS_TOKEN")]
        access_token: String,
        #[arg(long, env = "CADENCE_REFRESH_TOKEN")]
        refresh_token: Option<String>,
    },
    /// Show or change a user's automated reply settings
    Settings {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        ai_replies: Option<bool>,
        #[arg(long)]
        draft_mode: Option<bool>,
    },
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cadence=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    if let Commands::Config = cli.command {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let db_path = config.db_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(SqliteStore::open(&db_path)?);
    debug!(path = %db_path.display(), "Store opened");

    match cli.command {
        Commands::Daemon { gateway } => {
            let events = Arc::new(EventBus::default());
            spawn_event_logger(&events);
            let engine = build_engine(&config, store, events)?;

            let resumed = engine.start(config.poller.enabled).await?;
            info!(resumed, poller = config.poller.enabled, "Daemon started");

            let cancel = CancellationToken::new();
            let cancel_clone = cancel.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down daemon...");
                cancel_clone.cancel();
            });

            if gateway {
                let gateway_config = config.gateway.clone().unwrap_or_default();
                info!(bind = %gateway_config.bind, "Starting gateway in daemon mode");
                let server = cadence_gateway::GatewayServer::new(gateway_config, engine.clone());
                let gateway_cancel = cancel.clone();
                tokio::spawn(async move {
                    if let Err(e) = server.run(gateway_cancel).await {
                        error!(error = %e, "Gateway server error");
                    }
                });
            }

            cancel.cancelled().await;
            engine.stop();
        }
        Commands::Run {
            owner,
            cadence,
            graph,
            contact,
            wait,
        } => {
            let graph: CadenceGraph = read_json(&graph)?;
            let contact: Option<Contact> = contact
                .as_deref()
                .map(|p| read_json::<Contact>(p))
                .transpose()?;
            let events = Arc::new(EventBus::default());
            spawn_event_logger(&events);
            let engine = build_engine(&config, store, events)?;

            let outcome = engine
                .runner
                .run_execution(RunRequest {
                    owner_id: owner,
                    cadence_id: cadence,
                    graph,
                    contact,
                })
                .await?;
            for skipped in &outcome.skipped {
                warn!(node_id = %skipped.node_id, reason = %skipped.reason, "Step skipped");
            }
            println!("{}", serde_json::to_string_pretty(&outcome)?);

            if wait && outcome.queued > 0 {
                info!(queued = outcome.queued, "Waiting for delayed steps (Ctrl-C leaves them pending)");
                tokio::select! {
                    _ = engine.runner.wait_for(&outcome.execution_id) => {}
                    _ = tokio::signal::ctrl_c() => engine.stop(),
                }
            }
        }
        Commands::Poll { owner } => {
            let events = Arc::new(EventBus::default());
            spawn_event_logger(&events);
            let engine = build_engine(&config, store, events)?;
            let reports = match owner {
                Some(owner) => vec![engine.poller.poll_user(&owner).await],
                None => engine.poller.poll_all().await,
            };
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        Commands::Cancel {
            execution,
            owner,
            contact,
            cadence,
        } => {
            // No chains run in this process, so only stored steps change.
            let controller = CancellationController::new(
                Arc::new(ExecutionRegistry::new()),
                store,
                Arc::new(EventBus::default()),
            );
            match (execution, owner, contact, cadence) {
                (Some(id), _, _, _) => match controller.cancel(&ExecutionId::from_string(&id))? {
                    CancelOutcome::Cancelled { steps } => {
                        println!("Cancelled {} ({} pending steps)", id, steps)
                    }
                    CancelOutcome::AlreadyCancelled => println!("{} was already cancelled", id),
                },
                (None, Some(owner), Some(contact), Some(cadence)) => {
                    let n = controller.cancel_execution(&owner, &contact, &cadence)?;
                    println!("Cancelled {} execution(s)", n);
                }
                _ => anyhow::bail!("pass --execution, or --owner with --contact and --cadence"),
            }
        }
        Commands::Status { execution } => {
            let (record, steps) = store.execution_status(&ExecutionId::from_string(&execution))?;
            let state = if record.cancelled_at.is_some() {
                "cancelled"
            } else if record.completed_at.is_some() {
                "completed"
            } else {
                "active"
            };
            println!("Execution: {} ({})", record.id.0, state);
            println!("Owner:     {}", record.owner_id);
            println!("Cadence:   {}", record.cadence_id);
            if let Some(thread) = &record.thread.thread_id {
                println!("Thread:    {}", thread);
            }
            println!();
            for step in steps {
                let when = step
                    .sent_at
                    .unwrap_or(step.scheduled_for)
                    .format("%Y-%m-%d %H:%M UTC");
                println!(
                    "  {:<2} {:<12} {:<9} {}  {}",
                    step.position,
                    step.node_id,
                    step.status.as_str(),
                    when,
                    step.subject
                );
            }
        }
        Commands::SendTest {
            owner,
            to,
            subject,
            body,
        } => {
            let engine = build_engine(&config, store, Arc::new(EventBus::default()))?;
            let sent = engine.pipeline.send_test(&owner, &to, &subject, &body).await?;
            println!(
                "Sent {} in thread {} ({})",
                sent.provider_message_id, sent.thread_id, sent.message_id
            );
        }
        Commands::Account {
            owner,
            address,
            access_token,
            refresh_token,
        } => {
            store.upsert_account(&MailAccount {
                owner_id: owner.clone(),
                address: address.clone(),
                access_token,
                refresh_token,
            })?;
            println!("Stored credentials for {} <{}>", owner, address);
        }
        Commands::Settings {
            owner,
            ai_replies,
            draft_mode,
        } => {
            let mut settings = store.settings(&owner)?;
            if ai_replies.is_some() || draft_mode.is_some() {
                if let Some(v) = ai_replies {
                    settings.ai_replies_enabled = v;
                }
                if let Some(v) = draft_mode {
                    settings.draft_mode = v;
                }
                store.set_settings(&owner, settings)?;
            }
            println!("AI replies: {}", settings.ai_replies_enabled);
            println!("Draft mode: {}", settings.draft_mode);
        }
        Commands::Config => unreachable!("handled before store open"),
    }

    Ok(())
}

/// Missing config files fall back to defaults; broken ones are errors.
fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    match AppConfig::load(path) {
        Ok(config) => Ok(config),
        Err(CadenceError::ConfigNotFound(p)) => {
            warn!(path = %p, "Config file not found, using defaults");
            Ok(AppConfig::default())
        }
        Err(e) => Err(e).with_context(|| format!("loading {}", path.display())),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn build_engine(
    config: &AppConfig,
    store: Arc<SqliteStore>,
    events: Arc<EventBus>,
) -> anyhow::Result<CadenceEngine> {
    let google = config
        .google
        .as_ref()
        .context("[google] section is required for sending and polling")?;
    let token_store = store.clone();
    let auth = Arc::new(GoogleAuth::new(google).on_refresh(move |account, token| {
        if let Err(e) = token_store.update_access_token(&account.owner_id, token) {
            warn!(owner = %account.owner_id, error = %e, "Failed to persist refreshed access token");
        }
    }));
    let mail = Arc::new(GmailClient::new(google, auth.clone()));
    let calendar = Arc::new(GoogleCalendar::new(google, auth));

    let classifier: Option<Arc<dyn IntentClassifier>> =
        config.classifier.as_ref().map(cadence_llm::create_classifier);
    if classifier.is_none() {
        info!("No classifier configured, using keyword heuristics");
    }

    Ok(CadenceEngine::new(config, store, mail, calendar, classifier, events))
}

fn spawn_event_logger(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Event logger lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn log_event(event: &CadenceEvent) {
    match event {
        CadenceEvent::StepSent {
            execution_id,
            node_id,
            thread_id,
        } => info!(execution_id = %execution_id.0, %node_id, %thread_id, "Step sent"),
        CadenceEvent::StepFailed {
            execution_id,
            node_id,
            error,
        } => warn!(execution_id = %execution_id.0, %node_id, %error, "Step failed"),
        CadenceEvent::ExecutionCancelled {
            execution_id,
            cancelled_steps,
        } => info!(execution_id = %execution_id.0, cancelled_steps, "Execution cancelled"),
        CadenceEvent::SchedulingResponse {
            owner_id,
            thread_id,
            outcome,
        } => info!(owner = %owner_id, %thread_id, %outcome, "Scheduling response"),
        other => debug!(event = ?other, "Event"),
    }
}

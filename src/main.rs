use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use mailgen_core::{ApiKey, CompletionProvider, Mailer};
use mailgen_engine::{AdmissionConfig, AdmissionController, GenerationConfig, GenerationOrchestrator, SendOrchestrator};
use mailgen_llm::{GroqProvider, ReliableProvider};
use mailgen_mail::ResendMailer;
use mailgen_server::handlers::HandlerState;
use mailgen_server::ServerConfig;
use mailgen_store::{Database, SessionRepo, UserRepo, DEFAULT_SESSION_TTL_DAYS};
use mailgen_telemetry::{init_telemetry, TelemetryConfig};

/// AI-assisted email drafting and delivery service.
#[derive(Parser, Debug)]
#[command(name = "mailgen", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// SQLite database file. Defaults to ~/.mailgen/mailgen.db.
    #[arg(long = "database", env = "DATABASE_PATH", global = true)]
    database: Option<PathBuf>,

    /// Default log level; RUST_LOG takes precedence.
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: tracing::Level,

    /// Emit JSON log lines.
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Create a user if needed and print a bearer token for it.
    IssueSession {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, env = "HOST", default_value = "0.0.0.0", global = true)]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 3000, global = true)]
    port: u16,

    /// Requests admitted per user per minute, shared by generate and send.
    #[arg(long, env = "RATE_LIMIT_REQUESTS_PER_MINUTE", default_value_t = 10, global = true)]
    rate_limit: usize,

    #[arg(long, env = "FROM_EMAIL", default_value = "noreply@localhost.com", global = true)]
    from_email: String,

    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true, global = true)]
    groq_api_key: Option<String>,

    #[arg(long, env = "RESEND_API_KEY", hide_env_values = true, global = true)]
    resend_api_key: Option<String>,

    #[arg(long = "model", env = "GROQ_MODEL", default_value = mailgen_llm::groq::DEFAULT_MODEL, global = true)]
    model: String,
}

fn default_database_path() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".mailgen")
        .join("mailgen.db")
}

/// Blank values count as unset.
fn api_key(raw: Option<String>) -> Option<ApiKey> {
    raw.filter(|k| !k.trim().is_empty()).map(ApiKey::new)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let telemetry = init_telemetry(TelemetryConfig {
        log_level: cli.log_level,
        json: cli.log_json,
        ..TelemetryConfig::default()
    });

    let db_path = cli.database.unwrap_or_else(default_database_path);
    let db = Database::open(&db_path)
        .with_context(|| format!("open database at {}", db_path.display()))?;

    match cli.command {
        Some(Command::IssueSession { email, name }) => issue_session(db, &email, name.as_deref()),
        Some(Command::Serve) | None => serve(db, cli.serve, telemetry.metrics()).await,
    }
}

fn issue_session(db: Database, email: &str, name: Option<&str>) -> anyhow::Result<()> {
    let user = UserRepo::new(db.clone())
        .get_or_create(email, name)
        .context("create user")?;
    let token = SessionRepo::new(db)
        .issue(&user.email, chrono::Duration::days(DEFAULT_SESSION_TTL_DAYS))
        .context("issue session")?;
    tracing::info!(user_id = %user.id, "session issued");
    println!("{token}");
    Ok(())
}

async fn serve(
    db: Database,
    args: ServeArgs,
    metrics: Arc<mailgen_telemetry::MetricsRecorder>,
) -> anyhow::Result<()> {
    let provider: Option<Arc<dyn CompletionProvider>> = match api_key(args.groq_api_key) {
        Some(key) => {
            let groq = GroqProvider::new(key).context("build Groq client")?;
            Some(Arc::new(ReliableProvider::with_defaults(groq)))
        }
        None => {
            tracing::warn!("GROQ_API_KEY not set; generation requests will fail");
            None
        }
    };

    let mailer: Option<Arc<dyn Mailer>> = match api_key(args.resend_api_key) {
        Some(key) => Some(Arc::new(ResendMailer::new(key).context("build Resend client")?)),
        None => {
            tracing::warn!("RESEND_API_KEY not set; send requests will fail");
            None
        }
    };

    let admission = Arc::new(
        AdmissionController::new(AdmissionConfig {
            limit: args.rate_limit,
            window: Duration::from_millis(60_000),
            ..AdmissionConfig::default()
        })
        .with_metrics(Arc::clone(&metrics)),
    );

    let state = HandlerState {
        db: db.clone(),
        admission,
        generation: GenerationOrchestrator::new(
            provider,
            db.clone(),
            GenerationConfig {
                model: args.model,
                ..GenerationConfig::default()
            },
            Arc::clone(&metrics),
        ),
        sending: SendOrchestrator::new(mailer, db, args.from_email, Arc::clone(&metrics)),
        metrics,
    };

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        ..ServerConfig::default()
    };
    let handle = mailgen_server::start(config, state)
        .await
        .context("start server")?;

    tracing::info!(port = handle.port, limit = args.rate_limit, "mailgen ready");

    tokio::signal::ctrl_c()
        .await
        .context("listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

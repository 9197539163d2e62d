use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use http::{
    Method,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use voice_agent_studio::{
    CoordinatorEvent, CoordinatorOptions, DelayFeedbackProcessor, DualAgentCoordinator,
    HttpConnectionDetailsProvider, LiveKitTransport, ServerConfig, SessionEvent, SessionOptions,
    SingleAgentSession, routes, state::AppState,
};

/// Voice Agent Studio - credential server and session client for voice agents
#[derive(Parser, Debug)]
#[command(name = "voice-agent-studio")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run (defaults to `serve`)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the credential server
    Serve,

    /// Join an agent session and log its lifecycle until Ctrl-C
    Talk {
        /// Assistant display name
        #[arg(short = 'a', long = "assistant", default_value = "ALICE")]
        assistant: String,

        /// Purpose tag sent to the credential endpoint
        #[arg(short = 'p', long = "purpose", default_value = "landing")]
        purpose: String,
    },

    /// Test a generated agent next to an improvement agent until Ctrl-C
    Refine {
        /// Display name of the agent under test
        #[arg(long = "agent", default_value = "YOUR AGENT")]
        agent: String,

        /// Display name of the improvement agent
        #[arg(long = "coach", default_value = "ALICE")]
        coach: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Must happen before any TLS connection is attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = if let Some(config_path) = cli.config {
        info!("Loading configuration from {}", config_path.display());
        ServerConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Talk { assistant, purpose } => talk(config, assistant, purpose).await,
        Commands::Refine { agent, coach } => refine(config, agent, coach).await,
    }
}

fn cors_layer(origins: Option<&str>) -> CorsLayer {
    match origins {
        Some("*") => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE])
            .allow_credentials(false),
        Some(origins) => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::OPTIONS])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_credentials(true)
        }
        None => {
            info!(
                "CORS not configured, defaulting to same-origin only. \
                 Set CORS_ALLOWED_ORIGINS to enable cross-origin access."
            );
            CorsLayer::new()
                .allow_methods([Method::GET, Method::OPTIONS])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_credentials(false)
        }
    }
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let address = config.address();
    let cors = cors_layer(config.cors_allowed_origins.as_deref());

    if let Err(missing) = config.livekit_settings() {
        warn!("{missing} is not set, /connection-details will answer 500");
    }

    let app_state = AppState::new(config);

    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_CONTENT_TYPE_OPTIONS,
            http::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_FRAME_OPTIONS,
            http::HeaderValue::from_static("DENY"),
        ));

    let app = routes::api::create_api_router()
        .with_state(app_state)
        .layer(cors)
        .layer(security_headers);

    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    info!("Server listening on http://{}", socket_addr);

    let listener = TcpListener::bind(&socket_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}

fn new_session(
    config: &ServerConfig,
    assistant: String,
    purpose: &str,
) -> anyhow::Result<SingleAgentSession> {
    let provider = HttpConnectionDetailsProvider::new(&config.connection_details_url)?;
    let options =
        SessionOptions::new(assistant, purpose).with_no_agent_timeout(config.no_agent_timeout());
    Ok(SingleAgentSession::new(
        options,
        Arc::new(provider),
        Arc::new(LiveKitTransport::new()),
    ))
}

fn log_session_event(session: &str, event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged { from, to, .. } => info!(session, %from, %to, "state"),
        SessionEvent::NoAgent => warn!(session, "no agent yet, is the agent process running?"),
        SessionEvent::CredentialFetchFailed(message) => {
            warn!(session, "credential fetch failed: {message}")
        }
        SessionEvent::TransportFailed(err) => warn!(session, "transport failed: {err}"),
    }
}

async fn talk(config: ServerConfig, assistant: String, purpose: String) -> anyhow::Result<()> {
    let session = new_session(&config, assistant, &purpose)?;
    let name = session.options().display_name.clone();
    let mut events = session.subscribe();

    session.connect().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = events.recv() => match received {
                Ok(event) => log_session_event(&name, &event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.disconnect().await;
    Ok(())
}

async fn refine(config: ServerConfig, agent: String, coach: String) -> anyhow::Result<()> {
    let generated = new_session(&config, agent, "generated_assistant")?;
    let improvement = new_session(&config, coach, "improvement")?;
    let generated_name = generated.options().display_name.clone();
    let improvement_name = improvement.options().display_name.clone();
    let mut generated_events = generated.subscribe();
    let mut improvement_events = improvement.subscribe();

    let coordinator = DualAgentCoordinator::new(
        generated,
        improvement,
        Arc::new(DelayFeedbackProcessor::new(config.feedback_delay())),
        CoordinatorOptions {
            recency_window: config.feedback_recency_window(),
        },
    );
    let mut coordinator_events = coordinator.subscribe();

    coordinator.connect_generated().await?;
    coordinator.connect_improvement().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Ok(event) = generated_events.recv() => log_session_event(&generated_name, &event),
            Ok(event) = improvement_events.recv() => log_session_event(&improvement_name, &event),
            Ok(event) = coordinator_events.recv() => match event {
                CoordinatorEvent::FeedbackProcessingStarted { iteration } => {
                    info!(iteration, "applying feedback to the generated agent");
                }
                CoordinatorEvent::IterationComplete { count } => {
                    info!(count, "iteration complete, reconnecting the improvement agent");
                    coordinator.continue_iterating();
                    if let Err(e) = coordinator.connect_improvement().await {
                        warn!("could not reconnect the improvement agent: {e}");
                    }
                }
                CoordinatorEvent::FeedbackProcessingFailed(err) => warn!("{err}"),
            },
            else => break,
        }
    }

    coordinator.shutdown().await;
    Ok(())
}

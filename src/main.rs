use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;

use juno_core::provider::{EmbeddingProvider, LlmProvider};
use juno_engine::{
    ClientPool, ContextConfig, ContextPipeline, CoordinatorConfig, HttpToolConfig, HttpToolConnector,
    KeywordRouter, SessionPool, TurnCoordinator,
};
use juno_llm::{
    DemoProvider, GeminiConfig, GeminiEmbedder, GeminiProvider, HashEmbedder, ReliableConfig,
    ReliableProvider,
};
use juno_server::{HandlerState, RpcClient, ServerConfig};
use juno_settings::JunoSettings;
use juno_store::{ConversationRepo, Database};
use juno_telemetry::{init_telemetry, parse_level, TelemetryConfig};

const DEMO_EMBEDDING_DIMS: usize = 256;

#[derive(Parser)]
#[command(name = "juno", about = "Juno financial assistant orchestration server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the server.
    Serve {
        /// Settings file layered over ~/.juno/settings.json.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Send one query to a running server and print the result.
    Ask {
        #[arg(long, default_value = "ws://127.0.0.1:8091/ws")]
        url: String,
        /// Primary (authenticated) user id.
        #[arg(long)]
        user: Option<String>,
        /// Sub-account id on the tool provider.
        #[arg(long)]
        uid: Option<String>,
        query: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config, port } => serve(config, port).await,
        Command::Ask {
            url,
            user,
            uid,
            query,
        } => ask(&url, user, uid, query).await,
    }
}

fn load(config: Option<PathBuf>) -> anyhow::Result<JunoSettings> {
    let default_path = juno_settings::settings_path();
    let settings = match &config {
        Some(path) => juno_settings::load_settings_from_paths(&[default_path.as_path(), path.as_path()]),
        None => juno_settings::load_settings(),
    };
    settings.context("failed to load settings")
}

fn build_model(settings: &JunoSettings) -> anyhow::Result<(Arc<dyn LlmProvider>, Arc<dyn EmbeddingProvider>)> {
    let model = &settings.model;
    let Some(api_key) = model.api_key.clone() else {
        tracing::warn!("no model API key configured, running in demo mode");
        return Ok((Arc::new(DemoProvider), Arc::new(HashEmbedder::new(DEMO_EMBEDDING_DIMS))));
    };

    let mut gemini = GeminiConfig::new(api_key);
    gemini.base_url.clone_from(&model.base_url);
    gemini.model.clone_from(&model.model);
    gemini.embedding_model.clone_from(&model.embedding_model);
    gemini.call_timeout = Duration::from_millis(model.call_timeout_ms);

    let provider = GeminiProvider::new(gemini.clone()).context("failed to build model provider")?;
    let embedder = GeminiEmbedder::new(gemini).context("failed to build embedder")?;
    let reliable = ReliableProvider::new(
        provider,
        ReliableConfig {
            max_retries: model.max_retries,
            base_delay: Duration::from_millis(model.base_delay_ms),
            ..ReliableConfig::default()
        },
    );
    tracing::info!(model = %model.model, "model provider configured");
    Ok((Arc::new(reliable), Arc::new(embedder)))
}

async fn serve(config: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let settings = load(config)?;
    let _ = init_telemetry(&TelemetryConfig {
        log_level: parse_level(&settings.logging.level),
        json: settings.logging.json,
        ..TelemetryConfig::default()
    });
    tracing::info!("Starting Juno server");

    let db_path = &settings.store.db_path;
    let db = Database::open(db_path).context("failed to open database")?;
    tracing::info!(path = %db_path.display(), "Database opened");
    let repo = Arc::new(ConversationRepo::new(db));

    let (model, embedder) = build_model(&settings)?;
    let ctx = &settings.context;
    let context = ContextPipeline::new(
        embedder,
        repo,
        ContextConfig {
            top_k: ctx.top_k,
            similarity_threshold: ctx.similarity_threshold,
            recent_window: ctx.recent_window,
            embed_timeout: Duration::from_millis(ctx.embed_timeout_ms),
        },
    );

    let mut tool_config = HttpToolConfig::new(settings.tools.provider_url.clone());
    tool_config.connect_timeout = Duration::from_millis(settings.tools.connect_timeout_ms);
    tool_config.request_timeout = Duration::from_millis(settings.tools.call_timeout_ms);
    let connector = HttpToolConnector::new(tool_config).context("failed to build tool connector")?;
    let pool = Arc::new(SessionPool::new(Arc::new(connector)));
    let router = Arc::new(KeywordRouter::new().context("failed to compile router patterns")?);

    let coordinator = Arc::new(TurnCoordinator::new(
        router,
        pool.clone(),
        model,
        context.clone(),
        CoordinatorConfig {
            tool_timeout: Duration::from_millis(settings.tools.call_timeout_ms),
            ..CoordinatorConfig::default()
        },
    ));
    let state = Arc::new(HandlerState::new(coordinator));

    let server_config = ServerConfig {
        host: settings.server.host.clone(),
        port: port.unwrap_or(settings.server.port),
        tcp_port: settings.server.tcp_port,
        max_send_queue: settings.server.max_send_queue,
        ..ServerConfig::default()
    };
    let handle = juno_server::start(server_config, state)
        .await
        .context("failed to start server")?;
    tracing::info!(port = handle.port, tcp_port = ?handle.tcp_port, "Juno server ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("Shutting down");
    handle.shutdown().await;
    context.shutdown().await;
    let released = pool.release_all().await;
    tracing::info!(released, "tool clients released");
    Ok(())
}

async fn ask(url: &str, user: Option<String>, uid: Option<String>, query: String) -> anyhow::Result<()> {
    let client = RpcClient::connect_ws(url)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    let mut params = json!({ "query": query });
    if let Some(user) = user {
        params["firebase_uid"] = json!(user);
    }
    if let Some(uid) = uid {
        params["user_id"] = json!(uid);
    }
    let result = client.call("process_query", params).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

//! Process entry point: parses CLI flags, loads configuration, builds
//! the shared collaborator set, and serves the GraphQL ingress route.

use std::sync::Arc;

use clap::Parser;
use fedquery_federation::SchemaRegistry;
use fedquery_federation::UnifiedSchema;
use fedquery_gateway::config::Configuration;
use fedquery_gateway::consent::ConsentClient;
use fedquery_gateway::dispatcher::ProviderDispatcher;
use fedquery_gateway::policy::PolicyClient;
use fedquery_gateway::server::{self, AppState};
use fedquery_gateway::audit::AuditEmitter;
use fedquery_gateway::orchestrator::OrchestratorState;

#[derive(Debug, Parser)]
#[command(name = "fedquery-gateway")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, env = "FEDQUERY_CONFIG")]
    config: std::path::PathBuf,

    /// Overrides the tracing-subscriber output format (`json` or `fmt`);
    /// defaults to `json` in `production` and `fmt` in `local`.
    #[arg(long)]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Configuration::load(&cli.config)?;

    install_tracing(&cli, &config);

    let sdl = std::fs::read_to_string(&config.schema.source)?;
    let unified_schema = UnifiedSchema::parse("1.0.0", sdl, "startup", None)?;
    let schema_id = unified_schema.version.clone();
    let schema_registry = Arc::new(SchemaRegistry::new(unified_schema));

    let http = reqwest::Client::builder().build()?;

    let policy = PolicyClient::new(http.clone(), config.policy.url.clone(), config.policy.timeout);
    let consent = ConsentClient::new(http.clone(), config.consent.url.clone(), config.consent.timeout);
    let max_concurrent = config
        .providers
        .max_concurrent
        .unwrap_or(config.providers.entries.len());
    let dispatcher = ProviderDispatcher::new(http.clone(), config.providers.entries.clone(), max_concurrent);
    let audit = AuditEmitter::start(
        http.clone(),
        config.audit.url.clone(),
        config.audit.queue_size,
        config.audit.flush_timeout,
    );

    let orchestrator = OrchestratorState {
        schema_registry,
        policy,
        consent,
        dispatcher,
        audit,
        schema_id,
    };

    let app_state = Arc::new(AppState {
        orchestrator,
        environment: config.env,
        jwt_public_keys: config.auth.jwt_public_keys.clone(),
    });

    let router = server::router(app_state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.server.port)).await?;
    tracing::info!(port = config.server.port, "fedquery-gateway listening");
    axum::serve(listener, router).await?;

    Ok(())
}

fn install_tracing(cli: &Cli, config: &Configuration) {
    let use_json = match cli.log_format.as_deref() {
        Some("json") => true,
        Some("fmt") => false,
        _ => config.env == fedquery_gateway::config::Environment::Production,
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if use_json {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

use anyhow::{Context, Result};
use authzd::events;
use authzd::http;
use authzd::rel::{RelClient, RelClientConfig};
use authzd::store::Store;
use authzd::tokens::TokenManager;
use authzd::{Config, Engine, Policy};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "authzd", about = "Zanzibar-style authorization service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP surface.
    Server {
        #[arg(long, env = "AUTHZD_BIND", default_value = "0.0.0.0:8080")]
        bind: String,
    },
    /// Run the event subscriber.
    Worker,
    /// Apply pending SQL migrations and exit.
    Migrate,
    /// Compile the active policy and push it to REL if it has changed.
    Schema,
    /// Bootstrap a role and bind it to a resource.
    CreateRole {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
        #[arg(long = "action", num_args = 1..)]
        actions: Vec<String>,
        #[arg(long)]
        bind_to: Option<String>,
    },
}

fn main() -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run())
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("loading configuration")?;
    authzd::logging::init_logging("./logs", "authzd").context("initializing logging")?;

    let policy = Policy::load(config.policy_path.as_deref()).context("loading policy")?;
    let store = Store::connect(
        &config.sql.uri,
        config.sql.max_open,
        config.sql.max_idle,
        config.sql.max_lifetime,
    )
    .await
    .context("connecting to database")?;

    if matches!(cli.command, Command::Migrate) {
        store.migrate().await.context("running migrations")?;
        info!("migrations applied");
        return Ok(());
    }

    let rel = RelClient::new(RelClientConfig {
        endpoint: config.rel.endpoint.clone(),
        key: config.rel.key.clone(),
        insecure: config.rel.insecure,
    })
    .context("constructing REL client")?;
    let tokens = TokenManager::new(store.clone(), config.events.zed_token_ttl);
    let engine = Engine::new(policy, store, rel, tokens, config.namespace.clone());

    match cli.command {
        Command::Migrate => unreachable!("handled above"),
        Command::Server { bind } => run_server(engine, &bind).await,
        Command::Worker => run_worker(engine, &config).await,
        Command::Schema => run_schema(&engine).await,
        Command::CreateRole {
            actor,
            owner,
            name,
            actions,
            bind_to,
        } => run_create_role(&engine, &actor, &owner, &name, &actions, bind_to.as_deref()).await,
    }
}

async fn run_server(engine: Engine, bind: &str) -> Result<()> {
    let app = http::router(engine);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(%bind, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving http")?;
    Ok(())
}

async fn run_worker(engine: Engine, config: &Config) -> Result<()> {
    let topics = events::topics_for(&engine, &config.events.topics);
    info!(topics = ?topics, "starting event worker");

    let cancel = CancellationToken::new();
    let worker_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        worker_cancel.cancel();
    });

    events::run(engine, &config.events.nats_url, &config.events.stream_name, topics, None, cancel).await
}

async fn run_schema(engine: &Engine) -> Result<()> {
    let compiled = authzd::schema::compile(engine.policy());
    engine
        .rel_client()
        .write_schema(&compiled)
        .await
        .context("writing schema to REL")?;
    info!("schema pushed");
    Ok(())
}

async fn run_create_role(
    engine: &Engine,
    actor: &str,
    owner: &str,
    name: &str,
    actions: &[String],
    bind_to: Option<&str>,
) -> Result<()> {
    let owner_resource = engine.new_resource_from_id_string(owner).context("parsing owner id")?;
    let role = engine
        .create_role_v2(actor, &owner_resource, name, actions)
        .await
        .context("creating role")?;
    info!(role = %role.id, "role created");

    if let Some(resource_id) = bind_to {
        let resource = engine
            .new_resource_from_id_string(resource_id)
            .context("parsing bind-to resource id")?;
        let binding = engine
            .create_role_binding(actor, &resource, role.id, None, &[(owner_resource, None)])
            .await
            .context("creating role binding")?;
        info!(role_binding = %binding.id, "role bound");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    error!("shutdown signal received");
}

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use operion_activator::Activator;
use operion_bus::EventBus;
use operion_config::Config;
use operion_node::{NodeRegistry, PluginDirectory};
use operion_provider::ProviderManager;
use operion_provider_kafka::KafkaProvider;
use operion_provider_queue::QueueProvider;
use operion_provider_scheduler::SchedulerProvider;
use operion_provider_webhook::WebhookProvider;
use operion_repository::InMemoryRepositories;
use operion_repository::{
  ExecutionContextRepository, InputCoordinationRepository, NodeRepository, ScheduleRepository,
  WorkflowRepository,
};
use operion_worker::Worker;

/// Operion - distributed workflow orchestration
#[derive(Parser)]
#[command(name = "operion")]
#[command(version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the source provider manager: owns every configured provider's
  /// lifecycle and translates domain events into trigger bindings.
  ProviderManager,
  /// Run the activator: matches incoming source events against published
  /// trigger nodes and seeds new executions.
  Activator,
  /// Run the worker: executes nodes and routes their outputs.
  Worker,
}

fn main() -> Result<()> {
  let config = Config::from_env().context("failed to load configuration")?;
  init_tracing();

  let rt = tokio::runtime::Runtime::new()?;
  let cli = Cli::parse();
  rt.block_on(async move {
    match cli.command {
      Commands::ProviderManager => run_provider_manager(config).await,
      Commands::Activator => run_activator(config).await,
      Commands::Worker => run_worker(config).await,
    }
  })
}

fn init_tracing() {
  use tracing_subscriber::EnvFilter;
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_env(operion_config::env::LOG).unwrap_or_else(|_| EnvFilter::new("info")))
    .init();
}

struct Repositories {
  workflow: Arc<dyn WorkflowRepository>,
  node: Arc<dyn NodeRepository>,
  execution: Arc<dyn ExecutionContextRepository>,
  input: Arc<dyn InputCoordinationRepository>,
  schedule: Arc<dyn ScheduleRepository>,
}

async fn open_repositories(config: &Config) -> Result<Repositories> {
  if let Some(path) = config.database_url.strip_prefix("sqlite://") {
    std::fs::create_dir_all(&config.data_dir)
      .with_context(|| format!("failed to create data dir {}", config.data_dir.display()))?;
    let repo = Arc::new(
      operion_repository::sqlite::SqliteRepositories::connect(&format!("sqlite://{path}?mode=rwc"))
        .await
        .context("failed to open sqlite repositories")?,
    );
    Ok(Repositories {
      workflow: repo.clone(),
      node: repo.clone(),
      execution: repo.clone(),
      input: repo.clone(),
      schedule: repo,
    })
  } else {
    let repo = Arc::new(InMemoryRepositories::new());
    Ok(Repositories {
      workflow: repo.clone(),
      node: repo.clone(),
      execution: repo.clone(),
      input: repo.clone(),
      schedule: repo,
    })
  }
}

fn open_bus(config: &Config) -> Result<Arc<dyn EventBus>> {
  if let Some(brokers) = config.bus_url.strip_prefix("kafka://") {
    let bus = operion_bus::kafka::KafkaBus::new(brokers).context("failed to connect to kafka")?;
    Ok(Arc::new(bus))
  } else {
    Ok(Arc::new(operion_bus::InMemoryBus::new()))
  }
}

async fn run_provider_manager(config: Config) -> Result<()> {
  let repos = open_repositories(&config).await?;
  let bus = open_bus(&config)?;

  let manager = ProviderManager::new(
    bus.clone(),
    repos.node,
    repos.workflow,
    config.restart_backoff,
    config.restart_max_attempts,
  );

  manager
    .register(Arc::new(SchedulerProvider::new(repos.schedule)))
    .await;
  manager
    .register(Arc::new(WebhookProvider::new(config.webhook_port)))
    .await;
  if let Some(brokers) = config.bus_url.strip_prefix("kafka://") {
    manager
      .register(Arc::new(KafkaProvider::new(brokers.to_string())))
      .await;
  }
  manager.register(Arc::new(QueueProvider::new(bus))).await;

  manager.start_all().await.context("failed to start providers")?;

  tracing::info!("provider manager running");
  manager.run().await.context("provider manager stopped")?;
  Ok(())
}

async fn run_activator(config: Config) -> Result<()> {
  let repos = open_repositories(&config).await?;
  let bus = open_bus(&config)?;

  let activator = Activator::new(bus, repos.node, repos.workflow, repos.execution);

  tracing::info!("activator running");
  activator.run().await.context("activator stopped")?;
  Ok(())
}

async fn run_worker(config: Config) -> Result<()> {
  let repos = open_repositories(&config).await?;
  let bus = open_bus(&config)?;
  let registry = Arc::new(load_registry(&config).await?);

  let worker = Worker::new(bus, repos.workflow, repos.execution, repos.input, registry);

  tracing::info!("worker running");
  worker.run().await.context("worker stopped")?;
  Ok(())
}

/// Builtin nodes plus every plugin component found under the plugin
/// directory.
async fn load_registry(config: &Config) -> Result<NodeRegistry> {
  let mut registry = NodeRegistry::with_builtins();

  let directory = PluginDirectory::new(&config.plugin_dir).context("failed to start wasm engine")?;
  let plugins = directory.scan().await.context("failed to scan plugin directory")?;
  for plugin in plugins {
    let node_type = plugin.manifest.node_type();
    let factory = directory
      .factory_for(plugin)
      .with_context(|| format!("failed to load plugin '{node_type}'"))?;
    tracing::info!(node_type, "loaded plugin");
    registry.register(factory);
  }

  Ok(registry)
}

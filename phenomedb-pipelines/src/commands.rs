//! Command handlers
//!
//! Each command resolves a pipeline through the factory against the
//! configured database, scheduler and cache.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use phenomedb_client::SchedulerClient;
use phenomedb_core::domain::env::DbEnv;
use phenomedb_core::domain::task::RunConfig;
use phenomedb_pipelines::cache::{Cache, RedisCache};
use phenomedb_pipelines::registry::{TaskRegistry, TaskSpec, get_tasks_from_json};
use phenomedb_pipelines::repository::PgStore;
use phenomedb_pipelines::setup::generate_single_task_pipelines;
use phenomedb_pipelines::{Backends, Config, PipelineFactory, PipelineOptions, db};

#[derive(Subcommand)]
pub enum Commands {
    /// Print the task catalogue
    Tasks {
        /// Only include these fully qualified modules (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        modules: Vec<String>,
    },
    /// Create the single-task pipeline of every catalogued task
    GenerateSingleTaskPipelines,
    /// Commit a pipeline definition and write its artifact
    Commit {
        /// Pipeline name
        name: String,
    },
    /// Trigger a run of a pipeline
    Run {
        /// Pipeline name
        name: String,

        /// Run configuration as JSON: {"<task_id>": {"<arg>": value}}
        #[arg(short, long)]
        config: Option<String>,

        /// Run the tasks in-process instead of through the scheduler
        #[arg(long)]
        debug: bool,
    },
    /// Pause a pipeline in the scheduler
    Pause {
        /// Pipeline name
        name: String,
    },
    /// Deregister a pipeline and mark it deleted
    Delete {
        /// Pipeline name
        name: String,
    },
}

pub async fn handle_command(command: Commands, db_env: DbEnv, config: &Config) -> Result<()> {
    let spec = PipelineFactory::get_json_task_spec(config)
        .await
        .with_context(|| format!("Failed to read task spec {}", config.task_spec_file.display()))?;
    let registry = Arc::new(TaskRegistry::from_task_spec(&spec)?);

    if let Commands::Tasks { modules } = &command {
        return list_tasks(&spec, &registry, modules);
    }

    let backends = connect(config, db_env, registry).await?;

    match command {
        Commands::Tasks { .. } => Ok(()),
        Commands::GenerateSingleTaskPipelines => {
            let artifacts = generate_single_task_pipelines(config, &backends, &spec, db_env).await?;
            println!(
                "{}",
                format!("✓ {} single-task pipeline(s) ready", artifacts.len()).green().bold()
            );
            for (task, path) in artifacts {
                println!("  {} {}", task.cyan(), path.display().to_string().dimmed());
            }
            Ok(())
        }
        Commands::Commit { name } => {
            let mut factory = open(config, &backends, &name, db_env).await?;
            if factory.commit_definition().await? {
                println!("{}", format!("✓ Pipeline {} committed", name).green().bold());
            } else {
                println!("{}", format!("Nothing to commit for {}", name).yellow());
            }
            Ok(())
        }
        Commands::Run {
            name,
            config: run_config,
            debug,
        } => {
            let run_config: Option<RunConfig> = run_config
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .context("--config must be a JSON object of task id to arguments")?;

            let mut factory = open(config, &backends, &name, db_env).await?;
            let run = factory.run_pipeline(run_config, debug).await?;

            println!("{}", format!("✓ Pipeline {} submitted", name).green().bold());
            match &run.pipeline_run_id {
                Some(id) => println!("  Run ID: {}", id.cyan()),
                None if debug => println!("  Run ID: {}", "debug".dimmed()),
                None => println!("  Run ID: {}", "not accepted by scheduler".yellow()),
            }
            for (task_id, task_run_id) in &run.task_run_ids {
                println!("    - {}: task run {}", task_id.cyan(), task_run_id);
            }
            Ok(())
        }
        Commands::Pause { name } => {
            let mut factory = open(config, &backends, &name, db_env).await?;
            if factory.pause_pipeline().await? {
                println!("{}", format!("✓ Pipeline {} paused", name).green().bold());
            } else {
                println!("{}", format!("Pipeline {} could not be paused", name).yellow());
            }
            Ok(())
        }
        Commands::Delete { name } => {
            let mut factory = open(config, &backends, &name, db_env).await?;
            if factory.delete_pipeline().await? {
                println!("{}", format!("✓ Pipeline {} deleted", name).green().bold());
            }
            Ok(())
        }
    }
}

fn list_tasks(spec: &TaskSpec, registry: &TaskRegistry, modules: &[String]) -> Result<()> {
    let filter = (!modules.is_empty()).then_some(modules);
    let catalogue = get_tasks_from_json(spec, registry, filter)?;

    if catalogue.is_empty() {
        println!("{}", "No tasks found.".yellow());
        return Ok(());
    }

    println!("{}", format!("Found {} task(s):", catalogue.len()).bold());
    println!();
    for entry in catalogue.values() {
        println!("  {} {}", "▸".cyan(), entry.task.bold());
        println!("    Module: {}", entry.module.dimmed());
        println!("    Args:   {}", entry.args.dimmed());
    }
    Ok(())
}

async fn connect(config: &Config, db_env: DbEnv, registry: Arc<TaskRegistry>) -> Result<Backends> {
    tracing::info!("Connecting to {} database...", db_env);
    let pool = db::create_pool(config.database_url(db_env))
        .await
        .context("Failed to create database pool")?;
    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let scheduler = SchedulerClient::new(config.scheduler_url())
        .with_credentials(config.api_user.clone(), config.api_password.clone());

    let cache: Option<Arc<dyn Cache>> = match RedisCache::connect(&config.redis_url).await {
        Ok(cache) => Some(Arc::new(cache)),
        Err(e) => {
            tracing::warn!("Cache unavailable, task output stays inline: {}", e);
            None
        }
    };

    Ok(Backends {
        store: Arc::new(PgStore::new(pool)),
        registry,
        scheduler: Arc::new(scheduler),
        cache,
    })
}

async fn open(config: &Config, backends: &Backends, name: &str, db_env: DbEnv) -> Result<PipelineFactory> {
    let options = PipelineOptions::named(name).with_db_env(db_env);
    Ok(PipelineFactory::new(config, backends, options).await?)
}

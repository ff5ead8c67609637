use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use viz_launcher::builds::BuildRegistry;
use viz_launcher::cluster_load::OverwatchClient;
use viz_launcher::config::{ClusterConfig, CONFIG_FILE_NAME};
use viz_launcher::error::LauncherError;
use viz_launcher::events::UiEvent;
use viz_launcher::launcher::{Launcher, LauncherOptions};
use viz_launcher::scheduler::SlurmClient;
use viz_launcher::session::{InstanceLock, Session};
use viz_launcher::shutdown::install_shutdown_handler;
use viz_launcher::status_flash::FlashLevel;
use viz_launcher::view::ViewState;

#[derive(Parser, Debug)]
#[command(name = "viz-launcher")]
#[command(version)]
#[command(about = "Launcher for interactive visualization jobs on a Slurm cluster")]
struct Args {
    /// Debug mode: verbose logging and no usage statistics
    #[arg(long)]
    debug: bool,

    /// Path to the cluster configuration file
    /// (default: cluster_configuration.json next to the executable)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Show launcher messages in the log, not only scheduler output
    #[arg(long)]
    verbose: bool,

    /// Delete the activity log and forget tracked jobs before starting
    #[arg(long)]
    clear_log: bool,

    /// Register a custom build as NAME=PATH, PATH ending in Linux64
    #[arg(long, value_name = "NAME=PATH")]
    add_build: Vec<String>,

    /// Forget a custom build
    #[arg(long, value_name = "NAME")]
    remove_build: Vec<String>,

    /// Delete the saved launch settings
    #[arg(long)]
    reset_settings: bool,
}

/// Apply `--add-build` and `--remove-build` before the launcher reads the
/// registry.
async fn update_builds(session: &Session, add: &[String], remove: &[String]) -> Result<(), LauncherError> {
    if add.is_empty() && remove.is_empty() {
        return Ok(());
    }
    let mut registry = BuildRegistry::open(session.builds_file()).await;
    for name in remove {
        if !registry.remove(name).await? {
            eprintln!("No custom build named {}", name);
        }
    }
    for spec in add {
        let Some((name, path)) = spec.split_once('=') else {
            return Err(LauncherError::Validation(format!(
                "--add-build expects NAME=PATH, got {}",
                spec
            )));
        };
        let build = registry.add(name, path).await?;
        println!("Added build {} ({})", build.name, build.product);
    }
    Ok(())
}

fn default_config_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(CONFIG_FILE_NAME)))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
}

fn render(event: &UiEvent, view: &ViewState) {
    match event {
        UiEvent::ClusterLoadUpdated => {
            for (queue, load) in &view.queue_rows {
                println!(
                    "{:<12} total={:<6} available={:<6} used={:<6} reserved={:<6} failed={}",
                    queue, load.total, load.available, load.used, load.reserved, load.failed
                );
            }
        }
        UiEvent::JobListUpdated => {
            println!("{} job(s) in queue", view.jobs.len());
            for job in &view.jobs {
                println!(
                    "{:<10} {:<3} {:<10} {:<10} {:>4} {} {}",
                    job.job_id, job.state, job.name, job.owner, job.cpus, job.submitted, job.nodes
                );
            }
        }
        UiEvent::LogAppended(entry) => {
            if entry.is_visible(view.verbose()) {
                println!("[{}] {} {}", entry.timestamp, entry.job_id, entry.message);
            }
        }
        UiEvent::StatusFlash(step) => {
            println!("status ({}): {}", step.color, step.text);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config_path = args.config.unwrap_or_else(default_config_path);
    let config = match ClusterConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let session = Session::from_env(&config)?;
    session.ensure_app_dir()?;
    update_builds(&session, &args.add_build, &args.remove_build).await?;
    let (lock, lock_existed) = InstanceLock::acquire(session.lock_file())?;

    let scheduler = Arc::new(SlurmClient::new(config.scheduler.clone()));
    let cluster = Arc::new(OverwatchClient::new(config.cluster_status_url()));
    let options = LauncherOptions {
        statistics_enabled: !args.debug,
        ..LauncherOptions::default()
    };

    let (launcher, mut events) = Launcher::start(config, &session, scheduler, cluster, options).await?;
    if lock_existed {
        tracing::warn!(path = %session.lock_file().display(), "Another launcher may be running");
        launcher.flash("Another launcher instance may be running", FlashLevel::Error);
    }
    println!("{}", session.describe());
    if args.reset_settings {
        launcher.reset_settings().await?;
    }
    let saved = launcher.settings().current().await;
    if let Some(spec) = launcher.config().queue(&saved.queue) {
        println!("Saved request on {}: {}", saved.queue, saved.to_request().summary(spec));
    }

    let shutdown = install_shutdown_handler(&launcher.shutdown_token())?;
    let mut view = ViewState::load(args.verbose, launcher.state(), launcher.log_store()).await;
    if args.clear_log {
        launcher.clear_log(&mut view).await?;
    }
    for entry in view.log.iter().rev() {
        println!("[{}] {} {}", entry.timestamp, entry.job_id, entry.message);
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                if view.apply(event.clone(), launcher.state()).await {
                    render(&event, &view);
                }
            }
        }
    }

    drop(events);
    launcher.shutdown().await;
    lock.release();
    Ok(())
}

use std::sync::Arc;

use anyhow::Result;
use console::style;
use tokio::sync::Mutex;

use crate::core::config::{self, Config};
use crate::core::lifecycle::LifecycleManager;
use crate::core::queue::{self, LiveRunnerFactory, WorkerPool};
use crate::core::runner::RunnerConfig;
use crate::core::store::ReviewStore;
use crate::core::terminal::{self, GuideSection, ROCKET};
use crate::logging::init_logging;

pub async fn run_serve() -> Result<()> {
    terminal::print_banner();
    init_logging();

    let config = Config::load().await?;
    let data_dir = config::data_dir();

    terminal::print_step("Preparing store and worker pool...");
    let store = ReviewStore::new(&data_dir).await?;
    terminal::print_status("Data", &data_dir.display().to_string());
    terminal::print_status("Model", &config.model.model);
    terminal::print_status("Tool server", &config.tools.command);

    let factory = Arc::new(LiveRunnerFactory::new(
        config.model.clone(),
        config.tools.clone(),
    ));
    let pool = WorkerPool::new(
        store.clone(),
        factory,
        config.queue.clone(),
        RunnerConfig::from_config(&config),
    );

    let mut lifecycle = LifecycleManager::new().await?;
    lifecycle.attach(Arc::new(Mutex::new(store.clone())));
    lifecycle.attach(Arc::new(Mutex::new(pool)));

    let sweep_store = store.clone();
    let sweep_config = config.queue.clone();
    match tokio_cron_scheduler::Job::new_async(
        config.service.sweep_schedule.as_str(),
        move |_uuid, mut _l| {
            let store = sweep_store.clone();
            let queue_config = sweep_config.clone();
            Box::pin(async move {
                queue::run_sweep(&store, &queue_config).await;
            })
        },
    ) {
        Ok(job) => {
            lifecycle.scheduler.add(job).await?;
        }
        Err(e) => {
            tracing::error!("Failed to create retention sweep cron: {}", e);
        }
    }

    println!("{} {}", ROCKET, style("Starting review service...").bold());
    lifecycle.start().await?;

    GuideSection::new("Review Service")
        .status("Status", &style("READY").green().bold().to_string())
        .status("Workers", &config.queue.concurrency.to_string())
        .status("Sweep", &config.service.sweep_schedule)
        .blank()
        .info(&format!(
            "Press {} to stop",
            style("Ctrl+C").bold().yellow()
        ))
        .print();
    println!();

    tokio::signal::ctrl_c().await?;

    lifecycle.shutdown().await?;
    terminal::print_goodbye();

    Ok(())
}

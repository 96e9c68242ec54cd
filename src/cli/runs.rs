use anyhow::Result;
use console::style;

use crate::core::config::{self, Config};
use crate::core::queue::ReviewQueue;
use crate::core::store::types::RunStatus;
use crate::core::store::ReviewStore;
use crate::core::terminal::{self, GuideSection, LOOKING_GLASS};

async fn open_store() -> Result<ReviewStore> {
    ReviewStore::new(config::data_dir()).await
}

fn styled_status(status: &str) -> String {
    let label = format!("{:<9}", status.to_uppercase());
    match RunStatus::parse(status) {
        Some(RunStatus::Completed) => style(label).green().to_string(),
        Some(RunStatus::Failed) => style(label).red().to_string(),
        Some(RunStatus::Cancelled) => style(label).yellow().to_string(),
        Some(RunStatus::Running) => style(label).cyan().to_string(),
        Some(RunStatus::Pending) | None => style(label).dim().to_string(),
    }
}

pub async fn run_submit(case_id: &str) -> Result<()> {
    let config = Config::load().await?;
    let store = open_store().await?;
    let queue = ReviewQueue::new(store, config.model.model.clone());

    terminal::print_step(&format!("Queueing review for case {}...", case_id));
    let run = queue.submit(case_id).await?;
    terminal::print_success(&format!("Run {} queued", run.id));
    terminal::print_info(&format!("Track it with: adjudex status {}", run.id));
    Ok(())
}

pub async fn run_status(run_id: &str) -> Result<()> {
    let store = open_store().await?;
    let Some(run) = store.get_run(run_id).await? else {
        terminal::print_error(&format!("Run {} not found", run_id));
        return Ok(());
    };

    let mut section = GuideSection::new(&format!("Run {}", run.id))
        .status("Case", &run.case_id)
        .status("Status", &styled_status(&run.status))
        .status("Model", &run.model_id)
        .status("Prompt", &run.prompt_version)
        .status("Turns", &run.total_turns.to_string())
        .status(
            "Tokens",
            &format!("{} in / {} out", run.input_tokens, run.output_tokens),
        )
        .status("Created", &run.created_at);
    if let Some(started) = &run.started_at {
        section = section.status("Started", started);
    }
    if let Some(finished) = &run.finished_at {
        section = section.status("Finished", finished);
    }
    if let Some(error) = &run.error {
        section = section.blank().warn(error);
    }
    section.print();

    if let Some(job) = store.get_queue_job(run_id).await? {
        let mut queue_section = GuideSection::new("Queue")
            .status("State", &job.status)
            .status("Attempts", &job.attempts.to_string())
            .status("Next due", &job.next_attempt_at);
        if let Some(last_error) = &job.last_error {
            queue_section = queue_section.status("Last error", last_error);
        }
        queue_section.print();
    }

    if let Some(determination) = &run.determination {
        let pretty = serde_json::from_str::<serde_json::Value>(determination)
            .and_then(|v| serde_json::to_string_pretty(&v))
            .unwrap_or_else(|_| determination.clone());
        println!("\n {}", style("Determination").bold().underlined());
        println!("{}", pretty);
    }
    println!();
    Ok(())
}

pub async fn run_trace(run_id: &str) -> Result<()> {
    let store = open_store().await?;
    let Some(trace) = store.get_run_trace(run_id).await? else {
        terminal::print_error(&format!("Run {} not found", run_id));
        return Ok(());
    };

    println!(
        "\n{}{}",
        LOOKING_GLASS,
        style(format!("Trace for run {}", trace.run.id)).bold()
    );
    println!("{}", serde_json::to_string_pretty(&trace)?);
    Ok(())
}

pub async fn run_cancel(run_id: &str) -> Result<()> {
    let config = Config::load().await?;
    let store = open_store().await?;
    let queue = ReviewQueue::new(store.clone(), config.model.model.clone());

    if queue.cancel(run_id).await? {
        terminal::print_success(&format!("Run {} cancelled before it started", run_id));
        return Ok(());
    }
    match store.get_run(run_id).await? {
        Some(run) if run.status == RunStatus::Cancelled.as_str() => {
            terminal::print_info(&format!(
                "Run {} is in flight; it will stop at the next turn",
                run_id
            ));
        }
        Some(run) => {
            terminal::print_warn(&format!("Run {} is already {}", run_id, run.status));
        }
        None => terminal::print_error(&format!("Run {} not found", run_id)),
    }
    Ok(())
}

pub async fn run_list(limit: usize) -> Result<()> {
    let store = open_store().await?;
    let runs = store.list_runs(limit).await?;

    if runs.is_empty() {
        GuideSection::new("Runs")
            .warn("No runs recorded yet")
            .text("Queue one with: adjudex submit --case <case-id>")
            .print();
        println!();
        return Ok(());
    }

    let mut section = GuideSection::new(&format!("Last {} run(s)", runs.len()));
    for run in &runs {
        section = section.text(&format!(
            "{}  {}  {}  {}",
            style(&run.id).dim(),
            styled_status(&run.status),
            style(format!("{:<16}", run.case_id)).bold(),
            style(&run.created_at).dim()
        ));
    }
    section.print();
    println!();
    Ok(())
}

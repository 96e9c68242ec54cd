use anyhow::{Context, Result};
use console::style;

use super::PromptSetArgs;
use crate::core::config;
use crate::core::prompt::{BUILTIN_PROMPT_VERSION, BUILTIN_SYSTEM_PROMPT};
use crate::core::store::ReviewStore;
use crate::core::terminal::{self, GuideSection};

pub async fn run_show() -> Result<()> {
    let store = ReviewStore::new(config::data_dir()).await?;
    match store.get_active_system_prompt().await? {
        Some(prompt) => {
            GuideSection::new("Active system prompt")
                .status("Version", &prompt.version)
                .status("Set at", &prompt.created_at)
                .print();
            println!("\n{}", prompt.content);
        }
        None => {
            GuideSection::new("Active system prompt")
                .status(
                    "Version",
                    &format!("{} {}", BUILTIN_PROMPT_VERSION, style("(default)").dim()),
                )
                .print();
            println!("\n{}", BUILTIN_SYSTEM_PROMPT);
        }
    }
    Ok(())
}

pub async fn run_list() -> Result<()> {
    let store = ReviewStore::new(config::data_dir()).await?;
    let prompts = store.list_system_prompts().await?;

    if prompts.is_empty() {
        GuideSection::new("System prompts")
            .warn("No prompt versions stored; the builtin prompt is in use")
            .text("Add one with: adjudex prompt set -v <version> -f <file>")
            .print();
        println!();
        return Ok(());
    }

    let mut section = GuideSection::new("System prompts");
    for prompt in &prompts {
        let marker = if prompt.active {
            style("active  ").green().bold().to_string()
        } else {
            style("inactive").dim().to_string()
        };
        section = section.text(&format!(
            "{}  {}  {}",
            style(format!("{:<12}", prompt.version)).cyan(),
            marker,
            style(&prompt.created_at).dim()
        ));
    }
    section.print();
    println!();
    Ok(())
}

pub async fn run_set(args: PromptSetArgs) -> Result<()> {
    let Some(version) = args.version else {
        terminal::print_error("prompt set needs --version <version>");
        return Ok(());
    };
    let content = match (args.file, args.text) {
        (Some(path), _) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read prompt file {}", path))?,
        (None, Some(text)) => text,
        (None, None) => {
            terminal::print_error("prompt set needs --file <path> or --text <prompt>");
            return Ok(());
        }
    };
    if content.trim().is_empty() {
        terminal::print_error("Prompt content is empty");
        return Ok(());
    }

    let store = ReviewStore::new(config::data_dir()).await?;
    let prompt = store.set_system_prompt(&version, &content).await?;
    terminal::print_success(&format!("Prompt {} is now active", prompt.version));
    terminal::print_info("New runs will pick it up; in-flight runs keep their prompt");
    Ok(())
}

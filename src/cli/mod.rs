mod prompt_cmd;
mod runs;
mod serve;

use anyhow::Result;
use console::style;

use crate::core::terminal::{self, GuideSection};

pub fn print_help() {
    terminal::print_banner();

    GuideSection::new("Service")
        .command("serve", "Run the review worker pool in the foreground")
        .print();

    GuideSection::new("Runs")
        .command("submit", "Queue a review run: submit --case <case-id>")
        .command("status", "Show one run: status <run-id>")
        .command("trace", "Dump a run's full audit trail as JSON: trace <run-id>")
        .command("cancel", "Cancel a queued or in-flight run: cancel <run-id>")
        .command("runs", "List recent runs: runs [--limit <n>]")
        .print();

    GuideSection::new("Prompts")
        .command("prompt", "Manage system prompts: prompt show | list | set")
        .print();

    GuideSection::new("Examples")
        .hint("adjudex serve", "start the service")
        .hint("adjudex submit --case CASE-2041", "queue a review")
        .hint("adjudex prompt set -v 2025.2 -f prompt.md", "activate a prompt version")
        .print();

    println!(
        "\n {} {} <command> [subcommand]\n",
        style("Usage:").bold(),
        style("adjudex").green()
    );
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    let cmd = args[1].as_str();
    let sub_cmd = if args.len() > 2 { args[2].as_str() } else { "" };

    match cmd {
        "serve" => serve::run_serve().await?,
        "submit" => match parse_submit_args(&args, 2) {
            Some(case_id) => runs::run_submit(&case_id).await?,
            None => {
                terminal::print_error("submit needs --case <case-id>");
                print_help();
            }
        },
        "status" => {
            if sub_cmd.is_empty() {
                terminal::print_error("status needs a run id");
            } else {
                runs::run_status(sub_cmd).await?;
            }
        }
        "trace" => {
            if sub_cmd.is_empty() {
                terminal::print_error("trace needs a run id");
            } else {
                runs::run_trace(sub_cmd).await?;
            }
        }
        "cancel" => {
            if sub_cmd.is_empty() {
                terminal::print_error("cancel needs a run id");
            } else {
                runs::run_cancel(sub_cmd).await?;
            }
        }
        "runs" => runs::run_list(parse_runs_limit(&args, 2)).await?,
        "prompt" => match sub_cmd {
            "show" => prompt_cmd::run_show().await?,
            "list" => prompt_cmd::run_list().await?,
            "set" => prompt_cmd::run_set(parse_prompt_set_args(&args, 3)).await?,
            _ => {
                terminal::print_error(&format!("Unknown prompt subcommand: {}", sub_cmd));
                print_help();
            }
        },
        "help" | "--help" | "-h" => print_help(),
        _ => {
            terminal::print_error(&format!("Unknown command: {}", cmd));
            print_help();
        }
    }

    Ok(())
}

pub(crate) fn parse_submit_args(args: &[String], start: usize) -> Option<String> {
    let mut case_id: Option<String> = None;
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--case" | "-c" => {
                if i + 1 < args.len() {
                    case_id = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    case_id
}

#[derive(Debug, Default, PartialEq)]
pub(crate) struct PromptSetArgs {
    pub version: Option<String>,
    pub file: Option<String>,
    pub text: Option<String>,
}

pub(crate) fn parse_prompt_set_args(args: &[String], start: usize) -> PromptSetArgs {
    let mut parsed = PromptSetArgs::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--version" | "-v" => {
                if i + 1 < args.len() {
                    parsed.version = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--file" | "-f" => {
                if i + 1 < args.len() {
                    parsed.file = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--text" | "-t" => {
                if i + 1 < args.len() {
                    parsed.text = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    parsed
}

pub(crate) fn parse_runs_limit(args: &[String], start: usize) -> usize {
    let mut limit: usize = 20;
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--limit" | "-n" => {
                if i + 1 < args.len() {
                    if let Ok(n) = args[i + 1].parse::<usize>() {
                        if n > 0 {
                            limit = n;
                        }
                    }
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    limit
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- Submit parsing ---

    #[test]
    fn parse_submit_reads_the_case_flag() {
        let args = vec![
            "adjudex".to_string(),
            "submit".to_string(),
            "--case".to_string(),
            "CASE-2041".to_string(),
        ];
        assert_eq!(parse_submit_args(&args, 2), Some("CASE-2041".to_string()));
    }

    #[test]
    fn parse_submit_accepts_the_short_flag() {
        let args = vec![
            "adjudex".to_string(),
            "submit".to_string(),
            "-c".to_string(),
            "CASE-7".to_string(),
        ];
        assert_eq!(parse_submit_args(&args, 2), Some("CASE-7".to_string()));
    }

    #[test]
    fn parse_submit_without_a_value_is_none() {
        let args = vec![
            "adjudex".to_string(),
            "submit".to_string(),
            "--case".to_string(),
        ];
        assert_eq!(parse_submit_args(&args, 2), None);
    }

    // --- Prompt set parsing ---

    #[test]
    fn parse_prompt_set_reads_every_flag() {
        let args = vec![
            "adjudex".to_string(),
            "prompt".to_string(),
            "set".to_string(),
            "--version".to_string(),
            "2025.2".to_string(),
            "--file".to_string(),
            "prompt.md".to_string(),
        ];
        let parsed = parse_prompt_set_args(&args, 3);
        assert_eq!(parsed.version.as_deref(), Some("2025.2"));
        assert_eq!(parsed.file.as_deref(), Some("prompt.md"));
        assert_eq!(parsed.text, None);
    }

    #[test]
    fn parse_prompt_set_takes_inline_text() {
        let args = vec![
            "adjudex".to_string(),
            "prompt".to_string(),
            "set".to_string(),
            "-v".to_string(),
            "draft".to_string(),
            "-t".to_string(),
            "You are a reviewer.".to_string(),
        ];
        let parsed = parse_prompt_set_args(&args, 3);
        assert_eq!(parsed.version.as_deref(), Some("draft"));
        assert_eq!(parsed.text.as_deref(), Some("You are a reviewer."));
        assert_eq!(parsed.file, None);
    }

    #[test]
    fn parse_prompt_set_defaults_to_empty() {
        let args = vec![
            "adjudex".to_string(),
            "prompt".to_string(),
            "set".to_string(),
        ];
        assert_eq!(parse_prompt_set_args(&args, 3), PromptSetArgs::default());
    }

    // --- Runs limit parsing ---

    #[test]
    fn parse_runs_limit_defaults_to_twenty() {
        let args = vec!["adjudex".to_string(), "runs".to_string()];
        assert_eq!(parse_runs_limit(&args, 2), 20);
    }

    #[test]
    fn parse_runs_limit_reads_the_flag() {
        let args = vec![
            "adjudex".to_string(),
            "runs".to_string(),
            "--limit".to_string(),
            "5".to_string(),
        ];
        assert_eq!(parse_runs_limit(&args, 2), 5);
    }

    #[test]
    fn parse_runs_limit_ignores_unusable_values() {
        let args = vec![
            "adjudex".to_string(),
            "runs".to_string(),
            "-n".to_string(),
            "zero".to_string(),
        ];
        assert_eq!(parse_runs_limit(&args, 2), 20);

        let args = vec![
            "adjudex".to_string(),
            "runs".to_string(),
            "-n".to_string(),
            "0".to_string(),
        ];
        assert_eq!(parse_runs_limit(&args, 2), 20);
    }
}

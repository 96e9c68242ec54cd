
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::model::{ChatMessage, ContentBlock, ModelClient, ModelRequest, StopReason};
use crate::core::prompt;
use crate::core::store::types::RunStatus;
use crate::core::store::{best_effort, RunStore};
use crate::core::tools::bridge::build_tool_specs;
use crate::core::tools::ToolClient;

/// Per-run knobs, resolved from config by whoever builds the runner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub model_id: String,
    pub max_turns: u32,
    pub max_tokens: u32,
    pub determination_tool: String,
}

impl RunnerConfig {
    pub fn from_config(config: &crate::core::config::Config) -> Self {
        Self {
            model_id: config.model.model.clone(),
            max_turns: config.review.max_turns,
            max_tokens: config.model.max_tokens,
            determination_tool: config.review.determination_tool.clone(),
        }
    }
}

/// What a run produced. `run` never returns `Err`: failures become a
/// `failed` outcome after the row has been marked best-effort.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub determination: Option<Value>,
    pub error: Option<String>,
}

/// Conversation state machine for one review. Drives turns against the
/// model until it stops asking for tools, a cancel lands, or the turn
/// budget runs out, persisting every turn and tool call on the way.
pub struct ReviewRunner {
    model: Arc<dyn ModelClient>,
    tools: Arc<dyn ToolClient>,
    store: Arc<dyn RunStore>,
    config: RunnerConfig,
}

#[derive(Debug, Default)]
struct Progress {
    turns: i64,
    input_tokens: i64,
    output_tokens: i64,
    determination: Option<Value>,
}

enum LoopEnd {
    Completed,
    /// The cancel path already finalized the row; the loop leaves it alone.
    Cancelled,
}

impl ReviewRunner {
    pub fn new(
        model: Arc<dyn ModelClient>,
        tools: Arc<dyn ToolClient>,
        store: Arc<dyn RunStore>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            model,
            tools,
            store,
            config,
        }
    }

    /// Execute a review for `case_id`. Pass `existing_run_id` to resume a
    /// pre-created pending run (the queue path); otherwise a fresh run row
    /// is created here.
    pub async fn run(&self, case_id: &str, existing_run_id: Option<&str>) -> RunOutcome {
        // Prompt resolution cannot fail, and the run row records the
        // version it was created under.
        let (system, prompt_version) = prompt::resolve_system_prompt(self.store.as_ref()).await;

        let run_id = match existing_run_id {
            Some(id) => id.to_string(),
            None => {
                match self
                    .store
                    .create_run(case_id, &self.config.model_id, &prompt_version)
                    .await
                {
                    Ok(rec) => rec.id,
                    Err(e) => {
                        // No row exists, so there is nothing to mark failed.
                        warn!("Could not create run for case {}: {:#}", case_id, e);
                        return RunOutcome {
                            run_id: String::new(),
                            status: RunStatus::Failed,
                            determination: None,
                            error: Some(format!("Failed to create run: {}", e)),
                        };
                    }
                }
            }
        };

        let mut progress = Progress::default();
        match self.drive(&run_id, case_id, &system, &mut progress).await {
            Ok(LoopEnd::Completed) => {
                info!(
                    "Run {} completed after {} turn(s){}",
                    run_id,
                    progress.turns,
                    if progress.determination.is_some() {
                        " with a determination"
                    } else {
                        ""
                    }
                );
                RunOutcome {
                    run_id,
                    status: RunStatus::Completed,
                    determination: progress.determination,
                    error: None,
                }
            }
            Ok(LoopEnd::Cancelled) => {
                info!("Run {} cancelled", run_id);
                RunOutcome {
                    run_id,
                    status: RunStatus::Cancelled,
                    determination: None,
                    error: None,
                }
            }
            Err(e) => {
                let message = format!("{:#}", e);
                warn!("Run {} failed: {}", run_id, message);
                best_effort(
                    "mark run failed",
                    self.store
                        .finalize_run(
                            &run_id,
                            RunStatus::Failed,
                            None,
                            Some(&message),
                            progress.turns,
                            progress.input_tokens,
                            progress.output_tokens,
                        )
                        .await,
                );
                RunOutcome {
                    run_id,
                    status: RunStatus::Failed,
                    determination: None,
                    error: Some(message),
                }
            }
        }
    }

    /// The fallible body. Any error lands in `run`'s single catch.
    async fn drive(
        &self,
        run_id: &str,
        case_id: &str,
        system: &str,
        progress: &mut Progress,
    ) -> Result<LoopEnd> {
        match self.store.get_run(run_id).await? {
            None => bail!("Run {} not found", run_id),
            Some(run) => match RunStatus::parse(&run.status) {
                Some(RunStatus::Cancelled) => {
                    info!("Run {} was cancelled before it started", run_id);
                    return Ok(LoopEnd::Cancelled);
                }
                Some(RunStatus::Pending) => {
                    if !self.store.mark_run_running(run_id).await? {
                        // Lost the pending state between read and mark.
                        let status = self
                            .store
                            .get_run(run_id)
                            .await?
                            .map(|r| r.status)
                            .unwrap_or_else(|| "missing".to_string());
                        if status == "cancelled" {
                            return Ok(LoopEnd::Cancelled);
                        }
                        bail!("Run {} is already {}", run_id, status);
                    }
                }
                _ => bail!("Run {} is already {}", run_id, run.status),
            },
        }

        let descriptors = self
            .tools
            .list_tools()
            .await
            .context("Failed to list tools")?;
        let tool_specs = build_tool_specs(&descriptors);
        info!(
            "Run {} started for case {} with {} tool(s)",
            run_id,
            case_id,
            tool_specs.len()
        );

        let seed = prompt::seed_instruction(case_id, &self.config.determination_tool);
        let mut history = vec![ChatMessage::user(vec![ContentBlock::Text { text: seed }])];

        for turn_number in 1..=i64::from(self.config.max_turns) {
            // Cancellation is cooperative: it lands between turns, never
            // mid-call. The cancel path finalized the row already.
            if let Some(run) = self.store.get_run(run_id).await? {
                if run.status == "cancelled" {
                    info!("Run {} cancelled at turn {}", run_id, turn_number);
                    return Ok(LoopEnd::Cancelled);
                }
            }

            let started = Instant::now();
            let response = self
                .model
                .create_message(ModelRequest {
                    model: &self.config.model_id,
                    max_tokens: self.config.max_tokens,
                    system,
                    messages: &history,
                    tools: &tool_specs,
                })
                .await?;
            let latency_ms = started.elapsed().as_millis() as i64;

            let content_json = serde_json::to_string(&response.content)?;
            self.store
                .add_turn(
                    run_id,
                    turn_number,
                    &content_json,
                    response.stop_reason.as_str(),
                    i64::from(response.usage.input_tokens),
                    i64::from(response.usage.output_tokens),
                    latency_ms,
                )
                .await
                .context("Failed to persist turn")?;
            progress.turns = turn_number;
            progress.input_tokens += i64::from(response.usage.input_tokens);
            progress.output_tokens += i64::from(response.usage.output_tokens);

            debug!(
                "Run {} turn {}: stop_reason={}, {}ms",
                run_id,
                turn_number,
                response.stop_reason.as_str(),
                latency_ms
            );

            history.push(ChatMessage::assistant(response.content.clone()));

            match response.stop_reason {
                StopReason::EndTurn => break,
                StopReason::ToolUse => {
                    let results = self
                        .execute_tool_calls(run_id, turn_number, &response.content, progress)
                        .await?;
                    if results.is_empty() {
                        warn!(
                            "Run {} turn {}: tool_use stop with no tool_use blocks",
                            run_id, turn_number
                        );
                        break;
                    }
                    // All of the turn's results go back as one synthetic
                    // user message; it is not persisted as a turn.
                    history.push(ChatMessage::user(results));
                }
                other => {
                    warn!(
                        "Run {} turn {}: stopping on '{}'",
                        run_id,
                        turn_number,
                        other.as_str()
                    );
                    break;
                }
            }
        }

        // Budget exhaustion lands here too: partial work is still a
        // completed run, deferred to human review downstream.
        let determination_json = progress.determination.as_ref().map(|d| d.to_string());
        let finalized = self
            .store
            .finalize_run(
                run_id,
                RunStatus::Completed,
                determination_json.as_deref(),
                None,
                progress.turns,
                progress.input_tokens,
                progress.output_tokens,
            )
            .await
            .context("Failed to finalize run")?;
        if !finalized {
            // A cancel slipped in after the last per-turn check.
            return Ok(LoopEnd::Cancelled);
        }
        Ok(LoopEnd::Completed)
    }

    /// Invoke every tool-use block of one assistant turn, in order.
    /// Returns the tool-result blocks to feed back to the model.
    async fn execute_tool_calls(
        &self,
        run_id: &str,
        turn_number: i64,
        blocks: &[ContentBlock],
        progress: &mut Progress,
    ) -> Result<Vec<ContentBlock>> {
        let mut results = Vec::new();
        for block in blocks {
            let ContentBlock::ToolUse { id, name, input } = block else {
                continue;
            };

            debug!("Run {} turn {}: calling tool {}", run_id, turn_number, name);
            let started = Instant::now();
            match self.tools.call_tool(name, input.clone()).await {
                Ok(result) => {
                    let latency_ms = started.elapsed().as_millis() as i64;
                    if *name == self.config.determination_tool {
                        if let Some(det) = extract_determination(&result) {
                            info!(
                                "Run {}: determination captured at turn {}",
                                run_id, turn_number
                            );
                            progress.determination = Some(det);
                        }
                    }
                    let output_json = serde_json::to_string(&result)?;
                    self.store
                        .add_tool_call(
                            run_id,
                            turn_number,
                            id,
                            name,
                            &input.to_string(),
                            Some(&output_json),
                            None,
                            latency_ms,
                        )
                        .await
                        .context("Failed to persist tool call")?;
                    results.push(ContentBlock::ToolResult {
                        tool_use_id: id.clone(),
                        content: tool_result_content(&result),
                        is_error: None,
                    });
                }
                Err(e) => {
                    let latency_ms = started.elapsed().as_millis() as i64;
                    // The failed call still reaches the audit trail even
                    // though the run is about to fail.
                    best_effort(
                        "record failed tool call",
                        self.store
                            .add_tool_call(
                                run_id,
                                turn_number,
                                id,
                                name,
                                &input.to_string(),
                                None,
                                Some(&format!("{:#}", e)),
                                latency_ms,
                            )
                            .await,
                    );
                    return Err(e).with_context(|| format!("Tool '{}' failed", name));
                }
            }
        }
        Ok(results)
    }
}

/// Tool services wrap their payload in a `content` envelope; the model
/// wants the blocks themselves.
fn tool_result_content(result: &Value) -> Value {
    result
        .get("content")
        .cloned()
        .unwrap_or_else(|| result.clone())
}

/// First `content[].text` of a tool result, parsed as a JSON object.
/// Anything else leaves the determination unset.
fn extract_determination(result: &Value) -> Option<Value> {
    let blocks = result.get("content")?.as_array()?;
    let text = blocks.iter().find_map(|block| {
        if block.get("type").and_then(Value::as_str) == Some("text") {
            block.get("text").and_then(Value::as_str)
        } else {
            None
        }
    })?;
    let parsed: Value = serde_json::from_str(text).ok()?;
    parsed.is_object().then_some(parsed)
}

use tracing::{debug, warn};

use crate::core::store::RunStore;

pub const BUILTIN_PROMPT_VERSION: &str = "builtin";

pub const BUILTIN_SYSTEM_PROMPT: &str = "\
You are an automated clinical review assistant performing utilization review \
for a health plan. You are given a case identifier and a set of tools that \
expose the case record, the clinical documentation, and the applicable \
coverage criteria.

Work the review step by step:
1. Retrieve the case record and identify the requested service.
2. Pull the clinical documentation relevant to the request.
3. Retrieve the coverage criteria that govern the requested service and check \
each criterion against the documented evidence.
4. When the evidence is complete, submit your conclusion with the \
determination tool, citing the criteria and the supporting evidence.

Ground every statement in tool results. If the documentation does not \
establish a criterion, say so rather than assuming it. A case you cannot \
decide must be escalated for human review, never guessed.";

/// Resolve the active system prompt and its version. Never fails: any
/// store problem falls back to the builtin prompt.
pub async fn resolve_system_prompt(store: &dyn RunStore) -> (String, String) {
    match store.get_active_system_prompt().await {
        Ok(Some(prompt)) => {
            debug!("Using system prompt version '{}'", prompt.version);
            (prompt.content, prompt.version)
        }
        Ok(None) => (
            BUILTIN_SYSTEM_PROMPT.to_string(),
            BUILTIN_PROMPT_VERSION.to_string(),
        ),
        Err(e) => {
            warn!("Failed to load active system prompt, using builtin: {}", e);
            (
                BUILTIN_SYSTEM_PROMPT.to_string(),
                BUILTIN_PROMPT_VERSION.to_string(),
            )
        }
    }
}

/// The single synthetic user message that opens every review conversation.
pub fn seed_instruction(case_id: &str, determination_tool: &str) -> String {
    format!(
        "Review case {}. Use the available tools to retrieve the case record, the clinical \
         documentation, and the applicable coverage criteria, then work through the review. \
         When your review is complete, submit your conclusion with the `{}` tool.",
        case_id, determination_tool
    )
}

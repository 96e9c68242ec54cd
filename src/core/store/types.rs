/// Run lifecycle. `cancelled` is the only externally-triggered transition;
/// `pending -> failed` covers the queue's failure hook marking a run that
/// never started. Terminal rows are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<RunStatus> {
        match s {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

pub fn can_transition(from: RunStatus, to: RunStatus) -> bool {
    use RunStatus::*;
    matches!(
        (from, to),
        (Pending, Running)
            | (Pending, Failed)
            | (Pending, Cancelled)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Cancelled)
    )
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RunRecord {
    pub id: String,
    pub case_id: String,
    pub status: String,
    pub model_id: String,
    pub prompt_version: String,
    pub total_turns: i64,
    pub determination: Option<String>,
    pub error: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TurnRecord {
    pub id: i64,
    pub run_id: String,
    pub turn_number: i64,
    pub role: String,
    /// Serialized content blocks of the assistant message.
    pub content: String,
    pub stop_reason: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub latency_ms: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolCallRecord {
    pub id: i64,
    pub run_id: String,
    pub turn_number: i64,
    pub tool_use_id: String,
    pub tool_name: String,
    pub input: String,
    pub output: Option<String>,
    pub error: Option<String>,
    pub latency_ms: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueJobRecord {
    pub run_id: String,
    pub case_id: String,
    pub status: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub next_attempt_at: String,
    pub created_at: String,
    pub updated_at: String,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SystemPromptRecord {
    pub id: i64,
    pub version: String,
    pub content: String,
    pub active: bool,
    pub created_at: String,
}

/// One persisted turn with the tool calls it produced.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TurnTrace {
    pub turn: TurnRecord,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Full audit trail of one run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunTrace {
    pub run: RunRecord,
    pub turns: Vec<TurnTrace>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_matrix() {
        use RunStatus::*;
        assert!(can_transition(Pending, Running));
        assert!(can_transition(Pending, Failed));
        assert!(can_transition(Pending, Cancelled));
        assert!(can_transition(Running, Completed));
        assert!(can_transition(Running, Failed));
        assert!(can_transition(Running, Cancelled));

        assert!(!can_transition(Pending, Completed));
        assert!(!can_transition(Running, Pending));
        for terminal in [Completed, Failed, Cancelled] {
            for to in [Pending, Running, Completed, Failed, Cancelled] {
                assert!(!can_transition(terminal, to), "{:?} -> {:?}", terminal, to);
            }
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::parse("canceled"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }
}

//! Static classification of ask subtypes.
//!
//! Adding a new ask subtype is a one-line change to [`ASK_CATEGORIES`] plus,
//! when it needs bespoke behavior, a handler in the dispatcher. Subtypes not in
//! the table are `Interactive`.

use crate::core::types::{AskCategory, RequiredAction};

pub const FOLLOWUP: &str = "followup";
pub const COMMAND: &str = "command";
pub const COMMAND_OUTPUT: &str = "command_output";
pub const COMPLETION_RESULT: &str = "completion_result";
pub const TOOL: &str = "tool";
pub const API_REQ_FAILED: &str = "api_req_failed";
pub const RESUME_TASK: &str = "resume_task";
pub const RESUME_COMPLETED_TASK: &str = "resume_completed_task";
pub const MISTAKE_LIMIT_REACHED: &str = "mistake_limit_reached";
pub const BROWSER_ACTION_LAUNCH: &str = "browser_action_launch";
pub const USE_MCP_SERVER: &str = "use_mcp_server";
pub const AUTO_APPROVAL_MAX_REQ_REACHED: &str = "auto_approval_max_req_reached";

/// Say subtype that brackets an API request; its payload gains `cost` when done.
pub const API_REQ_STARTED: &str = "api_req_started";

pub const ASK_CATEGORIES: &[(&str, AskCategory)] = &[
    (COMMAND_OUTPUT, AskCategory::NonBlocking),
    (COMPLETION_RESULT, AskCategory::Idle),
    (API_REQ_FAILED, AskCategory::Idle),
    (RESUME_COMPLETED_TASK, AskCategory::Idle),
    (MISTAKE_LIMIT_REACHED, AskCategory::Idle),
    (AUTO_APPROVAL_MAX_REQ_REACHED, AskCategory::Idle),
    (RESUME_TASK, AskCategory::Resumable),
    (FOLLOWUP, AskCategory::Interactive),
    (COMMAND, AskCategory::Interactive),
    (TOOL, AskCategory::Interactive),
    (BROWSER_ACTION_LAUNCH, AskCategory::Interactive),
    (USE_MCP_SERVER, AskCategory::Interactive),
];

const IDLE_ACTIONS: &[(&str, RequiredAction)] = &[
    (COMPLETION_RESULT, RequiredAction::StartTask),
    (API_REQ_FAILED, RequiredAction::RetryOrNewTask),
    (MISTAKE_LIMIT_REACHED, RequiredAction::ProceedOrNewTask),
    (AUTO_APPROVAL_MAX_REQ_REACHED, RequiredAction::StartNewTask),
    (RESUME_COMPLETED_TASK, RequiredAction::StartNewTask),
];

/// Category for an ask subtype; unknown subtypes are interactive.
pub fn classify_ask(subtype: &str) -> AskCategory {
    ASK_CATEGORIES
        .iter()
        .find(|(name, _)| *name == subtype)
        .map(|(_, category)| *category)
        .unwrap_or(AskCategory::Interactive)
}

/// Action the user must take for a final ask of `subtype`.
pub fn required_action(subtype: &str) -> RequiredAction {
    match classify_ask(subtype) {
        AskCategory::Idle => IDLE_ACTIONS
            .iter()
            .find(|(name, _)| *name == subtype)
            .map(|(_, action)| *action)
            .unwrap_or(RequiredAction::StartNewTask),
        AskCategory::Resumable => RequiredAction::ResumeOrAbandon,
        AskCategory::NonBlocking => RequiredAction::ContinueOrAbort,
        AskCategory::Interactive if subtype == FOLLOWUP => RequiredAction::Answer,
        AskCategory::Interactive => RequiredAction::Approve,
    }
}

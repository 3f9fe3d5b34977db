//! Non-interactive driver runs: inbound payloads in, outbound payloads out.

use agent_control::dispatch::{AskDispatcher, DispatchConfig};
use agent_control::driver::SessionDriver;
use agent_control::io::prompt::ConfirmRequest;
use agent_control::io::wire::OutboundMessage;
use agent_control::session::SessionClient;
use agent_control::test_support::{
    PromptCall, RecordingSink, ScriptedPrompter, ScriptedReply, api_req_started, ask, say,
    snapshot_json, update_json,
};

fn unattended(prompter: ScriptedPrompter) -> SessionDriver<ScriptedPrompter, RecordingSink> {
    SessionDriver::new(
        SessionClient::new(),
        AskDispatcher::new(prompter, DispatchConfig::non_interactive()),
        RecordingSink::default(),
    )
}

/// Routine asks are approved, protected ones go to a human, completion is silent.
#[tokio::test]
async fn unattended_run_answers_each_ask_once() {
    let prompter = ScriptedPrompter::new([ScriptedReply::Confirm(Some(false))]);
    let mut driver = unattended(prompter);
    let mut history = vec![
        api_req_started(1, r#"{"cost":0.01}"#),
        say(2, "text", "Reading the file first."),
        ask(3, "tool", r#"{"tool":"readFile","path":"src/lib.rs"}"#),
    ];

    driver.handle_inbound(&snapshot_json(&history, Some("code"), Some(1)));
    driver.settle().await;
    driver.handle_inbound(&snapshot_json(&history, Some("code"), Some(2)));
    driver.settle().await;

    let protected = r#"{"tool":"editedExistingFile","path":".env","isProtected":true}"#;
    history.push(ask(4, "tool", protected));
    driver.handle_inbound(&update_json(&ask(4, "tool", protected)));
    driver.settle().await;

    history.push(ask(5, "completion_result", "done"));
    driver.handle_inbound(&snapshot_json(&history, None, Some(3)));
    driver.settle().await;

    assert_eq!(
        driver.sink().sent(),
        vec![OutboundMessage::approve(), OutboundMessage::deny()]
    );
    let calls = driver.dispatcher().prompter().calls();
    assert_eq!(calls.len(), 1);
    assert!(matches!(
        &calls[0],
        PromptCall::Confirm(ConfirmRequest { ask_id: 4, .. })
    ));
    assert!(driver.dispatcher().is_handled(5));
}

/// An unanswered follow-up falls back to its first suggestion after the timeout.
#[tokio::test(start_paused = true)]
async fn unattended_followup_uses_suggestion_after_timeout() {
    let mut driver = unattended(ScriptedPrompter::new([ScriptedReply::Hang]));
    driver.handle_inbound(&snapshot_json(
        &[ask(
            1,
            "followup",
            r#"{"question":"Which test runner?","suggest":[{"answer":"cargo test"},{"answer":"nextest"}]}"#,
        )],
        None,
        None,
    ));
    driver.settle().await;

    assert_eq!(
        driver.sink().sent(),
        vec![OutboundMessage::answer("cargo test")]
    );
}

/// A failed request is retried automatically.
#[tokio::test]
async fn failed_request_is_retried() {
    let mut driver = unattended(ScriptedPrompter::default());
    driver.handle_inbound(&snapshot_json(
        &[ask(1, "api_req_failed", "rate limited")],
        None,
        None,
    ));
    driver.settle().await;
    assert_eq!(driver.sink().sent(), vec![OutboundMessage::approve()]);
}

//! End-to-end behavior of one instance engine against a scripted provider.

mod common;

use common::{start_engine, temp_dir, test_config, test_settings, ScriptedProvider};
use gateway::status::EndpointStatus;
use gateway::{AskOverrides, HeuristicEstimator, HistoryQuery, InstanceState, SettingsUpdate, TokenEstimator};
use llm::{LlmError, Role, TokenUsage};
use std::sync::Arc;
use std::time::Duration;

fn drain_states(rx: &mut tokio::sync::broadcast::Receiver<gateway::StatusTransition>) -> Vec<InstanceState> {
    let mut states = Vec::new();
    while let Ok(transition) = rx.try_recv() {
        states.push(transition.to);
    }
    states
}

#[tokio::test(start_paused = true)]
async fn test_request_interval_spaces_dispatches() {
    let dir = temp_dir();
    let mut config = test_config("spacing");
    config.request_interval = 2.0;
    let provider = Arc::new(ScriptedProvider::new());
    let engine = start_engine(dir.path(), config.resolve().unwrap(), provider.clone());

    let first = engine.ask_with_handle("first question", AskOverrides::default()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = engine.ask_with_handle("second question", AskOverrides::default()).unwrap();

    assert!(first.result().await.success);
    assert!(second.result().await.success);

    let times = provider.dispatch_times();
    assert_eq!(times.len(), 2);
    assert!(times[1] - times[0] >= Duration::from_secs(2));

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_twice_then_success() {
    let dir = temp_dir();
    let provider = Arc::new(
        ScriptedProvider::new()
            .then_err(LlmError::RateLimited("slow down".into()))
            .then_err(LlmError::RateLimited("slow down".into()))
            .then_ok("It is sunny."),
    );
    let engine = start_engine(dir.path(), test_settings("weather"), provider.clone());
    let mut transitions = engine.subscribe_transitions();

    let result = engine.ask("What is the weather?", AskOverrides::default()).await;

    assert!(result.success);
    assert_eq!(result.response_text, "It is sunny.");
    assert_eq!(provider.call_count(), 3);
    assert_eq!(
        drain_states(&mut transitions),
        vec![
            InstanceState::Queued,
            InstanceState::Processing,
            InstanceState::RateLimited,
            InstanceState::Processing,
            InstanceState::RateLimited,
            InstanceState::Processing,
            InstanceState::Ready,
        ]
    );

    // Exponential backoff without jitter: 1s then 2s.
    let times = provider.dispatch_times();
    assert!(times[1] - times[0] >= Duration::from_secs(1));
    assert!(times[2] - times[1] >= Duration::from_secs(2));

    let status = engine.status();
    assert_eq!(status.metrics.successful_requests, 1);
    assert_eq!(status.metrics.total_errors, 2);
    assert_eq!(status.state, InstanceState::Ready);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_auth_error_fails_without_retry() {
    let dir = temp_dir();
    let provider = Arc::new(ScriptedProvider::new().then_err(LlmError::AuthError("invalid api key".into())));
    let engine = start_engine(dir.path(), test_settings("locked"), provider.clone());

    let result = engine.ask("Hello?", AskOverrides::default()).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("invalid api key"));
    assert_eq!(provider.call_count(), 1);

    let status = engine.status();
    assert_eq!(status.state, InstanceState::Error);
    assert_eq!(status.endpoint_status, EndpointStatus::AuthFailed);
    assert_eq!(status.metrics.failed_requests, 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_history_rotation_keeps_last_entries() {
    let dir = temp_dir();
    let mut config = test_config("rotating");
    config.max_history_entries = 3;
    let provider = Arc::new(ScriptedProvider::new());
    let engine = start_engine(dir.path(), config.resolve().unwrap(), provider);

    for i in 1..=5 {
        let result = engine.ask(format!("question {}", i), AskOverrides::default()).await;
        assert!(result.success);
        assert!(result.warning.is_none());
    }

    let recent = engine.recent_history(10).await;
    let questions: Vec<_> = recent.iter().map(|r| r.question.as_str()).collect();
    assert_eq!(questions, vec!["question 3", "question 4", "question 5"]);

    let archives: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("rotating_history_archive_"))
        .collect();
    assert_eq!(archives.len(), 1);

    let archived: Vec<_> = engine
        .archived_history()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.question)
        .collect();
    assert_eq!(archived, vec!["question 1", "question 2"]);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_missing_usage_is_estimated() {
    let question = "Are the kitchen lights still on?";
    let answer = "Yes, the kitchen lights are on.";
    let estimator = HeuristicEstimator;
    let expected_prompt = estimator.estimate(question);
    let expected_completion = estimator.estimate(answer);

    let mut counts = Vec::new();
    for _ in 0..2 {
        let dir = temp_dir();
        let provider = Arc::new(ScriptedProvider::new().then_ok_without_usage(answer));
        let engine = start_engine(dir.path(), test_settings("kitchen"), provider);

        let result = engine.ask(question, AskOverrides::default()).await;
        assert!(result.success);
        assert_eq!(result.prompt_tokens, expected_prompt);
        assert_eq!(result.completion_tokens, expected_completion);
        assert_eq!(result.tokens_used, expected_prompt + expected_completion);

        let mut query = HistoryQuery::new("kitchen");
        query.include_metadata = true;
        let entries = engine.get_history(&query).await;
        assert!(entries[0].metadata.as_ref().unwrap().tokens_estimated);

        counts.push((result.prompt_tokens, result.completion_tokens));
        engine.shutdown().await;
    }

    assert_eq!(counts[0], counts[1]);
}

#[tokio::test]
async fn test_partial_usage_is_completed_per_field() {
    let question = "Is the garage door closed?";
    let answer = "Yes, the garage door closed ten minutes ago.";
    let estimator = HeuristicEstimator;

    let dir = temp_dir();
    let provider = Arc::new(
        ScriptedProvider::new()
            .then_ok_with_usage(answer, TokenUsage { prompt: Some(12), completion: None, total: None })
            .then_ok_with_usage(answer, TokenUsage { prompt: None, completion: None, total: Some(50) }),
    );
    let engine = start_engine(dir.path(), test_settings("garage"), provider);

    let prompt_only = engine.ask(question, AskOverrides::default()).await;
    assert!(prompt_only.success);
    assert_eq!(prompt_only.prompt_tokens, 12);
    assert_eq!(prompt_only.completion_tokens, estimator.estimate(answer));
    assert_eq!(prompt_only.tokens_used, 12 + estimator.estimate(answer));

    let total_only = engine.ask(question, AskOverrides::default()).await;
    assert!(total_only.success);
    assert_eq!(total_only.prompt_tokens, estimator.estimate(question));
    assert_eq!(total_only.completion_tokens, estimator.estimate(answer));
    assert_eq!(total_only.tokens_used, 50);

    let mut query = HistoryQuery::new("garage");
    query.include_metadata = true;
    let entries = engine.get_history(&query).await;
    assert!(entries.iter().all(|e| e.metadata.as_ref().unwrap().tokens_estimated));

    let metrics = engine.status().metrics;
    assert_eq!(metrics.completion_tokens, 2 * estimator.estimate(answer));
    assert_eq!(metrics.total_tokens, 12 + estimator.estimate(answer) + 50);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_context_includes_previous_successful_exchanges() {
    let dir = temp_dir();
    let provider = Arc::new(
        ScriptedProvider::new()
            .then_ok("Twenty one degrees.")
            .then_err(LlmError::ContextTooLong("too long".into()))
            .then_ok("It is humid."),
    );
    let engine = start_engine(dir.path(), test_settings("climate"), provider.clone());

    assert!(engine.ask("How warm is it?", AskOverrides::default()).await.success);
    assert!(!engine.ask("Summarize the year", AskOverrides::default()).await.success);
    assert!(engine.ask("And the humidity?", AskOverrides::default()).await.success);

    let calls = provider.calls();
    let last = &calls[2].request.messages;
    let contents: Vec<_> = last.iter().map(|m| (m.role, m.content.as_str())).collect();
    assert_eq!(
        contents,
        vec![
            (Role::User, "How warm is it?"),
            (Role::Assistant, "Twenty one degrees."),
            (Role::User, "And the humidity?"),
        ]
    );

    // Failed exchanges stay in history.
    assert_eq!(engine.recent_history(10).await.len(), 3);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_system_prompt_and_overrides_reach_the_request() {
    let dir = temp_dir();
    let provider = Arc::new(ScriptedProvider::new());
    let engine = start_engine(dir.path(), test_settings("prompted"), provider.clone());

    engine.set_system_prompt(Some("Answer in one sentence.".into())).unwrap();
    assert!(engine.ask("Who is home?", AskOverrides::default()).await.success);

    let overrides = AskOverrides {
        model: Some("gpt-4o".into()),
        temperature: Some(0.1),
        max_tokens: Some(64),
        system_prompt: Some("Answer with a number.".into()),
        ..Default::default()
    };
    assert!(engine.ask("How many people?", overrides).await.success);

    let calls = provider.calls();
    assert_eq!(calls[0].request.messages[0].role, Role::System);
    assert_eq!(calls[0].request.messages[0].content, "Answer in one sentence.");
    assert_eq!(calls[0].request.model, "gpt-4o-mini");

    let second = &calls[1].request;
    assert_eq!(second.model, "gpt-4o");
    assert_eq!(second.temperature, 0.1);
    assert_eq!(second.max_tokens, 64);
    assert_eq!(second.messages[0].content, "Answer with a number.");

    assert_eq!(engine.status().system_prompt.as_deref(), Some("Answer in one sentence."));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_history_filter_finds_requested_model() {
    let dir = temp_dir();
    let provider = Arc::new(ScriptedProvider::new());
    let engine = start_engine(dir.path(), test_settings("aliased"), provider.clone());

    // The scripted provider always answers as "gpt-4o-mini".
    let overrides = AskOverrides {
        model: Some("gpt-4o".into()),
        ..Default::default()
    };
    let result = engine.ask("Which model?", overrides).await;
    assert_eq!(result.model_used, "gpt-4o-mini");

    let query = HistoryQuery {
        filter_model: Some("gpt-4o".into()),
        ..HistoryQuery::new("aliased")
    };
    let entries = engine.get_history(&query).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].question, "Which model?");

    engine.shutdown().await;
}

#[tokio::test]
async fn test_invalid_requests_never_reach_the_provider() {
    let dir = temp_dir();
    let provider = Arc::new(ScriptedProvider::new());
    let engine = start_engine(dir.path(), test_settings("strict"), provider.clone());

    let blank = engine.ask("   ", AskOverrides::default()).await;
    assert!(!blank.success);

    let overrides = AskOverrides {
        temperature: Some(3.5),
        ..Default::default()
    };
    let hot = engine.ask("Too hot?", overrides).await;
    assert!(!hot.success);
    assert!(hot.error.unwrap().contains("temperature"));

    assert_eq!(provider.call_count(), 0);
    assert_eq!(engine.recent_history(10).await.len(), 0);
    assert_eq!(engine.state(), InstanceState::Ready);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancel_queued_job() {
    let dir = temp_dir();
    let provider = Arc::new(ScriptedProvider::new().with_delay(Duration::from_secs(5)));
    let engine = start_engine(dir.path(), test_settings("patient"), provider.clone());

    let first = engine.ask_with_handle("first", AskOverrides::default()).unwrap();
    let second = engine.ask_with_handle("second", AskOverrides::default()).unwrap();
    assert!(second.cancel());

    assert!(first.result().await.success);
    let cancelled = second.result().await;
    assert!(!cancelled.success);
    assert!(cancelled.error.unwrap().contains("cancelled"));

    assert_eq!(provider.call_count(), 1);
    assert_eq!(engine.recent_history(10).await.len(), 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_deadline_discards_late_answer() {
    let dir = temp_dir();
    let mut config = test_config("slow");
    config.retry.job_deadline_secs = Some(1);
    let provider = Arc::new(ScriptedProvider::new().with_delay(Duration::from_secs(5)));
    let engine = start_engine(dir.path(), config.resolve().unwrap(), provider.clone());

    let result = engine.ask("Anyone there?", AskOverrides::default()).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("deadline"));
    assert_eq!(provider.call_count(), 1);
    assert_eq!(engine.state(), InstanceState::Error);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_waits_fixed_delay() {
    let dir = temp_dir();
    let provider = Arc::new(
        ScriptedProvider::new()
            .then_err(LlmError::Maintenance("scheduled upgrade".into()))
            .then_ok("Back online."),
    );
    let engine = start_engine(dir.path(), test_settings("upgrade"), provider.clone());
    let mut transitions = engine.subscribe_transitions();

    let result = engine.ask("Status?", AskOverrides::default()).await;

    assert!(result.success);
    assert!(drain_states(&mut transitions).contains(&InstanceState::Maintenance));
    let times = provider.dispatch_times();
    assert!(times[1] - times[0] >= Duration::from_secs(30));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_malformed_response_retried_once() {
    let dir = temp_dir();
    let provider = Arc::new(
        ScriptedProvider::new()
            .then_err(LlmError::MalformedResponse("no choices".into()))
            .then_err(LlmError::MalformedResponse("no choices".into())),
    );
    let engine = start_engine(dir.path(), test_settings("garbled"), provider.clone());

    let result = engine.ask("Hello?", AskOverrides::default()).await;

    assert!(!result.success);
    assert_eq!(provider.call_count(), 2);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_transport_errors_exhaust_and_disconnect() {
    let dir = temp_dir();
    let provider = Arc::new(
        ScriptedProvider::new()
            .then_err(LlmError::TransportError("connection refused".into()))
            .then_err(LlmError::TransportError("connection refused".into()))
            .then_err(LlmError::TransportError("connection refused".into())),
    );
    let engine = start_engine(dir.path(), test_settings("offline"), provider.clone());

    let result = engine.ask("Hello?", AskOverrides::default()).await;

    assert!(!result.success);
    assert_eq!(provider.call_count(), 3);
    let status = engine.status();
    assert_eq!(status.state, InstanceState::Disconnected);
    assert_eq!(status.endpoint_status, EndpointStatus::Disconnected);

    // The next success brings the instance back.
    assert!(engine.ask("Again?", AskOverrides::default()).await.success);
    assert_eq!(engine.state(), InstanceState::Ready);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_history_survives_restart() {
    let dir = temp_dir();

    let engine = start_engine(dir.path(), test_settings("durable"), Arc::new(ScriptedProvider::new()));
    assert!(engine.ask("Remember me?", AskOverrides::default()).await.success);
    engine.shutdown().await;

    let engine = start_engine(dir.path(), test_settings("durable"), Arc::new(ScriptedProvider::new()));
    let recent = engine.recent_history(5).await;
    assert_eq!(recent.len(), 1);
    assert_eq!(recent.iter().next().unwrap().question, "Remember me?");
    assert_eq!(engine.status().history_size, 1);

    engine.clear_history().await.unwrap();
    assert_eq!(engine.recent_history(5).await.len(), 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_update_settings_applies_to_next_job() {
    let dir = temp_dir();
    let provider = Arc::new(ScriptedProvider::new());
    let engine = start_engine(dir.path(), test_settings("tunable"), provider.clone());

    engine
        .update_settings(SettingsUpdate {
            model: Some("gpt-4o".into()),
            max_tokens: Some(200),
            ..Default::default()
        })
        .unwrap();
    assert!(engine.ask("Hi", AskOverrides::default()).await.success);

    let request = &provider.calls()[0].request;
    assert_eq!(request.model, "gpt-4o");
    assert_eq!(request.max_tokens, 200);
    assert_eq!(engine.status().model, "gpt-4o");

    let invalid = engine.update_settings(SettingsUpdate {
        temperature: Some(9.0),
        ..Default::default()
    });
    assert!(invalid.is_err());
    assert_eq!(engine.settings().temperature, 0.7);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_rejects_new_work() {
    let dir = temp_dir();
    let provider = Arc::new(ScriptedProvider::new());
    let engine = start_engine(dir.path(), test_settings("closing"), provider.clone());

    engine.shutdown().await;

    let result = engine.ask("Still there?", AskOverrides::default()).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("shut down"));
    assert_eq!(provider.call_count(), 0);
}

//! Primary/backup model orchestration.
//!
//! An explicit state machine: `AttemptPrimary -> {Success | AttemptBackup |
//! Fail}`, `AttemptBackup -> {Success | Fail}`. The backup model runs when
//! the primary call fails or its response cannot be parsed, unless both
//! models are configured identically. An upstream 429 from the primary is
//! surfaced directly with a retry hint instead of retrying against the
//! backup, since both models share upstream capacity. Terminal failure
//! synthesizes the deterministic degraded verdict; callers never see a raw
//! upstream error.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::client::{
    ChatMessage, CompletionRequest, ModelClient, ModelError, ResponseFormat,
};
use super::{SYSTEM_INSTRUCTIONS, USER_TEXT_BEGIN, USER_TEXT_END};
use crate::config::OrchestratorConfig;
use crate::verdict::AnalysisVerdict;

/// Outcome of one model attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    ParseFailure,
    ApiFailure,
    RateLimited,
}

/// Record of a single call in the orchestration state machine.
#[derive(Debug, Clone, Serialize)]
pub struct ModelAttempt {
    pub model: String,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal result of an orchestration run.
#[derive(Debug, Clone)]
pub enum OrchestrationOutcome {
    /// A model produced a JSON payload; validation happens downstream.
    Parsed {
        payload: serde_json::Value,
        model: String,
        backup_used: bool,
    },
    /// Every attempt failed; the deterministic degraded verdict applies.
    Degraded { verdict: AnalysisVerdict },
}

/// An orchestration run with its attempt trail.
#[derive(Debug, Clone)]
pub struct Orchestration {
    pub outcome: OrchestrationOutcome,
    pub attempts: Vec<ModelAttempt>,
}

/// The only orchestration error that reaches callers: upstream capacity
/// exhaustion, which retrying against the backup will not fix.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OrchestrationError {
    #[error("upstream rate limited")]
    RateLimited { retry_after: Option<u64> },
}

enum State {
    Primary,
    Backup,
    Failed,
}

enum AttemptResult {
    Parsed(serde_json::Value),
    RateLimited(Option<u64>),
    Failed,
}

/// Builds prompts, calls the model client, and walks the fallback state
/// machine.
pub struct ModelOrchestrator {
    config: OrchestratorConfig,
    client: Arc<dyn ModelClient>,
}

impl ModelOrchestrator {
    /// Creates an orchestrator over the given client.
    pub fn new(config: OrchestratorConfig, client: Arc<dyn ModelClient>) -> Self {
        Self { config, client }
    }

    /// The primary model identifier after applying an optional override.
    pub fn primary_model<'a>(&'a self, model_override: Option<&'a str>) -> &'a str {
        model_override.unwrap_or(&self.config.primary_model)
    }

    /// The configured backup model identifier.
    pub fn backup_model(&self) -> &str {
        &self.config.backup_model
    }

    /// Runs the full primary-then-backup state machine over sanitized text.
    pub async fn run(
        &self,
        sanitized_text: &str,
        model_override: Option<&str>,
    ) -> Result<Orchestration, OrchestrationError> {
        let primary = self.primary_model(model_override).to_string();
        let backup = self.config.backup_model.clone();
        let mut attempts = Vec::new();
        let mut state = State::Primary;

        loop {
            match state {
                State::Primary => {
                    match self.attempt(&primary, sanitized_text, &mut attempts).await {
                        AttemptResult::Parsed(payload) => {
                            return Ok(Orchestration {
                                outcome: OrchestrationOutcome::Parsed {
                                    payload,
                                    model: primary,
                                    backup_used: false,
                                },
                                attempts,
                            });
                        }
                        AttemptResult::RateLimited(retry_after) => {
                            // Backup shares upstream capacity; don't retry.
                            return Err(OrchestrationError::RateLimited { retry_after });
                        }
                        AttemptResult::Failed => {
                            state = if backup != primary {
                                State::Backup
                            } else {
                                State::Failed
                            };
                        }
                    }
                }
                State::Backup => {
                    match self.attempt(&backup, sanitized_text, &mut attempts).await {
                        AttemptResult::Parsed(payload) => {
                            return Ok(Orchestration {
                                outcome: OrchestrationOutcome::Parsed {
                                    payload,
                                    model: backup,
                                    backup_used: true,
                                },
                                attempts,
                            });
                        }
                        // A 429 this deep still ends in degradation rather
                        // than a retry hint; the primary already failed.
                        AttemptResult::RateLimited(_) | AttemptResult::Failed => {
                            state = State::Failed;
                        }
                    }
                }
                State::Failed => {
                    warn!(attempts = attempts.len(), "all model attempts failed");
                    return Ok(Orchestration {
                        outcome: OrchestrationOutcome::Degraded {
                            verdict: AnalysisVerdict::degraded(),
                        },
                        attempts,
                    });
                }
            }
        }
    }

    /// One bounded attempt against `model`, recorded in `attempts`.
    async fn attempt(
        &self,
        model: &str,
        sanitized_text: &str,
        attempts: &mut Vec<ModelAttempt>,
    ) -> AttemptResult {
        let request = CompletionRequest {
            model: model.to_string(),
            messages: build_messages(sanitized_text),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            response_format: ResponseFormat::json_object(),
        };

        match self.client.complete(&request).await {
            Ok(completion) => match parse_payload(&completion.content) {
                Some(payload) => {
                    debug!(model, "model attempt succeeded");
                    attempts.push(ModelAttempt {
                        model: model.to_string(),
                        outcome: AttemptOutcome::Success,
                        error: None,
                    });
                    AttemptResult::Parsed(payload)
                }
                None => {
                    warn!(model, "model response was not parseable JSON");
                    attempts.push(ModelAttempt {
                        model: model.to_string(),
                        outcome: AttemptOutcome::ParseFailure,
                        error: Some("response was not a JSON object".to_string()),
                    });
                    AttemptResult::Failed
                }
            },
            Err(ModelError::RateLimited { retry_after }) => {
                warn!(model, "upstream rate limited");
                attempts.push(ModelAttempt {
                    model: model.to_string(),
                    outcome: AttemptOutcome::RateLimited,
                    error: None,
                });
                AttemptResult::RateLimited(retry_after)
            }
            Err(e) => {
                warn!(model, error = %e, "model attempt failed");
                attempts.push(ModelAttempt {
                    model: model.to_string(),
                    outcome: AttemptOutcome::ApiFailure,
                    error: Some(e.to_string()),
                });
                AttemptResult::Failed
            }
        }
    }
}

/// Assembles the outbound conversation: immutable system instructions plus
/// the sanitized user text inside labeled boundary markers. Nothing in the
/// system message derives from user input.
fn build_messages(sanitized_text: &str) -> Vec<ChatMessage> {
    let user = format!("{USER_TEXT_BEGIN}\n{sanitized_text}\n{USER_TEXT_END}");
    vec![
        ChatMessage::system(SYSTEM_INSTRUCTIONS),
        ChatMessage::user(user),
    ]
}

/// Strict parse first; if the content is not pure JSON, fall back to the
/// widest `{...}` substring before declaring a parse failure. Only JSON
/// objects are accepted.
fn parse_payload(content: &str) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(content) {
        if value.is_object() {
            return Some(value);
        }
    }

    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<serde_json::Value>(&content[start..=end])
        .ok()
        .filter(|v| v.is_object())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::MockModelClient;

    fn orchestrator(client: MockModelClient) -> (ModelOrchestrator, Arc<MockModelClient>) {
        let client = Arc::new(client);
        let orchestrator = ModelOrchestrator::new(
            OrchestratorConfig {
                primary_model: "primary-model".to_string(),
                backup_model: "backup-model".to_string(),
                ..OrchestratorConfig::default()
            },
            client.clone(),
        );
        (orchestrator, client)
    }

    const VALID_JSON: &str = r#"{"category":"safe","risk_level":"low","fraud_probability":3,
        "main_indicators":[],"recommendation":"ok","summary":"fine"}"#;

    #[tokio::test]
    async fn primary_success_uses_one_call() {
        let (orchestrator, client) =
            orchestrator(MockModelClient::with_responses(vec![Ok(VALID_JSON)]));

        let run = orchestrator.run("some text", None).await.unwrap();
        match run.outcome {
            OrchestrationOutcome::Parsed {
                model, backup_used, ..
            } => {
                assert_eq!(model, "primary-model");
                assert!(!backup_used);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(client.calls(), 1);
        assert_eq!(run.attempts.len(), 1);
        assert_eq!(run.attempts[0].outcome, AttemptOutcome::Success);
    }

    #[tokio::test]
    async fn parse_failure_falls_back_to_backup() {
        let (orchestrator, client) = orchestrator(MockModelClient::with_responses(vec![
            Ok("I am sorry, I cannot do that."),
            Ok(VALID_JSON),
        ]));

        let run = orchestrator.run("some text", None).await.unwrap();
        match run.outcome {
            OrchestrationOutcome::Parsed {
                model, backup_used, ..
            } => {
                assert_eq!(model, "backup-model");
                assert!(backup_used);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(client.calls(), 2);
        assert_eq!(run.attempts[0].outcome, AttemptOutcome::ParseFailure);
        assert_eq!(run.attempts[1].outcome, AttemptOutcome::Success);
    }

    #[tokio::test]
    async fn api_failure_falls_back_to_backup() {
        let (orchestrator, client) = orchestrator(MockModelClient::with_responses(vec![
            Err(ModelError::Timeout),
            Ok(VALID_JSON),
        ]));

        let run = orchestrator.run("some text", None).await.unwrap();
        assert!(matches!(
            run.outcome,
            OrchestrationOutcome::Parsed {
                backup_used: true,
                ..
            }
        ));
        assert_eq!(client.calls(), 2);
        assert_eq!(run.attempts[0].outcome, AttemptOutcome::ApiFailure);
    }

    #[tokio::test]
    async fn both_failures_degrade_deterministically() {
        let (orchestrator, client) = orchestrator(MockModelClient::with_responses(vec![
            Err(ModelError::Timeout),
            Ok("still not json"),
        ]));

        let run = orchestrator.run("some text", None).await.unwrap();
        match run.outcome {
            OrchestrationOutcome::Degraded { verdict } => {
                assert_eq!(verdict, AnalysisVerdict::degraded());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(client.calls(), 2);
        assert_eq!(run.attempts.len(), 2);
    }

    #[tokio::test]
    async fn identical_primary_and_backup_skip_the_retry() {
        let client = Arc::new(MockModelClient::with_responses(vec![Err(
            ModelError::Timeout,
        )]));
        let orchestrator = ModelOrchestrator::new(
            OrchestratorConfig {
                primary_model: "same-model".to_string(),
                backup_model: "same-model".to_string(),
                ..OrchestratorConfig::default()
            },
            client.clone(),
        );

        let run = orchestrator.run("some text", None).await.unwrap();
        assert!(matches!(
            run.outcome,
            OrchestrationOutcome::Degraded { .. }
        ));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn rate_limit_short_circuits_without_backup() {
        let (orchestrator, client) = orchestrator(MockModelClient::with_responses(vec![Err(
            ModelError::RateLimited {
                retry_after: Some(42),
            },
        )]));

        let err = orchestrator.run("some text", None).await.unwrap_err();
        match err {
            OrchestrationError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(42));
            }
        }
        // No backup attempt against shared upstream capacity.
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn model_override_replaces_the_primary() {
        let (orchestrator, client) =
            orchestrator(MockModelClient::with_responses(vec![Ok(VALID_JSON)]));

        let run = orchestrator.run("text", Some("custom-model")).await.unwrap();
        match run.outcome {
            OrchestrationOutcome::Parsed { model, .. } => assert_eq!(model, "custom-model"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(client.last_model(), Some("custom-model".to_string()));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn user_text_is_wrapped_in_boundary_markers() {
        let (orchestrator, client) =
            orchestrator(MockModelClient::with_responses(vec![Ok(VALID_JSON)]));

        orchestrator.run("suspicious offer text", None).await.unwrap();

        let user_message = client.last_user_message().unwrap();
        assert!(user_message.starts_with(USER_TEXT_BEGIN));
        assert!(user_message.trim_end().ends_with(USER_TEXT_END));
        assert!(user_message.contains("suspicious offer text"));
    }

    #[test]
    fn parse_payload_accepts_strict_json() {
        let payload = parse_payload(r#"{"category":"safe"}"#).unwrap();
        assert_eq!(payload["category"], "safe");
    }

    #[test]
    fn parse_payload_extracts_embedded_object() {
        let content = r#"Sure! Here is the analysis: {"category":"fraud","x":1} Hope it helps."#;
        let payload = parse_payload(content).unwrap();
        assert_eq!(payload["category"], "fraud");
    }

    #[test]
    fn parse_payload_rejects_non_objects() {
        assert!(parse_payload("[1, 2, 3]").is_none());
        assert!(parse_payload("plain text with no braces").is_none());
        assert!(parse_payload("{ broken json").is_none());
    }
}

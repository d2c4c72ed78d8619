//! Full-processing stage: content analysis, actions and tool calls.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use tracing::{info, warn};

use crate::config::StageConfig;
use crate::error::PipelineError;
use crate::llm::parse::parse_or_fallback;
use crate::llm::{CompletionRequest, LlmClient, ResponseSchema, RetryPolicy};
use crate::pipeline::actions::ActionExecutor;
use crate::pipeline::types::{
    ActionStatus, AnalysisResult, ExecutedAction, Message, MessageStatus, StageOutcome,
    SuggestedToolCall,
};
use crate::safety::{Sanitizer, clean_text};
use crate::store::Database;
use crate::tools::{ToolDefinition, ToolRegistry};

const STAGE: &str = "processing";

const NO_REASON: &str = "No reason provided";

/// Behaviour switches for the processing stage.
#[derive(Debug, Clone, Default)]
pub struct ProcessingPolicy {
    /// Close as `failed` when at least one action ran and all of them failed.
    pub fail_when_all_actions_fail: bool,
}

pub struct ProcessingStage {
    store: Arc<dyn Database>,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    actions: ActionExecutor,
    sanitizer: Sanitizer,
    config: StageConfig,
    policy: ProcessingPolicy,
    retry: RetryPolicy,
}

impl ProcessingStage {
    pub fn new(
        store: Arc<dyn Database>,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        actions: ActionExecutor,
        sanitizer: Sanitizer,
        config: StageConfig,
    ) -> Self {
        let retry = RetryPolicy::with_max_attempts(config.llm_max_attempts);
        Self {
            store,
            llm,
            tools,
            actions,
            sanitizer,
            config,
            policy: ProcessingPolicy::default(),
            retry,
        }
    }

    pub fn with_policy(mut self, policy: ProcessingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Analyse one message and run what the model asked for.
    pub async fn run(&self, message_id: &str) -> Result<StageOutcome, PipelineError> {
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or_else(|| PipelineError::MessageNotFound(message_id.to_string()))?;

        if !message.is_claimable() {
            info!(
                message_id,
                status = %message.status,
                eligible = message.ai_eligible,
                "Message not claimable for processing, skipping"
            );
            return Ok(StageOutcome::Skipped);
        }

        if !self
            .store
            .claim_message(message_id, MessageStatus::Processing)
            .await?
        {
            info!(message_id, "Lost processing claim, skipping");
            return Ok(StageOutcome::Skipped);
        }
        info!(message_id, subject = %message.subject, "Processing claimed");

        self.process_claimed(&message)
            .await
            .map_err(|reason| PipelineError::StageAborted {
                stage: STAGE,
                message_id: message_id.to_string(),
                reason,
            })
    }

    async fn process_claimed(&self, message: &Message) -> Result<StageOutcome, String> {
        let id = message.id.as_str();
        let content = self
            .sanitizer
            .sanitize(&message.body_text, message.body_format);
        let tools = self.tools.definitions_for(message).await;

        let request = CompletionRequest::new(
            build_system_prompt(&tools, &Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
            build_user_prompt(message, &content),
        )
        .with_schema(response_schema(&tools))
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens)
        .with_timeout(self.config.llm_request_timeout);

        info!(
            message_id = id,
            model = self.llm.model_name(),
            tools = tools.len(),
            "Processing LLM call started"
        );
        let raw = match self
            .retry
            .run(STAGE, |_| self.llm.complete(request.clone()))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(message_id = id, error = %e, "Processing LLM call failed");
                self.store
                    .fail(id, MessageStatus::Processing, &format!("Processing failed: {e}"))
                    .await
                    .map_err(|e| e.to_string())?;
                return Ok(StageOutcome::Failed);
            }
        };
        info!(message_id = id, chars = raw.len(), "Processing LLM call finished");

        let (analysis, _) = parse_or_fallback(&raw, STAGE, AnalysisResult::fallback);

        let mut records = self.actions.execute_all(message, &analysis.actions).await;
        records.extend(self.execute_tool_calls(message, &analysis.tool_calls).await);

        let all_failed = !records.is_empty() && records.iter().all(ExecutedAction::is_failed);
        if all_failed && self.policy.fail_when_all_actions_fail {
            warn!(message_id = id, actions = records.len(), "Every executed action failed");
            self.store
                .fail(id, MessageStatus::Processing, "All executed actions failed")
                .await
                .map_err(|e| e.to_string())?;
            return Ok(StageOutcome::Failed);
        }

        if !self
            .store
            .finish(
                id,
                MessageStatus::Processing,
                MessageStatus::Completed,
                &analysis.response,
                &records,
            )
            .await
            .map_err(|e| e.to_string())?
        {
            return Err("message left processing before completion".to_string());
        }
        info!(
            message_id = id,
            category = %analysis.category,
            priority = ?analysis.priority,
            executed = records.len(),
            "Processing complete"
        );
        Ok(StageOutcome::Completed)
    }

    async fn execute_tool_calls(
        &self,
        message: &Message,
        calls: &[SuggestedToolCall],
    ) -> Vec<ExecutedAction> {
        let mut records = Vec::new();
        for call in calls.iter().filter(|c| c.execute) {
            let reason = call
                .reason
                .as_deref()
                .filter(|r| !r.trim().is_empty())
                .unwrap_or(NO_REASON)
                .to_string();
            let result = self
                .tools
                .execute(message, &call.tool_name, call.parameters.clone())
                .await;
            let status = if result.success {
                ActionStatus::Success
            } else {
                ActionStatus::Failed
            };
            records.push(ExecutedAction::ToolCall {
                tool_name: call.tool_name.clone(),
                parameters: call.parameters.clone(),
                reason,
                status,
                result: result.data,
                error: result.error,
            });
        }
        records
    }
}

fn build_system_prompt(tools: &[ToolDefinition], now: &str) -> String {
    let mut prompt = format!(
        "You are an intelligent email assistant. Analyze emails and suggest actions and tool calls.

Analyze the email content and provide:
- summary: Brief summary of the email
- priority: high|medium|low based on urgency and importance
- category: work|personal|newsletter|spam|support
- sentiment: positive|neutral|negative tone of the email
- actions: Array of suggested traditional actions with reasons and execution flags
- tool_calls: Array of tool calls to execute with parameters
- response: Detailed analysis and recommendations

Available traditional actions: mark_important, mark_read, create_task, schedule_reply, flag_spam

IMPORTANT: When creating calendar events, you MUST convert all relative dates to absolute ISO 8601 format:
- \"tomorrow at 6 PM\" -> \"2024-01-16T18:00:00Z\" (use actual tomorrow's date)
- \"next Monday at 2 PM\" -> \"2024-01-22T14:00:00Z\" (use actual next Monday's date)
- \"today at 3:30 PM\" -> \"2024-01-15T15:30:00Z\" (use actual today's date)

Current date/time context: {now} (use this as reference for relative dates)

Only suggest actions and tool calls that are appropriate and safe. Never suggest deleting emails or taking destructive actions."
    );

    if !tools.is_empty() {
        prompt.push_str("\n\nAvailable tools for this email:\n");
        for tool in tools {
            prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        }
        prompt.push_str(
            "\nUse tool_calls when you detect relevant content that matches the tool capabilities.",
        );
    }
    prompt
}

fn build_user_prompt(message: &Message, content: &str) -> String {
    format!(
        "Please analyze this email and suggest appropriate actions:\n\n\
         SUBJECT: {subject}\n\
         FROM: {from}\n\n\
         CONTENT:\n{content}\n\n\
         Analyze this email and provide your assessment and recommendations.",
        subject = clean_text(&message.subject),
        from = clean_text(&message.from_line()),
    )
}

/// `tool_calls` is only part of the schema when tools are on offer.
fn response_schema(tools: &[ToolDefinition]) -> ResponseSchema {
    let mut schema = serde_json::json!({
        "type": "object",
        "properties": {
            "summary": { "type": "string" },
            "priority": { "type": "string", "enum": ["high", "medium", "low"] },
            "category": {
                "type": "string",
                "enum": ["work", "personal", "newsletter", "spam", "support"]
            },
            "sentiment": { "type": "string", "enum": ["positive", "neutral", "negative"] },
            "actions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "action": {
                            "type": "string",
                            "enum": ["mark_important", "mark_read", "create_task", "schedule_reply", "flag_spam"]
                        },
                        "reason": { "type": "string" },
                        "execute": { "type": "boolean" }
                    },
                    "required": ["action", "reason", "execute"]
                }
            },
            "response": { "type": "string" }
        },
        "required": ["summary", "priority", "category", "sentiment", "actions", "response"]
    });

    if !tools.is_empty() {
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        schema["properties"]["tool_calls"] = serde_json::json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "tool_name": { "type": "string", "enum": names },
                    "parameters": { "type": "object" },
                    "reason": { "type": "string" },
                    "execute": { "type": "boolean" }
                },
                "required": ["tool_name", "parameters", "reason", "execute"]
            }
        });
        if let Some(required) = schema["required"].as_array_mut() {
            required.push(serde_json::json!("tool_calls"));
        }
    }

    ResponseSchema::new("email_analysis_response", schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SanitizerConfig;
    use crate::error::LlmError;
    use crate::llm::testing::ScriptedLlm;
    use crate::pipeline::actions::tests::MockMail;
    use crate::pipeline::types::{BodyFormat, NewMessage};
    use crate::store::LibSqlBackend;
    use crate::tools::CalendarEventTool;
    use crate::tools::calendar::tests::MockCalendar;
    use std::time::Duration;

    struct Harness {
        stage: ProcessingStage,
        store: Arc<LibSqlBackend>,
        llm: Arc<ScriptedLlm>,
        calendar: Arc<MockCalendar>,
    }

    async fn harness(llm: ScriptedLlm, mail: MockMail, policy: ProcessingPolicy) -> Harness {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let llm = Arc::new(llm);
        let calendar = Arc::new(MockCalendar::new(true));
        let tools = Arc::new(ToolRegistry::new());
        tools
            .register(Arc::new(CalendarEventTool::new(calendar.clone())))
            .await;

        let stage = ProcessingStage::new(
            store.clone(),
            llm.clone(),
            tools,
            ActionExecutor::new(Arc::new(mail), store.clone()),
            Sanitizer::new(&SanitizerConfig::default()),
            StageConfig::processing(),
        )
        .with_policy(policy)
        .with_retry_policy(RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        });
        Harness {
            stage,
            store,
            llm,
            calendar,
        }
    }

    async fn insert(store: &LibSqlBackend, subject: &str, body: &str) {
        let mut msg = NewMessage::fixture("m1", subject, body);
        msg.body_format = BodyFormat::Markup;
        store.insert_message(&msg, true).await.unwrap();
    }

    const MEETING_REPLY: &str = r#"{"summary":"Sync invite","priority":"medium","category":"work",
        "sentiment":"positive","actions":[{"action":"mark_read","reason":"handled","execute":true}],
        "tool_calls":[{"tool_name":"create_calendar_event","parameters":{"title":"Project sync",
        "start_time":"2026-03-10T14:00:00Z","end_time":"2026-03-10T15:00:00Z"},
        "reason":"meeting invite","execute":true}],"response":"Added the sync to your calendar."}"#;

    #[test]
    fn schema_includes_tool_calls_only_with_tools() {
        let without = response_schema(&[]);
        assert!(without.schema["properties"].get("tool_calls").is_none());
        assert!(
            !without.schema["required"]
                .as_array()
                .unwrap()
                .contains(&serde_json::json!("tool_calls"))
        );

        let def = ToolDefinition {
            name: "create_calendar_event".into(),
            description: "Create events".into(),
            parameters: serde_json::json!({}),
        };
        let with = response_schema(std::slice::from_ref(&def));
        assert_eq!(
            with.schema["properties"]["tool_calls"]["items"]["properties"]["tool_name"]["enum"][0],
            "create_calendar_event"
        );
        assert!(
            with.schema["required"]
                .as_array()
                .unwrap()
                .contains(&serde_json::json!("tool_calls"))
        );

        let prompt = build_system_prompt(&[def], "2026-03-04T10:00:00Z");
        assert!(prompt.contains("- create_calendar_event: Create events"));
        assert!(prompt.contains("Current date/time context: 2026-03-04T10:00:00Z"));
    }

    #[tokio::test]
    async fn meeting_email_creates_event_and_completes() {
        let h = harness(
            ScriptedLlm::replying(MEETING_REPLY),
            MockMail::new(),
            ProcessingPolicy::default(),
        )
        .await;
        insert(
            &h.store,
            "Project sync",
            "<p>Can we meet Tuesday?</p><p>Afmelden</p>",
        )
        .await;

        assert_eq!(h.stage.run("m1").await.unwrap(), StageOutcome::Completed);

        let msg = h.store.get_message("m1").await.unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Completed);
        assert!(msg.is_read);
        assert_eq!(
            msg.analysis_response.as_deref(),
            Some("Added the sync to your calendar.")
        );
        assert_eq!(msg.executed_actions.len(), 2);
        match &msg.executed_actions[1] {
            ExecutedAction::ToolCall {
                tool_name,
                status,
                result,
                ..
            } => {
                assert_eq!(tool_name, "create_calendar_event");
                assert_eq!(*status, ActionStatus::Success);
                assert_eq!(result.as_ref().unwrap()["event_id"], "evt_1");
            }
            other => panic!("unexpected record: {other:?}"),
        }
        assert_eq!(h.calendar.created.lock().await.len(), 1);

        let req = &h.llm.requests.lock().await[0];
        assert!(req.user_prompt.contains("Can we meet Tuesday?"));
        assert!(!req.user_prompt.contains("<p>"));
        assert!(!req.user_prompt.contains("Afmelden"));
        assert!(req.system_prompt.contains("create_calendar_event"));
        assert_eq!(req.temperature, Some(0.7));
    }

    #[tokio::test]
    async fn unparseable_output_completes_with_raw_response() {
        let h = harness(
            ScriptedLlm::replying("This email looks fine to me."),
            MockMail::new(),
            ProcessingPolicy::default(),
        )
        .await;
        insert(&h.store, "Hello", "just saying hi").await;

        assert_eq!(h.stage.run("m1").await.unwrap(), StageOutcome::Completed);
        let msg = h.store.get_message("m1").await.unwrap().unwrap();
        assert_eq!(
            msg.analysis_response.as_deref(),
            Some("This email looks fine to me.")
        );
        assert!(msg.executed_actions.is_empty());
    }

    #[tokio::test]
    async fn off_vocabulary_priority_still_runs_tool_calls() {
        let reply = MEETING_REPLY
            .replace(r#""priority":"medium""#, r#""priority":"critical""#)
            .replace(r#""sentiment":"positive""#, r#""sentiment":"excited""#);
        let h = harness(
            ScriptedLlm::replying(&reply),
            MockMail::new(),
            ProcessingPolicy::default(),
        )
        .await;
        insert(&h.store, "Project sync", "<p>Can we meet Tuesday?</p>").await;

        assert_eq!(h.stage.run("m1").await.unwrap(), StageOutcome::Completed);
        let msg = h.store.get_message("m1").await.unwrap().unwrap();
        assert_eq!(msg.executed_actions.len(), 2);
        assert_eq!(
            msg.analysis_response.as_deref(),
            Some("Added the sync to your calendar.")
        );
        assert_eq!(h.calendar.created.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn unavailable_tool_call_is_recorded_as_failed() {
        let reply = r#"{"summary":"s","priority":"low","category":"personal","sentiment":"neutral",
            "actions":[],"tool_calls":[{"tool_name":"create_calendar_event","parameters":{},
            "reason":"r","execute":true}],"response":"ok"}"#;
        let h = harness(
            ScriptedLlm::replying(reply),
            MockMail::new(),
            ProcessingPolicy::default(),
        )
        .await;
        insert(&h.store, "Lunch photos", "no keywords here").await;

        assert_eq!(h.stage.run("m1").await.unwrap(), StageOutcome::Completed);
        let msg = h.store.get_message("m1").await.unwrap().unwrap();
        match &msg.executed_actions[0] {
            ExecutedAction::ToolCall { status, error, .. } => {
                assert_eq!(*status, ActionStatus::Failed);
                assert_eq!(
                    error.as_deref(),
                    Some("Tool 'create_calendar_event' is not available for this email")
                );
            }
            other => panic!("unexpected record: {other:?}"),
        }
        assert!(h.calendar.created.lock().await.is_empty());
    }

    #[tokio::test]
    async fn all_failed_actions_respect_policy() {
        let reply = r#"{"summary":"s","priority":"low","category":"work","sentiment":"neutral",
            "actions":[{"action":"mark_read","reason":"done","execute":true}],"response":"ok"}"#;

        let mut mail = MockMail::new();
        mail.fail = true;
        let h = harness(ScriptedLlm::replying(reply), mail, ProcessingPolicy::default()).await;
        insert(&h.store, "Status", "fyi").await;
        assert_eq!(h.stage.run("m1").await.unwrap(), StageOutcome::Completed);
        let msg = h.store.get_message("m1").await.unwrap().unwrap();
        assert!(msg.executed_actions[0].is_failed());

        let mut mail = MockMail::new();
        mail.fail = true;
        let strict = ProcessingPolicy {
            fail_when_all_actions_fail: true,
        };
        let h = harness(ScriptedLlm::replying(reply), mail, strict).await;
        insert(&h.store, "Status", "fyi").await;
        assert_eq!(h.stage.run("m1").await.unwrap(), StageOutcome::Failed);
        let msg = h.store.get_message("m1").await.unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Failed);
        assert!(msg.analysis_response.is_none());
    }

    #[tokio::test]
    async fn llm_failure_marks_failed() {
        let h = harness(
            ScriptedLlm::new(vec![Err(LlmError::BadStatus {
                code: 400,
                body: "context length exceeded".into(),
            })]),
            MockMail::new(),
            ProcessingPolicy::default(),
        )
        .await;
        insert(&h.store, "Hello", "body").await;

        assert_eq!(h.stage.run("m1").await.unwrap(), StageOutcome::Failed);
        assert_eq!(h.llm.calls().await, 1);
        let msg = h.store.get_message("m1").await.unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Failed);
        assert!(msg.last_error.unwrap().contains("400"));
    }

    #[tokio::test]
    async fn redelivery_after_completion_is_a_no_op() {
        let h = harness(
            ScriptedLlm::new(vec![Ok(MEETING_REPLY.to_string()), Ok(MEETING_REPLY.to_string())]),
            MockMail::new(),
            ProcessingPolicy::default(),
        )
        .await;
        insert(&h.store, "Project sync", "meeting").await;

        h.stage.run("m1").await.unwrap();
        assert_eq!(h.stage.run("m1").await.unwrap(), StageOutcome::Skipped);
        assert_eq!(h.llm.calls().await, 1);
        assert_eq!(h.calendar.created.lock().await.len(), 1);
    }
}

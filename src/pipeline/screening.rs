//! Screening stage: cheap metadata-only verdict.
//!
//! Decides from subject, sender and preview whether a message deserves the
//! full-content analysis. Messages that don't are closed as `screened_only`.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::StageConfig;
use crate::error::PipelineError;
use crate::llm::parse::parse_or_fallback;
use crate::llm::{CompletionRequest, LlmClient, ResponseSchema, RetryPolicy};
use crate::pipeline::types::{Message, MessageStatus, ScreeningResult, StageOutcome};
use crate::safety::{clean_text, truncate_chars};
use crate::store::Database;
use crate::worker::{JobDispatcher, JobKind};

const STAGE: &str = "screening";

/// Characters of preview text sent to the model.
const PREVIEW_CHARS: usize = 200;

const SCREENED_DEFAULT_RESPONSE: &str = "Screening completed";

pub struct ScreeningStage {
    store: Arc<dyn Database>,
    llm: Arc<dyn LlmClient>,
    dispatcher: Arc<dyn JobDispatcher>,
    config: StageConfig,
    retry: RetryPolicy,
}

impl ScreeningStage {
    pub fn new(
        store: Arc<dyn Database>,
        llm: Arc<dyn LlmClient>,
        dispatcher: Arc<dyn JobDispatcher>,
        config: StageConfig,
    ) -> Self {
        let retry = RetryPolicy::with_max_attempts(config.llm_max_attempts);
        Self {
            store,
            llm,
            dispatcher,
            config,
            retry,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Screen one message.
    ///
    /// Errors before the claim are plain storage errors and safe to retry.
    /// After the claim they surface as `StageAborted`.
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
                "Message not claimable for screening, skipping"
            );
            return Ok(StageOutcome::Skipped);
        }

        if !self
            .store
            .claim_message(message_id, MessageStatus::Screening)
            .await?
        {
            info!(message_id, "Lost screening claim, skipping");
            return Ok(StageOutcome::Skipped);
        }
        info!(message_id, subject = %message.subject, from = %message.sender_address, "Screening claimed");

        self.screen_claimed(&message)
            .await
            .map_err(|reason| PipelineError::StageAborted {
                stage: STAGE,
                message_id: message_id.to_string(),
                reason,
            })
    }

    async fn screen_claimed(&self, message: &Message) -> Result<StageOutcome, String> {
        let id = message.id.as_str();
        let request = CompletionRequest::new(SYSTEM_PROMPT, build_user_prompt(message))
            .with_schema(response_schema())
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens)
        .with_timeout(self.config.llm_request_timeout);

        info!(message_id = id, model = self.llm.model_name(), "Screening LLM call started");
        let raw = match self
            .retry
            .run(STAGE, |_| self.llm.complete(request.clone()))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(message_id = id, error = %e, "Screening LLM call failed");
                self.store
                    .fail(id, MessageStatus::Screening, &format!("Screening failed: {e}"))
                    .await
                    .map_err(|e| e.to_string())?;
                return Ok(StageOutcome::Failed);
            }
        };
        info!(message_id = id, chars = raw.len(), "Screening LLM call finished");

        let (verdict, _) = parse_or_fallback(&raw, STAGE, |_| ScreeningResult::fallback());
        self.store
            .record_screening(id, &verdict)
            .await
            .map_err(|e| e.to_string())?;

        if verdict.needs_full_processing {
            if !self
                .store
                .requeue_for_processing(id)
                .await
                .map_err(|e| e.to_string())?
            {
                return Err("message left screening before requeue".to_string());
            }
            info!(
                message_id = id,
                category = %verdict.category,
                reason = verdict.full_processing_reason.as_deref().unwrap_or("Needs detailed analysis"),
                "Queued for full processing"
            );
            // A pending message with a verdict is re-dispatched at startup.
            if let Err(e) = self.dispatcher.dispatch(JobKind::Process, id).await {
                warn!(message_id = id, error = %e, "Process job dispatch failed");
            }
            return Ok(StageOutcome::Requeued);
        }

        let response = if verdict.quick_analysis.trim().is_empty() {
            SCREENED_DEFAULT_RESPONSE
        } else {
            verdict.quick_analysis.as_str()
        };
        if !self
            .store
            .finish(id, MessageStatus::Screening, MessageStatus::ScreenedOnly, response, &[])
            .await
            .map_err(|e| e.to_string())?
        {
            return Err("message left screening before completion".to_string());
        }
        info!(
            message_id = id,
            category = %verdict.category,
            priority = ?verdict.priority,
            "Screening complete, no full processing needed"
        );
        Ok(StageOutcome::ScreenedOnly)
    }
}

const SYSTEM_PROMPT: &str = "You are an intelligent email screening assistant. Your job is to quickly analyze email metadata and determine if an email needs full content analysis.

Analyze emails and categorize them appropriately:
- category: urgent|work|personal|newsletter|promotional|notification|spam|support
- priority: high|medium|low
- sentiment: positive|neutral|negative
- needs_full_processing: true for urgent work emails, personal messages requiring action, complex support requests; false for newsletters, promotional emails, automated notifications, simple confirmations
- full_processing_reason: Explain why full processing is needed (if applicable)
- quick_analysis: Brief analysis based on metadata
- confidence: high|medium|low for your assessment

Be conservative - when in doubt, suggest full processing for important senders or urgent subjects.";

/// Metadata-only prompt. The body is never sent at this stage.
fn build_user_prompt(message: &Message) -> String {
    let preview = truncate_chars(&clean_text(&message.preview_text), PREVIEW_CHARS);
    format!(
        "Screen this email based on metadata only:\n\n\
         SUBJECT: {subject}\n\
         FROM: {name} <{address}>\n\
         RECEIVED: {received}\n\
         HAS ATTACHMENTS: {attachments}\n\n\
         PREVIEW:\n{preview}\n\n\
         Analyze this email metadata and determine if it needs full content processing.",
        subject = clean_text(&message.subject),
        name = clean_text(&message.sender_name),
        address = clean_text(&message.sender_address),
        received = message.received_at.format("%Y-%m-%d %H:%M:%S"),
        attachments = if message.has_attachments { "Yes" } else { "No" },
    )
}

fn response_schema() -> ResponseSchema {
    ResponseSchema::new(
        "email_screening_response",
        serde_json::json!({
            "type": "object",
            "properties": {
                "category": {
                    "type": "string",
                    "enum": ["urgent", "work", "personal", "newsletter", "promotional", "notification", "spam", "support"]
                },
                "priority": { "type": "string", "enum": ["high", "medium", "low"] },
                "sentiment": { "type": "string", "enum": ["positive", "neutral", "negative"] },
                "needs_full_processing": { "type": "boolean" },
                "full_processing_reason": { "type": "string" },
                "quick_analysis": { "type": "string" },
                "confidence": { "type": "string", "enum": ["high", "medium", "low"] }
            },
            "required": ["category", "priority", "sentiment", "needs_full_processing", "quick_analysis", "confidence"]
        }),
    )
}

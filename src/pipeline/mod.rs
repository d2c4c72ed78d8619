//! Two-stage LLM pipeline for inbound email.
//!
//! Every eligible message flows through:
//! 1. `MessageIntake::accept()`: persist with an eligibility decision
//! 2. `ScreeningStage::run()`: cheap metadata-only LLM verdict
//! 3. `ProcessingStage::run()`: full-content analysis, actions and tool calls
//!
//! Each stage claims the message with an atomic `pending → <stage>` update
//! before doing any work, so redelivered jobs are harmless.

pub mod actions;
pub mod intake;
pub mod processing;
pub mod screening;
pub mod state;
pub mod types;

pub use actions::ActionExecutor;
pub use intake::{EligibilityPolicy, MessageIntake};
pub use processing::{ProcessingPolicy, ProcessingStage};
pub use screening::ScreeningStage;
pub use state::MessageStatus;

//! Mail triage: LLM screening and processing of incoming email.

pub mod config;
pub mod error;
pub mod llm;
pub mod ops;
pub mod pipeline;
pub mod safety;
pub mod services;
pub mod store;
pub mod tools;
pub mod worker;

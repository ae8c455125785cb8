//! Shared domain types for Mailloom.
//!
//! This crate contains the core domain types used across the Mailloom
//! engine: workflow/step/trigger definitions, execution instances, chat
//! messages, the LLM and tool contracts, mail threads, and log entries.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod log;
pub mod mail;
pub mod message;
pub mod user;
pub mod workflow;

//! Business logic and repository trait definitions for Mailloom.
//!
//! This crate defines the "ports" (store, balance, log, LLM, tool, and
//! retrieval traits) that the infrastructure layer implements, plus the
//! workflow engine built on top of them. It depends only on
//! `mailloom-types` -- never on `mailloom-infra` or any database/IO crate.

pub mod llm;
pub mod rag;
pub mod repository;
pub mod tool;
pub mod workflow;

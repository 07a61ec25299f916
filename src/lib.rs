//! Foreman: autonomous-agent orchestration core.
//!
//! Users submit goals; the scheduler decomposes them into dependency-ordered
//! work items, dispatches runs across bounded lanes, verifies results with
//! quality gates, and escalates anything needing human input. The gateway
//! exposes the whole thing over an authenticated full-duplex JSON channel,
//! and the LLM layer routes completions across providers with fallback.

pub mod domain;
pub mod gateway;
pub mod infrastructure;
pub mod llm;
pub mod services;

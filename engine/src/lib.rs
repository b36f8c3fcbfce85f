//! Steward Engine Library
//!
//! Core of the Steward task agent, shared by the `steward` binary and the
//! integration tests.

/// Configuration management module
pub mod config;

/// Secret management module
pub mod secrets;

/// Database persistence module
pub mod db;

/// LLM provider abstraction layer
pub mod llm;

/// Token accounting and context budget
pub mod tokens;

/// Per-task workspace directories
pub mod workspace;

/// Task-scoped document memory
pub mod memory;

/// Ability registry and built-in abilities
pub mod abilities;

/// Agent loop core module
pub mod agent;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;

//! # planloop Core
//!
//! Domain types, traits, and error definitions for the planloop orchestration loop.
//! This crate has **no I/O**: it defines the vocabulary the backend client,
//! the roles, and the orchestrator are written against.
//!
//! ## Design Philosophy
//!
//! The completion backend is a trait here; the HTTP implementation lives in
//! `planloop-providers`. Every artifact a role produces (Task Description,
//! Plan Document, Gap Report, Execution Record) is a plain value type with its
//! own parser, so the orchestrator can enforce structure mechanically instead
//! of trusting the backend to self-police.

pub mod artifact;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod role;

// Re-export key types at crate root for ergonomics
pub use artifact::{
    ExecutionRecord, Gap, GapReport, PlanDocument, PlanVersion, Step, TaskDescription,
};
pub use error::{Error, ProviderError, Result};
pub use event::{EventBus, RunEvent};
pub use message::{Message, Role};
pub use provider::{
    CompletionOptions, Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage,
};
pub use role::{RoleKind, RunPhase};

/// Workflow Management Layer
///
/// This module handles workflow definitions, edit-time validation,
/// persistence, and the hot-reload registry:
/// - Type definitions (Workflow, Node, NodeKind, Edge, Port)
/// - Connection validation (port compatibility and acyclicity)
/// - SQLite persistence with sqlx
/// - Lock-free hot-reload registry using ArcSwap

// Core workflow type definitions
pub mod types;

// Edit-time connection validation
pub mod validator;

// SQLite persistence layer for workflow storage
pub mod storage;

// Hot-reload registry using ArcSwap for zero-downtime updates
pub mod registry;

// Re-export commonly used types
pub use types::{Edge, Medium, Node, NodeKind, Port, Workflow};
pub use validator::{check_connection, is_valid_connection, validate_workflow, ConnectionError};

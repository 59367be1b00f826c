//! crates/refund_agent_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! core to be independent of specific external implementations like databases
//! or model APIs.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{Order, OrderItem, Refund, ThreadMessage, ToolCall};
use crate::refund::{RefundDecision, RefundFiling};
use crate::taxonomy::TaxonomyEntry;

//=========================================================================================
// Port Error and Result Types
//=========================================================================================

/// The error taxonomy every port operation reports through.
///
/// All variants except `Unexpected` are domain errors: terminal,
/// non-retryable, and returned as values so the orchestration can feed them
/// back into the model's context as a tool result instead of aborting the
/// turn. `Unexpected` covers transport/infrastructure failures and is the
/// only category that surfaces as a stream `error` unit.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Forbidden: the requested resource belongs to another user")]
    Forbidden,
    #[error("A refund for this item is already approved or in processing")]
    DuplicateRefund,
    #[error("Unknown refund category: {0}")]
    InvalidTaxonomy(String),
    #[error("Refund window has closed: {0}")]
    IneligibleWindow(String),
    #[error("Refund is already resolved")]
    AlreadyResolved,
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl PortError {
    /// Domain errors go back to the model as tool results; everything else
    /// is a transport failure the caller must report on the stream.
    pub fn is_domain(&self) -> bool {
        !matches!(self, PortError::Unexpected(_))
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Store Port
//=========================================================================================

/// Persistence boundary for the order ledger, the refund workflow and
/// conversation threads. All refund writes go through `file_refund` /
/// `resolve_refund` so the uniqueness and state-machine invariants stay
/// centrally enforced.
#[async_trait]
pub trait StoreService: Send + Sync {
    // --- Collaborator boundary: authentication ---
    // This core never verifies credentials; it only resolves an existing
    // session to the already-authenticated user it belongs to.
    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    // --- Order ledger ---
    /// All orders owned by `user_id`, most recent first.
    async fn list_orders(&self, user_id: Uuid) -> PortResult<Vec<Order>>;

    /// A single order; `Forbidden` when it exists but belongs to someone
    /// else, `NotFound` when it does not exist.
    async fn get_order(&self, order_id: Uuid, user_id: Uuid) -> PortResult<Order>;

    /// An order item together with its owning order (the order carries the
    /// timestamps eligibility rules evaluate against). Ownership-checked.
    async fn get_order_item(
        &self,
        order_item_id: Uuid,
        user_id: Uuid,
    ) -> PortResult<(Order, OrderItem)>;

    // --- Refund workflow ---
    async fn get_taxonomy(&self) -> PortResult<Vec<TaxonomyEntry>>;

    async fn refunds_for_item(&self, order_item_id: Uuid) -> PortResult<Vec<Refund>>;

    /// All refunds across the user's orders, most recent first.
    async fn list_refunds(&self, user_id: Uuid) -> PortResult<Vec<Refund>>;

    /// Files a refund per the workflow pre-conditions (duplicate check,
    /// taxonomy check, eligibility window, amount derivation), atomically:
    /// two concurrent filings against the same item must not both succeed.
    async fn file_refund(&self, filing: RefundFiling) -> PortResult<Refund>;

    /// Transitions a PROCESSING refund to a terminal state and stamps
    /// `processed_at`. A second resolution reports `AlreadyResolved`.
    async fn resolve_refund(&self, refund_id: Uuid, decision: RefundDecision)
        -> PortResult<Refund>;

    // --- Conversation threads ---
    /// Creates the thread row if it does not exist yet.
    async fn ensure_thread(&self, thread_id: Uuid) -> PortResult<()>;

    async fn append_message(&self, message: &ThreadMessage) -> PortResult<()>;

    /// The thread's messages in append order.
    async fn get_messages(&self, thread_id: Uuid) -> PortResult<Vec<ThreadMessage>>;

    /// Clears the thread's history. Idempotent; never cascades to orders or
    /// refunds.
    async fn delete_thread(&self, thread_id: Uuid) -> PortResult<()>;
}

//=========================================================================================
// Chat Model Port
//=========================================================================================

/// A callable tool as advertised to the model: name, description and a JSON
/// schema for its parameters.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: serde_json::Value,
}

/// One completion from the model: assistant text plus any tool invocations
/// it requested. The orchestration loops until a turn carries no tool calls.
#[derive(Debug, Clone)]
pub struct ModelTurn {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

/// The language model, treated as a black box that accepts a conversation
/// history and a set of callable tools and yields the next turn.
#[async_trait]
pub trait ChatModelService: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[ThreadMessage],
        tools: &[ToolSpec],
    ) -> PortResult<ModelTurn>;
}

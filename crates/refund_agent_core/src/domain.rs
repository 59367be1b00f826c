//! crates/refund_agent_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::money::{Money, Percent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PROCESSING" => Some(OrderStatus::Processing),
            "SHIPPED" => Some(OrderStatus::Shipped),
            "DELIVERED" => Some(OrderStatus::Delivered),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

/// A catalog product. Immutable once referenced by an order item except for
/// `stock_quantity`, which fulfillment mutates outside this core.
#[derive(Debug, Clone)]
pub struct Product {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub unit_price: Money,
    pub tax_percent: Percent,
    pub stock_quantity: i32,
}

/// Exactly one of percent / fixed amount; a discount carrying both (or
/// neither) is unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountKind {
    Percent(Percent),
    Fixed(Money),
}

#[derive(Debug, Clone)]
pub struct Discount {
    pub id: Uuid,
    pub code: String,
    pub kind: DiscountKind,
}

/// One product line within an order. `unit_price` and `tax_percent` are
/// captured at purchase time; later catalog changes never reach them.
#[derive(Debug, Clone)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product: Product,
    pub quantity: u32,
    pub unit_price: Money,
    pub tax_percent: Percent,
    pub discounts: Vec<Discount>,
}

/// An order as the ledger owns it. `paid_amount` is the checkout-time
/// snapshot of what the customer actually paid and is immutable
/// post-creation.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub paid_amount: Money,
    pub payment_method: String,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderItem>,
}

impl Order {
    pub fn item(&self, order_item_id: Uuid) -> Option<&OrderItem> {
        self.items.iter().find(|i| i.id == order_item_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundStatus {
    Processing,
    Approved,
    Denied,
}

impl RefundStatus {
    /// APPROVED and DENIED are terminal; only a new refund entity can retry
    /// a denied item.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RefundStatus::Approved | RefundStatus::Denied)
    }

    /// Whether an existing refund in this status blocks a new filing for
    /// the same order item.
    pub fn blocks_new_filing(&self) -> bool {
        matches!(self, RefundStatus::Processing | RefundStatus::Approved)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Processing => "PROCESSING",
            RefundStatus::Approved => "APPROVED",
            RefundStatus::Denied => "DENIED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PROCESSING" => Some(RefundStatus::Processing),
            "APPROVED" => Some(RefundStatus::Approved),
            "DENIED" => Some(RefundStatus::Denied),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Refund {
    pub id: Uuid,
    pub order_item_id: Uuid,
    pub taxonomy_id: Uuid,
    pub reason: String,
    pub status: RefundStatus,
    pub amount: Money,
    pub evidence: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "tool" => Some(MessageRole::Tool),
            _ => None,
        }
    }
}

/// A tool invocation requested by the model within an assistant turn.
/// `arguments` is the raw JSON-object string exactly as the model produced
/// it; the dispatcher parses it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// One turn in a conversation thread. Threads are append-only and fully
/// independent of the ledger; deleting one never touches orders or refunds.
///
/// `tool_calls` is populated only on assistant turns that requested tools;
/// `tool_call_id` only on tool-result turns, linking back to the request.
#[derive(Debug, Clone)]
pub struct ThreadMessage {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ThreadMessage {
    pub fn user(thread_id: Uuid, content: impl Into<String>) -> Self {
        Self::new(thread_id, MessageRole::User, content.into(), Vec::new(), None)
    }

    pub fn assistant(thread_id: Uuid, content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::new(thread_id, MessageRole::Assistant, content.into(), tool_calls, None)
    }

    pub fn tool(thread_id: Uuid, tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(
            thread_id,
            MessageRole::Tool,
            content.into(),
            Vec::new(),
            Some(tool_call_id.into()),
        )
    }

    fn new(
        thread_id: Uuid,
        role: MessageRole,
        content: String,
        tool_calls: Vec<ToolCall>,
        tool_call_id: Option<String>,
    ) -> Self {
        ThreadMessage {
            id: Uuid::new_v4(),
            thread_id,
            role,
            content,
            tool_calls,
            tool_call_id,
            created_at: Utc::now(),
        }
    }
}

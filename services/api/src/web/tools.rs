//! services/api/src/web/tools.rs
//!
//! The tool surface the chat model can call, and the dispatcher that
//! executes those calls against the store.
//!
//! Every invocation receives the resolved user and thread explicitly via
//! `ToolContext`; there is no ambient session. Domain errors come back as
//! `{"error": ...}` tool results so the model can explain them to the user,
//! never as transport failures.

use refund_agent_core::domain::{DiscountKind, Order, OrderItem, Refund, ToolCall};
use refund_agent_core::ledger;
use refund_agent_core::ports::{PortError, StoreService, ToolSpec};
use refund_agent_core::refund::RefundFiling;
use refund_agent_core::stream::{encode_block, BlockTag};
use refund_agent_core::taxonomy::TaxonomyEntry;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

/// The resolved identity and conversation a tool call executes under,
/// passed explicitly to every dispatch.
#[derive(Debug, Clone, Copy)]
pub struct ToolContext {
    pub user_id: Uuid,
    pub thread_id: Uuid,
}

//=========================================================================================
// Presentation Views
//=========================================================================================
// The shapes embedded in structured blocks and returned by the REST reads.
// All amounts are integer minor units; the client formats them.

#[derive(Serialize, Debug, ToSchema)]
pub struct OrderItemSummary {
    pub id: Uuid,
    pub name: String,
    pub quantity: u32,
    pub unit_price: i64,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct OrderSummary {
    pub id: Uuid,
    pub status: String,
    pub paid_amount: i64,
    pub payment_method: String,
    pub items: Vec<OrderItemSummary>,
}

impl OrderSummary {
    pub fn from_order(order: &Order) -> Self {
        Self::with_items(order, order.items.iter().collect())
    }

    fn with_items(order: &Order, items: Vec<&OrderItem>) -> Self {
        OrderSummary {
            id: order.id,
            status: order.status.as_str().to_string(),
            paid_amount: order.paid_amount.minor(),
            payment_method: order.payment_method.clone(),
            items: items
                .into_iter()
                .map(|item| OrderItemSummary {
                    id: item.id,
                    name: item.product.title.clone(),
                    quantity: item.quantity,
                    unit_price: item.unit_price.minor(),
                })
                .collect(),
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct OrderItemDetail {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub quantity: u32,
    pub unit_price: i64,
    pub tax_percent: String,
    pub discounts: Vec<String>,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct OrderDetail {
    pub order_id: Uuid,
    pub status: String,
    pub payment_method: String,
    pub total_paid: i64,
    pub items: Vec<OrderItemDetail>,
}

impl OrderDetail {
    pub fn from_order(order: &Order) -> Self {
        OrderDetail {
            order_id: order.id,
            status: order.status.as_str().to_string(),
            payment_method: order.payment_method.clone(),
            total_paid: order.paid_amount.minor(),
            items: order
                .items
                .iter()
                .map(|item| OrderItemDetail {
                    id: item.id,
                    name: item.product.title.clone(),
                    description: item.product.description.clone().unwrap_or_default(),
                    quantity: item.quantity,
                    unit_price: item.unit_price.minor(),
                    tax_percent: item.tax_percent.to_string(),
                    discounts: item
                        .discounts
                        .iter()
                        .map(|d| match d.kind {
                            DiscountKind::Percent(p) => format!("{}: {} off", d.code, p),
                            DiscountKind::Fixed(a) => format!("{}: {} off", d.code, a),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct RefundView {
    pub refund_id: Uuid,
    pub order_item_id: Uuid,
    pub refund_type: String,
    pub status: String,
    pub amount: i64,
    pub reason: String,
    pub created_at: chrono::DateTime<Utc>,
    pub processed_at: Option<chrono::DateTime<Utc>>,
}

impl RefundView {
    pub fn from_refund(refund: &Refund, taxonomy: &[TaxonomyEntry]) -> Self {
        let refund_type = taxonomy
            .iter()
            .find(|t| t.id == refund.taxonomy_id)
            .map(|t| t.code.clone())
            .unwrap_or_default();
        RefundView {
            refund_id: refund.id,
            order_item_id: refund.order_item_id,
            refund_type,
            status: refund.status.as_str().to_string(),
            amount: refund.amount.minor(),
            reason: refund.reason.clone(),
            created_at: refund.created_at,
            processed_at: refund.processed_at,
        }
    }
}

//=========================================================================================
// Tool Definitions
//=========================================================================================

/// The tools advertised to the model on every completion.
pub fn specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "list_orders",
            description: "List the user's orders, optionally filtered by product name. \
                          Use an empty product_name to get all orders.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "product_name": {
                        "type": "string",
                        "description": "Full or partial product name to filter by; empty for all orders"
                    }
                },
                "required": []
            }),
        },
        ToolSpec {
            name: "get_order",
            description: "Get detailed information about a specific order by its ID, \
                          including every item, price, tax rate and discount.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "order_id": { "type": "string", "description": "The order's UUID" }
                },
                "required": ["order_id"]
            }),
        },
        ToolSpec {
            name: "check_refund_eligibility",
            description: "Get the facts needed to assess a refund: order status, order and \
                          delivery dates, the maximum refundable amount and its breakdown, \
                          and whether a refund already exists for the item.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "order_id": { "type": "string", "description": "The order's UUID" },
                    "order_item_id": { "type": "string", "description": "The order item's UUID" }
                },
                "required": ["order_id", "order_item_id"]
            }),
        },
        ToolSpec {
            name: "file_refund",
            description: "File a refund request for an order item. The refund is created in \
                          PROCESSING status for the full refundable amount of the item.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "order_item_id": { "type": "string", "description": "The order item's UUID" },
                    "refund_type": {
                        "type": "string",
                        "description": "One of the refund categories, e.g. DAMAGED_ITEM"
                    },
                    "reason": { "type": "string", "description": "The user's stated reason" },
                    "evidence": {
                        "type": "string",
                        "description": "Optional supporting evidence provided by the user"
                    }
                },
                "required": ["order_item_id", "refund_type", "reason"]
            }),
        },
        ToolSpec {
            name: "list_refunds",
            description: "List the user's refund requests with status, amount and dates.",
            parameters: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        },
    ]
}

//=========================================================================================
// Dispatch
//=========================================================================================

#[derive(Deserialize, Default)]
struct ListOrdersArgs {
    #[serde(default)]
    product_name: String,
}

#[derive(Deserialize)]
struct GetOrderArgs {
    order_id: Uuid,
}

#[derive(Deserialize)]
struct EligibilityArgs {
    order_id: Uuid,
    order_item_id: Uuid,
}

#[derive(Deserialize)]
struct FileRefundArgs {
    order_item_id: Uuid,
    refund_type: String,
    reason: String,
    evidence: Option<String>,
}

/// Executes one tool call and renders its result string. Infallible from
/// the caller's point of view: every failure becomes an `{"error": ...}`
/// result the model can work with.
pub async fn dispatch(store: &Arc<dyn StoreService>, ctx: &ToolContext, call: &ToolCall) -> String {
    let result = match call.name.as_str() {
        "list_orders" => list_orders(store, ctx, &call.arguments).await,
        "get_order" => get_order(store, ctx, &call.arguments).await,
        "check_refund_eligibility" => check_refund_eligibility(store, ctx, &call.arguments).await,
        "file_refund" => file_refund(store, ctx, &call.arguments).await,
        "list_refunds" => list_refunds(store, ctx).await,
        other => Ok(json!({ "error": format!("Tool '{}' not found", other) }).to_string()),
    };

    result.unwrap_or_else(|e| {
        if !e.is_domain() {
            warn!("Tool {} failed: {}", call.name, e);
        }
        json!({ "error": e.to_string() }).to_string()
    })
}

fn parse_args<T: for<'de> Deserialize<'de>>(raw: &str) -> Result<T, PortError> {
    serde_json::from_str(raw)
        .map_err(|e| PortError::Unexpected(format!("Invalid tool arguments: {}", e)))
}

async fn list_orders(
    store: &Arc<dyn StoreService>,
    ctx: &ToolContext,
    raw_args: &str,
) -> Result<String, PortError> {
    let args: ListOrdersArgs = if raw_args.trim().is_empty() {
        ListOrdersArgs::default()
    } else {
        parse_args(raw_args)?
    };
    let orders = store.list_orders(ctx.user_id).await?;

    let needle = args.product_name.trim().to_lowercase();
    let summaries: Vec<OrderSummary> = orders
        .iter()
        .filter_map(|order| {
            if needle.is_empty() {
                return Some(OrderSummary::from_order(order));
            }
            let matching: Vec<&OrderItem> = order
                .items
                .iter()
                .filter(|item| item.product.title.to_lowercase().contains(&needle))
                .collect();
            if matching.is_empty() {
                None
            } else {
                Some(OrderSummary::with_items(order, matching))
            }
        })
        .collect();

    if summaries.is_empty() {
        let message = if needle.is_empty() {
            "You don't have any orders yet.".to_string()
        } else {
            format!("No orders found containing '{}'.", args.product_name.trim())
        };
        return Ok(json!({ "error": message }).to_string());
    }

    Ok(format!(
        "{}\n\nFound {} order(s).",
        encode_block(BlockTag::OrderList, &summaries),
        summaries.len()
    ))
}

async fn get_order(
    store: &Arc<dyn StoreService>,
    ctx: &ToolContext,
    raw_args: &str,
) -> Result<String, PortError> {
    let args: GetOrderArgs = parse_args(raw_args)?;
    let order = store.get_order(args.order_id, ctx.user_id).await?;
    let detail = OrderDetail::from_order(&order);
    Ok(format!(
        "{}\n\nOrder {} has {} item(s); total paid {}.",
        encode_block(BlockTag::OrderDetail, &detail),
        order.id,
        order.items.len(),
        order.paid_amount
    ))
}

async fn check_refund_eligibility(
    store: &Arc<dyn StoreService>,
    ctx: &ToolContext,
    raw_args: &str,
) -> Result<String, PortError> {
    let args: EligibilityArgs = parse_args(raw_args)?;
    let (order, item) = store.get_order_item(args.order_item_id, ctx.user_id).await?;
    if order.id != args.order_id {
        return Err(PortError::NotFound(format!(
            "Order item {} does not belong to order {}",
            args.order_item_id, args.order_id
        )));
    }

    let existing = store.refunds_for_item(item.id).await?;
    if let Some(blocking) = existing.iter().find(|r| r.status.blocks_new_filing()) {
        return Ok(json!({
            "eligible": false,
            "error": "DUPLICATE_REFUND",
            "message": format!(
                "A refund for this item is already {}",
                blocking.status.as_str().to_lowercase()
            ),
        })
        .to_string());
    }

    let now = Utc::now();
    let days_since_order = (now - order.created_at).num_days();
    let days_since_delivery = order.delivered_at.map(|d| (now - d).num_days());

    Ok(json!({
        "order_id": order.id,
        "order_item_id": item.id,
        "order_status": order.status.as_str(),
        "created_at": order.created_at.to_rfc3339(),
        "delivered_at": order.delivered_at.map(|d| d.to_rfc3339()),
        "is_delivered": order.delivered_at.is_some(),
        "days_since_order": days_since_order,
        "days_since_delivery": days_since_delivery,
        "max_refund_amount": ledger::refundable_base(&item).minor(),
        "refund_breakdown": ledger::refund_breakdown(&item),
    })
    .to_string())
}

async fn file_refund(
    store: &Arc<dyn StoreService>,
    ctx: &ToolContext,
    raw_args: &str,
) -> Result<String, PortError> {
    let args: FileRefundArgs = parse_args(raw_args)?;
    let (_, item) = store.get_order_item(args.order_item_id, ctx.user_id).await?;

    let refund = store
        .file_refund(RefundFiling {
            user_id: ctx.user_id,
            order_item_id: args.order_item_id,
            category_code: args.refund_type,
            reason: args.reason,
            evidence: args.evidence,
        })
        .await?;

    Ok(json!({
        "success": true,
        "refund_id": refund.id,
        "amount": refund.amount.minor(),
        "status": refund.status.as_str(),
        "breakdown": ledger::refund_breakdown(&item),
    })
    .to_string())
}

async fn list_refunds(
    store: &Arc<dyn StoreService>,
    ctx: &ToolContext,
) -> Result<String, PortError> {
    let refunds = store.list_refunds(ctx.user_id).await?;
    if refunds.is_empty() {
        return Ok(json!({ "message": "No refunds found for this user" }).to_string());
    }
    let taxonomy = store.get_taxonomy().await?;
    let views: Vec<RefundView> = refunds
        .iter()
        .map(|r| RefundView::from_refund(r, &taxonomy))
        .collect();
    Ok(json!({ "refunds": views }).to_string())
}

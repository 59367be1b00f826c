//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `StoreService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Queries are runtime-checked (`sqlx::query_as::<_, Record>`) against record
//! structs that map to domain types via `to_domain()`. Refund writes run in
//! transactions; the partial unique index on active refunds makes the
//! duplicate check hold under concurrent filings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use refund_agent_core::domain::{
    Discount, DiscountKind, MessageRole, Order, OrderItem, OrderStatus, Product, Refund,
    RefundStatus, ThreadMessage, ToolCall,
};
use refund_agent_core::ledger;
use refund_agent_core::money::{Money, Percent};
use refund_agent_core::ports::{PortError, PortResult, StoreService};
use refund_agent_core::refund::{self, RefundDecision, RefundFiling};
use refund_agent_core::taxonomy::{OrderTimestamps, TaxonomyEntry};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Name of the partial unique index that keeps at most one PROCESSING or
/// APPROVED refund per order item. A violation here is the concurrent-filing
/// race, reported as `DuplicateRefund`.
const ACTIVE_REFUND_INDEX: &str = "uniq_active_refund_per_item";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `StoreService` port.
#[derive(Clone)]
pub struct DbStore {
    pool: PgPool,
}

impl DbStore {
    /// Creates a new `DbStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct OrderRecord {
    id: Uuid,
    user_id: Uuid,
    status: String,
    paid_amount: i64,
    payment_method: String,
    created_at: DateTime<Utc>,
    delivered_at: Option<DateTime<Utc>>,
}

impl OrderRecord {
    fn to_domain(self, items: Vec<OrderItem>) -> PortResult<Order> {
        let status = OrderStatus::parse(&self.status)
            .ok_or_else(|| PortError::Unexpected(format!("Unknown order status {}", self.status)))?;
        Ok(Order {
            id: self.id,
            user_id: self.user_id,
            status,
            paid_amount: Money::from_minor(self.paid_amount),
            payment_method: self.payment_method,
            created_at: self.created_at,
            delivered_at: self.delivered_at,
            items,
        })
    }
}

#[derive(FromRow)]
struct OrderItemRecord {
    id: Uuid,
    order_id: Uuid,
    quantity: i32,
    unit_price: i64,
    tax_bps: i32,
    product_id: Uuid,
    product_title: String,
    product_description: Option<String>,
    product_price: i64,
    product_tax_bps: i32,
    product_stock: i32,
}

impl OrderItemRecord {
    fn to_domain(self, discounts: Vec<Discount>) -> OrderItem {
        OrderItem {
            id: self.id,
            order_id: self.order_id,
            product: Product {
                id: self.product_id,
                title: self.product_title,
                description: self.product_description,
                unit_price: Money::from_minor(self.product_price),
                tax_percent: Percent::from_bps(self.product_tax_bps as u32),
                stock_quantity: self.product_stock,
            },
            quantity: self.quantity as u32,
            unit_price: Money::from_minor(self.unit_price),
            tax_percent: Percent::from_bps(self.tax_bps as u32),
            discounts,
        }
    }
}

#[derive(FromRow)]
struct DiscountRecord {
    order_item_id: Uuid,
    id: Uuid,
    code: String,
    percent_bps: Option<i32>,
    amount: Option<i64>,
}

impl DiscountRecord {
    fn to_domain(self) -> PortResult<(Uuid, Discount)> {
        let kind = match (self.percent_bps, self.amount) {
            (Some(bps), None) => DiscountKind::Percent(Percent::from_bps(bps as u32)),
            (None, Some(amount)) => DiscountKind::Fixed(Money::from_minor(amount)),
            _ => {
                return Err(PortError::Unexpected(format!(
                    "Discount {} has an invalid percent/amount combination",
                    self.id
                )))
            }
        };
        Ok((
            self.order_item_id,
            Discount {
                id: self.id,
                code: self.code,
                kind,
            },
        ))
    }
}

#[derive(FromRow)]
struct TaxonomyRecord {
    id: Uuid,
    reason: String,
    description: String,
}

impl TaxonomyRecord {
    fn to_domain(self) -> TaxonomyEntry {
        TaxonomyEntry {
            id: self.id,
            code: self.reason,
            description: self.description,
        }
    }
}

#[derive(FromRow)]
struct RefundRecord {
    id: Uuid,
    order_item_id: Uuid,
    refund_taxonomy_id: Uuid,
    reason: String,
    status: String,
    amount: i64,
    evidence: Option<String>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl RefundRecord {
    fn to_domain(self) -> PortResult<Refund> {
        let status = RefundStatus::parse(&self.status)
            .ok_or_else(|| PortError::Unexpected(format!("Unknown refund status {}", self.status)))?;
        Ok(Refund {
            id: self.id,
            order_item_id: self.order_item_id,
            taxonomy_id: self.refund_taxonomy_id,
            reason: self.reason,
            status,
            amount: Money::from_minor(self.amount),
            evidence: self.evidence,
            created_at: self.created_at,
            processed_at: self.processed_at,
        })
    }
}

#[derive(FromRow)]
struct MessageRecord {
    id: Uuid,
    thread_id: Uuid,
    role: String,
    content: String,
    tool_calls: Option<String>,
    tool_call_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl MessageRecord {
    fn to_domain(self) -> PortResult<ThreadMessage> {
        let role = MessageRole::parse(&self.role)
            .ok_or_else(|| PortError::Unexpected(format!("Unknown message role {}", self.role)))?;
        let tool_calls: Vec<ToolCall> = match self.tool_calls {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| PortError::Unexpected(format!("Corrupt tool_calls column: {}", e)))?,
            None => Vec::new(),
        };
        Ok(ThreadMessage {
            id: self.id,
            thread_id: self.thread_id,
            role,
            content: self.content,
            tool_calls,
            tool_call_id: self.tool_call_id,
            created_at: self.created_at,
        })
    }
}

//=========================================================================================
// Query Helpers
//=========================================================================================

const ITEM_COLUMNS: &str = "order_items.id, order_items.order_id, order_items.quantity, \
     order_items.unit_price, order_items.tax_bps, \
     products.id as product_id, products.title as product_title, \
     products.description as product_description, products.price as product_price, \
     products.tax_bps as product_tax_bps, products.stock_quantity as product_stock";

impl DbStore {
    /// Loads the items (with product snapshots and discounts) for a set of
    /// orders in two queries, then groups them in memory.
    async fn load_items(&self, order_ids: &[Uuid]) -> PortResult<Vec<OrderItem>> {
        if order_ids.is_empty() {
            return Ok(Vec::new());
        }

        let item_records = sqlx::query_as::<_, OrderItemRecord>(&format!(
            "SELECT {ITEM_COLUMNS} FROM order_items \
             INNER JOIN products ON order_items.product_id = products.id \
             WHERE order_items.order_id = ANY($1) \
             ORDER BY order_items.created_at ASC"
        ))
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let item_ids: Vec<Uuid> = item_records.iter().map(|r| r.id).collect();
        let discount_records = sqlx::query_as::<_, DiscountRecord>(
            "SELECT order_discounts.order_item_id, discounts.id, discounts.code, \
                    discounts.percent_bps, discounts.amount \
             FROM order_discounts \
             INNER JOIN discounts ON order_discounts.discount_id = discounts.id \
             WHERE order_discounts.order_item_id = ANY($1)",
        )
        .bind(&item_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let mut discounts_by_item: std::collections::HashMap<Uuid, Vec<Discount>> =
            std::collections::HashMap::new();
        for record in discount_records {
            let (item_id, discount) = record.to_domain()?;
            discounts_by_item.entry(item_id).or_default().push(discount);
        }

        Ok(item_records
            .into_iter()
            .map(|record| {
                let discounts = discounts_by_item.remove(&record.id).unwrap_or_default();
                record.to_domain(discounts)
            })
            .collect())
    }

    async fn load_order(&self, order_id: Uuid) -> PortResult<Order> {
        let record = sqlx::query_as::<_, OrderRecord>(
            "SELECT id, user_id, status, paid_amount, payment_method, created_at, delivered_at \
             FROM orders WHERE id = $1",
        )
        .bind(order_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("Order {} not found", order_id)),
            _ => unexpected(e),
        })?;

        let items = self.load_items(&[order_id]).await?;
        record.to_domain(items)
    }

    async fn refund_statuses_for_item(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        order_item_id: Uuid,
    ) -> PortResult<Vec<RefundStatus>> {
        // FOR UPDATE serializes concurrent filings against the same item's
        // existing rows; the partial unique index covers the insert race.
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT status FROM order_refunds WHERE order_item_id = $1 FOR UPDATE",
        )
        .bind(order_item_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(unexpected)?;

        rows.into_iter()
            .map(|(status,)| {
                RefundStatus::parse(&status)
                    .ok_or_else(|| PortError::Unexpected(format!("Unknown refund status {status}")))
            })
            .collect()
    }
}

//=========================================================================================
// `StoreService` Trait Implementation
//=========================================================================================

#[async_trait]
impl StoreService for DbStore {
    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let row = sqlx::query_as::<_, (Uuid,)>(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > now()",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::Forbidden,
            _ => unexpected(e),
        })?;
        Ok(row.0)
    }

    async fn list_orders(&self, user_id: Uuid) -> PortResult<Vec<Order>> {
        let records = sqlx::query_as::<_, OrderRecord>(
            "SELECT id, user_id, status, paid_amount, payment_method, created_at, delivered_at \
             FROM orders WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let order_ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        let mut items = self.load_items(&order_ids).await?;

        let mut orders = Vec::with_capacity(records.len());
        for record in records {
            let order_id = record.id;
            let (own, rest): (Vec<OrderItem>, Vec<OrderItem>) =
                items.into_iter().partition(|i| i.order_id == order_id);
            items = rest;
            orders.push(record.to_domain(own)?);
        }
        Ok(orders)
    }

    async fn get_order(&self, order_id: Uuid, user_id: Uuid) -> PortResult<Order> {
        let order = self.load_order(order_id).await?;
        if order.user_id != user_id {
            return Err(PortError::Forbidden);
        }
        Ok(order)
    }

    async fn get_order_item(
        &self,
        order_item_id: Uuid,
        user_id: Uuid,
    ) -> PortResult<(Order, OrderItem)> {
        let row = sqlx::query_as::<_, (Uuid,)>("SELECT order_id FROM order_items WHERE id = $1")
            .bind(order_item_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => {
                    PortError::NotFound(format!("Order item {} not found", order_item_id))
                }
                _ => unexpected(e),
            })?;

        let order = self.get_order(row.0, user_id).await?;
        let item = order
            .item(order_item_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Order item {} not found", order_item_id)))?;
        Ok((order, item))
    }

    async fn get_taxonomy(&self) -> PortResult<Vec<TaxonomyEntry>> {
        let records = sqlx::query_as::<_, TaxonomyRecord>(
            "SELECT id, reason, description FROM refund_taxonomy ORDER BY reason ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(TaxonomyRecord::to_domain).collect())
    }

    async fn refunds_for_item(&self, order_item_id: Uuid) -> PortResult<Vec<Refund>> {
        let records = sqlx::query_as::<_, RefundRecord>(
            "SELECT id, order_item_id, refund_taxonomy_id, reason, status, amount, evidence, \
                    created_at, processed_at \
             FROM order_refunds WHERE order_item_id = $1 ORDER BY created_at DESC",
        )
        .bind(order_item_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(RefundRecord::to_domain).collect()
    }

    async fn list_refunds(&self, user_id: Uuid) -> PortResult<Vec<Refund>> {
        let records = sqlx::query_as::<_, RefundRecord>(
            "SELECT order_refunds.id, order_refunds.order_item_id, \
                    order_refunds.refund_taxonomy_id, order_refunds.reason, \
                    order_refunds.status, order_refunds.amount, order_refunds.evidence, \
                    order_refunds.created_at, order_refunds.processed_at \
             FROM order_refunds \
             INNER JOIN order_items ON order_refunds.order_item_id = order_items.id \
             INNER JOIN orders ON order_items.order_id = orders.id \
             WHERE orders.user_id = $1 \
             ORDER BY order_refunds.created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(RefundRecord::to_domain).collect()
    }

    async fn file_refund(&self, filing: RefundFiling) -> PortResult<Refund> {
        // Ownership and existence checks happen before the write transaction.
        let (order, item) = self
            .get_order_item(filing.order_item_id, filing.user_id)
            .await?;

        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let existing = self
            .refund_statuses_for_item(&mut tx, filing.order_item_id)
            .await?;
        let timestamps = OrderTimestamps {
            created_at: order.created_at,
            delivered_at: order.delivered_at,
        };
        let category =
            refund::validate_filing(&existing, &filing.category_code, &timestamps, Utc::now())?;

        let taxonomy = sqlx::query_as::<_, TaxonomyRecord>(
            "SELECT id, reason, description FROM refund_taxonomy WHERE reason = $1",
        )
        .bind(category.code)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::InvalidTaxonomy(category.code.to_string()),
            _ => unexpected(e),
        })?;

        let amount = ledger::refundable_base(&item);

        let record = sqlx::query_as::<_, RefundRecord>(
            "INSERT INTO order_refunds \
                 (id, order_item_id, refund_taxonomy_id, reason, status, amount, evidence) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id, order_item_id, refund_taxonomy_id, reason, status, amount, evidence, \
                       created_at, processed_at",
        )
        .bind(Uuid::new_v4())
        .bind(filing.order_item_id)
        .bind(taxonomy.id)
        .bind(&filing.reason)
        .bind(RefundStatus::Processing.as_str())
        .bind(amount.minor())
        .bind(&filing.evidence)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match &e {
            // The concurrent filing that lost the race observes the other
            // insert through the partial unique index.
            sqlx::Error::Database(db) if db.constraint() == Some(ACTIVE_REFUND_INDEX) => {
                PortError::DuplicateRefund
            }
            _ => unexpected(e),
        })?;

        tx.commit().await.map_err(unexpected)?;
        record.to_domain()
    }

    async fn resolve_refund(
        &self,
        refund_id: Uuid,
        decision: RefundDecision,
    ) -> PortResult<Refund> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let current = sqlx::query_as::<_, RefundRecord>(
            "SELECT id, order_item_id, refund_taxonomy_id, reason, status, amount, evidence, \
                    created_at, processed_at \
             FROM order_refunds WHERE id = $1 FOR UPDATE",
        )
        .bind(refund_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Refund {} not found", refund_id))
            }
            _ => unexpected(e),
        })?
        .to_domain()?;

        let next = refund::resolve_transition(current.status, decision)?;

        let record = sqlx::query_as::<_, RefundRecord>(
            "UPDATE order_refunds SET status = $1, processed_at = now() WHERE id = $2 \
             RETURNING id, order_item_id, refund_taxonomy_id, reason, status, amount, evidence, \
                       created_at, processed_at",
        )
        .bind(next.as_str())
        .bind(refund_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        record.to_domain()
    }

    async fn ensure_thread(&self, thread_id: Uuid) -> PortResult<()> {
        sqlx::query("INSERT INTO threads (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(thread_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn append_message(&self, message: &ThreadMessage) -> PortResult<()> {
        let tool_calls = if message.tool_calls.is_empty() {
            None
        } else {
            Some(
                serde_json::to_string(&message.tool_calls)
                    .map_err(|e| PortError::Unexpected(e.to_string()))?,
            )
        };

        sqlx::query(
            "INSERT INTO thread_messages \
                 (id, thread_id, role, content, tool_calls, tool_call_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(message.id)
        .bind(message.thread_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(tool_calls)
        .bind(&message.tool_call_id)
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn get_messages(&self, thread_id: Uuid) -> PortResult<Vec<ThreadMessage>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            "SELECT id, thread_id, role, content, tool_calls, tool_call_id, created_at \
             FROM thread_messages WHERE thread_id = $1 ORDER BY seq ASC",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(MessageRecord::to_domain).collect()
    }

    async fn delete_thread(&self, thread_id: Uuid) -> PortResult<()> {
        // Deleting a thread only clears conversation state; orders and
        // refunds are independent system-of-record entities. Idempotent.
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        sqlx::query("DELETE FROM thread_messages WHERE thread_id = $1")
            .bind(thread_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        sqlx::query("DELETE FROM threads WHERE id = $1")
            .bind(thread_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }
}

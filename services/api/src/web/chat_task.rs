//! services/api/src/web/chat_task.rs
//!
//! The asynchronous "worker" for a single chat turn: replay the thread's
//! history, let the model respond, execute any tool calls it requests, feed
//! the results back, and repeat until the model produces a plain answer.
//!
//! The task owns the whole turn. The caller only holds the receiving end of
//! the unit channel, so a client disconnect stops delivery without aborting
//! tool execution or persistence.

use crate::web::{
    prompts,
    protocol::StreamUnit,
    state::AppState,
    tools::{self, ToolContext},
};
use refund_agent_core::domain::ThreadMessage;
use refund_agent_core::ports::PortResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

/// Upper bound on model↔tool round trips within one user turn.
const MAX_TOOL_ROUNDS: usize = 8;

/// Runs one user turn against the thread, sending stream units into `tx`.
///
/// Turns on the same thread are serialized by the thread's turn lock;
/// different threads proceed in parallel.
pub async fn run_chat_turn(
    state: Arc<AppState>,
    user_id: Uuid,
    thread_id: Uuid,
    prompt: String,
    tx: mpsc::Sender<StreamUnit>,
) {
    let lock = state.turn_lock(thread_id).await;
    let _turn = lock.lock().await;

    if let Err(e) = chat_turn(&state, user_id, thread_id, prompt, &tx).await {
        error!("Chat turn failed for thread {}: {}", thread_id, e);
        let _ = tx.send(StreamUnit::error(e.to_string())).await;
    }
}

async fn chat_turn(
    state: &Arc<AppState>,
    user_id: Uuid,
    thread_id: Uuid,
    prompt: String,
    tx: &mpsc::Sender<StreamUnit>,
) -> PortResult<()> {
    state.store.ensure_thread(thread_id).await?;
    let mut history = state.store.get_messages(thread_id).await?;

    let user_message = ThreadMessage::user(thread_id, prompt);
    state.store.append_message(&user_message).await?;
    history.push(user_message);

    let system_prompt = prompts::system_prompt();
    let specs = tools::specs();
    let ctx = ToolContext { user_id, thread_id };
    let timeout = Duration::from_secs(state.config.model_timeout_secs);

    for _round in 0..MAX_TOOL_ROUNDS {
        let turn = match tokio::time::timeout(
            timeout,
            state.chat_model.complete(&system_prompt, &history, &specs),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                let _ = tx
                    .send(StreamUnit::error(
                        "The model did not respond in time. Please resend your message.",
                    ))
                    .await;
                return Ok(());
            }
        };

        let assistant =
            ThreadMessage::assistant(thread_id, turn.content.clone(), turn.tool_calls.clone());
        state.store.append_message(&assistant).await?;
        history.push(assistant);

        if !turn.content.is_empty() {
            let _ = tx.send(StreamUnit::message(turn.content)).await;
        }

        if turn.tool_calls.is_empty() {
            return Ok(());
        }

        for call in &turn.tool_calls {
            // Dispatched tool calls always run to completion and are
            // persisted, even when the client has gone away mid-stream.
            let result = tools::dispatch(&state.store, &ctx, call).await;
            let tool_message = ThreadMessage::tool(thread_id, call.id.clone(), result);
            state.store.append_message(&tool_message).await?;
            let _ = tx.send(StreamUnit::message(tool_message.content.clone())).await;
            history.push(tool_message);
        }

        if tx.is_closed() {
            // Only the text-generation continuation is cancelled.
            info!("Client disconnected; ending turn for thread {}", thread_id);
            return Ok(());
        }
    }

    let _ = tx
        .send(StreamUnit::error(
            "The conversation needed too many tool calls in one turn. Please try again.",
        ))
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::web::protocol::PayloadKind;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use refund_agent_core::domain::{
        MessageRole, Order, OrderItem, OrderStatus, Product, Refund, RefundStatus, ToolCall,
    };
    use refund_agent_core::ledger;
    use refund_agent_core::money::{Money, Percent};
    use refund_agent_core::ports::{
        ChatModelService, ModelTurn, PortError, StoreService, ToolSpec,
    };
    use refund_agent_core::refund::{self, RefundDecision, RefundFiling};
    use refund_agent_core::stream::{decode_message, BlockTag, Segment};
    use refund_agent_core::taxonomy::{OrderTimestamps, TaxonomyEntry, CATEGORIES};
    use std::collections::{HashMap, HashSet, VecDeque};
    use tokio::sync::Mutex;

    //=====================================================================================
    // In-memory store mock
    //=====================================================================================

    #[derive(Default)]
    struct MockState {
        orders: Vec<Order>,
        refunds: Vec<Refund>,
        taxonomy: Vec<TaxonomyEntry>,
        messages: Vec<ThreadMessage>,
        threads: HashSet<Uuid>,
        sessions: HashMap<String, Uuid>,
    }

    #[derive(Default)]
    struct MockStore {
        state: Mutex<MockState>,
    }

    #[async_trait]
    impl StoreService for MockStore {
        async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
            self.state
                .lock()
                .await
                .sessions
                .get(session_id)
                .copied()
                .ok_or(PortError::Forbidden)
        }

        async fn list_orders(&self, user_id: Uuid) -> PortResult<Vec<Order>> {
            let state = self.state.lock().await;
            let mut orders: Vec<Order> = state
                .orders
                .iter()
                .filter(|o| o.user_id == user_id)
                .cloned()
                .collect();
            orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(orders)
        }

        async fn get_order(&self, order_id: Uuid, user_id: Uuid) -> PortResult<Order> {
            let state = self.state.lock().await;
            let order = state
                .orders
                .iter()
                .find(|o| o.id == order_id)
                .cloned()
                .ok_or_else(|| PortError::NotFound(format!("Order {} not found", order_id)))?;
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
            let order = {
                let state = self.state.lock().await;
                state
                    .orders
                    .iter()
                    .find(|o| o.item(order_item_id).is_some())
                    .cloned()
                    .ok_or_else(|| {
                        PortError::NotFound(format!("Order item {} not found", order_item_id))
                    })?
            };
            if order.user_id != user_id {
                return Err(PortError::Forbidden);
            }
            let item = order.item(order_item_id).cloned().unwrap();
            Ok((order, item))
        }

        async fn get_taxonomy(&self) -> PortResult<Vec<TaxonomyEntry>> {
            Ok(self.state.lock().await.taxonomy.clone())
        }

        async fn refunds_for_item(&self, order_item_id: Uuid) -> PortResult<Vec<Refund>> {
            Ok(self
                .state
                .lock()
                .await
                .refunds
                .iter()
                .filter(|r| r.order_item_id == order_item_id)
                .cloned()
                .collect())
        }

        async fn list_refunds(&self, user_id: Uuid) -> PortResult<Vec<Refund>> {
            let state = self.state.lock().await;
            Ok(state
                .refunds
                .iter()
                .filter(|r| {
                    state
                        .orders
                        .iter()
                        .any(|o| o.user_id == user_id && o.item(r.order_item_id).is_some())
                })
                .cloned()
                .collect())
        }

        async fn file_refund(&self, filing: RefundFiling) -> PortResult<Refund> {
            let (order, item) = self
                .get_order_item(filing.order_item_id, filing.user_id)
                .await?;
            let mut state = self.state.lock().await;

            let existing: Vec<RefundStatus> = state
                .refunds
                .iter()
                .filter(|r| r.order_item_id == filing.order_item_id)
                .map(|r| r.status)
                .collect();
            let timestamps = OrderTimestamps {
                created_at: order.created_at,
                delivered_at: order.delivered_at,
            };
            let category = refund::validate_filing(
                &existing,
                &filing.category_code,
                &timestamps,
                Utc::now(),
            )?;
            let taxonomy_id = state
                .taxonomy
                .iter()
                .find(|t| t.code == category.code)
                .map(|t| t.id)
                .ok_or_else(|| PortError::InvalidTaxonomy(category.code.to_string()))?;

            let created = Refund {
                id: Uuid::new_v4(),
                order_item_id: filing.order_item_id,
                taxonomy_id,
                reason: filing.reason,
                status: RefundStatus::Processing,
                amount: ledger::refundable_base(&item),
                evidence: filing.evidence,
                created_at: Utc::now(),
                processed_at: None,
            };
            state.refunds.push(created.clone());
            Ok(created)
        }

        async fn resolve_refund(
            &self,
            refund_id: Uuid,
            decision: RefundDecision,
        ) -> PortResult<Refund> {
            let mut state = self.state.lock().await;
            let refund = state
                .refunds
                .iter_mut()
                .find(|r| r.id == refund_id)
                .ok_or_else(|| PortError::NotFound(format!("Refund {} not found", refund_id)))?;
            refund.status = refund::resolve_transition(refund.status, decision)?;
            refund.processed_at = Some(Utc::now());
            Ok(refund.clone())
        }

        async fn ensure_thread(&self, thread_id: Uuid) -> PortResult<()> {
            self.state.lock().await.threads.insert(thread_id);
            Ok(())
        }

        async fn append_message(&self, message: &ThreadMessage) -> PortResult<()> {
            self.state.lock().await.messages.push(message.clone());
            Ok(())
        }

        async fn get_messages(&self, thread_id: Uuid) -> PortResult<Vec<ThreadMessage>> {
            Ok(self
                .state
                .lock()
                .await
                .messages
                .iter()
                .filter(|m| m.thread_id == thread_id)
                .cloned()
                .collect())
        }

        async fn delete_thread(&self, thread_id: Uuid) -> PortResult<()> {
            let mut state = self.state.lock().await;
            state.messages.retain(|m| m.thread_id != thread_id);
            state.threads.remove(&thread_id);
            Ok(())
        }
    }

    //=====================================================================================
    // Scripted model mock
    //=====================================================================================

    struct MockModel {
        turns: Mutex<VecDeque<ModelTurn>>,
    }

    impl MockModel {
        fn scripted(turns: Vec<ModelTurn>) -> Self {
            MockModel {
                turns: Mutex::new(turns.into()),
            }
        }
    }

    #[async_trait]
    impl ChatModelService for MockModel {
        async fn complete(
            &self,
            _system_prompt: &str,
            _history: &[ThreadMessage],
            _tools: &[ToolSpec],
        ) -> PortResult<ModelTurn> {
            self.turns
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| PortError::Unexpected("model unavailable".to_string()))
        }
    }

    //=====================================================================================
    // Fixtures
    //=====================================================================================

    fn smart_watch_item(order_id: Uuid) -> OrderItem {
        OrderItem {
            id: Uuid::new_v4(),
            order_id,
            product: Product {
                id: Uuid::new_v4(),
                title: "Smart Watch".to_string(),
                description: Some("Fitness tracker with AMOLED display".to_string()),
                unit_price: Money::from_minor(799_900),
                tax_percent: Percent::from_bps(1800),
                stock_quantity: 12,
            },
            quantity: 1,
            unit_price: Money::from_minor(799_900),
            tax_percent: Percent::from_bps(1800),
            discounts: Vec::new(),
        }
    }

    fn order_delivered_days_ago(user_id: Uuid, days: i64) -> Order {
        let id = Uuid::new_v4();
        Order {
            id,
            user_id,
            status: OrderStatus::Delivered,
            paid_amount: Money::from_minor(943_882),
            payment_method: "UPI".to_string(),
            created_at: Utc::now() - ChronoDuration::days(days + 3),
            delivered_at: Some(Utc::now() - ChronoDuration::days(days)),
            items: vec![smart_watch_item(id)],
        }
    }

    fn seeded_taxonomy() -> Vec<TaxonomyEntry> {
        CATEGORIES
            .iter()
            .map(|c| TaxonomyEntry {
                id: Uuid::new_v4(),
                code: c.code.to_string(),
                description: c.description.to_string(),
            })
            .collect()
    }

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            database_url: String::new(),
            log_level: tracing::Level::INFO,
            openai_api_key: None,
            agent_model: "test-model".to_string(),
            model_timeout_secs: 5,
            cors_origin: String::new(),
        })
    }

    async fn app_state(orders: Vec<Order>, model_turns: Vec<ModelTurn>) -> (Arc<AppState>, Uuid) {
        let user_id = orders.first().map(|o| o.user_id).unwrap_or_else(Uuid::new_v4);
        let store = MockStore::default();
        {
            let mut state = store.state.lock().await;
            state.orders = orders;
            state.taxonomy = seeded_taxonomy();
        }
        let state = Arc::new(AppState::new(
            Arc::new(store),
            Arc::new(MockModel::scripted(model_turns)),
            test_config(),
        ));
        (state, user_id)
    }

    async fn collect_units(
        state: Arc<AppState>,
        user_id: Uuid,
        thread_id: Uuid,
        prompt: &str,
    ) -> Vec<StreamUnit> {
        let (tx, mut rx) = mpsc::channel(32);
        run_chat_turn(state, user_id, thread_id, prompt.to_string(), tx).await;
        let mut units = Vec::new();
        while let Some(unit) = rx.recv().await {
            units.push(unit);
        }
        units
    }

    //=====================================================================================
    // Tests
    //=====================================================================================

    #[tokio::test]
    async fn turn_executes_tools_and_streams_blocks() {
        let user = Uuid::new_v4();
        let order = order_delivered_days_ago(user, 2);
        let (state, user_id) = app_state(
            vec![order],
            vec![
                ModelTurn {
                    content: String::new(),
                    tool_calls: vec![ToolCall {
                        id: "call_1".to_string(),
                        name: "list_orders".to_string(),
                        arguments: "{}".to_string(),
                    }],
                },
                ModelTurn {
                    content: "You have one order, a Smart Watch.".to_string(),
                    tool_calls: Vec::new(),
                },
            ],
        )
        .await;

        let thread_id = Uuid::new_v4();
        let units = collect_units(state.clone(), user_id, thread_id, "show my orders").await;

        assert_eq!(units.len(), 2);
        let StreamUnit::Payload { kind, content } = &units[0] else {
            panic!("expected payload unit");
        };
        assert_eq!(*kind, PayloadKind::Message);
        let segments = decode_message(content);
        assert!(
            segments
                .iter()
                .any(|s| matches!(s, Segment::Block { tag: BlockTag::OrderList, .. })),
            "tool result must carry exactly one ORDERS block: {segments:?}"
        );
        assert_eq!(
            units[1],
            StreamUnit::message("You have one order, a Smart Watch.")
        );

        // user + assistant(tool call) + tool + assistant(final)
        let messages = state.store.get_messages(thread_id).await.unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].tool_calls.len(), 1);
        assert_eq!(messages[2].role, MessageRole::Tool);
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(messages[3].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn duplicate_charge_scenario_files_once_then_rejects() {
        let user = Uuid::new_v4();
        let order = order_delivered_days_ago(user, 2);
        let item_id = order.items[0].id;
        let (state, user_id) = app_state(vec![order], vec![]).await;
        let ctx = ToolContext {
            user_id,
            thread_id: Uuid::new_v4(),
        };

        let call = ToolCall {
            id: "call_1".to_string(),
            name: "file_refund".to_string(),
            arguments: serde_json::json!({
                "order_item_id": item_id,
                "refund_type": "DUPLICATE_CHARGE",
                "reason": "I was charged twice for this order",
            })
            .to_string(),
        };

        let first: serde_json::Value =
            serde_json::from_str(&tools::dispatch(&state.store, &ctx, &call).await).unwrap();
        assert_eq!(first["success"], true);
        assert_eq!(first["amount"], 943_882);
        assert_eq!(first["status"], "PROCESSING");

        let second: serde_json::Value =
            serde_json::from_str(&tools::dispatch(&state.store, &ctx, &call).await).unwrap();
        assert!(
            second["error"]
                .as_str()
                .unwrap()
                .contains("already approved or in processing"),
            "second filing must be rejected: {second}"
        );

        // No second row was created.
        let refunds = state.store.refunds_for_item(item_id).await.unwrap();
        assert_eq!(refunds.len(), 1);
    }

    #[tokio::test]
    async fn damaged_item_outside_window_is_ineligible() {
        let user = Uuid::new_v4();
        let order = order_delivered_days_ago(user, 10);
        let item_id = order.items[0].id;
        let (state, user_id) = app_state(vec![order], vec![]).await;
        let ctx = ToolContext {
            user_id,
            thread_id: Uuid::new_v4(),
        };

        let call = ToolCall {
            id: "call_1".to_string(),
            name: "file_refund".to_string(),
            arguments: serde_json::json!({
                "order_item_id": item_id,
                "refund_type": "DAMAGED_ITEM",
                "reason": "Screen arrived cracked",
            })
            .to_string(),
        };

        let result: serde_json::Value =
            serde_json::from_str(&tools::dispatch(&state.store, &ctx, &call).await).unwrap();
        let message = result["error"].as_str().unwrap();
        assert!(message.contains("DAMAGED_ITEM"), "got: {message}");
        assert!(state.store.refunds_for_item(item_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_taxonomy_is_rejected() {
        let user = Uuid::new_v4();
        let order = order_delivered_days_ago(user, 2);
        let item_id = order.items[0].id;
        let (state, user_id) = app_state(vec![order], vec![]).await;
        let ctx = ToolContext {
            user_id,
            thread_id: Uuid::new_v4(),
        };

        let call = ToolCall {
            id: "call_1".to_string(),
            name: "file_refund".to_string(),
            arguments: serde_json::json!({
                "order_item_id": item_id,
                "refund_type": "BUYERS_REMORSE",
                "reason": "Changed my mind",
            })
            .to_string(),
        };

        let result: serde_json::Value =
            serde_json::from_str(&tools::dispatch(&state.store, &ctx, &call).await).unwrap();
        assert!(result["error"].as_str().unwrap().contains("BUYERS_REMORSE"));
    }

    #[tokio::test]
    async fn other_users_order_is_forbidden() {
        let owner = Uuid::new_v4();
        let order = order_delivered_days_ago(owner, 2);
        let order_id = order.id;
        let (state, _) = app_state(vec![order], vec![]).await;
        let intruder = ToolContext {
            user_id: Uuid::new_v4(),
            thread_id: Uuid::new_v4(),
        };

        let call = ToolCall {
            id: "call_1".to_string(),
            name: "get_order".to_string(),
            arguments: serde_json::json!({ "order_id": order_id }).to_string(),
        };

        let result: serde_json::Value =
            serde_json::from_str(&tools::dispatch(&state.store, &intruder, &call).await).unwrap();
        assert!(result["error"].as_str().unwrap().contains("Forbidden"));
    }

    #[tokio::test]
    async fn model_failure_surfaces_as_error_unit() {
        let user = Uuid::new_v4();
        let order = order_delivered_days_ago(user, 2);
        // No scripted turns: the model errors immediately.
        let (state, user_id) = app_state(vec![order], vec![]).await;

        let units = collect_units(state, user_id, Uuid::new_v4(), "hello").await;
        assert_eq!(units.len(), 1);
        assert!(matches!(
            &units[0],
            StreamUnit::Payload {
                kind: PayloadKind::Error,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn thread_deletion_is_idempotent() {
        let (state, _) = app_state(vec![], vec![]).await;
        let thread_id = Uuid::new_v4();

        state.store.ensure_thread(thread_id).await.unwrap();
        state
            .store
            .append_message(&ThreadMessage::user(thread_id, "hi"))
            .await
            .unwrap();

        state.store.delete_thread(thread_id).await.unwrap();
        assert!(state.store.get_messages(thread_id).await.unwrap().is_empty());

        // Deleting twice produces the same observable state, not an error.
        state.store.delete_thread(thread_id).await.unwrap();
        assert!(state.store.get_messages(thread_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolve_refund_is_not_idempotent() {
        let user = Uuid::new_v4();
        let order = order_delivered_days_ago(user, 2);
        let item_id = order.items[0].id;
        let (state, user_id) = app_state(vec![order], vec![]).await;

        let refund = state
            .store
            .file_refund(RefundFiling {
                user_id,
                order_item_id: item_id,
                category_code: "DAMAGED_ITEM".to_string(),
                reason: "cracked".to_string(),
                evidence: None,
            })
            .await
            .unwrap();

        let resolved = state
            .store
            .resolve_refund(refund.id, RefundDecision::Approved)
            .await
            .unwrap();
        assert_eq!(resolved.status, RefundStatus::Approved);
        assert!(resolved.processed_at.is_some());

        let err = state
            .store
            .resolve_refund(refund.id, RefundDecision::Denied)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::AlreadyResolved));
    }
}

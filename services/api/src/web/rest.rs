//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::{
    chat_task::run_chat_turn,
    protocol::{ChatRequest, StreamUnit},
    state::AppState,
    tools::{OrderItemSummary, OrderSummary, RefundView},
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    Extension,
};
use bytes::Bytes;
use refund_agent_core::ports::PortError;
use refund_agent_core::refund::RefundDecision;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        chat_handler,
        delete_chat_handler,
        get_orders_handler,
        get_refunds_handler,
        resolve_refund_handler,
    ),
    components(
        schemas(
            ChatRequest,
            OrdersResponse,
            OrderSummary,
            OrderItemSummary,
            RefundsResponse,
            RefundView,
            ResolveRefundRequest,
            ResolveDecision,
            DeleteThreadResponse
        )
    ),
    tags(
        (name = "Refund Agent API", description = "API endpoints for the conversational refund agent.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct OrdersResponse {
    orders: Vec<OrderSummary>,
}

#[derive(Serialize, ToSchema)]
pub struct RefundsResponse {
    refunds: Vec<RefundView>,
}

#[derive(Serialize, ToSchema)]
pub struct DeleteThreadResponse {
    message: String,
}

/// The operator decision applied to a PROCESSING refund.
#[derive(Deserialize, ToSchema)]
pub struct ResolveRefundRequest {
    pub decision: ResolveDecision,
}

#[derive(Deserialize, Clone, Copy, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolveDecision {
    Approved,
    Denied,
}

impl From<ResolveDecision> for RefundDecision {
    fn from(decision: ResolveDecision) -> Self {
        match decision {
            ResolveDecision::Approved => RefundDecision::Approved,
            ResolveDecision::Denied => RefundDecision::Denied,
        }
    }
}

fn port_error_response(e: PortError) -> (StatusCode, String) {
    let status = match &e {
        PortError::NotFound(_) => StatusCode::NOT_FOUND,
        PortError::Forbidden => StatusCode::FORBIDDEN,
        PortError::DuplicateRefund | PortError::AlreadyResolved => StatusCode::CONFLICT,
        PortError::InvalidTaxonomy(_) | PortError::IneligibleWindow(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        PortError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Request failed: {}", e);
        (status, "Internal server error".to_string())
    } else {
        (status, e.to_string())
    }
}

//=========================================================================================
// Chat Endpoints
//=========================================================================================

/// Send a prompt to the refund agent and stream the response.
///
/// The response is newline-delimited JSON: first a `{"thread_id": ...}`
/// control unit (authoritative for the rest of the exchange), then
/// `{"type": "message"|"error", "content": ...}` units as the turn
/// progresses.
#[utoipa::path(
    post,
    path = "/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "NDJSON stream of chat units"),
        (status = 401, description = "Missing or invalid session")
    )
)]
pub async fn chat_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(request): Json<ChatRequest>,
) -> Response {
    // A missing thread id means "start a new conversation"; the id is
    // announced to the client before any agent output.
    let thread_id = request.thread_id.unwrap_or_else(Uuid::new_v4);

    let (tx, mut rx) = mpsc::channel::<StreamUnit>(32);
    // The turn runs detached: if the client disconnects mid-stream, tool
    // calls already dispatched still run to completion and commit.
    tokio::spawn(run_chat_turn(
        app_state.clone(),
        user_id,
        thread_id,
        request.prompt,
        tx,
    ));

    let stream = async_stream::stream! {
        yield Ok::<Bytes, Infallible>(Bytes::from(StreamUnit::thread(thread_id).to_ndjson()));
        while let Some(unit) = rx.recv().await {
            yield Ok(Bytes::from(unit.to_ndjson()));
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(stream))
        .expect("static response construction")
}

/// Clear a conversation thread.
///
/// Removes the thread's message history only; orders and refunds are
/// independent records and are never touched. Deleting twice is not an
/// error.
#[utoipa::path(
    delete,
    path = "/chat/{thread_id}",
    params(("thread_id" = Uuid, Path, description = "The thread to clear")),
    responses(
        (status = 200, description = "Thread cleared", body = DeleteThreadResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn delete_chat_handler(
    State(app_state): State<Arc<AppState>>,
    Path(thread_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    app_state
        .store
        .delete_thread(thread_id)
        .await
        .map_err(port_error_response)?;
    Ok(Json(DeleteThreadResponse {
        message: "Thread cleared successfully".to_string(),
    }))
}

//=========================================================================================
// Ledger / Refund Endpoints
//=========================================================================================

/// List the authenticated user's orders, most recent first.
#[utoipa::path(
    get,
    path = "/orders",
    responses(
        (status = 200, description = "The user's orders", body = OrdersResponse),
        (status = 401, description = "Missing or invalid session")
    )
)]
pub async fn get_orders_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let orders = app_state
        .store
        .list_orders(user_id)
        .await
        .map_err(port_error_response)?;
    Ok(Json(OrdersResponse {
        orders: orders.iter().map(OrderSummary::from_order).collect(),
    }))
}

/// List the authenticated user's refund requests, most recent first.
#[utoipa::path(
    get,
    path = "/refunds",
    responses(
        (status = 200, description = "The user's refunds", body = RefundsResponse),
        (status = 401, description = "Missing or invalid session")
    )
)]
pub async fn get_refunds_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let refunds = app_state
        .store
        .list_refunds(user_id)
        .await
        .map_err(port_error_response)?;
    let taxonomy = app_state
        .store
        .get_taxonomy()
        .await
        .map_err(port_error_response)?;
    Ok(Json(RefundsResponse {
        refunds: refunds
            .iter()
            .map(|r| RefundView::from_refund(r, &taxonomy))
            .collect(),
    }))
}

/// Resolve a PROCESSING refund to APPROVED or DENIED.
///
/// The transition is deliberately not idempotent: resolving an already
/// terminal refund is reported as a conflict, never silently ignored.
#[utoipa::path(
    post,
    path = "/refunds/{refund_id}/resolve",
    params(("refund_id" = Uuid, Path, description = "The refund to resolve")),
    request_body = ResolveRefundRequest,
    responses(
        (status = 200, description = "The resolved refund", body = RefundView),
        (status = 404, description = "Refund not found"),
        (status = 409, description = "Refund already resolved")
    )
)]
pub async fn resolve_refund_handler(
    State(app_state): State<Arc<AppState>>,
    Path(refund_id): Path<Uuid>,
    Json(request): Json<ResolveRefundRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let refund = app_state
        .store
        .resolve_refund(refund_id, request.decision.into())
        .await
        .map_err(port_error_response)?;
    let taxonomy = app_state
        .store
        .get_taxonomy()
        .await
        .map_err(port_error_response)?;
    Ok(Json(RefundView::from_refund(&refund, &taxonomy)))
}

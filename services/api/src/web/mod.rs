pub mod chat_task;
pub mod middleware;
pub mod prompts;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod tools;

// Re-export the handlers and middleware so the binary that builds the web
// server router can reach them directly.
pub use middleware::require_auth;
pub use rest::{
    chat_handler, delete_chat_handler, get_orders_handler, get_refunds_handler,
    resolve_refund_handler,
};

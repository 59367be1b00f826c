//! services/api/src/web/protocol.rs
//!
//! Defines the newline-delimited JSON protocol between the API server and the
//! chat client. Each line on the wire is one `StreamUnit`, so the receiver
//! dispatches on shape instead of sniffing content.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

//=========================================================================================
// Request Sent FROM the Client TO the Server
//=========================================================================================

/// The body of a chat request. When `thread_id` is absent a new thread is
/// created and announced in the first stream unit.
#[derive(Deserialize, Debug, ToSchema)]
pub struct ChatRequest {
    pub prompt: String,
    pub thread_id: Option<Uuid>,
}

//=========================================================================================
// Units Sent FROM the Server TO the Client
//=========================================================================================

/// The discriminator for payload units.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// Assistant or tool output; may embed structured blocks.
    Message,
    /// A terminal transport failure (model timeout, upstream error). The
    /// only unit category eligible for client-initiated retry.
    Error,
}

/// One newline-delimited unit of the chat response stream.
///
/// Wire shapes: `{"thread_id": "..."}` for the control unit and
/// `{"type": "message"|"error", "content": "..."}` for payloads. The
/// control unit is sent first and is authoritative for every subsequent
/// turn of the exchange.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum StreamUnit {
    Control {
        thread_id: Uuid,
    },
    Payload {
        #[serde(rename = "type")]
        kind: PayloadKind,
        content: String,
    },
}

impl StreamUnit {
    pub fn thread(thread_id: Uuid) -> Self {
        StreamUnit::Control { thread_id }
    }

    pub fn message(content: impl Into<String>) -> Self {
        StreamUnit::Payload {
            kind: PayloadKind::Message,
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        StreamUnit::Payload {
            kind: PayloadKind::Error,
            content: content.into(),
        }
    }

    /// Serializes the unit as one wire line, trailing newline included.
    pub fn to_ndjson(&self) -> String {
        // Serialization of these shapes cannot fail.
        let mut line = serde_json::to_string(self).expect("stream unit serialization");
        line.push('\n');
        line
    }
}

pub mod domain;
pub mod ledger;
pub mod money;
pub mod ports;
pub mod refund;
pub mod stream;
pub mod taxonomy;

pub use domain::{
    Discount, DiscountKind, MessageRole, Order, OrderItem, OrderStatus, Product, Refund,
    RefundStatus, ThreadMessage, ToolCall,
};
pub use money::{apply_percent_discount, apply_tax, Money, Percent};
pub use ports::{ChatModelService, ModelTurn, PortError, PortResult, StoreService, ToolSpec};
pub use refund::{RefundDecision, RefundFiling};
pub use stream::{decode_message, encode_block, BlockTag, Segment, StreamDecoder};
pub use taxonomy::{OrderTimestamps, TaxonomyEntry};

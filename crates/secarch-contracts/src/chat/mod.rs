pub mod blocks;
mod inbound;

pub use inbound::{strip_mentions, FileAttachment, InboundEvent};

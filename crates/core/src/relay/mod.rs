//! The two concurrent halves of an established call.

mod inbound;
mod outbound;

pub use inbound::{Cursor, InboundRelay};
pub use outbound::{OutboundRelay, is_termination_phrase};

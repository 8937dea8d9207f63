//! Wire protocol: binary header, JSON payload, stream framing.

mod framing;
mod header;
mod message;
mod types;

pub use framing::{frame, read_frame, write_frame};
pub use header::{current_timestamp, MessageHeader, HEADER_SIZE, MESSAGE_MAGIC};
pub use message::Message;
pub use types::{BaseResponse, MessageFlags, MessageType};

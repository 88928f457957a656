pub mod message;
pub mod response;

pub use message::{Message, MessageRequest};
pub use response::{ChunkStream, MessageResponse, StreamChunk};

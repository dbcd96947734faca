//! Chain-facing side of the gateway: feed sources, event normalization,
//! the ingestor worker, and the process-wide chain head state.

pub mod event;
pub mod feed;
pub mod head;
pub mod ingestor;

pub use event::ChainEvent;
pub use feed::{ChannelSource, EventSource, FeedError, WsEventSource};
pub use head::ChainHead;
pub use ingestor::EventIngestor;

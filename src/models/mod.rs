//! Persistent entities: [`Channel`], [`Episode`], [`QueueItem`].

pub mod channel;
pub mod episode;
pub mod queue_item;

pub use channel::{Channel, ChannelCreateRequest, ChannelFormat, ChannelUpdateRequest};
pub use episode::{Episode, EpisodeStatus};
pub use queue_item::{QueueItem, QueueItemStatus};

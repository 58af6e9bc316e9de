pub mod behavior;
pub mod channel;
pub mod packet;

pub use behavior::{Cycle, Operable, OperableBase};
pub use channel::{ChannelRef, Clocked, RequestChannel, ReturnHandle, ReturnQueue, ReturnQueueRef};
pub use packet::{dep_merge, AccessType, Packet, NUM_ACCESS_TYPES};

//! Engine primitives shared by the control and process sides
//!
//! - [`arena`]: generation-checked keyed storage
//! - [`gc`]: deferred reclamation of process-thread allocations
//! - [`pool`]: pre-allocated audio buffers
//! - [`queue`]: control-to-process command queue

pub mod arena;
pub mod gc;
pub mod pool;
pub mod queue;

pub use arena::{
    Arena, ArenaKey, ChainKey, ChannelKey, DriverKey, Key, LoopKey, PortKey, SessionKey,
};
pub use gc::gc_handle;
pub use pool::{Buffer, BufferPool, PoolRefillThread, PoolStats};
pub use queue::{Command, CommandQueue, ProcessHandle};

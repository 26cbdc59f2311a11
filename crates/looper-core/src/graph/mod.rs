//! Processing graph and its schedule
//!
//! - [`topology`]: control-side mirror of ports, loops, channels and chains
//! - [`node`]: nodes and edges derived from a topology
//! - [`schedule`]: Kahn ordering into steps
//! - [`worker`]: background recomputation and lock-free publication

pub mod node;
pub mod schedule;
pub mod topology;
pub mod worker;

pub use node::{NodeId, NodeKind, ProcessingGraph};
pub use schedule::{compute_schedule, Schedule, Step};
pub use topology::{ChainInfo, ChannelInfo, LoopInfo, PortInfo, PortOwner, Topology};
pub use worker::{ScheduleWorker, WorkerStats};

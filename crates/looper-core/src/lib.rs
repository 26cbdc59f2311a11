//! Looper Core - real-time engine of the audio/MIDI looper
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   enqueue()    ┌─────────────────────┐
//! │  Control thread  │───────────────►│   Command Queue     │
//! │  (Session API)   │                │  (lock-free SPSC)   │
//! └────────┬─────────┘                └──────────┬──────────┘
//!          │ topology change                     │ drain()
//!          ▼                                     ▼
//! ┌──────────────────┐  SharedCell   ┌─────────────────────┐
//! │ Schedule worker  │──────────────►│  Process callback   │
//! │ (Kahn ordering)  │   publish     │  (owns SessionCore) │
//! └──────────────────┘               └──────────┬──────────┘
//!                                               │ schedule steps
//!                            ports ─► channels ─► loops (POI chunks) ─► ports
//! ```
//!
//! The process thread owns every piece of mutable engine state. Control
//! threads only ever reach it through the command queue, through relaxed
//! atomics for state queries, or through the published schedule pointer.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod fx;
pub mod graph;
pub mod looping;
pub mod port;
pub mod session;
pub mod types;

pub use error::{LooperError, LooperResult};
pub use types::*;

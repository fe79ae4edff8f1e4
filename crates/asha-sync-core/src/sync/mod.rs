//! Sync engine.
//!
//! Every write lands in the local mirror and the ledger first. The engine
//! then tries the server, and whatever the network does, the caller gets a
//! record back.
//!
//! - [`engine`]: save, delete and list with offline fallback
//! - [`replay`]: `force_sync`, the single-flight replay pass
//! - [`locks`]: per-record mutual exclusion across network round-trips
//! - [`outcome`]: result types returned to the application layer

mod engine;
mod locks;
mod outcome;
mod replay;

pub use engine::SyncEngine;
pub use locks::KeyLocks;
pub use outcome::*;

pub use crate::error::{EngineError, EngineResult};

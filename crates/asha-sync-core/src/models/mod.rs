//! Domain models for the Asha sync engine.

mod child;
mod ledger;
mod lenient;
mod patient;
mod record;
mod visit;

pub use child::*;
pub use ledger::*;
pub use patient::*;
pub use record::*;
pub use visit::*;

//! Shared data structures for the custody-transfer batch engine
//!
//! - `gauge`: GaugeReading / GaugeSnapshot (measurement + derived volumes)
//! - `batch`: Batch aggregate, lifecycle requests, listing filters
//! - `recalc`: revised inputs and recalculation results
//! - `movement`: MovementEvent / BatchSuggestion (ephemeral)
//! - `lab`: LabResult and its batch association
//! - `audit`: append-only lifecycle events

mod audit;
mod batch;
mod gauge;
mod lab;
mod movement;
mod recalc;

pub use audit::*;
pub use batch::*;
pub use gauge::*;
pub use lab::*;
pub use movement::*;
pub use recalc::*;

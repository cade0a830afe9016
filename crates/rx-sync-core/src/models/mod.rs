//! Domain models for the medication list synchronizer.

mod change;
mod medication;
mod prescription;
mod record;

pub use change::*;
pub use medication::*;
pub use prescription::*;
pub use record::*;

//! Domain types for SharpeLab

pub mod bar;
pub mod instrument;
pub mod resolution;

pub use bar::{Bar, Series};
pub use instrument::{InstrumentForm, InstrumentRecord, InstrumentRef};
pub use resolution::Resolution;

/// Ticker type alias
pub type Ticker = String;

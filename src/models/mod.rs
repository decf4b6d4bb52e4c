//! Data models for positions, change events, mappings, and instruments.

mod event;
mod instrument;
mod mapping;
mod position;

pub use event::{ChangeEvent, ChangeKind, CopyJob, SizingFacts};
pub use instrument::InstrumentMeta;
pub use mapping::MappingRecord;
pub use position::{Direction, Position};

//! Per-entity sequence bindings
//!
//! - `options.rs` - binding settings and the bare-name shorthand
//! - `gate.rs` - one-shot readiness notification
//! - `binding.rs` - preview, reset and the creation hook

mod binding;
mod gate;
mod options;

pub use binding::{Assignment, SequenceBinding};
pub use gate::{ReadyGate, ReadyState};
pub use options::{DEFAULT_FIELD, SequenceOptions};

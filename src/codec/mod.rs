//! State codec: the tagged value union exchanged at probes.

pub mod error;
pub mod shape;
pub mod state;
pub mod value;

pub use error::CodecError;
pub use shape::Shape;
pub use state::{OpaqueTable, StateCodec};
pub use value::{Opaque, Value};

//! Bounded fan-out of fetch+parse work over the current source set.

pub mod stream;

pub use stream::{SourceError, StreamItem};

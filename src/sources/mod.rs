pub mod registry;

pub use registry::SourceRegistry;

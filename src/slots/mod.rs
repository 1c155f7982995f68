pub mod fetcher;
pub mod payload;

pub use fetcher::{FetchError, SlotFetcher};
pub use payload::SlotPayload;

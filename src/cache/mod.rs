pub mod coalescer;
pub mod price_cache;

pub use coalescer::{Coalescer, ProducerError};
pub use price_cache::PriceCache;

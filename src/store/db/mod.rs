mod lru;
mod mem;
mod postgres;

pub use lru::LruCache;
pub use mem::MemoryCache;
pub use postgres::SqlCache;

mod records;
mod synclient;

pub use records::SqlCache;

//! Conversion between response trees and normalized records.

mod normalizer;
mod reader;

pub use normalizer::{NormalizedResponse, ResponseNormalizer};
pub use reader::ResponseReader;

mod cache_key;
mod field;
mod operation;
mod record;
mod response;

pub use cache_key::*;
pub use field::{Condition, FieldType, ResponseField};
pub use operation::{Fragment, Operation, OperationKind, OperationRequest, Variables};
pub use record::{CacheReference, Record, RecordBuilder, RecordValue, qualified_key};
pub use response::{GraphQlError, Location, Response};

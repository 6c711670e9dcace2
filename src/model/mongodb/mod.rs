mod bson;
mod collection;
mod errors;

pub use bson::optional_datetime;
pub use collection::{ensure_indexes_exist, Coll, MongoCollection};
pub use errors::{is_duplicate_key_error, is_transient, retry_scope, RetryScope};

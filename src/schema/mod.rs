//! Schema cache: the in-memory dictionary replica and its snapshot format.

pub mod cache;
pub mod element;
pub mod snapshot;
pub mod types;

pub use cache::SchemaCache;
pub use element::{ElementOptions, SchemaElement};
pub use types::{ColumnDef, Flags128, OracleObject};

mod decoder;
mod error;
mod field_table;
mod field_value;
mod ingest_service;
mod message;
mod record_sink;

pub use decoder::*;
pub use error::*;
pub use field_table::*;
pub use field_value::*;
pub use ingest_service::*;
pub use message::*;
pub use record_sink::*;

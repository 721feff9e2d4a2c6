mod demo_publisher;
mod inbound_message;
mod kv_record_sink;
mod reading_consumer_service;

pub use demo_publisher::*;
pub use inbound_message::*;
pub use kv_record_sink::*;
pub use reading_consumer_service::*;

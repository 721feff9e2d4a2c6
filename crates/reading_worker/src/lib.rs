pub mod domain;
pub mod nats;
pub mod reading_worker;

pub use domain::*;
pub use nats::*;
pub use reading_worker::*;

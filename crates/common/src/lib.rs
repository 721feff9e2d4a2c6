pub mod nats;
pub mod telemetry;

pub use nats::*;
pub use telemetry::*;

#[cfg(any(test, feature = "testing"))]
pub use nats::MockJetStreamConsumer;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockJetStreamPublisher;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockKeyValueStore;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockPullConsumer;

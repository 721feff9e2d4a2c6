use crate::domain::ReadingIngestService;
use crate::nats::inbound_message_from_request;
use common::nats::{ConsumeRequest, ConsumeResponse};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::debug;

/// Tower service that hands each consumed message to the [`ReadingIngestService`].
///
/// Always acks: persistence runs in the background and its failures are only logged,
/// so there is nothing a redelivery would fix.
#[derive(Clone)]
pub struct ReadingConsumerService {
    ingest_service: Arc<ReadingIngestService>,
}

impl ReadingConsumerService {
    pub fn new(ingest_service: Arc<ReadingIngestService>) -> Self {
        Self { ingest_service }
    }
}

impl Service<ConsumeRequest> for ReadingConsumerService {
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let ingest_service = Arc::clone(&self.ingest_service);

        Box::pin(async move {
            let message = inbound_message_from_request(&req);
            let receipt = ingest_service.ingest(message);

            debug!(
                subject = %req.subject,
                message_id = %receipt.message_id,
                shape = receipt.shape.as_str(),
                dispatched = receipt.dispatched,
                skipped = receipt.skipped,
                "sensor message dispatched"
            );

            Ok(ConsumeResponse::ack())
        })
    }
}

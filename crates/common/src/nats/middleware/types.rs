use async_nats::HeaderMap;
use bytes::Bytes;

/// One consumed JetStream message, owned so it can travel through Tower layers.
#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    pub subject: String,
    /// `Nats-Msg-Id` header when the publisher set one, otherwise `<stream>:<sequence>`.
    pub message_id: String,
    pub payload: Bytes,
    pub headers: Option<HeaderMap>,
}

impl ConsumeRequest {
    pub fn new(
        subject: String,
        message_id: String,
        payload: Bytes,
        headers: Option<HeaderMap>,
    ) -> Self {
        Self {
            subject,
            message_id,
            payload,
            headers,
        }
    }
}

/// What the consumer should do with the message once the service is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeResponse {
    Ack,
    /// Reject for redelivery, with an optional reason for the logs.
    Nak(Option<String>),
}

impl ConsumeResponse {
    pub fn ack() -> Self {
        Self::Ack
    }

    pub fn nak(reason: impl Into<String>) -> Self {
        Self::Nak(Some(reason.into()))
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }

    pub fn is_nak(&self) -> bool {
        matches!(self, Self::Nak(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_request_new() {
        let req = ConsumeRequest::new(
            "sensors.d1".to_string(),
            "sensors:7".to_string(),
            Bytes::from("payload"),
            None,
        );

        assert_eq!(req.subject, "sensors.d1");
        assert_eq!(req.message_id, "sensors:7");
        assert_eq!(req.payload, Bytes::from("payload"));
        assert!(req.headers.is_none());
    }

    #[test]
    fn test_consume_response_nak_keeps_reason() {
        let resp = ConsumeResponse::nak("boom");
        assert!(resp.is_nak());
        assert!(!resp.is_ack());
        assert_eq!(resp, ConsumeResponse::Nak(Some("boom".to_string())));
    }

    #[test]
    fn test_consume_response_ack() {
        assert!(ConsumeResponse::ack().is_ack());
    }
}

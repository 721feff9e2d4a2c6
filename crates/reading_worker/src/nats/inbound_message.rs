use crate::domain::InboundMessage;
use common::nats::{is_trace_context_header, ConsumeRequest};
use std::collections::HashMap;

const NATS_HEADER_PREFIX: &str = "Nats-";

/// Builds the domain message from a consumed JetStream message.
///
/// Headers become attributes, keeping the first value of each. Trace context and
/// server-reserved `Nats-*` headers are left out.
pub fn inbound_message_from_request(request: &ConsumeRequest) -> InboundMessage {
    let mut attributes = HashMap::new();

    if let Some(headers) = &request.headers {
        for (name, values) in headers.iter() {
            let name = name.to_string();
            if is_trace_context_header(&name) || is_reserved_header(&name) {
                continue;
            }
            if let Some(value) = values.first() {
                attributes.insert(name, value.as_str().to_string());
            }
        }
    }

    InboundMessage::new(
        request.message_id.clone(),
        attributes,
        request.payload.clone(),
    )
}

fn is_reserved_header(name: &str) -> bool {
    name.get(..NATS_HEADER_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(NATS_HEADER_PREFIX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_nats::HeaderMap;
    use bytes::Bytes;

    #[test]
    fn test_headers_become_attributes() {
        let mut headers = HeaderMap::new();
        headers.insert("device_id", "sensor-7");
        headers.insert("event", "reading");
        headers.insert("traceparent", "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01");
        headers.insert("Nats-Msg-Id", "abc");

        let request = ConsumeRequest::new(
            "sensors.sensor-7".to_string(),
            "abc".to_string(),
            Bytes::from_static(b"{}"),
            Some(headers),
        );

        let message = inbound_message_from_request(&request);

        assert_eq!(message.id, "abc");
        assert_eq!(message.device_id(), Some("sensor-7"));
        assert_eq!(message.event(), Some("reading"));
        assert_eq!(message.attributes.len(), 2);
        assert_eq!(message.body, Bytes::from_static(b"{}"));
    }

    #[test]
    fn test_missing_headers_give_no_attributes() {
        let request = ConsumeRequest::new(
            "sensors.x".to_string(),
            "stream:4".to_string(),
            Bytes::from_static(b"hello"),
            None,
        );

        let message = inbound_message_from_request(&request);

        assert_eq!(message.id, "stream:4");
        assert!(message.attributes.is_empty());
    }

    #[test]
    fn test_reserved_header_prefix() {
        assert!(is_reserved_header("Nats-Msg-Id"));
        assert!(is_reserved_header("nats-expected-stream"));
        assert!(!is_reserved_header("nat"));
        assert!(!is_reserved_header("device_id"));
    }
}

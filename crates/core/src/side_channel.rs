//! Best-effort publishing of envelopes over the transport's data path.

use crate::envelope::Envelope;
use crate::transport::{Transport, TransportError};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transport rejected publish: {0}")]
    Transport(#[from] TransportError),
}

/// Out-of-band broadcast to the UI and device subscribers.
///
/// Cloning is cheap; every clone publishes through the same transport handle.
#[derive(Clone)]
pub struct SideChannel {
    transport: Arc<dyn Transport>,
}

impl SideChannel {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Publishes one envelope on its topic.
    ///
    /// Failures are logged here. The error is returned only so a caller can
    /// pick a fallback phrasing; it must never abort a conversational turn.
    pub async fn publish(&self, envelope: &Envelope) -> Result<(), PublishError> {
        let topic = envelope.topic();
        let result = match envelope.to_bytes() {
            Ok(payload) => self
                .transport
                .publish(payload, topic)
                .await
                .map_err(PublishError::from),
            Err(e) => Err(PublishError::from(e)),
        };

        match &result {
            Ok(()) => debug!(topic, ?envelope, "Published side-channel envelope"),
            Err(e) => warn!(topic, error = %e, "Side-channel publish failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::EmotionState;
    use crate::testing::FakeTransport;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_publish_routes_by_topic() {
        let transport = Arc::new(FakeTransport::new("room", "agent"));
        let channel = SideChannel::new(transport.clone());

        channel
            .publish(&Envelope::emotion(EmotionState::Talking))
            .await
            .unwrap();
        channel
            .publish(&Envelope::tool_call("show_map", BTreeMap::new()))
            .await
            .unwrap();

        let published = transport.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].0, "emotion");
        assert_eq!(published[0].1["emotion"], "TALKING");
        assert_eq!(published[1].0, "tool_calls");
        assert_eq!(published[1].1["tool"], "show_map");
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported_not_panicked() {
        let transport = Arc::new(FakeTransport::new("room", "agent"));
        transport.fail_publishes(true);
        let channel = SideChannel::new(transport.clone());

        let result = channel
            .publish(&Envelope::emotion(EmotionState::Neutral))
            .await;
        assert!(matches!(result, Err(PublishError::Transport(_))));
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_publishes_are_independent() {
        let transport = Arc::new(FakeTransport::new("room", "agent"));
        let channel = SideChannel::new(transport.clone());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let channel = channel.clone();
            handles.push(tokio::spawn(async move {
                channel
                    .publish(&Envelope::tool_call("show_map", BTreeMap::new()))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let published = transport.published();
        assert_eq!(published.len(), 16);
        assert!(published.iter().all(|(_, v)| v["tool"] == "show_map"));
    }
}

use serde::{Deserialize, Serialize};

/// The events in a preset response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    #[serde(rename = "message_delta")]
    MessageDelta(String),
    /// Fails the response mid-stream with the given message.
    #[serde(rename = "failure")]
    Failure(String),
    /// Ends the response without a finish reason, as a dropped connection
    /// would.
    #[serde(rename = "truncation")]
    Truncation,
}

/// The preset response for an assistant step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Events in this response.
    pub events: Vec<PresetEvent>,
    /// If set, the request is rejected up front with this message and
    /// no events are produced.
    pub rejection: Option<String>,
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified events.
    #[inline]
    pub fn with_events(events: impl Into<Vec<PresetEvent>>) -> Self {
        Self {
            events: events.into(),
            rejection: None,
        }
    }

    /// Creates a `PresetResponse` streaming the given deltas in order.
    pub fn with_deltas<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_events(
            deltas
                .into_iter()
                .map(|d| PresetEvent::MessageDelta(d.into()))
                .collect::<Vec<_>>(),
        )
    }

    /// Makes the request fail before any event is produced.
    #[inline]
    pub fn with_rejection<S: Into<String>>(mut self, message: S) -> Self {
        self.rejection = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_deserialize() {
        let response = PresetResponse::with_events([
            PresetEvent::MessageDelta("Half of the ".to_string()),
            PresetEvent::Failure("connection reset".to_string()),
            PresetEvent::Truncation,
        ])
        .with_rejection("quota exceeded");

        let serialized = serde_json::to_string(&response).unwrap();
        let deserialized: PresetResponse =
            serde_json::from_str(&serialized).unwrap();

        assert_eq!(response, deserialized);
    }

    #[test]
    fn test_with_deltas() {
        let response = PresetResponse::with_deltas(["a", "b"]);
        assert_eq!(
            response.events,
            vec![
                PresetEvent::MessageDelta("a".to_owned()),
                PresetEvent::MessageDelta("b".to_owned()),
            ]
        );
        assert!(response.rejection.is_none());
    }
}

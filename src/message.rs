/// A single received or outbound WebSocket payload.
///
/// The client never inspects payload contents; the variant only routes the
/// message to the matching transport send operation and queue slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Whole text frame
    Text(String),
    /// Whole binary frame
    Binary(Vec<u8>),
}

impl Message {
    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(payload) => payload.len(),
            Self::Binary(payload) => payload.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Variant label used in log events.
    #[must_use]
    pub fn variant(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
        }
    }
}

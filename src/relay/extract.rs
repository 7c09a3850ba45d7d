use std::fmt;

use serde_json::Value;

use crate::config::DeltaShape;

/// Pulls the text delta out of one decoded upstream payload.
///
/// Implementations return `None` when the payload does not have their shape
/// so the next extractor in the list can try.
pub trait DeltaExtractor: Send + Sync {
    fn extract<'a>(&self, payload: &'a Value) -> Option<&'a str>;
}

impl<F> DeltaExtractor for F
where
    F: for<'a> Fn(&'a Value) -> Option<&'a str> + Send + Sync,
{
    fn extract<'a>(&self, payload: &'a Value) -> Option<&'a str> {
        self(payload)
    }
}

/// `{"choices":[{"delta":{"content":"..."}}]}`
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiChatDelta;

impl DeltaExtractor for OpenAiChatDelta {
    fn extract<'a>(&self, payload: &'a Value) -> Option<&'a str> {
        payload
            .get("choices")?
            .get(0)?
            .get("delta")?
            .get("content")?
            .as_str()
    }
}

/// `{"delta":{"text":"..."}}`, as sent in `content_block_delta` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextDelta;

impl DeltaExtractor for TextDelta {
    fn extract<'a>(&self, payload: &'a Value) -> Option<&'a str> {
        payload.get("delta")?.get("text")?.as_str()
    }
}

/// A payload that was not valid JSON.
#[derive(Debug, thiserror::Error)]
#[error("malformed upstream payload: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Ordered list of delta extractors; the first one that matches wins.
pub struct DeltaDecoder {
    extractors: Vec<Box<dyn DeltaExtractor>>,
}

impl DeltaDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    /// Build a decoder from the shapes named in the configuration.
    #[must_use]
    pub fn from_shapes(shapes: &[DeltaShape]) -> Self {
        shapes
            .iter()
            .fold(Self::new(), |decoder, shape| match shape {
                DeltaShape::OpenAiChat => decoder.with_extractor(OpenAiChatDelta),
                DeltaShape::DeltaText => decoder.with_extractor(TextDelta),
            })
    }

    #[must_use]
    pub fn with_extractor(mut self, extractor: impl DeltaExtractor + 'static) -> Self {
        self.extractors.push(Box::new(extractor));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    /// Decode one `data:` payload.
    ///
    /// Valid JSON without a recognised text delta (role announcements,
    /// usage frames, `message_start` and the like) yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when the payload is not JSON.
    pub fn decode(&self, payload: &str) -> Result<Option<String>, DecodeError> {
        let value: Value = serde_json::from_str(payload)?;
        Ok(self
            .extractors
            .iter()
            .find_map(|extractor| extractor.extract(&value))
            .map(str::to_string))
    }
}

impl Default for DeltaDecoder {
    fn default() -> Self {
        Self::from_shapes(&[DeltaShape::OpenAiChat, DeltaShape::DeltaText])
    }
}

impl fmt::Debug for DeltaDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeltaDecoder")
            .field("extractors", &self.extractors.len())
            .finish()
    }
}

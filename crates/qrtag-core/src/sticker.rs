use serde::{Deserialize, Serialize};

/// One sticker: the data encoded in the barcode and the caption printed below it.
///
/// Records are immutable once built; each one becomes exactly one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerRecord {
    payload: String,
    caption: String,
}

impl StickerRecord {
    pub fn new(payload: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            caption: caption.into(),
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn caption(&self) -> &str {
        &self.caption
    }
}

impl<P: Into<String>, C: Into<String>> From<(P, C)> for StickerRecord {
    fn from((payload, caption): (P, C)) -> Self {
        Self::new(payload, caption)
    }
}

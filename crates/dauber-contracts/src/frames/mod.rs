mod store;

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use store::{FrameStore, MAX_FRAMES};

/// One encoded still captured from the live camera feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: String,
    /// `data:image/jpeg;base64,...`
    pub encoded_image: String,
    pub timestamp: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(encoded_image: impl Into<String>, width: u32, height: u32) -> Self {
        Self::captured_at(encoded_image, width, height, Utc::now())
    }

    pub fn captured_at(
        encoded_image: impl Into<String>,
        width: u32,
        height: u32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_frame_id(timestamp),
            encoded_image: encoded_image.into(),
            timestamp,
            width,
            height,
        }
    }

    /// Base64 payload of the image with the data URL prefix removed.
    pub fn base64_payload(&self) -> &str {
        strip_data_url_prefix(&self.encoded_image)
    }
}

fn new_frame_id(timestamp: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("frame-{}-{}", timestamp.timestamp_millis(), &suffix[..9])
}

/// Strips a leading `data:image/<subtype>;base64,` header. Anything else is
/// returned untouched.
pub fn strip_data_url_prefix(data_url: &str) -> &str {
    let Some(rest) = data_url.strip_prefix("data:image/") else {
        return data_url;
    };
    let Some((subtype, payload)) = rest.split_once(";base64,") else {
        return data_url;
    };
    if subtype.is_empty()
        || !subtype
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    {
        return data_url;
    }
    payload
}

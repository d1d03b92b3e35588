use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;

/// Content type declared on every frame delivery
pub const CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Transport envelope: `{"image": "<base64 jpeg>"}`
#[serde_with::serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Standard alphabet, padded, no line wrapping
    #[serde_as(as = "Base64")]
    pub image: Bytes,
}

/// Compressed frame ready for delivery. Immutable once built.
#[derive(Debug, Clone)]
pub struct EncodedPayload {
    body: Bytes,
    jpeg_len: usize,
    width: u32,
    height: u32,
}

impl EncodedPayload {
    pub(crate) fn wrap(jpeg: Vec<u8>, width: u32, height: u32) -> Result<Self, serde_json::Error> {
        let jpeg_len = jpeg.len();
        let body = serde_json::to_vec(&Envelope {
            image: Bytes::from(jpeg),
        })?;

        Ok(Self {
            body: Bytes::from(body),
            jpeg_len,
            width,
            height,
        })
    }

    /// JSON request body. Cloning shares the underlying buffer.
    pub fn body(&self) -> Bytes {
        self.body.clone()
    }

    pub fn content_type(&self) -> &'static str {
        CONTENT_TYPE
    }

    /// Size of the compressed image before base64
    pub fn jpeg_len(&self) -> usize {
        self.jpeg_len
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Parse the body back into its envelope
    pub fn envelope(&self) -> Result<Envelope, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

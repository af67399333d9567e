use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::{CoreResult, StreamError};

/// Base64 fragments of one image, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    mime_type: String,
    chunks: Vec<String>,
}

impl ImageBuffer {
    pub fn new(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            chunks: Vec::new(),
        }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn push(&mut self, chunk: String) {
        self.chunks.push(chunk);
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Concatenate the fragments and decode them as one unit.
    pub fn finish(self) -> CoreResult<ImageArtifact> {
        let encoded = self.chunks.concat();
        let data = STANDARD.decode(encoded.trim()).map_err(|e| {
            StreamError::Protocol(format!("image data for {} is not valid base64: {e}", self.mime_type))
        })?;
        Ok(ImageArtifact {
            mime_type: self.mime_type,
            data,
        })
    }
}

/// A fully received image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl ImageArtifact {
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }

    /// `data:` URL suitable for an `<img src>`.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

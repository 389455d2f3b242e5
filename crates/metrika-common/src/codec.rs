//! Body compression shared by the agent (encode) and the server (decode).

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unsupported content encoding: {0:?}")]
    Unsupported(String),

    #[error("codec I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Compression codec applied to request bodies.
///
/// The codec name travels in `Content-Encoding`, so the receiver can pick
/// the matching decoder.
///
/// # Examples
///
/// ```
/// use metrika_common::codec::Compression;
///
/// let gzip: Compression = "gzip".parse().unwrap();
/// let packed = gzip.encode(b"[]").unwrap();
/// assert_eq!(gzip.decode(&packed).unwrap(), b"[]");
/// assert_eq!(gzip.content_encoding(), Some("gzip"));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    #[serde(alias = "identity", alias = "")]
    None,
    Gzip,
}

impl Compression {
    /// Value for the `Content-Encoding` header, if any.
    pub fn content_encoding(&self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Gzip => Some("gzip"),
        }
    }

    /// Selects the decoder named by a `Content-Encoding` header value.
    pub fn from_content_encoding(header: &str) -> Result<Self, CodecError> {
        let mut selected = Compression::None;
        for token in header.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match token.to_ascii_lowercase().as_str() {
                "identity" => {}
                "gzip" | "x-gzip" => selected = Compression::Gzip,
                other => return Err(CodecError::Unsupported(other.to_string())),
            }
        }
        Ok(selected)
    }

    pub fn encode(&self, body: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            Compression::None => Ok(body.to_vec()),
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(body)?;
                Ok(encoder.finish()?)
            }
        }
    }

    pub fn decode(&self, body: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            Compression::None => Ok(body.to_vec()),
            Compression::Gzip => {
                let mut decoded = Vec::new();
                GzDecoder::new(body).read_to_end(&mut decoded)?;
                Ok(decoded)
            }
        }
    }
}

impl std::str::FromStr for Compression {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "identity" => Ok(Compression::None),
            "gzip" => Ok(Compression::Gzip),
            other => Err(CodecError::Unsupported(other.to_string())),
        }
    }
}

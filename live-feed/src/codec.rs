use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use stats_core::StatsMessage;
use thiserror::Error;

/// A frame as it travels over the channel: plain JSON text, or
/// zlib-compressed JSON bytes when compression is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("compression failed: {0}")]
    Compress(#[from] std::io::Error),
}

/// Decode failures stay split so callers can tell a corrupt compressed frame
/// from a malformed payload and choose not to retry the same frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("corrupt compressed frame: {0}")]
    Decompression(std::io::Error),
    #[error("malformed payload: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Pure transform between messages and wire frames. Binary frames are always
/// treated as compressed on decode regardless of the encode setting.
#[derive(Debug, Clone, Copy)]
pub struct PayloadCodec {
    compress: bool,
}

impl PayloadCodec {
    pub fn new(compress: bool) -> Self {
        Self { compress }
    }

    pub fn encode<T: Serialize>(&self, message: &T) -> Result<WireFrame, EncodeError> {
        let json = serde_json::to_string(message)?;
        if self.compress {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(json.as_bytes())?;
            Ok(WireFrame::Binary(encoder.finish()?))
        } else {
            Ok(WireFrame::Text(json))
        }
    }

    pub fn decode(&self, frame: &WireFrame) -> Result<StatsMessage, DecodeError> {
        self.decode_as(frame)
    }

    pub fn decode_as<T: DeserializeOwned>(&self, frame: &WireFrame) -> Result<T, DecodeError> {
        match frame {
            WireFrame::Text(text) => Ok(serde_json::from_str(text)?),
            WireFrame::Binary(bytes) => {
                let mut decoder = ZlibDecoder::new(bytes.as_slice());
                let mut json = String::new();
                decoder
                    .read_to_string(&mut json)
                    .map_err(DecodeError::Decompression)?;
                Ok(serde_json::from_str(&json)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stats_core::CompareRequest;

    #[test]
    fn encode_plain_text_when_compression_off() {
        let codec = PayloadCodec::new(false);
        let req = CompareRequest {
            user1: "alice".to_string(),
            compare_to: Some("bob".to_string()),
            force_refresh: None,
        };
        match codec.encode(&req).unwrap() {
            WireFrame::Text(json) => {
                assert!(json.contains("\"user1\":\"alice\""));
                assert!(!json.contains("force_refresh"));
            }
            WireFrame::Binary(_) => panic!("expected text frame"),
        }
    }

    #[test]
    fn compressed_frame_decodes_back() {
        let codec = PayloadCodec::new(true);
        let frame = codec
            .encode(&CompareRequest {
                user1: "alice".to_string(),
                compare_to: None,
                force_refresh: Some(true),
            })
            .unwrap();
        assert!(matches!(frame, WireFrame::Binary(_)));
        let back: CompareRequest = codec.decode_as(&frame).unwrap();
        assert_eq!(back.user1, "alice");
        assert_eq!(back.force_refresh, Some(true));
    }

    #[test]
    fn corrupt_binary_reports_decompression_not_parse() {
        let codec = PayloadCodec::new(true);
        let err = codec
            .decode(&WireFrame::Binary(vec![0x00, 0x01, 0x02, 0x03]))
            .unwrap_err();
        assert!(matches!(err, DecodeError::Decompression(_)));
    }

    #[test]
    fn malformed_text_reports_parse() {
        let codec = PayloadCodec::new(false);
        let err = codec
            .decode(&WireFrame::Text("{not json".to_string()))
            .unwrap_err();
        assert!(matches!(err, DecodeError::Parse(_)));
    }

    #[test]
    fn error_frame_decodes_with_empty_snapshots() {
        let codec = PayloadCodec::new(false);
        let msg = codec
            .decode(&WireFrame::Text(
                r#"{"error":"Rate limit exceeded, try later"}"#.to_string(),
            ))
            .unwrap();
        assert!(msg.is_rate_limited());
        assert!(msg.user1.is_none());
    }
}

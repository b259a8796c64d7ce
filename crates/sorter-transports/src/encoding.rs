// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Inline-vs-reference image encoding
//!
//! Images up to the inline threshold travel as base64 inside the envelope;
//! larger ones are written to an [`ImageStore`] and only their path is sent.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::common::{TransportError, TransportResult};
use crate::envelope::{timestamp_now, OutboundMessage};

/// Out-of-band storage for images too large to inline
pub trait ImageStore: Send + Sync {
    /// Persist `data` under `filename`, returning the stored path
    fn store(&self, filename: &str, data: &[u8]) -> TransportResult<PathBuf>;
}

/// Writes images into a directory, creating it on first use
#[derive(Debug, Clone)]
pub struct FsImageStore {
    dir: PathBuf,
}

impl FsImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ImageStore for FsImageStore {
    fn store(&self, filename: &str, data: &[u8]) -> TransportResult<PathBuf> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return Err(TransportError::InvalidConfig(format!(
                "refusing to store image with path-like name '{}'",
                filename
            )));
        }
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(filename);
        std::fs::write(&path, data)?;
        Ok(path)
    }
}

/// Default inline threshold, matching the shipped configuration
pub const DEFAULT_INLINE_THRESHOLD: usize = 512_000;

/// Room for the envelope fields around the base64 body and the packet header
const ENVELOPE_HEADROOM: usize = 4 * 1024;

/// Size-threshold encoding policy
#[derive(Debug, Clone, Copy)]
pub struct EncodingPolicy {
    pub inline_threshold: usize,
}

impl EncodingPolicy {
    pub fn new(inline_threshold: usize) -> Self {
        Self { inline_threshold }
    }

    pub fn should_inline(&self, size_bytes: usize) -> bool {
        size_bytes <= self.inline_threshold
    }

    /// Upper bound on the serialized size of an inline image message
    pub fn max_envelope_bytes(&self) -> usize {
        self.inline_threshold.div_ceil(3) * 4 + ENVELOPE_HEADROOM
    }

    /// Build the image envelope for `data`
    pub fn encode_image(
        &self,
        filename: &str,
        data: &[u8],
        store: &dyn ImageStore,
    ) -> TransportResult<OutboundMessage> {
        let size_bytes = data.len();
        if self.should_inline(size_bytes) {
            return Ok(OutboundMessage::ImageInline {
                filename: filename.to_string(),
                size_bytes,
                content: general_purpose::STANDARD.encode(data),
                timestamp: timestamp_now(),
            });
        }

        let path = store.store(filename, data)?;
        debug!(
            "[PUBLISH] {} ({} bytes) over inline threshold, stored at {}",
            filename,
            size_bytes,
            path.display()
        );
        Ok(OutboundMessage::ImageRef {
            filename: filename.to_string(),
            path: path.display().to_string(),
            size_bytes,
            timestamp: timestamp_now(),
        })
    }
}

/// Decode the `content` field of an inline image envelope
pub fn decode_inline(content: &str) -> TransportResult<Vec<u8>> {
    general_purpose::STANDARD
        .decode(content)
        .map_err(|e| TransportError::Serialization(format!("invalid base64 image: {}", e)))
}

/// `item_000042_20250101_120000.jpg`
pub fn image_filename(sequence_id: u64, captured_at: DateTime<Utc>) -> String {
    format!(
        "item_{:06}_{}.jpg",
        sequence_id,
        captured_at.format("%Y%m%d_%H%M%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn threshold_is_inclusive() {
        let policy = EncodingPolicy::new(4);
        assert!(policy.should_inline(4));
        assert!(!policy.should_inline(5));
    }

    #[test]
    fn small_image_inlines_and_round_trips() {
        let dir = tempdir().unwrap();
        let store = FsImageStore::new(dir.path());
        let data: Vec<u8> = (0..=255).collect();

        let message = EncodingPolicy::new(1024)
            .encode_image("a.jpg", &data, &store)
            .unwrap();

        match message {
            OutboundMessage::ImageInline {
                content, size_bytes, ..
            } => {
                assert_eq!(size_bytes, 256);
                assert_eq!(decode_inline(&content).unwrap(), data);
            }
            other => panic!("expected inline image, got {:?}", other),
        }
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn large_image_is_stored_and_referenced() {
        let dir = tempdir().unwrap();
        let store = FsImageStore::new(dir.path().join("images"));
        let data = vec![0xAB; 64];

        let message = EncodingPolicy::new(16)
            .encode_image("big.jpg", &data, &store)
            .unwrap();

        match &message {
            OutboundMessage::ImageRef {
                path, size_bytes, ..
            } => {
                assert_eq!(*size_bytes, 64);
                assert_eq!(std::fs::read(path).unwrap(), data);
            }
            other => panic!("expected image ref, got {:?}", other),
        }
        let payload = String::from_utf8(message.to_payload().unwrap()).unwrap();
        assert!(!payload.contains(&general_purpose::STANDARD.encode(&data)));
    }

    #[test]
    fn envelope_bound_covers_a_maximal_inline_image() {
        let dir = tempdir().unwrap();
        let store = FsImageStore::new(dir.path());
        for threshold in [1, 7_500, DEFAULT_INLINE_THRESHOLD] {
            let policy = EncodingPolicy::new(threshold);
            let message = policy
                .encode_image("item_000042_20250101_120000.jpg", &vec![0xFF; threshold], &store)
                .unwrap();
            assert!(matches!(message, OutboundMessage::ImageInline { .. }));
            // topic, packet id and fixed header stay well inside the headroom
            let packet = message.to_payload().unwrap().len() + 64;
            assert!(packet <= policy.max_envelope_bytes(), "threshold {}", threshold);
        }
    }

    #[test]
    fn store_rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let store = FsImageStore::new(dir.path());
        assert!(store.store("../escape.jpg", &[1]).is_err());
    }

    #[test]
    fn filename_format() {
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(image_filename(42, at), "item_000042_20250102_030405.jpg");
    }
}

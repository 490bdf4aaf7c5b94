//! Mask transport decoding: Base64 payload in, byte samples out.
//!
//! The detection service has shipped masks in several encodings over
//! time, so decoding walks an ordered list of [`DecodeStrategy`] values
//! and keeps the first one that yields signal:
//!
//! 1. [`DecodeStrategy::GzipBytes`]: gzip-inflate, samples are the bytes.
//! 2. [`DecodeStrategy::GzipText`]: gzip-inflate, samples are the code
//!    points of the inflated text. Only kept if it finds signal that
//!    step 1 did not.
//! 3. [`DecodeStrategy::Raw`]: legacy uncompressed payload, samples are
//!    the Base64-decoded bytes. Only tried if inflation failed.
//!
//! [`decode`] never fails. When nothing works it returns an empty
//! [`DecodedMask`] and the normalizer routes that to the visible
//! placeholder.

use std::io::Read;

use base64::Engine as _;
use base64::engine::GeneralPurpose;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::types::{DecodedMask, EncodedMask};

/// Base64 alphabets tried in order.
const ENGINES: [&GeneralPurpose; 4] = [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD];

/// Why a single strategy could not produce samples.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The payload is not Base64 in any accepted alphabet.
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The payload is not a readable gzip stream.
    #[error("gzip inflate failed: {0}")]
    Inflate(#[from] std::io::Error),

    /// The strategy produced zero samples.
    #[error("payload decoded to zero samples")]
    Empty,
}

/// One way of interpreting a Base64-decoded mask payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodeStrategy {
    /// Gzip-inflate and take each output byte as a sample.
    GzipBytes,
    /// Gzip-inflate, read the output as text, take each character's
    /// code point (saturated to 255) as a sample.
    GzipText,
    /// Take the Base64-decoded bytes as samples without inflating.
    Raw,
}

impl DecodeStrategy {
    /// All strategies in the order [`decode`] attempts them.
    pub const ORDER: [Self; 3] = [Self::GzipBytes, Self::GzipText, Self::Raw];

    /// Attempt this strategy on Base64-decoded payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Inflate`] if a gzip strategy meets a
    /// non-gzip or corrupt stream, and [`TransportError::Empty`] if the
    /// strategy yields no samples.
    pub fn attempt(self, raw: &[u8]) -> Result<Vec<u8>, TransportError> {
        let samples = match self {
            Self::GzipBytes => inflate(raw)?,
            Self::GzipText => String::from_utf8_lossy(&inflate(raw)?)
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(u8::MAX))
                .collect(),
            Self::Raw => raw.to_vec(),
        };
        if samples.is_empty() {
            return Err(TransportError::Empty);
        }
        Ok(samples)
    }

    /// Whether this strategy gzip-inflates the payload first.
    const fn inflates(self) -> bool {
        matches!(self, Self::GzipBytes | Self::GzipText)
    }
}

/// Decode a transport payload into byte samples.
///
/// Never fails: an irrecoverable payload yields an empty
/// [`DecodedMask`].
#[must_use = "returns the decoded samples"]
pub fn decode(encoded: &EncodedMask) -> DecodedMask {
    decode_traced(encoded).0
}

/// Like [`decode`], also reporting which strategy produced the result
/// (`None` when every strategy failed).
#[must_use = "returns the decoded samples"]
pub fn decode_traced(encoded: &EncodedMask) -> (DecodedMask, Option<DecodeStrategy>) {
    let raw = match base64_decode(encoded.as_str()) {
        Ok(raw) => raw,
        Err(e) => {
            log::debug!("mask payload rejected: {e}");
            return (DecodedMask::default(), None);
        }
    };

    // First strategy that produced samples but no signal. Returned if
    // nothing later finds signal.
    let mut silent: Option<(Vec<u8>, DecodeStrategy)> = None;
    // Set once any gzip strategy read the stream to its end, even if it
    // held nothing. Raw bytes are then known to be compressed data.
    let mut inflated = false;

    for strategy in DecodeStrategy::ORDER {
        if !strategy.inflates() && inflated {
            continue;
        }
        match strategy.attempt(&raw) {
            Ok(samples) if samples.iter().any(|&v| v > 0) => {
                log::debug!("mask decoded via {strategy:?} ({} samples)", samples.len());
                return (DecodedMask::Bytes(samples), Some(strategy));
            }
            Ok(samples) => {
                log::debug!("{strategy:?} produced {} all-zero samples", samples.len());
                inflated |= strategy.inflates();
                silent.get_or_insert((samples, strategy));
            }
            Err(TransportError::Empty) => {
                log::debug!("{strategy:?} produced no samples");
                inflated |= strategy.inflates();
            }
            Err(e) => log::debug!("{strategy:?} failed: {e}"),
        }
    }

    silent.map_or_else(
        || (DecodedMask::default(), None),
        |(samples, strategy)| (DecodedMask::Bytes(samples), Some(strategy)),
    )
}

/// Base64-decode a payload, tolerating surrounding whitespace, a
/// `data:` URL prefix, missing padding and the URL-safe alphabet.
fn base64_decode(payload: &str) -> Result<Vec<u8>, TransportError> {
    let trimmed = payload.trim();
    let body = if trimmed.starts_with("data:") {
        trimmed.split_once(',').map_or(trimmed, |(_, b)| b)
    } else {
        trimmed
    };
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    let mut last_err = None;
    for engine in ENGINES {
        match engine.decode(&compact) {
            Ok(bytes) => return Ok(bytes),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.map_or(TransportError::Empty, TransportError::from))
}

fn inflate(raw: &[u8]) -> Result<Vec<u8>, TransportError> {
    let mut out = Vec::new();
    GzDecoder::new(raw).read_to_end(&mut out)?;
    Ok(out)
}

//! Advertisement payload encoding.
//!
//! Wire layout, as carried in the manufacturer (or service) data of a legacy
//! BLE advertisement:
//!
//! ```text
//! +--------+--------+--------+--------+---------------------+
//! | id[31:24] | id[23:16] | id[15:8] | id[7:0] | tag bytes (0..=20) |
//! +--------+--------+--------+--------+---------------------+
//! ```
//!
//! The identity is always four bytes, most significant byte first. The tag is
//! opaque to the codec: it is carried as a hex string in memory and copied
//! verbatim onto the wire.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{Result, RollcallError};

/// Length of the big-endian identity prefix.
pub const ID_LEN: usize = 4;

/// Maximum auxiliary tag length in bytes.
///
/// A legacy advertisement carries 31 bytes in total; flags, the 128-bit
/// service UUID and the manufacturer data header leave roughly 20 bytes.
pub const MAX_TAG_LEN: usize = 20;

/// Maximum encoded payload length.
pub const MAX_PAYLOAD_LEN: usize = ID_LEN + MAX_TAG_LEN;

static HEX_PAIRS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[0-9a-fA-F]{2})*$").expect("hex pair pattern is valid"));

/// A broadcasting participant for the duration of one attendance session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "id": 42, "tag": "a1b2c3d4e5f6" }))]
pub struct Identity {
    /// Numeric identity, unique within the session.
    #[schema(example = 42)]
    pub id: u32,

    /// Optional hex-encoded auxiliary tag (e.g. a hardware fingerprint fragment).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(example = "a1b2c3d4e5f6")]
    pub tag: Option<String>,
}

impl Identity {
    /// Identity without a tag.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self { id, tag: None }
    }

    /// Identity with a hex tag. The tag is validated on [`encode`].
    #[must_use]
    pub fn with_tag(id: u32, tag: impl Into<String>) -> Self {
        Self {
            id,
            tag: Some(tag.into()),
        }
    }

    /// Builds an identity from an untyped integer, as received from JSON or a
    /// database column.
    ///
    /// # Errors
    ///
    /// Returns [`RollcallError::InvalidPayload`] when `raw` is negative or does
    /// not fit in 32 bits.
    pub fn from_raw(raw: i64) -> Result<Self> {
        u32::try_from(raw).map(Self::new).map_err(|_| {
            RollcallError::InvalidPayload(format!(
                "identity must be between 0 and {}, got {raw}",
                u32::MAX
            ))
        })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{}#{tag}", self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Encoded advertisement bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdvertisementPayload(Vec<u8>);

impl AdvertisementPayload {
    /// Raw bytes as they go on the air.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`; a payload carries at least the identity.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume into the underlying buffer.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl AsRef<[u8]> for AdvertisementPayload {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Encode an identity into advertisement bytes.
///
/// # Errors
///
/// Returns [`RollcallError::InvalidPayload`] if the tag is not an even-length
/// hex string or is longer than [`MAX_TAG_LEN`] bytes.
pub fn encode(identity: &Identity) -> Result<AdvertisementPayload> {
    let tag = match identity.tag.as_deref() {
        Some(tag) => tag_bytes(tag)?,
        None => Vec::new(),
    };

    let mut bytes = Vec::with_capacity(ID_LEN + tag.len());
    bytes.extend_from_slice(&identity.id.to_be_bytes());
    bytes.extend_from_slice(&tag);
    Ok(AdvertisementPayload(bytes))
}

/// Decode advertisement bytes back into an identity.
///
/// Trailing bytes beyond the identity become the hex tag; they are never
/// rejected, whatever their length.
///
/// # Errors
///
/// Returns [`RollcallError::InvalidPayload`] if fewer than four bytes are given.
pub fn decode(bytes: &[u8]) -> Result<Identity> {
    if bytes.len() < ID_LEN {
        return Err(RollcallError::InvalidPayload(format!(
            "payload must be at least {ID_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    let (head, rest) = bytes.split_at(ID_LEN);

    Ok(Identity {
        id: u32::from_be_bytes([head[0], head[1], head[2], head[3]]),
        tag: (!rest.is_empty()).then(|| hex::encode(rest)),
    })
}

fn tag_bytes(tag: &str) -> Result<Vec<u8>> {
    if !HEX_PAIRS.is_match(tag) {
        return Err(RollcallError::InvalidPayload(format!(
            "tag must be an even-length hex string, got '{tag}'"
        )));
    }
    let bytes = hex::decode(tag).map_err(|e| RollcallError::InvalidPayload(e.to_string()))?;
    if bytes.len() > MAX_TAG_LEN {
        return Err(RollcallError::InvalidPayload(format!(
            "tag exceeds {MAX_TAG_LEN} bytes (got {})",
            bytes.len()
        )));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_boundaries() {
        for id in [0, 1, 42, 0x00ff_ff00, 2_147_483_648, u32::MAX] {
            let identity = Identity::new(id);
            let decoded = decode(encode(&identity).unwrap().as_bytes()).unwrap();
            assert_eq!(decoded, identity, "round trip failed for {id}");
        }
    }

    #[test]
    fn test_encoding_is_big_endian() {
        let payload = encode(&Identity::new(0x0102_0304)).unwrap();
        assert_eq!(payload.as_bytes(), &[0x01, 0x02, 0x03, 0x04]);

        let payload = encode(&Identity::new(u32::MAX)).unwrap();
        assert_eq!(payload.as_bytes(), &[0xff; 4]);
    }

    #[test]
    fn test_from_raw_rejects_out_of_range() {
        assert!(matches!(
            Identity::from_raw(-1),
            Err(RollcallError::InvalidPayload(_))
        ));
        assert!(matches!(
            Identity::from_raw(4_294_967_296),
            Err(RollcallError::InvalidPayload(_))
        ));
        assert_eq!(Identity::from_raw(4_294_967_295).unwrap().id, u32::MAX);
        assert_eq!(Identity::from_raw(0).unwrap().id, 0);
    }

    #[test]
    fn test_decode_rejects_short_input() {
        assert!(matches!(
            decode(&[0x01, 0x02]),
            Err(RollcallError::InvalidPayload(_))
        ));
        assert!(decode(&[]).is_err());
        assert!(decode(&[0, 0, 1]).is_err());

        let identity = decode(&[0, 0, 0, 1]).unwrap();
        assert_eq!(identity.id, 1);
        assert_eq!(identity.tag, None);
    }

    #[test]
    fn test_tag_appended_verbatim() {
        let identity = Identity::with_tag(7, "A1B2C3D4E5F6");
        let payload = encode(&identity).unwrap();
        assert_eq!(
            payload.as_bytes(),
            &[0, 0, 0, 7, 0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0xf6]
        );

        let decoded = decode(payload.as_bytes()).unwrap();
        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.tag.as_deref(), Some("a1b2c3d4e5f6"));
    }

    #[test]
    fn test_decode_tolerates_long_trailers() {
        let mut bytes = vec![0, 0, 0x01, 0x00];
        bytes.extend(std::iter::repeat(0xee).take(40));
        let identity = decode(&bytes).unwrap();
        assert_eq!(identity.id, 256);
        assert_eq!(identity.tag.unwrap().len(), 80);
    }

    #[test]
    fn test_encode_rejects_bad_tags() {
        assert!(encode(&Identity::with_tag(1, "abc")).is_err());
        assert!(encode(&Identity::with_tag(1, "zz")).is_err());
        assert!(encode(&Identity::with_tag(1, "ab".repeat(MAX_TAG_LEN + 1))).is_err());

        let max = encode(&Identity::with_tag(1, "ab".repeat(MAX_TAG_LEN))).unwrap();
        assert_eq!(max.len(), MAX_PAYLOAD_LEN);
    }

    #[test]
    fn test_empty_tag_encodes_to_bare_identity() {
        let payload = encode(&Identity::with_tag(9, "")).unwrap();
        assert_eq!(payload.len(), ID_LEN);
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(Identity::new(42).to_string(), "42");
        assert_eq!(Identity::with_tag(42, "beef").to_string(), "42#beef");
    }
}

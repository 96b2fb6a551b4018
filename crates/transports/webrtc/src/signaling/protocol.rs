//! Offer/answer wire types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Session description type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

impl SdpType {
    /// The description type a local peer produces in reply to this one
    pub fn counterpart(self) -> SdpType {
        match self {
            SdpType::Offer | SdpType::Pranswer => SdpType::Answer,
            other => other,
        }
    }
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SdpType::Offer => "offer",
            SdpType::Pranswer => "pranswer",
            SdpType::Answer => "answer",
            SdpType::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

/// Session description exchanged over `/offer`
///
/// JSON shape: `{"type": "offer", "sdp": "v=0\r\n..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,

    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Decode a request body
    pub fn from_json(body: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(body).map_err(|e| crate::Error::MalformedOffer(e.to_string()))
    }

    /// Encode as a response body
    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| crate::Error::ResponseSerializationFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_offer() {
        let body = br#"{"type":"offer","sdp":"v=0\r\n"}"#;
        let desc = SessionDescription::from_json(body).unwrap();
        assert_eq!(desc.sdp_type, SdpType::Offer);
        assert_eq!(desc.sdp, "v=0\r\n");
    }

    #[test]
    fn test_encode_answer_shape() {
        let json = SessionDescription::answer("v=0\r\n").to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["type"], "answer");
        assert_eq!(value["sdp"], "v=0\r\n");
    }

    #[test]
    fn test_unknown_type_is_malformed() {
        let err = SessionDescription::from_json(br#"{"type":"hello","sdp":""}"#).unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let err = SessionDescription::from_json(b"{not json").unwrap_err();
        assert!(matches!(err, crate::Error::MalformedOffer(_)));
    }

    #[test]
    fn test_counterpart() {
        assert_eq!(SdpType::Offer.counterpart(), SdpType::Answer);
        assert_eq!(SdpType::Pranswer.counterpart(), SdpType::Answer);
        assert_eq!(SdpType::Rollback.counterpart(), SdpType::Rollback);
        assert_eq!(SdpType::Answer.to_string(), "answer");
    }
}

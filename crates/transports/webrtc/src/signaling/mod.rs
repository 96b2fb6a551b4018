//! Offer/answer signaling
//!
//! [`protocol`] holds the session description wire format and [`offer`] the
//! non-trickle negotiation driven by each `POST /offer`.

pub mod offer;
pub mod protocol;

pub use offer::SignalingHandler;
pub use protocol::{SdpType, SessionDescription};

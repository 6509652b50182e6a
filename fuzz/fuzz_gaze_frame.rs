//! Fuzz target for the gaze server wire decoders.
//!
//! Run with: cargo +nightly fuzz run fuzz_gaze_frame
//!
//! Every decoder must reject or accept arbitrary bytes without panicking,
//! and an accepted frame must re-encode to the same bytes.

#![no_main]

use gazeshim_core::host::EyeTrackingData;
use gazeshim_core::ipc::protocol::decode_response;
use gazeshim_core::ipc::{
    GazesResponse, GetGazesRequest, HandshakeRequest, HandshakeResponse, Request, Response,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(gazes) = decode_response::<GazesResponse>(data) {
        let reencoded = gazes.encode();
        // Flag bytes are normalised to 0 or 1, so only the header must match.
        assert_eq!(reencoded.len(), data.len());
        assert_eq!(&reencoded[..8], &data[..8]);
    }
    if let Ok(handshake) = decode_response::<HandshakeResponse>(data) {
        assert_eq!(handshake.encode(), data);
    }
    if let Some(request) = HandshakeRequest::decode(data) {
        assert_eq!(request.encode(), data);
    }
    let _ = GetGazesRequest::matches(data);
    let _ = EyeTrackingData::decode(data);
});

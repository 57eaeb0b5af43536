//! WASM/JS bindings for `machinehost`.
//!
//! The Supervisor's drain loop is built on `tokio`'s multi-threaded runtime
//! (see `machinehost::supervisor`), which has no equivalent on
//! `wasm32-unknown-unknown` without real OS threads; driving it from a
//! worker-hosted host page is future work (tracked in `DESIGN.md`). This
//! crate instead exposes the parts of the boundary that are safely
//! `wasm-bindgen`-able today: config parsing/validation, the package
//! manifest helpers, and the exact shared-buffer layout constants the host
//! page needs to size its `SharedArrayBuffer`s correctly before handing
//! them to a worker.

#![deny(unsafe_code)]

use machinehost::config::{MachineConfig, PackageManifest};
use machinehost::netbridge::wire::{Addr, Frame};
use machinehost::rpc::control::HEADER_WORDS as CONTROL_HEADER_WORDS;
use machinehost::rpc::network::{DATA_CAPACITY, HEADER_WORDS as NETWORK_HEADER_WORDS};
use machinehost::ring::RING_CAPACITY;
use wasm_bindgen::prelude::*;

/// Parses and validates a JSON machine configuration document, returning it
/// as a JS object the host page can inspect before allocating buffers.
#[wasm_bindgen(js_name = parseMachineConfig)]
pub fn parse_machine_config(json: &str) -> Result<JsValue, JsValue> {
    let config = MachineConfig::from_json(json).map_err(|e| JsValue::from_str(&e.to_string()))?;
    serde_wasm_bindgen::to_value(&config).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Parses a `packages/manifest.json` document.
#[wasm_bindgen(js_name = parsePackageManifest)]
pub fn parse_package_manifest(json: &str) -> Result<JsValue, JsValue> {
    let manifest: PackageManifest =
        serde_json::from_str(json).map_err(|e| JsValue::from_str(&e.to_string()))?;
    serde_wasm_bindgen::to_value(&manifest).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Byte capacity the host page must give the stdout ring's data region.
#[wasm_bindgen(js_name = ringCapacityBytes)]
pub fn ring_capacity_bytes() -> u32 {
    RING_CAPACITY as u32
}

/// Header word count of the control buffer, before its payload region:
/// `COMMAND, LENGTH, EXIT_CODE, COLS, ROWS`.
#[wasm_bindgen(js_name = controlHeaderWords)]
pub fn control_header_words() -> u32 {
    CONTROL_HEADER_WORDS as u32
}

/// Header word count of the network buffer, before its data region:
/// `LOCK, OP, FD, ARG1, ARG2, RESULT, DATA_LEN`.
#[wasm_bindgen(js_name = networkHeaderWords)]
pub fn network_header_words() -> u32 {
    NETWORK_HEADER_WORDS as u32
}

/// Byte capacity of the network buffer's data region.
#[wasm_bindgen(js_name = networkDataCapacityBytes)]
pub fn network_data_capacity_bytes() -> u32 {
    DATA_CAPACITY as u32
}

/// Encodes a socket-bridge wire frame for a host page relaying bytes
/// between a `WebTransportDatagramDuplexStream` and this crate's
/// `NetworkBridge` running in a worker.
#[wasm_bindgen(js_name = encodeFrame)]
pub fn encode_frame(kind: u8, fd: i32, payload: &[u8]) -> Result<Vec<u8>, JsValue> {
    let kind = machinehost::netbridge::wire::FrameKind::from_u8(kind)
        .ok_or_else(|| JsValue::from_str("unknown frame kind"))?;
    Ok(Frame {
        kind,
        fd,
        payload: payload.to_vec(),
    }
    .encode())
}

/// Decodes a socket-bridge wire frame, returning `{kind, fd, payload}`.
#[wasm_bindgen(js_name = decodeFrame)]
pub fn decode_frame(bytes: &[u8]) -> Result<JsValue, JsValue> {
    let frame = Frame::decode(bytes).map_err(|_| JsValue::from_str("malformed frame"))?;
    #[derive(serde::Serialize)]
    struct DecodedFrame {
        kind: u8,
        fd: i32,
        payload: Vec<u8>,
    }
    serde_wasm_bindgen::to_value(&DecodedFrame {
        kind: frame.kind as u8,
        fd: frame.fd,
        payload: frame.payload,
    })
    .map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Decodes an `Addr` record out of a `connect`/`accept` payload.
#[wasm_bindgen(js_name = decodeAddr)]
pub fn decode_addr(bytes: &[u8]) -> Result<JsValue, JsValue> {
    let addr = Addr::decode(bytes).ok_or_else(|| JsValue::from_str("malformed address"))?;
    serde_wasm_bindgen::to_value(&addr).map_err(|e| JsValue::from_str(&e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_constants_match_the_core_crate() {
        assert_eq!(ring_capacity_bytes(), RING_CAPACITY as u32);
        assert_eq!(network_data_capacity_bytes(), DATA_CAPACITY as u32);
    }
}

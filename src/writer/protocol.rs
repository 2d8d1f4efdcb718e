//! Network target control protocol: a client opens a connection, sends
//! `INFO`/`START`/`REDO`/`CONFIRM` frames, and the writer replies with
//! `READY`/`STARTED`/`STREAMING`/`ERROR`.
//!
//! Grounded on `vectordotdev-vector`'s `build.rs` + `prost`-generated-module
//! pattern; the request/response shapes themselves come from
//! `proto/redo_cdc.proto`.
#![allow(clippy::all)]

include!(concat!(env!("OUT_DIR"), "/redo_cdc.protocol.rs"));

use crate::error::{CdcError, Result};
use crate::scn::Scn;
use prost::Message as _;

impl redo_request::StartPosition {
    pub fn as_scn(&self) -> Option<Scn> {
        match self {
            redo_request::StartPosition::Scn(v) => Some(Scn(*v)),
            _ => None,
        }
    }
}

pub fn decode_request(bytes: &[u8]) -> Result<RedoRequest> {
    RedoRequest::decode(bytes).map_err(|e| CdcError::Network(format!("malformed control frame: {e}")))
}

pub fn encode_response(resp: &RedoResponse) -> Vec<u8> {
    resp.encode_to_vec()
}

pub fn ready() -> RedoResponse {
    RedoResponse {
        code: redo_response::Code::Ready as i32,
        scn: 0,
        error_message: String::new(),
    }
}

pub fn started(scn: Scn) -> RedoResponse {
    RedoResponse {
        code: redo_response::Code::Started as i32,
        scn: scn.0,
        error_message: String::new(),
    }
}

pub fn streaming(scn: Scn) -> RedoResponse {
    RedoResponse {
        code: redo_response::Code::Streaming as i32,
        scn: scn.0,
        error_message: String::new(),
    }
}

pub fn error(message: impl Into<String>) -> RedoResponse {
    RedoResponse {
        code: redo_response::Code::Error as i32,
        scn: 0,
        error_message: message.into(),
    }
}

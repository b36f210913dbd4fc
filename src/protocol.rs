//! Messages exchanged between the UI context and the background worker.
//!
//! The serde shapes are the wire contract:
//!
//! ```text
//! request   { "inputData": [..], "srcFmt": "ply", "tgtFmt": "spz" }
//! success   { "status": "success", "data": [..] }
//! failure   { "status": "error", "error": "message" }
//! ```
//!
//! There is no request id. At most one request is ever in flight, so the
//! next response always answers it.

use crate::buffer::TransferBuffer;
use crate::format::{FormatPair, FormatTag};
use serde::{Deserialize, Serialize};

/// One conversion request, owned by the worker once posted.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRequest {
    pub input_data: TransferBuffer,
    pub src_fmt: FormatTag,
    pub tgt_fmt: FormatTag,
}

impl WorkerRequest {
    pub fn new(input_data: TransferBuffer, formats: FormatPair) -> Self {
        Self {
            input_data,
            src_fmt: formats.source,
            tgt_fmt: formats.target,
        }
    }
}

/// Outcome of a request, produced by the worker.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WorkerResponse {
    Success { data: TransferBuffer },
    Error { error: String },
}

impl WorkerResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, WorkerResponse::Success { .. })
    }
}

/// What the UI side receives from the worker channel.
#[derive(Debug, PartialEq)]
pub enum WorkerEvent {
    /// A structured answer to the outstanding request.
    Response(WorkerResponse),
    /// The worker thread died or its channel closed. Not a response.
    Fault(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_shape() {
        let req = WorkerRequest::new(
            TransferBuffer::new(vec![1, 2]),
            FormatPair::new("ply", "spz"),
        );
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({ "inputData": [1, 2], "srcFmt": "ply", "tgtFmt": "spz" })
        );
    }

    #[test]
    fn response_wire_shapes() {
        let ok = WorkerResponse::Success {
            data: TransferBuffer::new(vec![3]),
        };
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({ "status": "success", "data": [3] })
        );

        let err = WorkerResponse::Error {
            error: "unsupported source format".into(),
        };
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({ "status": "error", "error": "unsupported source format" })
        );
    }

    #[test]
    fn response_parses_from_wire() {
        let parsed: WorkerResponse =
            serde_json::from_str(r#"{"status":"error","error":"boom"}"#).unwrap();
        assert_eq!(
            parsed,
            WorkerResponse::Error {
                error: "boom".into()
            }
        );
        assert!(!parsed.is_success());
    }
}

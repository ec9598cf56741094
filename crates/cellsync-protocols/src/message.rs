//! Wire messages exchanged with the kernel.
//!
//! Every frame is a JSON object tagged by `kind`. Requests flow from the
//! client to the kernel; kernel messages flow back and are addressed to a
//! cell by `hashid`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Run status of a cell as reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellStatus {
    /// Nothing running
    #[default]
    Idle,
    /// Evaluation in progress
    Busy,
    /// Evaluation was interrupted or failed
    Stopped,
    /// Channel to the kernel is closed
    Disconnected,
}

impl CellStatus {
    /// Wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Stopped => "stopped",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for CellStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CellStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(Self::Idle),
            "busy" => Ok(Self::Busy),
            "stopped" => Ok(Self::Stopped),
            "disconnected" => Ok(Self::Disconnected),
            other => Err(Error::UnknownStatus(other.to_string())),
        }
    }
}

/// Client to kernel control messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Request {
    /// Re-run the listed cells
    Reevaluate { hashids: Vec<String> },
    /// Replace a cell's code
    SetCode { hashid: String, code: String },
    /// Ask for a cell's current code
    GetCode { hashid: String },
    /// Ask for a cell's last output
    GetOutput { hashid: String },
    /// Interrupt the whole kernel (not scoped to a cell)
    InterruptKernel,
}

impl Request {
    /// Encode as a text frame.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a text frame.
    pub fn from_frame(frame: &str) -> Result<Self> {
        serde_json::from_str(frame).map_err(|e| Error::MalformedMessage(e.to_string()))
    }

    /// Wire `kind` of this request.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Reevaluate { .. } => "reevaluate",
            Self::SetCode { .. } => "set_code",
            Self::GetCode { .. } => "get_code",
            Self::GetOutput { .. } => "get_output",
            Self::InterruptKernel => "interrupt_kernel",
        }
    }
}

/// Kernel to client messages addressed to one cell.
///
/// `status` is kept as text here so an unknown value can be told apart from
/// a frame that does not parse at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KernelMessage {
    /// Current code of a cell
    Code { hashid: String, code: String },
    /// Full output of a cell (replaces, never appends)
    Output { hashid: String, output: String },
    /// Run status of a cell
    Status { hashid: String, status: String },
    /// Any kind this client does not handle
    #[serde(other)]
    Other,
}

impl KernelMessage {
    /// Build a status message from a typed status.
    pub fn status(hashid: impl Into<String>, status: CellStatus) -> Self {
        Self::Status {
            hashid: hashid.into(),
            status: status.as_str().to_string(),
        }
    }

    /// Parse a text frame.
    pub fn parse(frame: &str) -> Result<Self> {
        serde_json::from_str(frame).map_err(|e| Error::MalformedMessage(e.to_string()))
    }

    /// Encode as a text frame.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Read only the `kind` tag of a frame.
    pub fn kind_of(frame: &str) -> Option<String> {
        #[derive(Deserialize)]
        struct Tag {
            kind: String,
        }

        serde_json::from_str::<Tag>(frame).ok().map(|tag| tag.kind)
    }

    /// Target cell, if the kind carries one.
    pub fn hashid(&self) -> Option<&str> {
        match self {
            Self::Code { hashid, .. }
            | Self::Output { hashid, .. }
            | Self::Status { hashid, .. } => Some(hashid.as_str()),
            Self::Other => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn frame_value(request: &Request) -> Value {
        serde_json::from_str(&request.to_frame().unwrap()).unwrap()
    }

    #[test]
    fn request_shapes() {
        assert_eq!(
            frame_value(&Request::Reevaluate {
                hashids: vec!["h".into()],
            }),
            json!({"kind": "reevaluate", "hashids": ["h"]})
        );
        assert_eq!(
            frame_value(&Request::SetCode {
                hashid: "h".into(),
                code: "x = 1".into(),
            }),
            json!({"kind": "set_code", "hashid": "h", "code": "x = 1"})
        );
        assert_eq!(
            frame_value(&Request::GetCode {
                hashid: "h".into(),
            }),
            json!({"kind": "get_code", "hashid": "h"})
        );
        assert_eq!(
            frame_value(&Request::GetOutput {
                hashid: "h".into(),
            }),
            json!({"kind": "get_output", "hashid": "h"})
        );
        assert_eq!(
            frame_value(&Request::InterruptKernel),
            json!({"kind": "interrupt_kernel"})
        );
    }

    #[test]
    fn kind_tag_comes_first() {
        let request = Request::GetCode {
            hashid: "h".into(),
        };
        let frame = request.to_frame().unwrap();
        assert!(frame.starts_with(r#"{"kind":"get_code""#));
    }

    #[test]
    fn request_from_frame() {
        let request = Request::from_frame(r#"{"kind":"interrupt_kernel"}"#).unwrap();
        assert_eq!(request, Request::InterruptKernel);
        assert_eq!(request.kind(), "interrupt_kernel");
        assert!(matches!(
            Request::from_frame(r#"{"kind":"launch"}"#),
            Err(Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn parse_kernel_messages() {
        let msg = KernelMessage::parse(r#"{"kind":"output","hashid":"h","output":"1\n"}"#).unwrap();
        assert_eq!(
            msg,
            KernelMessage::Output {
                hashid: "h".into(),
                output: "1\n".into(),
            }
        );
        assert_eq!(msg.hashid(), Some("h"));

        let msg =
            KernelMessage::parse(r#"{"kind":"status","hashid":"h","status":"busy"}"#).unwrap();
        assert_eq!(msg, KernelMessage::status("h", CellStatus::Busy));
    }

    #[test]
    fn unknown_kind_is_other() {
        let msg = KernelMessage::parse(r#"{"kind":"heartbeat","hashid":"h","ts":1}"#).unwrap();
        assert_eq!(msg, KernelMessage::Other);
        assert_eq!(msg.hashid(), None);
        assert_eq!(
            KernelMessage::kind_of(r#"{"kind":"heartbeat","ts":1}"#).as_deref(),
            Some("heartbeat")
        );
        assert_eq!(KernelMessage::kind_of(r#"{"ts":1}"#), None);
    }

    #[test]
    fn malformed_frames() {
        for frame in [
            "not json",
            "[1, 2]",
            r#"{"hashid":"h"}"#,
            r#"{"kind":"code","hashid":"h"}"#,
            r#"{"kind":"output","hashid":7,"output":"x"}"#,
        ] {
            assert!(
                matches!(KernelMessage::parse(frame), Err(Error::MalformedMessage(_))),
                "{}",
                frame
            );
        }
    }

    #[test]
    fn status_from_str() {
        assert_eq!("stopped".parse::<CellStatus>().unwrap(), CellStatus::Stopped);
        assert_eq!(CellStatus::Disconnected.to_string(), "disconnected");
        assert!(matches!(
            "running".parse::<CellStatus>(),
            Err(Error::UnknownStatus(s)) if s == "running"
        ));
        assert_eq!(CellStatus::default(), CellStatus::Idle);
    }
}

//! Loopback kernel.
//!
//! Stands in for a real kernel on the far side of a [`ChannelEndpoint`].
//! It tracks cells by identity and "evaluates" a cell by echoing its code
//! behind an execution counter, the way a notebook numbers its outputs.

use std::collections::HashMap;
use std::time::Duration;

use cellsync_protocols::{
    cell_identity, CellStatus, ChannelEndpoint, KernelMessage, Request, Result,
};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
struct KernelCell {
    code: String,
    output: String,
}

/// In-process kernel answering cell requests.
#[derive(Debug)]
pub struct LoopbackKernel {
    endpoint: ChannelEndpoint,
    cells: HashMap<String, KernelCell>,
    execution_count: u64,
    delay: Duration,
}

impl LoopbackKernel {
    /// Create a kernel serving `endpoint`.
    pub fn new(endpoint: ChannelEndpoint, delay: Duration) -> Self {
        Self {
            endpoint,
            cells: HashMap::new(),
            execution_count: 0,
            delay,
        }
    }

    /// Register a cell under the identity derived from `code`.
    pub fn register(&mut self, code: &str) -> String {
        let hashid = cell_identity(code).to_hex();
        self.cells.insert(
            hashid.clone(),
            KernelCell {
                code: code.to_string(),
                output: String::new(),
            },
        );
        debug!("Kernel registered cell {}", &hashid[..8]);
        hashid
    }

    /// Number of known cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Answer one request frame with the messages to send back, in order.
    pub fn handle_request(&mut self, frame: &str) -> Result<Vec<KernelMessage>> {
        let request = Request::from_frame(frame)?;
        debug!("Kernel received {}", request.kind());

        let replies = match request {
            Request::Reevaluate { hashids } => {
                let mut replies = Vec::new();
                for hashid in hashids {
                    let Some(cell) = self.cells.get_mut(&hashid) else {
                        warn!("Kernel asked to run unknown cell {}", hashid);
                        continue;
                    };
                    self.execution_count += 1;
                    cell.output = format!("Out[{}]: {}", self.execution_count, cell.code);
                    replies.push(KernelMessage::status(hashid.clone(), CellStatus::Busy));
                    replies.push(KernelMessage::Output {
                        hashid: hashid.clone(),
                        output: cell.output.clone(),
                    });
                    replies.push(KernelMessage::status(hashid, CellStatus::Idle));
                }
                replies
            }
            Request::SetCode { hashid, code } => {
                self.cells.entry(hashid).or_default().code = code;
                Vec::new()
            }
            Request::GetCode { hashid } => match self.cells.get(&hashid) {
                Some(cell) => vec![KernelMessage::Code {
                    code: cell.code.clone(),
                    hashid,
                }],
                None => Vec::new(),
            },
            Request::GetOutput { hashid } => match self.cells.get(&hashid) {
                Some(cell) => vec![KernelMessage::Output {
                    output: cell.output.clone(),
                    hashid,
                }],
                None => Vec::new(),
            },
            Request::InterruptKernel => {
                info!("Kernel interrupted");
                let mut hashids: Vec<_> = self.cells.keys().cloned().collect();
                hashids.sort();
                hashids
                    .into_iter()
                    .map(|hashid| KernelMessage::status(hashid, CellStatus::Stopped))
                    .collect()
            }
        };

        Ok(replies)
    }

    /// Serve requests until `shutdown` fires or every controller handle is
    /// dropped, then close the channel.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        info!("Loopback kernel started with {} cell(s)", self.cell_count());

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                frame = self.endpoint.next_outbound() => {
                    let Some(frame) = frame else { break };
                    match self.handle_request(&frame) {
                        Ok(replies) => self.reply(replies).await,
                        Err(e) => warn!("Kernel dropped request: {}", e),
                    }
                }
            }
        }

        self.endpoint.close();
        info!("Loopback kernel stopped");
    }

    async fn reply(&self, replies: Vec<KernelMessage>) {
        for message in replies {
            let busy = matches!(&message, KernelMessage::Status { status, .. } if status == "busy");
            match message.to_frame() {
                Ok(frame) => {
                    self.endpoint.deliver(frame);
                }
                Err(e) => warn!("Kernel failed to encode reply: {}", e),
            }
            if busy {
                tokio::time::sleep(self.delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellsync_protocols::{ChannelConfig, SharedChannel};
    use serde_json::{json, Value};

    fn kernel() -> (LoopbackKernel, SharedChannel) {
        let (channel, endpoint) = SharedChannel::new(ChannelConfig::default());
        (LoopbackKernel::new(endpoint, Duration::ZERO), channel)
    }

    fn to_values(replies: Vec<KernelMessage>) -> Vec<Value> {
        replies
            .iter()
            .map(|m| serde_json::from_str(&m.to_frame().unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn reevaluate_reports_busy_output_idle() {
        let (mut kernel, _channel) = kernel();
        let id = kernel.register("print(1)");

        let frame = json!({"kind": "reevaluate", "hashids": [id]}).to_string();
        assert_eq!(
            to_values(kernel.handle_request(&frame).unwrap()),
            vec![
                json!({"kind": "status", "hashid": id, "status": "busy"}),
                json!({"kind": "output", "hashid": id, "output": "Out[1]: print(1)"}),
                json!({"kind": "status", "hashid": id, "status": "idle"}),
            ]
        );
    }

    #[test]
    fn set_code_then_get_code() {
        let (mut kernel, _channel) = kernel();
        let id = kernel.register("a");

        let set = json!({"kind": "set_code", "hashid": id, "code": "b"}).to_string();
        assert!(kernel.handle_request(&set).unwrap().is_empty());

        let get = json!({"kind": "get_code", "hashid": id}).to_string();
        assert_eq!(
            to_values(kernel.handle_request(&get).unwrap()),
            vec![json!({"kind": "code", "hashid": id, "code": "b"})]
        );
    }

    #[test]
    fn unknown_cells_get_no_reply() {
        let (mut kernel, _channel) = kernel();
        let frame = json!({"kind": "reevaluate", "hashids": ["feed"]}).to_string();
        assert!(kernel.handle_request(&frame).unwrap().is_empty());
        let frame = json!({"kind": "get_output", "hashid": "feed"}).to_string();
        assert!(kernel.handle_request(&frame).unwrap().is_empty());
    }

    #[test]
    fn interrupt_stops_every_cell() {
        let (mut kernel, _channel) = kernel();
        kernel.register("a");
        kernel.register("b");
        assert_eq!(kernel.cell_count(), 2);

        let replies = kernel
            .handle_request(r#"{"kind":"interrupt_kernel"}"#)
            .unwrap();
        assert_eq!(replies.len(), 2);
        assert!(replies
            .iter()
            .all(|m| matches!(m, KernelMessage::Status { status, .. } if status == "stopped")));
    }

    #[test]
    fn bad_request_is_error() {
        let (mut kernel, _channel) = kernel();
        assert!(kernel.handle_request("{}").is_err());
    }
}

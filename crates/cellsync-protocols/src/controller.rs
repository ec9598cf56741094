//! Cell Controller - keeps one local cell in step with its kernel cell.
//!
//! The controller derives the cell's identity once, from the code it was
//! created with, and uses it as the routing key for every request and every
//! inbound frame. Editing the code later never changes the identity: the
//! kernel registered the cell under it.
//!
//! # Flow
//!
//! 1. Requests ([`evaluate`](CellController::evaluate),
//!    [`set_code`](CellController::set_code), ...) are sent and forgotten.
//!    Nothing waits for a reply and nothing times out.
//! 2. Replies arrive as frames on the shared channel.
//!    [`handle_frame`](CellController::handle_frame) drops frames for other
//!    cells and applies the rest to the three state cells.
//! 3. When the channel reports `CLOSED` the status is forced to
//!    `disconnected` until the kernel announces a new one.
//!
//! [`run`](CellController::run) wires steps 2 and 3 to the channel. Frames
//! and connectivity changes are applied in the single order the channel
//! produced them.
//!
//! `set_code` updates the local code before the kernel has seen it. If the
//! kernel rejects the edit the local copy stays as edited until the next
//! `code` message.

use std::sync::{Mutex, MutexGuard, PoisonError};

use cellsync_digest::{digest_prefixed, Digest};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, trace, warn};

use crate::channel::{Channel, ConnectionStatus, Inbound};
use crate::error::Result;
use crate::message::{CellStatus, KernelMessage, Request};

/// Prefix hashed in front of the initial code to form the cell identity.
pub const IDENTITY_PREFIX: &str = "code";

/// Derive the identity a kernel uses for a cell registered with `code`.
pub fn cell_identity(code: &str) -> Digest {
    digest_prefixed(IDENTITY_PREFIX, code)
}

/// What an inbound frame did to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Addressed to another cell; nothing changed.
    Foreign,
    /// Local code replaced.
    Code,
    /// Local output replaced.
    Output,
    /// Local status replaced.
    Status(CellStatus),
    /// Kind this controller does not handle; nothing changed.
    Ignored(String),
}

/// Point-in-time copy of a cell's observable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellSnapshot {
    /// Cell identity, as hex when serialized
    pub identity: Digest,
    /// Run status
    pub status: CellStatus,
    /// Local code
    pub code: String,
    /// Last full output
    pub output: String,
}

/// Subscription taken at construction so no event is missed before `run`.
type Inbox = broadcast::Receiver<Inbound>;

/// Lends the inbox to one `run` and hands it back when that run ends,
/// including when its task is aborted.
struct InboxLoan<'a> {
    slot: &'a Mutex<Option<Inbox>>,
    inbox: Option<Inbox>,
}

impl Drop for InboxLoan<'_> {
    fn drop(&mut self) {
        if let Some(inbox) = self.inbox.take() {
            *lock(self.slot) = Some(inbox);
        }
    }
}

fn lock(slot: &Mutex<Option<Inbox>>) -> MutexGuard<'_, Option<Inbox>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Client-side view of one kernel cell.
pub struct CellController<C: Channel> {
    channel: C,
    identity: Digest,
    hashid: String,
    status: watch::Sender<CellStatus>,
    output: watch::Sender<String>,
    code: watch::Sender<String>,
    inbox: Mutex<Option<Inbox>>,
}

impl<C: Channel> std::fmt::Debug for CellController<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellController")
            .field("identity", &self.hashid)
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl<C: Channel> CellController<C> {
    /// Create a controller for the cell registered with `code`.
    pub fn new(channel: C, code: impl Into<String>) -> Self {
        let code = code.into();
        let identity = cell_identity(&code);
        let inbox = channel.subscribe();

        debug!("Registered cell {}", identity);

        Self {
            channel,
            identity,
            hashid: identity.to_hex(),
            status: watch::Sender::new(CellStatus::Idle),
            output: watch::Sender::new(String::new()),
            code: watch::Sender::new(code),
            inbox: Mutex::new(Some(inbox)),
        }
    }

    /// The cell identity.
    pub fn identity(&self) -> Digest {
        self.identity
    }

    /// The cell identity as sent on the wire.
    pub fn hashid(&self) -> &str {
        &self.hashid
    }

    /// Current status.
    pub fn status(&self) -> CellStatus {
        *self.status.borrow()
    }

    /// Current output.
    pub fn output(&self) -> String {
        self.output.borrow().clone()
    }

    /// Current code.
    pub fn code(&self) -> String {
        self.code.borrow().clone()
    }

    /// Copy of the current status, code and output.
    pub fn snapshot(&self) -> CellSnapshot {
        CellSnapshot {
            identity: self.identity,
            status: self.status(),
            code: self.code(),
            output: self.output(),
        }
    }

    /// Observe status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<CellStatus> {
        self.status.subscribe()
    }

    /// Observe output changes.
    pub fn subscribe_output(&self) -> watch::Receiver<String> {
        self.output.subscribe()
    }

    /// Observe code changes.
    pub fn subscribe_code(&self) -> watch::Receiver<String> {
        self.code.subscribe()
    }

    /// Ask the kernel to re-run this cell. Output is cleared right away.
    pub fn evaluate(&self) {
        self.output.send_replace(String::new());
        self.send_request(Request::Reevaluate {
            hashids: vec![self.hashid.clone()],
        });
    }

    /// Replace the code locally and on the kernel.
    pub fn set_code(&self, new_code: impl Into<String>) {
        let new_code = new_code.into();
        self.code.send_replace(new_code.clone());
        self.send_request(Request::SetCode {
            hashid: self.hashid.clone(),
            code: new_code,
        });
    }

    /// Ask the kernel for the cell's code. The answer arrives as a `code` frame.
    pub fn get_code(&self) {
        self.send_request(Request::GetCode {
            hashid: self.hashid.clone(),
        });
    }

    /// Ask the kernel for the cell's output. The answer arrives as an `output` frame.
    pub fn get_output(&self) {
        self.send_request(Request::GetOutput {
            hashid: self.hashid.clone(),
        });
    }

    /// Interrupt the kernel. This is global, not scoped to this cell.
    pub fn interrupt(&self) {
        self.send_request(Request::InterruptKernel);
    }

    fn send_request(&self, request: Request) {
        match request.to_frame() {
            Ok(frame) => {
                debug!("Cell {} sending {}", self.identity, request.kind());
                self.channel.send(frame);
            }
            Err(e) => error!("Cell {} failed to encode {}: {}", self.identity, request.kind(), e),
        }
    }

    /// Apply one inbound frame.
    ///
    /// Frames that do not parse fail with `MalformedMessage` and frames with
    /// an unknown status fail with `UnknownStatus`; neither changes any state.
    pub fn handle_frame(&self, frame: &str) -> Result<Dispatch> {
        let message = KernelMessage::parse(frame)?;

        if let Some(hashid) = message.hashid() {
            if hashid != self.hashid {
                trace!("Cell {} ignoring frame for {}", self.identity, hashid);
                return Ok(Dispatch::Foreign);
            }
        }

        match message {
            KernelMessage::Code { code, .. } => {
                self.code.send_replace(code);
                Ok(Dispatch::Code)
            }
            KernelMessage::Output { output, .. } => {
                self.output.send_replace(output);
                Ok(Dispatch::Output)
            }
            KernelMessage::Status { status, .. } => {
                let status: CellStatus = status.parse()?;
                let previous = self.status.send_replace(status);
                debug!("Cell {} status {} -> {}", self.identity, previous, status);
                Ok(Dispatch::Status(status))
            }
            KernelMessage::Other => {
                let kind = KernelMessage::kind_of(frame).unwrap_or_default();
                trace!("Cell {} ignoring {:?} frame", self.identity, kind);
                Ok(Dispatch::Ignored(kind))
            }
        }
    }

    /// Apply a connectivity change. Only `CLOSED` has an effect.
    pub fn handle_connectivity(&self, connectivity: ConnectionStatus) {
        if connectivity == ConnectionStatus::Closed {
            let previous = self.status.send_replace(CellStatus::Disconnected);
            if previous != CellStatus::Disconnected {
                info!("Cell {} disconnected (was {})", self.identity, previous);
            }
        }
    }

    /// Drive the controller from its channel.
    ///
    /// Frames and connectivity changes are applied in arrival order. Bad
    /// frames are logged and skipped. Returns when the channel's event
    /// stream ends, or at once if another `run` is already driving this
    /// controller. Events that arrive while no `run` is active are kept
    /// (up to the channel capacity) for the next one.
    pub async fn run(&self) {
        let Some(inbox) = lock(&self.inbox).take() else {
            warn!("Cell {} is already running", self.identity);
            return;
        };
        let mut loan = InboxLoan {
            slot: &self.inbox,
            inbox: Some(inbox),
        };

        while let Some(events) = loan.inbox.as_mut() {
            match events.recv().await {
                Ok(Inbound::Frame(frame)) => {
                    if let Err(e) = self.handle_frame(&frame) {
                        warn!("Cell {} dropped frame: {}", self.identity, e);
                    }
                }
                Ok(Inbound::Connectivity(status)) => self.handle_connectivity(status),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Cell {} lagged, {} events skipped", self.identity, skipped);
                    // A skipped close may have been among them.
                    self.handle_connectivity(self.channel.connectivity());
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Cell {} event stream closed", self.identity);
                    break;
                }
            }
        }
    }
}

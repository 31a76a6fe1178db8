//! Async channel bridge between a serial session and its device worker thread

use async_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use bytes::Bytes;

/// Capacity of the command queue
pub const COMMAND_QUEUE_CAPACITY: usize = 256;

/// Commands from the session to the worker thread
#[derive(Debug)]
pub enum SessionCommand {
    /// Send bytes to the OUT endpoint
    Write {
        /// Payload, already converted to bytes
        data: Bytes,
    },

    /// Stop reading, drop DTR and close the device handle
    Close {
        /// Signalled once the handle is closed
        response: tokio::sync::oneshot::Sender<()>,
    },
}

/// Handle for the session side
#[derive(Clone)]
pub struct SessionBridge {
    cmd_tx: Sender<SessionCommand>,
}

impl SessionBridge {
    /// Send a command to the worker thread
    pub async fn send_command(&self, cmd: SessionCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Queue a command without waiting; fails when the queue is full or the worker is gone
    pub fn try_send_command(&self, cmd: SessionCommand) -> crate::Result<()> {
        self.cmd_tx.try_send(cmd).map_err(|e| match e {
            TrySendError::Full(_) => crate::Error::Channel("Command queue full".to_string()),
            TrySendError::Closed(_) => crate::Error::Channel("Worker has stopped".to_string()),
        })
    }

    /// Whether the worker thread has dropped its end
    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

/// Handle for the worker thread (blocking)
pub struct SessionWorker {
    cmd_rx: Receiver<SessionCommand>,
}

impl SessionWorker {
    /// Receive a command, blocking until one arrives
    pub fn recv_command(&self) -> crate::Result<SessionCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    ///
    /// `Ok(None)` means the queue is empty; an error means every session
    /// handle has been dropped.
    pub fn try_recv_command(&self) -> crate::Result<Option<SessionCommand>> {
        match self.cmd_rx.try_recv() {
            Ok(cmd) => Ok(Some(cmd)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Closed) => {
                Err(crate::Error::Channel("Session has been dropped".to_string()))
            }
        }
    }
}

/// Create the channel bridge between a session and its worker
///
/// Returns (SessionBridge for the session, SessionWorker for the worker thread)
pub fn create_session_bridge() -> (SessionBridge, SessionWorker) {
    let (cmd_tx, cmd_rx) = bounded(COMMAND_QUEUE_CAPACITY);

    (SessionBridge { cmd_tx }, SessionWorker { cmd_rx })
}

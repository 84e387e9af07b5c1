//! Per-request HTTP transport.
//!
//! A transport carries the responses a session produces back to the HTTP
//! layer. Until a stream is opened, responses are buffered and handed over
//! as one JSON document; once a stream is open they are pushed to it as they
//! are produced.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{Error, Result};
use crate::mcp::protocol::JsonRpcResponse;

/// Outbound channel capacity for streaming sessions.
pub const STREAM_BUFFER: usize = 32;

/// Transport trait for MCP communication.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one response to the client.
    async fn send(&self, message: JsonRpcResponse) -> Result<()>;

    /// Close the transport. Returns `true` only for the call that closed it.
    fn close(&self) -> bool;

    /// Whether the transport has been closed.
    fn is_closed(&self) -> bool;
}

/// Transport bound to one inbound HTTP request.
#[derive(Debug, Default)]
pub struct HttpTransport {
    buffered: Mutex<Vec<JsonRpcResponse>>,
    stream: Mutex<Option<mpsc::Sender<JsonRpcResponse>>>,
    closed: AtomicBool,
}

impl HttpTransport {
    /// Create a transport in buffering mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch to streaming mode and return the receiving end.
    pub fn open_stream(&self) -> Result<mpsc::Receiver<JsonRpcResponse>> {
        if self.is_closed() {
            return Err(Error::SessionClosed("transport closed before stream opened".to_string()));
        }

        let mut slot = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Err(Error::McpProtocol("stream already open".to_string()));
        }

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        *slot = Some(tx);
        Ok(rx)
    }

    /// Take the responses buffered so far, in the order they were sent.
    pub fn take_buffered(&self) -> Vec<JsonRpcResponse> {
        std::mem::take(&mut *self.buffered.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn stream_sender(&self) -> Option<mpsc::Sender<JsonRpcResponse>> {
        self.stream.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, message: JsonRpcResponse) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed("transport closed".to_string()));
        }

        trace!("Sending response for id {:?}", message.id);
        match self.stream_sender() {
            Some(tx) => tx
                .send(message)
                .await
                .map_err(|_| Error::SessionClosed("stream receiver dropped".to_string())),
            None => {
                self.buffered
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(message);
                Ok(())
            }
        }
    }

    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        // Dropping the sender ends the stream once buffered events drain.
        self.stream.lock().unwrap_or_else(|e| e.into_inner()).take();
        true
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

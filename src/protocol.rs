// src/protocol.rs
//
// Coordinator/worker control protocol. Every message is one JSON value in a
// length-prefixed frame: [len: u32 BE][payload: len bytes]. The first frame a
// worker sends after connecting is the bare JSON string "ready for work";
// everything afterwards is the tagged envelope below.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::WorkerConf;
use crate::stats::BenchmarkResult;

/// Handshake string a worker sends to register with the coordinator.
pub const READY_FOR_WORK: &str = "ready for work";

/// Upper bound on a single frame. A worker config for even a very large test
/// plan stays far below this.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// The envelope exchanged between coordinator and worker, serialized as
/// `{"message": "...", ...}` with the payload fields inlined per variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "message")]
pub enum WorkerMessage {
    /// Coordinator hands a worker its slice of the test plan.
    #[serde(rename = "init")]
    Init { config: Box<WorkerConf> },
    /// Worker has built and prepared its workqueue.
    #[serde(rename = "preparations done")]
    PreparationsDone,
    /// Coordinator releases the start barrier.
    #[serde(rename = "start work")]
    StartWork,
    /// Worker finished the test and reports its result.
    #[serde(rename = "work done")]
    WorkDone { bench_result: BenchmarkResult },
    /// Coordinator is done with all tests; the worker should exit.
    #[serde(rename = "shutdown")]
    Shutdown,
}

/// A message-oriented wrapper around a byte stream.
pub struct Connection<S = TcpStream> {
    stream: S,
}

impl Connection<TcpStream> {
    pub fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        self.stream.peer_addr().ok()
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    pub fn new(stream: S) -> Self {
        Connection { stream }
    }

    /// Sends one value as a framed JSON message.
    pub async fn send<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value).context("could not encode message")?;
        if payload.len() > MAX_FRAME_SIZE as usize {
            bail!(
                "message of {} bytes exceeds the frame limit of {} bytes",
                payload.len(),
                MAX_FRAME_SIZE
            );
        }
        self.stream
            .write_all(&(payload.len() as u32).to_be_bytes())
            .await
            .context("could not write frame header")?;
        self.stream
            .write_all(&payload)
            .await
            .context("could not write frame payload")?;
        self.stream.flush().await.context("could not flush frame")?;
        Ok(())
    }

    /// Receives one framed JSON message.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<T> {
        let mut header = [0u8; 4];
        self.stream
            .read_exact(&mut header)
            .await
            .context("connection closed while reading frame header")?;
        let length = u32::from_be_bytes(header);
        if length > MAX_FRAME_SIZE {
            bail!(
                "frame of {} bytes exceeds the frame limit of {} bytes",
                length,
                MAX_FRAME_SIZE
            );
        }
        let mut payload = vec![0u8; length as usize];
        self.stream
            .read_exact(&mut payload)
            .await
            .context("connection closed while reading frame payload")?;
        serde_json::from_slice(&payload).context("could not decode message")
    }
}

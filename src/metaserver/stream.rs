//! Streaming tail for large metadata responses.
//!
//! `GetOrModifyS3ChunkInfo` and `GetVolumeExtent` may carry payloads too
//! large for a single RPC reply. The client negotiates a stream in its
//! request; after the reply headers are delivered, the server pushes the
//! bulk data as frames over the accepted connection.

use tokio::sync::mpsc;
use tracing::warn;

use super::types::{MetaStatusCode, S3ChunkInfo, VolumeExtentSlice};

/// One bulk-transfer frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    ChunkInfo {
        chunk_index: u64,
        infos: Vec<S3ChunkInfo>,
    },
    Extent(VolumeExtentSlice),
    Eof,
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("stream connection closed by peer")]
    Closed,
}

/// Server half of an accepted stream.
pub struct StreamConnection {
    tx: mpsc::UnboundedSender<StreamFrame>,
}

impl StreamConnection {
    pub fn send(&self, frame: StreamFrame) -> Result<(), StreamError> {
        self.tx.send(frame).map_err(|_| StreamError::Closed)
    }
}

/// RPC-side context of one in-flight call.
///
/// When the client negotiated streaming, the controller holds the server
/// half of the stream channel until [`StreamServer::accept`] claims it.
pub struct RpcController {
    stream_tx: Option<mpsc::UnboundedSender<StreamFrame>>,
}

impl RpcController {
    /// A controller for a plain request/response call.
    pub fn new() -> Self {
        Self { stream_tx: None }
    }

    /// A controller with a negotiated stream, plus the client's receiving
    /// half.
    pub fn streaming_pair() -> (Self, mpsc::UnboundedReceiver<StreamFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { stream_tx: Some(tx) }, rx)
    }

    pub fn supports_streaming(&self) -> bool {
        self.stream_tx.is_some()
    }

    pub(crate) fn take_stream_sender(&mut self) -> Option<mpsc::UnboundedSender<StreamFrame>> {
        self.stream_tx.take()
    }
}

impl Default for RpcController {
    fn default() -> Self {
        Self::new()
    }
}

/// Acceptor for client stream handshakes.
pub trait StreamServer: Send + Sync {
    /// Claims the stream negotiated on `controller`, if any. `None` means
    /// the handshake failed and the caller must report `RpcStreamError`.
    fn accept(&self, controller: &mut RpcController) -> Option<StreamConnection>;
}

/// In-process stream server backed by channels. Accepts exactly the
/// controllers that negotiated a stream.
#[derive(Default)]
pub struct ChannelStreamServer;

impl StreamServer for ChannelStreamServer {
    fn accept(&self, controller: &mut RpcController) -> Option<StreamConnection> {
        controller.take_stream_sender().map(|tx| StreamConnection { tx })
    }
}

/// Sends an inode's extent slices over an accepted stream.
pub fn streaming_send_volume_extent(
    connection: &StreamConnection,
    slices: Vec<VolumeExtentSlice>,
) -> MetaStatusCode {
    for slice in slices {
        if connection.send(StreamFrame::Extent(slice)).is_err() {
            warn!("volume extent stream closed mid-send");
            return MetaStatusCode::RpcStreamError;
        }
    }
    if connection.send(StreamFrame::Eof).is_err() {
        return MetaStatusCode::RpcStreamError;
    }
    MetaStatusCode::Ok
}

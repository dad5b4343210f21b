//! Serialized writer shared by every task that sends messages.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::rpc::message::Message;
use crate::rpc::multiplexer::CallError;

/// Cloneable sending half. `send` never blocks.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<Message>,
}

impl Outbound {
    /// Start the writer task. It ends once every handle is dropped.
    pub fn spawn<W>(writer: W) -> (Self, JoinHandle<std::io::Result<()>>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, rx) = Self::channel();
        let handle = tokio::spawn(write_loop(writer, rx));
        (outbound, handle)
    }

    /// A handle whose messages are read straight off the returned receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, message: impl Into<Message>) -> Result<(), CallError> {
        self.tx
            .send(message.into())
            .map_err(|_| CallError::Disconnected)
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Message>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut line = message.to_line();
        trace!(%line, "send");
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    debug!("outbound closed");
    writer.shutdown().await
}

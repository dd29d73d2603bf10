//! Duplex frame channel over any AsyncRead/AsyncWrite pair.
//!
//! A reader task decodes frames into an in-memory queue and a writer task
//! drains an outbound queue into the sink, so [`Channel::send`] and
//! [`Channel::try_recv`] never wait on the other process. Both tasks must be
//! spawned inside a tokio runtime.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use super::codec::FrameCodec;
use super::protocol::Frame;

/// Capacity of each direction of an in-memory [`Channel::pair`].
const DUPLEX_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The other end closed its side.
    #[error("channel closed")]
    Closed,
    /// An I/O or decode error ended the channel.
    #[error("channel broken: {0}")]
    Broken(String),
}

enum Inbound {
    Frame(Frame),
    Failed(String),
    Eof,
}

pub struct Channel {
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    reader: JoinHandle<()>,
    writer: Option<JoinHandle<()>>,
    /// Set once; every later receive reports it.
    failure: Option<ChannelError>,
}

impl Channel {
    pub fn spawn<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();

        let reader_tx = inbound_tx.clone();
        let reader = tokio::spawn(async move {
            let mut frames = FramedRead::new(reader, FrameCodec::<Frame>::new());
            loop {
                let event = match frames.next().await {
                    Some(Ok(frame)) => {
                        tracing::trace!(kind = frame.kind(), "Received frame");
                        Inbound::Frame(frame)
                    }
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "Channel read failed");
                        let _ = reader_tx.send(Inbound::Failed(e.to_string()));
                        break;
                    }
                    None => {
                        let _ = reader_tx.send(Inbound::Eof);
                        break;
                    }
                };
                if reader_tx.send(event).is_err() {
                    break;
                }
            }
            tracing::trace!("Channel reader task exiting");
        });

        let writer = tokio::spawn(async move {
            let mut sink = FramedWrite::new(writer, FrameCodec::<Frame>::new());
            while let Some(frame) = outbound_rx.recv().await {
                let kind = frame.kind();
                if let Err(e) = sink.send(frame).await {
                    tracing::debug!(error = %e, kind, "Channel write failed");
                    let _ = inbound_tx.send(Inbound::Failed(e.to_string()));
                    return;
                }
            }
            if let Err(e) = sink.close().await {
                tracing::trace!(error = %e, "Closing channel writer failed");
            }
            tracing::trace!("Channel writer task exiting");
        });

        Self {
            outbound: Some(outbound),
            inbound,
            reader,
            writer: Some(writer),
            failure: None,
        }
    }

    /// Two connected in-memory endpoints.
    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(DUPLEX_BUFFER);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);
        (Self::spawn(a_read, a_write), Self::spawn(b_read, b_write))
    }

    /// Queue a frame for the other end. Returns false once the channel is
    /// unusable.
    pub fn send(&self, frame: Frame) -> bool {
        if self.failure.is_some() {
            return false;
        }
        match &self.outbound {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Next received frame if one is already queued.
    pub fn try_recv(&mut self) -> Result<Option<Frame>, ChannelError> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        match self.inbound.try_recv() {
            Ok(event) => self.accept(event).map(Some),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(self.fail(ChannelError::Closed)),
        }
    }

    /// Wait for the next frame.
    pub async fn recv(&mut self) -> Result<Frame, ChannelError> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        match self.inbound.recv().await {
            Some(event) => self.accept(event),
            None => Err(self.fail(ChannelError::Closed)),
        }
    }

    /// Queued inbound events not yet received.
    pub fn pending(&self) -> usize {
        self.inbound.len()
    }

    pub fn is_broken(&self) -> bool {
        self.failure.is_some()
    }

    /// Stop reading and let the writer flush what is queued, then close the
    /// outbound side.
    pub fn close(&mut self) {
        self.outbound = None;
        self.reader.abort();
        if self.failure.is_none() {
            self.failure = Some(ChannelError::Closed);
        }
    }

    /// [`close`](Self::close), then wait until everything queued has been
    /// written.
    pub async fn flush_and_close(mut self) {
        self.close();
        if let Some(writer) = self.writer.take()
            && let Err(e) = writer.await
        {
            tracing::debug!(error = %e, "Channel writer task failed");
        }
    }

    fn accept(&mut self, event: Inbound) -> Result<Frame, ChannelError> {
        match event {
            Inbound::Frame(frame) => Ok(frame),
            Inbound::Failed(reason) => Err(self.fail(ChannelError::Broken(reason))),
            Inbound::Eof => Err(self.fail(ChannelError::Closed)),
        }
    }

    fn fail(&mut self, err: ChannelError) -> ChannelError {
        self.outbound = None;
        self.failure = Some(err.clone());
        err
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

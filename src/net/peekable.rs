//! Peekable stream wrapper
//!
//! Lets the listener look at the first bytes of a connection without taking
//! them away from whichever handler ends up reading it.

use bytes::{Buf, BytesMut};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

/// A stream whose leading bytes can be inspected before they are read
#[derive(Debug)]
pub struct PeekableStream<S> {
    inner: S,
    peeked: BytesMut,
}

impl<S> PeekableStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            peeked: BytesMut::new(),
        }
    }

    /// Bytes read from the inner stream but not yet handed to a reader
    pub fn peeked(&self) -> &[u8] {
        &self.peeked
    }
}

impl<S: AsyncRead + Unpin> PeekableStream<S> {
    /// Return the first `n` bytes of the stream without consuming them
    ///
    /// Waits until `n` bytes have arrived. Fails with `UnexpectedEof` if the
    /// stream ends first; whatever did arrive stays buffered.
    pub async fn peek_exact(&mut self, n: usize) -> io::Result<&[u8]> {
        while self.peeked.len() < n {
            self.peeked.reserve(n - self.peeked.len());
            if self.inner.read_buf(&mut self.peeked).await? == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
        }
        Ok(&self.peeked[..n])
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PeekableStream<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.peeked.is_empty() {
            let n = buf.remaining().min(this.peeked.len());
            buf.put_slice(&this.peeked[..n]);
            this.peeked.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PeekableStream<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

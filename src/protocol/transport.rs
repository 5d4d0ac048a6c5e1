//! Framed transport with mid-stream TLS wrapping.
//!
//! The authentication exchange runs under TLS on the same TCP connection,
//! so the transport must be able to take an active framed stream, wrap the
//! raw socket in TLS without losing already-buffered bytes, and later peel
//! the TLS layer off again.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::rustls::ServerName;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tokio_util::codec::{Framed, FramedParts};
use tracing::debug;

use crate::common::error::{ProtocolError, ProtocolResult};
use crate::protocol::packets::codec::MessageCodec;
use crate::protocol::packets::messages::Message;

/// Marker for byte streams the transport can carry.
///
/// `Sync` is required so connection tasks holding the boxed stream across
/// await points stay spawnable.
pub trait StreamIo: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Sync + Unpin> StreamIo for T {}

/// Replays bytes that were already read off the socket before a TLS
/// handshake starts, then delegates to the inner stream.
pub struct Rewind<S> {
    prefix: BytesMut,
    inner: S,
}

impl<S> Rewind<S> {
    pub fn new(prefix: BytesMut, inner: S) -> Self {
        Rewind { prefix, inner }
    }

    pub fn into_inner(self) -> (BytesMut, S) {
        (self.prefix, self.inner)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.prefix.is_empty() {
            let take = self.prefix.len().min(buf.remaining());
            let replay = self.prefix.split_to(take);
            buf.put_slice(&replay);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

type PlainFramed = Framed<Box<dyn StreamIo>, MessageCodec>;
type TlsServerFramed = Framed<tokio_rustls::server::TlsStream<Rewind<Box<dyn StreamIo>>>, MessageCodec>;
type TlsClientFramed = Framed<tokio_rustls::client::TlsStream<Rewind<Box<dyn StreamIo>>>, MessageCodec>;

/// A framed packet connection, plain or TLS-wrapped.
///
/// `Detached` is a transient placeholder used while the stream is being
/// handed to or taken back from the TLS layer; seeing it outside a wrap or
/// unwrap call means the previous transition failed.
pub enum Conn {
    Plain(PlainFramed),
    TlsServer(TlsServerFramed),
    TlsClient(TlsClientFramed),
    Detached,
}

impl Conn {
    /// Wraps a raw byte stream in the packet codec.
    pub fn plain<S: StreamIo + 'static>(stream: S, codec: MessageCodec) -> Self {
        Conn::Plain(Framed::new(Box::new(stream), codec))
    }

    /// True while the TLS layer is active in either role.
    pub fn is_tls(&self) -> bool {
        matches!(self, Conn::TlsServer(_) | Conn::TlsClient(_))
    }

    /// Receives the next packet, or `None` on a clean peer close.
    pub async fn next(&mut self) -> Option<ProtocolResult<Message>> {
        let item = match self {
            Conn::Plain(framed) => framed.next().await,
            Conn::TlsServer(framed) => framed.next().await,
            Conn::TlsClient(framed) => framed.next().await,
            Conn::Detached => return Some(Err(ProtocolError::TransportDetached)),
        };
        item.map(|result| result.map_err(ProtocolError::from))
    }

    /// Sends one packet and flushes it.
    pub async fn send(&mut self, message: Message) -> ProtocolResult<()> {
        match self {
            Conn::Plain(framed) => framed.send(message).await?,
            Conn::TlsServer(framed) => framed.send(message).await?,
            Conn::TlsClient(framed) => framed.send(message).await?,
            Conn::Detached => return Err(ProtocolError::TransportDetached),
        }
        Ok(())
    }

    /// Performs a server-side TLS handshake over the current plain stream.
    ///
    /// Bytes already sitting in the framed read buffer are replayed into
    /// the handshake, so a client that pipelined its ClientHello behind the
    /// previous packet is handled correctly.
    pub async fn wrap_server(&mut self, acceptor: &TlsAcceptor) -> ProtocolResult<()> {
        let framed = match std::mem::replace(self, Conn::Detached) {
            Conn::Plain(framed) => framed,
            other => {
                *self = other;
                return Err(ProtocolError::tls("tls wrap requires a plain stream"));
            }
        };
        let parts = framed.into_parts();
        let codec = parts.codec;
        let rewound = Rewind::new(parts.read_buf, parts.io);
        let tls = acceptor
            .accept(rewound)
            .await
            .map_err(|e| ProtocolError::tls(e.to_string()))?;
        debug!("server tls session established");
        *self = Conn::TlsServer(Framed::new(tls, codec));
        Ok(())
    }

    /// Performs a client-side TLS handshake over the current plain stream.
    pub async fn wrap_client(
        &mut self,
        connector: &TlsConnector,
        server_name: ServerName,
    ) -> ProtocolResult<()> {
        let framed = match std::mem::replace(self, Conn::Detached) {
            Conn::Plain(framed) => framed,
            other => {
                *self = other;
                return Err(ProtocolError::tls("tls wrap requires a plain stream"));
            }
        };
        let parts = framed.into_parts();
        let codec = parts.codec;
        let rewound = Rewind::new(parts.read_buf, parts.io);
        let tls = connector
            .connect(server_name, rewound)
            .await
            .map_err(|e| ProtocolError::tls(e.to_string()))?;
        debug!("client tls session established");
        *self = Conn::TlsClient(Framed::new(tls, codec));
        Ok(())
    }

    /// Peels the TLS layer off and resumes plain framing.
    ///
    /// The protocol guarantees the final TLS-protected packet is the last
    /// thing the peer sends before its own unwrap, so any bytes still
    /// buffered here are carried forward into the plain framed stream.
    pub fn unwrap_tls(&mut self) -> ProtocolResult<()> {
        match std::mem::replace(self, Conn::Detached) {
            Conn::TlsServer(framed) => {
                let parts = framed.into_parts();
                *self = Conn::Plain(rebuild_plain(parts));
                Ok(())
            }
            Conn::TlsClient(framed) => {
                let parts = framed.into_parts();
                *self = Conn::Plain(rebuild_plain(parts));
                Ok(())
            }
            other => {
                *self = other;
                Err(ProtocolError::tls("tls unwrap requires an active tls stream"))
            }
        }
    }
}

fn rebuild_plain<T>(parts: FramedParts<T, MessageCodec>) -> PlainFramed
where
    T: IntoRewound,
{
    let (prefix, io) = parts.io.into_rewound().into_inner();
    let mut rebuilt = FramedParts::new::<Message>(io, parts.codec);
    // Decrypted-but-unparsed bytes come first, then anything the inner
    // stream had already buffered before the prefix was drained.
    let mut read_buf = parts.read_buf;
    read_buf.extend_from_slice(&prefix);
    rebuilt.read_buf = read_buf;
    rebuilt.write_buf = parts.write_buf;
    Framed::from_parts(rebuilt)
}

/// Extracts the [`Rewind`] stream from either TLS stream direction.
trait IntoRewound {
    fn into_rewound(self) -> Rewind<Box<dyn StreamIo>>;
}

impl IntoRewound for tokio_rustls::server::TlsStream<Rewind<Box<dyn StreamIo>>> {
    fn into_rewound(self) -> Rewind<Box<dyn StreamIo>> {
        self.into_inner().0
    }
}

impl IntoRewound for tokio_rustls::client::TlsStream<Rewind<Box<dyn StreamIo>>> {
    fn into_rewound(self) -> Rewind<Box<dyn StreamIo>> {
        self.into_inner().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn plain_conn_round_trips_packets() {
        let (a, b) = tokio::io::duplex(4096);
        let mut left = Conn::plain(a, MessageCodec::new());
        let mut right = Conn::plain(b, MessageCodec::new());

        left.send(Message::KeepAlive).await.unwrap();
        left.send(Message::StartLogin {
            username: "ambrosia".into(),
        })
        .await
        .unwrap();

        assert_eq!(right.next().await.unwrap().unwrap(), Message::KeepAlive);
        assert_eq!(
            right.next().await.unwrap().unwrap(),
            Message::StartLogin {
                username: "ambrosia".into()
            }
        );
    }

    #[tokio::test]
    async fn rewind_replays_prefix_before_inner_stream() {
        let (a, mut b) = tokio::io::duplex(64);
        let mut rewound = Rewind::new(BytesMut::from(&b"head"[..]), a);
        tokio::spawn(async move {
            b.write_all(b"tail").await.unwrap();
        });
        let mut out = [0u8; 8];
        rewound.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"headtail");
    }

    #[tokio::test]
    async fn conn_next_returns_none_on_peer_close() {
        let (a, b) = tokio::io::duplex(64);
        let mut left = Conn::plain(a, MessageCodec::new());
        drop(b);
        assert!(left.next().await.is_none());
    }
}

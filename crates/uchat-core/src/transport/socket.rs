//! TCP endpoint abstraction
//!
//! A [`TransportSocket`] is either a listening socket or a socket connected to
//! one peer. Failures surface as [`NetworkError`] values or `None`, never as
//! panics, so one misbehaving peer cannot take the event loop down.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::errors::NetworkError;
use crate::protocol::{read_frame, FrameError, Message};

// ----------------------------------------------------------------------------
// Socket Handle
// ----------------------------------------------------------------------------

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a socket, stable for its whole lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketHandle(u64);

impl SocketHandle {
    fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket#{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Transport Socket
// ----------------------------------------------------------------------------

enum Endpoint {
    Listening(TcpListener),
    Connected {
        /// Taken by the multiplexer once the socket is registered
        reader: Option<OwnedReadHalf>,
        writer: OwnedWriteHalf,
    },
    Closed,
}

/// A single TCP endpoint in either the listening or the communicating role
pub struct TransportSocket {
    handle: SocketHandle,
    endpoint: Endpoint,
    io_timeout: Duration,
}

impl TransportSocket {
    /// Bind to every local interface on `port` and start listening.
    ///
    /// Port 0 asks the OS for an ephemeral port; see [`Self::local_address`].
    pub async fn listen(port: u16, io_timeout: Duration) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|source| NetworkError::Bind { port, source })?;

        if let Ok(addr) = listener.local_addr() {
            info!("Listening for peers on {}", addr);
        }

        Ok(Self {
            handle: SocketHandle::next(),
            endpoint: Endpoint::Listening(listener),
            io_timeout,
        })
    }

    /// Connect to a remote peer, giving up after `connect_timeout`
    pub async fn connect(
        address: SocketAddr,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Result<Self, NetworkError> {
        let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(address)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(NetworkError::Connect { address, source }),
            Err(_) => {
                return Err(NetworkError::TimedOut {
                    operation: "connecting",
                    duration: connect_timeout,
                })
            }
        };

        debug!("Connected to {}", address);
        Ok(Self::from_stream(stream, io_timeout))
    }

    fn from_stream(stream: TcpStream, io_timeout: Duration) -> Self {
        if let Err(err) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", err);
        }
        let (reader, writer) = stream.into_split();
        Self {
            handle: SocketHandle::next(),
            endpoint: Endpoint::Connected {
                reader: Some(reader),
                writer,
            },
            io_timeout,
        }
    }

    /// Accept one pending inbound connection.
    ///
    /// Returns `None` when the accept failed transiently; the listener stays
    /// usable. A socket that is not listening never becomes ready.
    pub async fn accept_connection(&self) -> Option<TransportSocket> {
        let Endpoint::Listening(listener) = &self.endpoint else {
            return std::future::pending().await;
        };

        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("Accepting new connection from {}", addr);
                Some(Self::from_stream(stream, self.io_timeout))
            }
            Err(err) => {
                warn!("{}", NetworkError::Accept(err));
                None
            }
        }
    }

    /// Write the whole buffer or fail
    pub async fn send_bytes(&mut self, buffer: &[u8]) -> Result<(), NetworkError> {
        let address = self
            .remote_address()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown peer".to_string());

        let Endpoint::Connected { writer, .. } = &mut self.endpoint else {
            return Err(NetworkError::InvalidSocketState {
                operation: "sending",
                reason: "socket is not connected",
            });
        };

        let write = async {
            writer.write_all(buffer).await?;
            writer.flush().await
        };

        match tokio::time::timeout(self.io_timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(NetworkError::Send { address, source }),
            Err(_) => Err(NetworkError::TimedOut {
                operation: "sending",
                duration: self.io_timeout,
            }),
        }
    }

    /// Read one complete frame and decode it.
    ///
    /// Returns `None` after logging on any read or decode failure. Only usable
    /// while the socket still owns its read half.
    pub async fn receive_message(&mut self) -> Option<Message> {
        let Endpoint::Connected {
            reader: Some(reader),
            ..
        } = &mut self.endpoint
        else {
            warn!("{} cannot receive: no readable stream", self.handle);
            return None;
        };

        match read_frame(reader, self.io_timeout).await {
            Ok(message) => Some(message),
            Err(FrameError::Malformed(err)) => {
                warn!("Discarding malformed frame on {}: {}", self.handle, err);
                None
            }
            Err(FrameError::Broken(err)) => {
                info!("Receive failed on {}: {}", self.handle, err);
                None
            }
        }
    }

    /// Hand the read half over to the multiplexer
    pub(crate) fn take_reader(&mut self) -> Option<OwnedReadHalf> {
        match &mut self.endpoint {
            Endpoint::Connected { reader, .. } => reader.take(),
            _ => None,
        }
    }

    /// Local endpoint, if the OS can report one
    pub fn local_address(&self) -> Option<SocketAddr> {
        match &self.endpoint {
            Endpoint::Listening(listener) => listener.local_addr().ok(),
            Endpoint::Connected { writer, .. } => writer.local_addr().ok(),
            Endpoint::Closed => None,
        }
    }

    /// Remote endpoint, if connected
    pub fn remote_address(&self) -> Option<SocketAddr> {
        match &self.endpoint {
            Endpoint::Connected { writer, .. } => writer.peer_addr().ok(),
            _ => None,
        }
    }

    pub fn handle(&self) -> SocketHandle {
        self.handle
    }

    pub(crate) fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    /// Shut the connection down and close it.
    ///
    /// Shutdown errors are logged and the socket is closed regardless.
    /// Calling this on a closed socket does nothing.
    pub async fn free(&mut self) {
        match std::mem::replace(&mut self.endpoint, Endpoint::Closed) {
            Endpoint::Connected { mut writer, reader } => {
                if let Some(reader) = reader.as_ref() {
                    discard_pending(reader);
                }
                if let Err(err) = writer.shutdown().await {
                    debug!("Shutdown of {} failed: {}", self.handle, err);
                }
                drop(reader);
                drop(writer);
                debug!("Freed {}", self.handle);
            }
            Endpoint::Listening(listener) => {
                drop(listener);
                info!("Stopped listening on {}", self.handle);
            }
            Endpoint::Closed => {}
        }
    }
}

/// Drop unread input so closing sends FIN rather than RST
fn discard_pending(reader: &OwnedReadHalf) {
    let mut scratch = [0u8; 1024];
    while let Ok(read) = reader.try_read(&mut scratch) {
        if read == 0 {
            break;
        }
    }
}

impl fmt::Debug for TransportSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match &self.endpoint {
            Endpoint::Listening(_) => "listening",
            Endpoint::Connected { .. } => "connected",
            Endpoint::Closed => "closed",
        };
        f.debug_struct("TransportSocket")
            .field("handle", &self.handle)
            .field("role", &role)
            .field("local", &self.local_address())
            .field("remote", &self.remote_address())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode, ChatMessage};

    const TIMEOUT: Duration = Duration::from_secs(2);

    async fn connected_pair() -> (TransportSocket, TransportSocket, TransportSocket) {
        let listener = TransportSocket::listen(0, TIMEOUT).await.unwrap();
        let port = listener.local_address().unwrap().port();
        let target: SocketAddr = ([127, 0, 0, 1], port).into();

        let (client, server) = tokio::join!(
            TransportSocket::connect(target, TIMEOUT, TIMEOUT),
            listener.accept_connection()
        );
        (listener, client.unwrap(), server.unwrap())
    }

    #[tokio::test]
    async fn test_send_and_receive_message() {
        let (_listener, mut client, mut server) = connected_pair().await;

        let message = Message::Chat(ChatMessage::new("hello", 42.0));
        client.send_bytes(&encode(&message).unwrap()).await.unwrap();

        assert_eq!(server.receive_message().await, Some(message));
        assert_eq!(server.remote_address(), client.local_address());
    }

    #[tokio::test]
    async fn test_handles_are_unique() {
        let (listener, client, server) = connected_pair().await;
        assert_ne!(listener.handle(), client.handle());
        assert_ne!(client.handle(), server.handle());
        assert_eq!(listener.remote_address(), None);
    }

    #[tokio::test]
    async fn test_receive_after_peer_closes() {
        let (_listener, mut client, mut server) = connected_pair().await;

        client.free().await;
        assert_eq!(server.receive_message().await, None);
    }

    #[tokio::test]
    async fn test_free_is_idempotent() {
        let (mut listener, mut client, _server) = connected_pair().await;

        client.free().await;
        client.free().await;
        assert_eq!(client.remote_address(), None);
        assert_eq!(client.local_address(), None);
        assert!(client.send_bytes(b"x").await.is_err());

        listener.free().await;
        let accepted =
            tokio::time::timeout(Duration::from_millis(50), listener.accept_connection()).await;
        assert!(accepted.is_err(), "closed listener must never become ready");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TransportSocket::listen(0, TIMEOUT).await.unwrap();
        let port = listener.local_address().unwrap().port();
        drop(listener);

        let target: SocketAddr = ([127, 0, 0, 1], port).into();
        let err = TransportSocket::connect(target, TIMEOUT, TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let listener = TransportSocket::listen(0, TIMEOUT).await.unwrap();
        let port = listener.local_address().unwrap().port();

        let err = TransportSocket::listen(port, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, NetworkError::Bind { .. }));
    }
}

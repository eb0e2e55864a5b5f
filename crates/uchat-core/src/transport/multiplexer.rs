//! Readiness multiplexer
//!
//! Polls the listening socket and every registered peer socket from a single
//! task. Each registered socket contributes a stream of decoded frames; the
//! streams are merged with [`SelectAll`] so a slow peer only delays itself.
//!
//! A failed accept pauses the listener for [`ACCEPT_BACKOFF`]. Errors such as
//! running out of file descriptors persist while the connection stays queued,
//! and retrying at once would spin.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use futures::future::{AbortHandle, Abortable};
use futures::stream::{self, BoxStream, SelectAll};
use futures::StreamExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::protocol::{read_frame, FrameError, Message};
use crate::transport::socket::{SocketHandle, TransportSocket};

type FrameStream = Abortable<BoxStream<'static, (SocketHandle, Result<Message, FrameError>)>>;

/// How long the listener rests after a failed accept
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// ----------------------------------------------------------------------------
// Readiness Events
// ----------------------------------------------------------------------------

/// Something the event loop must react to
#[derive(Debug)]
pub enum Readiness {
    /// The listening socket was ready; `None` if the accept failed
    Listener(Option<TransportSocket>),
    /// A registered socket produced a frame or failed
    Socket {
        handle: SocketHandle,
        peer: SocketAddr,
        outcome: Result<Message, FrameError>,
    },
}

// ----------------------------------------------------------------------------
// Multiplexer
// ----------------------------------------------------------------------------

struct Registration {
    peer: SocketAddr,
    abort: AbortHandle,
}

/// Owns the listening socket and polls it together with all peer sockets
pub struct Multiplexer {
    listener: TransportSocket,
    streams: SelectAll<FrameStream>,
    registrations: HashMap<SocketHandle, Registration>,
    accept_paused_until: Option<Instant>,
}

impl Multiplexer {
    pub fn new(listener: TransportSocket) -> Self {
        Self {
            listener,
            streams: SelectAll::new(),
            registrations: HashMap::new(),
            accept_paused_until: None,
        }
    }

    /// Start polling `socket` on behalf of `peer`.
    ///
    /// Returns false if the socket has no readable stream left, for example
    /// because it is already registered.
    pub fn register(&mut self, socket: &mut TransportSocket, peer: SocketAddr) -> bool {
        let handle = socket.handle();
        let Some(reader) = socket.take_reader() else {
            warn!("Cannot register {} for {}: no readable stream", handle, peer);
            return false;
        };

        let (abort, registration) = AbortHandle::new_pair();
        let stream = frame_stream(handle, reader, socket.io_timeout());
        self.streams.push(Abortable::new(stream, registration));
        self.registrations.insert(handle, Registration { peer, abort });
        debug!("Registered {} for peer {}", handle, peer);
        true
    }

    /// Stop polling `handle`. Returns the peer it was registered for.
    pub fn unregister(&mut self, handle: SocketHandle) -> Option<SocketAddr> {
        let registration = self.registrations.remove(&handle)?;
        registration.abort.abort();
        debug!("Unregistered {} for peer {}", handle, registration.peer);
        Some(registration.peer)
    }

    /// Peer a socket was registered for
    pub fn owner(&self, handle: SocketHandle) -> Option<SocketAddr> {
        self.registrations.get(&handle).map(|r| r.peer)
    }

    pub fn is_registered(&self, handle: SocketHandle) -> bool {
        self.registrations.contains_key(&handle)
    }

    /// Wait until the listener or a registered socket is ready.
    ///
    /// A socket whose stream ends with a terminal error is unregistered before
    /// its final event is returned.
    pub async fn next_readiness(&mut self) -> Readiness {
        loop {
            tokio::select! {
                accepted = accept_after(&self.listener, self.accept_paused_until) => {
                    match accepted {
                        Some(_) => self.accept_paused_until = None,
                        None => self.back_off_accepting(),
                    }
                    return Readiness::Listener(accepted);
                }
                Some((handle, outcome)) = self.streams.next(), if !self.streams.is_empty() => {
                    let Some(peer) = self.owner(handle) else {
                        debug!("Dropping event from unregistered {}", handle);
                        continue;
                    };
                    if matches!(&outcome, Err(err) if err.is_terminal()) {
                        self.registrations.remove(&handle);
                    }
                    return Readiness::Socket { handle, peer, outcome };
                }
            }
        }
    }

    fn back_off_accepting(&mut self) {
        debug!("Pausing accepts for {:?}", ACCEPT_BACKOFF);
        self.accept_paused_until = Some(Instant::now() + ACCEPT_BACKOFF);
    }

    /// Stop polling every socket and close the listener
    pub async fn shutdown(&mut self) {
        for (_, registration) in self.registrations.drain() {
            registration.abort.abort();
        }
        self.streams = SelectAll::new();
        self.listener.free().await;
    }
}

async fn accept_after(
    listener: &TransportSocket,
    paused_until: Option<Instant>,
) -> Option<TransportSocket> {
    if let Some(deadline) = paused_until {
        tokio::time::sleep_until(deadline).await;
    }
    listener.accept_connection().await
}

/// Stream of frames read from one socket, ending after a terminal error
fn frame_stream(
    handle: SocketHandle,
    reader: OwnedReadHalf,
    body_timeout: Duration,
) -> BoxStream<'static, (SocketHandle, Result<Message, FrameError>)> {
    stream::unfold(Some(reader), move |reader| async move {
        let mut reader = reader?;
        let outcome = read_frame(&mut reader, body_timeout).await;
        let next = match &outcome {
            Err(err) if err.is_terminal() => None,
            _ => Some(reader),
        };
        Some(((handle, outcome), next))
    })
    .boxed()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode;

    const TIMEOUT: Duration = Duration::from_secs(2);

    async fn setup() -> (Multiplexer, SocketAddr) {
        let listener = TransportSocket::listen(0, TIMEOUT).await.unwrap();
        let port = listener.local_address().unwrap().port();
        (Multiplexer::new(listener), ([127, 0, 0, 1], port).into())
    }

    async fn accept(mux: &mut Multiplexer) -> TransportSocket {
        match tokio::time::timeout(TIMEOUT, mux.next_readiness()).await.unwrap() {
            Readiness::Listener(Some(socket)) => socket,
            other => panic!("expected an accepted socket, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_listener_readiness() {
        let (mut mux, addr) = setup().await;
        let client = TransportSocket::connect(addr, TIMEOUT, TIMEOUT).await.unwrap();

        let accepted = accept(&mut mux).await;
        assert_eq!(accepted.remote_address(), client.local_address());
        assert!(mux.accept_paused_until.is_none());
    }

    #[tokio::test]
    async fn test_failed_accept_pauses_listener() {
        let (mut mux, addr) = setup().await;
        mux.back_off_accepting();
        let _client = TransportSocket::connect(addr, TIMEOUT, TIMEOUT).await.unwrap();

        let early = tokio::time::timeout(ACCEPT_BACKOFF / 4, mux.next_readiness()).await;
        assert!(early.is_err(), "listener must rest after a failed accept");

        accept(&mut mux).await;
        assert!(mux.accept_paused_until.is_none());
    }

    #[tokio::test]
    async fn test_registered_socket_yields_frames() {
        let (mut mux, addr) = setup().await;
        let mut client = TransportSocket::connect(addr, TIMEOUT, TIMEOUT).await.unwrap();
        let mut server = accept(&mut mux).await;

        let peer = server.remote_address().unwrap();
        assert!(mux.register(&mut server, peer));
        assert!(!mux.register(&mut server, peer), "second registration has no reader");
        assert_eq!(mux.owner(server.handle()), Some(peer));

        client
            .send_bytes(&encode(&Message::Farewell).unwrap())
            .await
            .unwrap();

        match tokio::time::timeout(TIMEOUT, mux.next_readiness()).await.unwrap() {
            Readiness::Socket {
                handle,
                peer: owner,
                outcome,
            } => {
                assert_eq!(handle, server.handle());
                assert_eq!(owner, peer);
                assert_eq!(outcome.unwrap(), Message::Farewell);
            }
            other => panic!("unexpected readiness {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_hangup_unregisters_socket() {
        let (mut mux, addr) = setup().await;
        let mut client = TransportSocket::connect(addr, TIMEOUT, TIMEOUT).await.unwrap();
        let mut server = accept(&mut mux).await;

        let peer = server.remote_address().unwrap();
        mux.register(&mut server, peer);
        client.free().await;

        match tokio::time::timeout(TIMEOUT, mux.next_readiness()).await.unwrap() {
            Readiness::Socket { outcome, .. } => {
                assert!(outcome.unwrap_err().is_terminal());
            }
            other => panic!("unexpected readiness {:?}", other),
        }
        assert!(!mux.is_registered(server.handle()));
        assert_eq!(mux.owner(server.handle()), None);
    }

    #[tokio::test]
    async fn test_unregistered_socket_is_silent() {
        let (mut mux, addr) = setup().await;
        let mut client = TransportSocket::connect(addr, TIMEOUT, TIMEOUT).await.unwrap();
        let mut server = accept(&mut mux).await;

        let peer = server.remote_address().unwrap();
        mux.register(&mut server, peer);
        assert_eq!(mux.unregister(server.handle()), Some(peer));
        assert_eq!(mux.unregister(server.handle()), None);

        client
            .send_bytes(&encode(&Message::Farewell).unwrap())
            .await
            .unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(100), mux.next_readiness()).await;
        assert!(waited.is_err(), "no event expected from an unregistered socket");
    }
}

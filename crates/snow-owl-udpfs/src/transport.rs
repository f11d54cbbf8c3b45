//! Transport Adapter
//!
//! Best-effort datagram send/receive keyed by peer address. No retries, no
//! acknowledgments: a lost reply is simply never seen by the client.

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    max_datagram_size: usize,
}

impl UdpTransport {
    /// Bind a UDP socket with the requested kernel receive buffer
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(addr: SocketAddr, recv_buffer_size: usize, max_datagram_size: usize) -> Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;

        // The kernel may clamp this; a smaller buffer only means more drops under load
        if let Err(e) = socket.set_recv_buffer_size(recv_buffer_size) {
            warn!(requested = recv_buffer_size, error = %e, "Failed to set SO_RCVBUF");
        }
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;

        let socket = UdpSocket::from_std(socket.into())?;
        Ok(Self {
            socket: Arc::new(socket),
            max_datagram_size,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn max_datagram_size(&self) -> usize {
        self.max_datagram_size
    }

    /// Buffer large enough to notice datagrams above the configured maximum
    pub fn receive_buffer(&self) -> Vec<u8> {
        vec![0u8; self.max_datagram_size + 1]
    }

    /// Wait for the next datagram
    ///
    /// Oversized datagrams are dropped and `Ok(None)` is returned.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<Option<(Bytes, SocketAddr)>> {
        let (size, peer) = self.socket.recv_from(buf).await?;
        if size > self.max_datagram_size {
            debug!(client = %peer, size, "Dropping oversized datagram");
            return Ok(None);
        }
        Ok(Some((Bytes::copy_from_slice(&buf[..size]), peer)))
    }

    /// Fire-and-forget send
    pub async fn send(&self, peer: SocketAddr, payload: &[u8]) -> Result<usize> {
        if payload.len() > self.max_datagram_size {
            return Err(Error::Transport(format!(
                "payload of {} bytes exceeds datagram limit {}",
                payload.len(),
                self.max_datagram_size
            )));
        }

        let sent = self.socket.send_to(payload, peer).await?;
        if sent != payload.len() {
            return Err(Error::Transport(format!(
                "short send to {}: {} of {} bytes",
                peer,
                sent,
                payload.len()
            )));
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sends_and_receives_on_loopback() {
        let server = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), 65_536, 1024).unwrap();
        let client = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), 65_536, 1024).unwrap();
        let server_addr = server.local_addr().unwrap();

        client.send(server_addr, b"ping").await.unwrap();

        let mut buf = server.receive_buffer();
        let (payload, peer) = server.recv(&mut buf).await.unwrap().unwrap();
        assert_eq!(&payload[..], b"ping");
        assert_eq!(peer, client.local_addr().unwrap());
    }

    #[tokio::test]
    async fn refuses_to_send_oversized_payloads() {
        let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), 65_536, 16).unwrap();
        let target = transport.local_addr().unwrap();
        let err = transport.send(target, &[b'x'; 17]).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn drops_oversized_datagrams() {
        let server = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), 65_536, 8).unwrap();
        let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(&[b'x'; 32], server.local_addr().unwrap()).unwrap();

        let mut buf = server.receive_buffer();
        assert!(server.recv(&mut buf).await.unwrap().is_none());
    }
}

//! UDP file service client
//!
//! One request, one reply. There is no retransmission: if either datagram is
//! lost the call fails with [`Error::Timeout`] and the caller decides whether
//! to resend.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::config::MAX_UDP_PAYLOAD;
use crate::error::{Error, Result};
use crate::protocol::{self, ERROR_PREFIX, LOGIN_PREFIX, READY_FOR_UPLOAD, UPLOAD_PREFIX};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Client {
    socket: UdpSocket,
    server: SocketAddr,
    timeout: Duration,
}

impl Client {
    /// Bind an ephemeral local port for talking to `server`
    ///
    /// The server keys sessions by address, so a login only lasts as long as
    /// this client (and its port) does.
    pub async fn connect(server: SocketAddr, timeout: Duration) -> Result<Self> {
        let local: SocketAddr = if server.is_ipv4() {
            "0.0.0.0:0".parse().map_err(|_| Error::Config("bad local addr".into()))?
        } else {
            "[::]:0".parse().map_err(|_| Error::Config("bad local addr".into()))?
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;
        Ok(Self {
            socket,
            server,
            timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    /// Send one frame and wait for one reply
    ///
    /// Replies that arrived after an earlier timeout are discarded first. A
    /// reply still in flight at that point can be mistaken for this one; the
    /// protocol carries no request id to tell them apart.
    pub async fn request(&self, message: &str) -> Result<String> {
        let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
        self.discard_late_replies(&mut buf);

        self.socket.send(message.as_bytes()).await?;

        let size = tokio::time::timeout(self.timeout, self.socket.recv(&mut buf))
            .await
            .map_err(|_| Error::Timeout(format!("no reply from {} to {:?}", self.server, summary(message))))??;

        let reply = String::from_utf8(buf[..size].to_vec())
            .map_err(|_| Error::Protocol("reply is not valid UTF-8".to_string()))?;
        debug!(request = %summary(message), reply_len = reply.len(), "Reply received");
        Ok(reply)
    }

    fn discard_late_replies(&self, buf: &mut [u8]) {
        while let Ok(size) = self.socket.try_recv(buf) {
            debug!(size, server = %self.server, "Discarding late reply");
        }
    }

    pub async fn ping(&self) -> Result<String> {
        self.request("ping").await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<String> {
        self.request(&format!("{LOGIN_PREFIX}:{username}:{password}")).await
    }

    pub async fn stats(&self) -> Result<String> {
        self.request("STATS").await
    }

    pub async fn list(&self, dir: Option<&str>) -> Result<String> {
        match dir {
            Some(dir) => self.request(&format!("/list {dir}")).await,
            None => self.request("/list").await,
        }
    }

    pub async fn read(&self, name: &str) -> Result<String> {
        self.request(&format!("/read {name}")).await
    }

    pub async fn delete(&self, name: &str) -> Result<String> {
        self.request(&format!("/delete {name}")).await
    }

    pub async fn search(&self, keyword: &str) -> Result<String> {
        self.request(&format!("/search {keyword}")).await
    }

    pub async fn info(&self, name: &str) -> Result<String> {
        self.request(&format!("/info {name}")).await
    }

    /// Two-phase upload of in-memory text under `name`
    ///
    /// Names containing ':' are refused before anything is sent.
    pub async fn upload(&self, name: &str, content: &str) -> Result<String> {
        if name.contains(':') {
            return Err(Error::Protocol(format!(
                "cannot upload {name:?}: filename may not contain ':'"
            )));
        }
        let ready = self.request(&format!("/upload {name}")).await?;
        if ready != READY_FOR_UPLOAD {
            return Ok(ready);
        }
        self.request(&format!("{UPLOAD_PREFIX}{name}:{content}")).await
    }

    /// Upload a local file under its leaf name
    ///
    /// Only UTF-8 text can travel in a frame; anything else is refused here
    /// rather than corrupted on the way.
    pub async fn upload_file(&self, path: &Path) -> Result<String> {
        let name = extract_filename(&path.to_string_lossy())
            .ok_or_else(|| Error::Protocol(format!("no file name in {}", path.display())))?;
        let bytes = tokio::fs::read(path).await?;
        let content = String::from_utf8(bytes).map_err(|_| {
            Error::Protocol(format!("{} is not UTF-8 text; binary upload is unsupported", path.display()))
        })?;
        self.upload(&name, &content).await
    }

    /// Fetch `name` and return `(name, content)`
    pub async fn download(&self, name: &str) -> Result<(String, String)> {
        let reply = self.request(&format!("/download {name}")).await?;
        if let Some(reason) = reply.strip_prefix(ERROR_PREFIX) {
            return Err(Error::Protocol(reason.to_string()));
        }
        let (name, content) = protocol::parse_download(&reply)
            .ok_or_else(|| Error::Protocol(format!("unexpected download reply: {}", summary(&reply))))?;
        Ok((name.to_string(), content.to_string()))
    }

    /// Fetch `name` and write it into `dir`, returning the written path
    pub async fn download_to(&self, name: &str, dir: &Path) -> Result<PathBuf> {
        let (name, content) = self.download(name).await?;
        let leaf = extract_filename(&name)
            .ok_or_else(|| Error::Protocol(format!("server sent unusable name {name:?}")))?;
        let path = dir.join(leaf);
        tokio::fs::write(&path, content.as_bytes()).await?;
        Ok(path)
    }
}

/// Leaf name of a path written with either `/` or `\` separators
pub fn extract_filename(path: &str) -> Option<String> {
    path.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .next_back()
        .map(str::to_string)
}

fn summary(message: &str) -> String {
    const LIMIT: usize = 48;
    match message.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &message[..idx]),
        None => message.to_string(),
    }
}

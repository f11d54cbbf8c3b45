//! Request dispatcher
//!
//! Runs one datagram through the pipeline: decode, admit, parse, authorize,
//! execute, encode. Every failure becomes a textual reply local to the peer
//! that caused it; nothing here can take down the receive loop.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::audit::AuditLogger;
use crate::auth::{self, CredentialVerifier, SharedSecretVerifier};
use crate::config::ServerConfig;
use crate::protocol::{self, Command, EMPTY_LISTING, NOTHING_FOUND, Request, Response};
use crate::sandbox::{FsResult, Sandbox, leaf_name};
use crate::session::{Admission, PendingUpload, Session, SessionTable};

#[derive(Clone)]
pub struct Dispatcher {
    sessions: SessionTable,
    sandbox: Sandbox,
    verifier: Arc<dyn CredentialVerifier>,
    audit: AuditLogger,
    max_reply_size: usize,
}

impl Dispatcher {
    pub fn new(
        sessions: SessionTable,
        sandbox: Sandbox,
        verifier: Arc<dyn CredentialVerifier>,
        audit: AuditLogger,
        max_reply_size: usize,
    ) -> Self {
        Self {
            sessions,
            sandbox,
            verifier,
            audit,
            max_reply_size,
        }
    }

    /// Build a dispatcher using the shared-secret verifier from config
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            SessionTable::new(config.max_connections),
            Sandbox::new(&config.root_dir, config.max_file_size_bytes),
            Arc::new(SharedSecretVerifier::new(config.admin_secret.clone())),
            AuditLogger::new(config.logging.audit_enabled),
            config.max_datagram_size,
        )
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn audit(&self) -> AuditLogger {
        self.audit
    }

    /// Handle one datagram from `peer` and return the encoded reply
    ///
    /// Returns `None` when the payload is dropped without a reply.
    pub async fn handle(&self, payload: &[u8], peer: SocketAddr) -> Option<Bytes> {
        let response = self.respond(payload, peer).await?;
        Some(self.encode_fitted(response))
    }

    async fn respond(&self, payload: &[u8], peer: SocketAddr) -> Option<Response> {
        let Some(message) = protocol::decode(payload) else {
            trace!(client = %peer, size = payload.len(), "Dropping non-UTF-8 datagram");
            return None;
        };

        let session = match self.sessions.admit(peer, payload.len(), Instant::now()).await {
            Admission::ServerFull { active } => {
                self.audit
                    .capacity_rejected(peer, active, self.sessions.max_connections());
                return Some(Response::error("server full"));
            }
            Admission::Admitted {
                session,
                created,
                active,
            } => {
                if created {
                    self.audit.session_created(peer, &session.username, active);
                }
                session
            }
        };

        let request = match protocol::parse(message) {
            Ok(request) => request,
            Err(e) => {
                debug!(client = %peer, error = %e, "Malformed request");
                return Some(e.into());
            }
        };

        let kind = request.kind();
        debug!(client = %peer, user = %session.username, ?kind, "Request");

        if !auth::is_allowed(session.privilege(), kind) {
            warn!(
                event = "permission_denied",
                client = %peer,
                user = %session.username,
                ?kind,
                "Permission denied"
            );
            self.audit
                .permission_denied(peer, &session.username, &format!("{kind:?}"));
            return Some(Response::error("permission denied"));
        }

        Some(self.execute(request, &session).await)
    }

    async fn execute(&self, request: Request, session: &Session) -> Response {
        let peer = session.addr;
        match request {
            Request::Heartbeat => Response::Pong,
            Request::StatsQuery => Response::Text(
                self.sessions
                    .snapshot()
                    .await
                    .render_within(self.max_reply_size),
            ),
            Request::Unrecognized => Response::Acknowledged,
            Request::AdminLogin { username, password } => {
                self.login(peer, &username, &password).await
            }
            Request::UploadContent { filename, content } => {
                match self.store_upload(peer, &filename, &content).await {
                    Ok(response) => response,
                    Err(e) => Response::error(e),
                }
            }
            Request::Command(command) => match self.run_command(peer, command).await {
                Ok(response) => response,
                Err(e) => {
                    debug!(client = %peer, error = %e, "File operation failed");
                    Response::error(e)
                }
            },
        }
    }

    async fn login(&self, peer: SocketAddr, username: &str, password: &str) -> Response {
        if !self.verifier.verify(username, password) {
            self.audit.authentication_attempt(peer, username, false);
            warn!(event = "admin_login_failed", client = %peer, user = %username, "Admin login failed");
            return Response::error("invalid admin credentials");
        }

        self.audit.authentication_attempt(peer, username, true);
        if !self.sessions.set_admin(peer, username).await {
            // Reaped between admission and promotion
            warn!(
                event = "admin_login_session_expired",
                client = %peer,
                user = %username,
                "Credentials accepted but session no longer exists"
            );
            return Response::error("session expired, retry login");
        }

        info!(event = "admin_login", client = %peer, user = %username, "Admin login succeeded");
        Response::Success(format!("admin access granted to {username}"))
    }

    async fn run_command(&self, peer: SocketAddr, command: Command) -> FsResult<Response> {
        match command {
            Command::List(dir) => {
                let names = self.sandbox.list(dir.as_deref()).await?;
                Ok(joined_or(names, EMPTY_LISTING))
            }
            Command::Read(name) => {
                let name = self.normalize(peer, &name)?;
                Ok(Response::Text(self.sandbox.read(&name).await?))
            }
            Command::Upload(name) => {
                let filename = self.normalize(peer, &name)?;
                let pending = PendingUpload {
                    filename,
                    correlation_id: AuditLogger::generate_correlation_id(),
                };
                if let Some(previous) = self.sessions.set_pending_upload(peer, Some(pending)).await {
                    debug!(
                        client = %peer,
                        abandoned = %previous.filename,
                        "Replacing unfinished upload"
                    );
                }
                Ok(Response::ReadyForUpload)
            }
            Command::Download(name) => {
                let name = self.normalize(peer, &name)?;
                let content = self.sandbox.read(&name).await?;
                Ok(Response::Download { name, content })
            }
            Command::Delete(name) => {
                let name = self.normalize(peer, &name)?;
                self.sandbox.delete(&name).await?;
                info!(event = "file_deleted", client = %peer, file = %name, "File deleted");
                self.audit.file_deleted(peer, &name);
                Ok(Response::Ok(format!("deleted {name}")))
            }
            Command::Search(keyword) => {
                let matches = self.sandbox.search(&keyword).await?;
                Ok(joined_or(matches, NOTHING_FOUND))
            }
            Command::Info(name) => {
                let name = self.normalize(peer, &name)?;
                Ok(Response::Text(self.sandbox.info(&name).await?.to_string()))
            }
        }
    }

    async fn store_upload(&self, peer: SocketAddr, filename: &str, content: &str) -> FsResult<Response> {
        let name = self.normalize(peer, filename)?;

        // Content without a prior `/upload` is accepted from admins
        let correlation_id = match self.sessions.set_pending_upload(peer, None).await {
            Some(pending) if pending.filename == name => Some(pending.correlation_id),
            Some(pending) => {
                debug!(
                    client = %peer,
                    announced = %pending.filename,
                    received = %name,
                    "Upload content does not match announced name"
                );
                None
            }
            None => None,
        };

        let outcome = self.sandbox.write(&name, content).await?;
        info!(
            event = "file_written",
            client = %peer,
            file = %name,
            bytes = outcome.bytes_written,
            created = outcome.created,
            "Upload stored"
        );
        self.audit.file_written(
            peer,
            &name,
            outcome.bytes_written,
            outcome.created,
            correlation_id.as_deref(),
        );

        Ok(Response::Ok(format!(
            "uploaded {} ({} bytes)",
            name, outcome.bytes_written
        )))
    }

    /// Reduce a client name to its leaf, auditing names that carried paths
    fn normalize(&self, peer: SocketAddr, requested: &str) -> FsResult<String> {
        let leaf = leaf_name(requested)?;
        if leaf != requested.trim() {
            warn!(
                event = "path_normalized",
                client = %peer,
                requested = %requested,
                resolved = %leaf,
                "Stripped directory components from filename"
            );
            self.audit.path_traversal_attempt(peer, requested, &leaf);
        }
        Ok(leaf)
    }

    /// Encode once, replacing replies that cannot fit a single datagram
    fn encode_fitted(&self, response: Response) -> Bytes {
        let encoded = response.encode();
        if encoded.len() > self.max_reply_size {
            warn!(size = encoded.len(), limit = self.max_reply_size, "Reply exceeds datagram limit");
            return Response::error("response too large").encode();
        }
        encoded
    }
}

fn joined_or(names: Vec<String>, sentinel: &str) -> Response {
    if names.is_empty() {
        Response::Text(sentinel.to_string())
    } else {
        Response::Text(names.join("\n"))
    }
}

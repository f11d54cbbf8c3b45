use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::{Level, event};

/// Security audit event types for SIEM integration
///
/// NIST 800-53 Controls:
/// - AU-2: Audit Events (comprehensive event catalog)
/// - AU-3: Content of Audit Records (structured event data)
/// - AU-12: Audit Generation (automatic event generation)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Server startup event
    ServerStarted {
        #[serde(flatten)]
        common: CommonFields,
        bind_addr: String,
        root_dir: String,
        max_connections: usize,
    },

    /// Server shutdown event
    ServerStopped {
        #[serde(flatten)]
        common: CommonFields,
        reason: String,
    },

    /// First datagram from a new peer
    SessionCreated {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        username: String,
        active_sessions: usize,
    },

    /// Session removed by the idle reaper
    SessionEvicted {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        username: String,
        idle_secs: u64,
        messages_received: u64,
    },

    /// New peer refused because the session table is full
    CapacityRejected {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        active_sessions: usize,
        max_connections: usize,
    },

    /// Admin login attempt
    AuthenticationAttempt {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        username: String,
        success: bool,
    },

    /// Request refused by the authorization gate
    PermissionDenied {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        username: String,
        command: String,
    },

    /// Client supplied a name carrying directory components
    PathTraversalAttempt {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        requested_path: String,
        resolved_name: String,
    },

    /// Upload content stored
    FileWritten {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        filename: String,
        bytes_written: u64,
        file_created: bool,
    },

    /// File removed
    FileDeleted {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        filename: String,
    },
}

/// Common fields present in all audit events
///
/// NIST 800-53 AU-3: Content of Audit Records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonFields {
    /// ISO 8601 timestamp
    pub timestamp: String,
    /// Hostname or system identifier
    pub hostname: String,
    /// Service name
    pub service: String,
    /// Severity level (info, warn, error)
    pub severity: String,
    /// Optional correlation ID for tracking related events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl CommonFields {
    /// Create common fields with current timestamp
    pub fn new(severity: &str) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            hostname: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()),
            service: "snow-owl-udpfs".to_string(),
            severity: severity.to_string(),
            correlation_id: None,
        }
    }

    /// Create common fields with correlation ID
    pub fn with_correlation(severity: &str, correlation_id: String) -> Self {
        let mut fields = Self::new(severity);
        fields.correlation_id = Some(correlation_id);
        fields
    }
}

impl AuditEvent {
    /// Log this audit event using structured tracing
    pub fn log(&self) {
        let json = serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"error\": \"Failed to serialize audit event: {:?}\"}}",
                self
            )
        });

        match self.common().severity.as_str() {
            "error" => event!(Level::ERROR, audit_event = %json),
            "warn" => event!(Level::WARN, audit_event = %json),
            _ => event!(Level::INFO, audit_event = %json),
        }
    }

    fn common(&self) -> &CommonFields {
        match self {
            AuditEvent::ServerStarted { common, .. }
            | AuditEvent::ServerStopped { common, .. }
            | AuditEvent::SessionCreated { common, .. }
            | AuditEvent::SessionEvicted { common, .. }
            | AuditEvent::CapacityRejected { common, .. }
            | AuditEvent::AuthenticationAttempt { common, .. }
            | AuditEvent::PermissionDenied { common, .. }
            | AuditEvent::PathTraversalAttempt { common, .. }
            | AuditEvent::FileWritten { common, .. }
            | AuditEvent::FileDeleted { common, .. } => common,
        }
    }
}

/// Audit logger
///
/// Disabled loggers drop every event, so call sites never need to check the
/// `logging.audit_enabled` flag themselves.
#[derive(Debug, Clone, Copy)]
pub struct AuditLogger {
    enabled: bool,
}

impl AuditLogger {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    fn emit(&self, event: impl FnOnce() -> AuditEvent) {
        if self.enabled {
            event().log();
        }
    }

    /// Correlation ID tying the two phases of an upload together
    pub fn generate_correlation_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn server_started(&self, bind_addr: SocketAddr, root_dir: &str, max_connections: usize) {
        self.emit(|| AuditEvent::ServerStarted {
            common: CommonFields::new("info"),
            bind_addr: bind_addr.to_string(),
            root_dir: root_dir.to_string(),
            max_connections,
        });
    }

    pub fn server_stopped(&self, reason: &str) {
        self.emit(|| AuditEvent::ServerStopped {
            common: CommonFields::new("info"),
            reason: reason.to_string(),
        });
    }

    pub fn session_created(&self, client_addr: SocketAddr, username: &str, active_sessions: usize) {
        self.emit(|| AuditEvent::SessionCreated {
            common: CommonFields::new("info"),
            client_addr: client_addr.to_string(),
            username: username.to_string(),
            active_sessions,
        });
    }

    pub fn session_evicted(
        &self,
        client_addr: SocketAddr,
        username: &str,
        idle_secs: u64,
        messages_received: u64,
    ) {
        self.emit(|| AuditEvent::SessionEvicted {
            common: CommonFields::new("info"),
            client_addr: client_addr.to_string(),
            username: username.to_string(),
            idle_secs,
            messages_received,
        });
    }

    pub fn capacity_rejected(&self, client_addr: SocketAddr, active_sessions: usize, max_connections: usize) {
        self.emit(|| AuditEvent::CapacityRejected {
            common: CommonFields::new("warn"),
            client_addr: client_addr.to_string(),
            active_sessions,
            max_connections,
        });
    }

    pub fn authentication_attempt(&self, client_addr: SocketAddr, username: &str, success: bool) {
        self.emit(|| AuditEvent::AuthenticationAttempt {
            common: CommonFields::new(if success { "info" } else { "warn" }),
            client_addr: client_addr.to_string(),
            username: username.to_string(),
            success,
        });
    }

    pub fn permission_denied(&self, client_addr: SocketAddr, username: &str, command: &str) {
        self.emit(|| AuditEvent::PermissionDenied {
            common: CommonFields::new("warn"),
            client_addr: client_addr.to_string(),
            username: username.to_string(),
            command: command.to_string(),
        });
    }

    pub fn path_traversal_attempt(&self, client_addr: SocketAddr, requested_path: &str, resolved_name: &str) {
        self.emit(|| AuditEvent::PathTraversalAttempt {
            common: CommonFields::new("error"),
            client_addr: client_addr.to_string(),
            requested_path: requested_path.to_string(),
            resolved_name: resolved_name.to_string(),
        });
    }

    pub fn file_written(
        &self,
        client_addr: SocketAddr,
        filename: &str,
        bytes_written: u64,
        file_created: bool,
        correlation_id: Option<&str>,
    ) {
        self.emit(|| AuditEvent::FileWritten {
            common: match correlation_id {
                Some(id) => CommonFields::with_correlation("info", id.to_string()),
                None => CommonFields::new("info"),
            },
            client_addr: client_addr.to_string(),
            filename: filename.to_string(),
            bytes_written,
            file_created,
        });
    }

    pub fn file_deleted(&self, client_addr: SocketAddr, filename: &str) {
        self.emit(|| AuditEvent::FileDeleted {
            common: CommonFields::new("info"),
            client_addr: client_addr.to_string(),
            filename: filename.to_string(),
        });
    }
}

//! Authentication and Authorization Module
//!
//! NIST 800-53: AC-3 (Access Enforcement), AC-6 (Least Privilege), IA-2
//! (Identification and Authentication)
//! Implementation: Two privilege levels. Plain sessions are read-only; admin
//! sessions may also upload, download and delete.

use std::fmt;

use crate::protocol::RequestKind;

/// Privilege level of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    /// Read-only access
    User,
    /// Full access
    Admin,
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Privilege::User => f.write_str("user"),
            Privilege::Admin => f.write_str("admin"),
        }
    }
}

/// Decide whether a session at `privilege` may perform `kind`
///
/// `AdminLogin` is always allowed through; the credential check itself is the
/// gate for that transition.
pub fn is_allowed(privilege: Privilege, kind: RequestKind) -> bool {
    match kind {
        RequestKind::Heartbeat
        | RequestKind::List
        | RequestKind::Read
        | RequestKind::Search
        | RequestKind::Info
        | RequestKind::StatsQuery
        | RequestKind::AdminLogin
        | RequestKind::Unrecognized => true,
        RequestKind::Upload
        | RequestKind::UploadContent
        | RequestKind::Download
        | RequestKind::Delete => privilege == Privilege::Admin,
    }
}

/// Credential check for `LOGIN_ADMIN`
///
/// The dispatcher only sees this trait, so the plaintext shared secret can be
/// swapped for salted/hashed verification without touching request handling.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, username: &str, password: &str) -> bool;
}

/// Single fixed shared secret, any username
pub struct SharedSecretVerifier {
    secret: String,
}

impl SharedSecretVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for SharedSecretVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecretVerifier")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl CredentialVerifier for SharedSecretVerifier {
    fn verify(&self, _username: &str, password: &str) -> bool {
        constant_time_eq(self.secret.as_bytes(), password.as_bytes())
    }
}

// Length still leaks; content comparison does not short-circuit.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

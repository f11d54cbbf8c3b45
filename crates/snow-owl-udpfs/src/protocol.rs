//! Text wire protocol
//!
//! One UTF-8 frame per datagram, no length prefix. Requests are classified by
//! literal prefix; replies are rendered back into the same textual format.
//!
//! | Request            | Frame                          |
//! |--------------------|--------------------------------|
//! | Heartbeat          | `ping` (any case)              |
//! | Command            | `/list [dir]`, `/read <name>`, `/upload <name>`, `/download <name>`, `/delete <name>`, `/search <kw>`, `/info <name>` |
//! | StatsQuery         | `STATS`                        |
//! | AdminLogin         | `LOGIN_ADMIN:<user>:<pass>`    |
//! | UploadContent      | `UPLOAD:<name>:<content>`      |

use bytes::Bytes;
use std::fmt;
use thiserror::Error;

pub const PONG: &str = "PONG";
pub const READY_FOR_UPLOAD: &str = "READY_FOR_UPLOAD";
pub const DOWNLOAD_PREFIX: &str = "DOWNLOAD:";
pub const UPLOAD_PREFIX: &str = "UPLOAD:";
pub const LOGIN_PREFIX: &str = "LOGIN_ADMIN";
pub const STATS_LITERAL: &str = "STATS";
pub const ERROR_PREFIX: &str = "ERROR: ";
pub const EMPTY_LISTING: &str = "(empty)";
pub const NOTHING_FOUND: &str = "nothing found";
pub const ACKNOWLEDGED: &str = "Server: message received";

/// Slash commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List(Option<String>),
    Read(String),
    Upload(String),
    Download(String),
    Delete(String),
    Search(String),
    Info(String),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::List(_) => "/list",
            Command::Read(_) => "/read",
            Command::Upload(_) => "/upload",
            Command::Download(_) => "/download",
            Command::Delete(_) => "/delete",
            Command::Search(_) => "/search",
            Command::Info(_) => "/info",
        }
    }
}

/// A decoded request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Heartbeat,
    Command(Command),
    StatsQuery,
    AdminLogin { username: String, password: String },
    UploadContent { filename: String, content: String },
    Unrecognized,
}

/// Request kinds the authorization gate reasons about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Heartbeat,
    List,
    Read,
    Upload,
    UploadContent,
    Download,
    Delete,
    Search,
    Info,
    StatsQuery,
    AdminLogin,
    Unrecognized,
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Heartbeat => RequestKind::Heartbeat,
            Request::Command(Command::List(_)) => RequestKind::List,
            Request::Command(Command::Read(_)) => RequestKind::Read,
            Request::Command(Command::Upload(_)) => RequestKind::Upload,
            Request::Command(Command::Download(_)) => RequestKind::Download,
            Request::Command(Command::Delete(_)) => RequestKind::Delete,
            Request::Command(Command::Search(_)) => RequestKind::Search,
            Request::Command(Command::Info(_)) => RequestKind::Info,
            Request::StatsQuery => RequestKind::StatsQuery,
            Request::AdminLogin { .. } => RequestKind::AdminLogin,
            Request::UploadContent { .. } => RequestKind::UploadContent,
            Request::Unrecognized => RequestKind::Unrecognized,
        }
    }
}

/// Protocol errors reported back to the peer
///
/// The `Display` text is what follows `ERROR: ` in the reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("usage: {0}")]
    MissingArgument(&'static str),

    #[error("usage: LOGIN_ADMIN:<username>:<password>")]
    MalformedLogin,

    #[error("usage: UPLOAD:<filename>:<content>")]
    MalformedUpload,

    /// The content frame splits on the first ':', so such a name cannot round-trip
    #[error("filename may not contain ':'")]
    ColonInFilename,
}

/// Decode a datagram payload as UTF-8
///
/// Returns `None` for anything that is not valid UTF-8. Such payloads are
/// treated as network noise (scanners, stray broadcasts) and dropped silently.
pub fn decode(payload: &[u8]) -> Option<&str> {
    std::str::from_utf8(payload).ok()
}

/// Classify a decoded frame into a request
pub fn parse(message: &str) -> Result<Request, ProtocolError> {
    let trimmed = message.trim();

    if trimmed.eq_ignore_ascii_case("ping") {
        return Ok(Request::Heartbeat);
    }

    if trimmed.starts_with('/') {
        return parse_command(trimmed).map(Request::Command);
    }

    if trimmed == STATS_LITERAL {
        return Ok(Request::StatsQuery);
    }

    if message.starts_with(LOGIN_PREFIX) {
        return parse_login(message);
    }

    // Content may itself contain ':', so split only twice and keep it untrimmed
    if let Some(rest) = message.strip_prefix(UPLOAD_PREFIX) {
        let (filename, content) = rest.split_once(':').ok_or(ProtocolError::MalformedUpload)?;
        if filename.trim().is_empty() {
            return Err(ProtocolError::MalformedUpload);
        }
        return Ok(Request::UploadContent {
            filename: filename.trim().to_string(),
            content: content.to_string(),
        });
    }

    Ok(Request::Unrecognized)
}

fn parse_command(line: &str) -> Result<Command, ProtocolError> {
    let (token, rest) = match line.split_once(char::is_whitespace) {
        Some((token, rest)) => (token, rest.trim()),
        None => (line, ""),
    };
    let arg = (!rest.is_empty()).then(|| rest.to_string());

    let required = |usage: &'static str| arg.clone().ok_or(ProtocolError::MissingArgument(usage));

    match token {
        "/list" => Ok(Command::List(arg.clone())),
        "/read" => required("/read <filename>").map(Command::Read),
        "/upload" => {
            let name = required("/upload <filename>")?;
            if name.contains(':') {
                return Err(ProtocolError::ColonInFilename);
            }
            Ok(Command::Upload(name))
        }
        "/download" => required("/download <filename>").map(Command::Download),
        "/delete" => required("/delete <filename>").map(Command::Delete),
        "/search" => required("/search <keyword>").map(Command::Search),
        "/info" => required("/info <filename>").map(Command::Info),
        other => Err(ProtocolError::UnknownCommand(other.to_string())),
    }
}

fn parse_login(message: &str) -> Result<Request, ProtocolError> {
    let mut parts = message.splitn(3, ':');
    let (Some(LOGIN_PREFIX), Some(username), Some(password)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return Err(ProtocolError::MalformedLogin);
    };

    let username = username.trim();
    if username.is_empty() {
        return Err(ProtocolError::MalformedLogin);
    }

    Ok(Request::AdminLogin {
        username: username.to_string(),
        password: password.trim_end_matches(['\r', '\n']).to_string(),
    })
}

/// A reply ready to be encoded onto the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Pong,
    ReadyForUpload,
    /// `SUCCESS: <message>`
    Success(String),
    /// `OK: <message>`
    Ok(String),
    /// Free text: file content, listings, metadata, stats
    Text(String),
    Download { name: String, content: String },
    /// Generic acknowledgment for unrecognized frames
    Acknowledged,
    /// `ERROR: <reason>`
    Error(String),
}

impl Response {
    pub fn error(reason: impl fmt::Display) -> Self {
        Response::Error(reason.to_string())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }

    pub fn encode(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Pong => f.write_str(PONG),
            Response::ReadyForUpload => f.write_str(READY_FOR_UPLOAD),
            Response::Success(msg) => write!(f, "SUCCESS: {msg}"),
            Response::Ok(msg) => write!(f, "OK: {msg}"),
            Response::Text(text) => f.write_str(text),
            Response::Download { name, content } => {
                write!(f, "{DOWNLOAD_PREFIX}{name}:{content}")
            }
            Response::Acknowledged => f.write_str(ACKNOWLEDGED),
            Response::Error(reason) => write!(f, "{ERROR_PREFIX}{reason}"),
        }
    }
}

impl From<ProtocolError> for Response {
    fn from(err: ProtocolError) -> Self {
        Response::error(err)
    }
}

/// Split a `DOWNLOAD:<name>:<content>` reply
pub fn parse_download(reply: &str) -> Option<(&str, &str)> {
    reply.strip_prefix(DOWNLOAD_PREFIX)?.split_once(':')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_is_case_insensitive() {
        assert_eq!(parse("ping"), Ok(Request::Heartbeat));
        assert_eq!(parse("PiNg"), Ok(Request::Heartbeat));
        assert_eq!(parse("ping\n"), Ok(Request::Heartbeat));
        assert_eq!(parse("pings"), Ok(Request::Unrecognized));
    }

    #[test]
    fn stats_is_exact_and_case_sensitive() {
        assert_eq!(parse("STATS"), Ok(Request::StatsQuery));
        assert_eq!(parse("stats"), Ok(Request::Unrecognized));
    }

    #[test]
    fn parses_commands_with_arguments() {
        assert_eq!(parse("/list"), Ok(Request::Command(Command::List(None))));
        assert_eq!(
            parse("/list sub"),
            Ok(Request::Command(Command::List(Some("sub".into()))))
        );
        assert_eq!(
            parse("/read notes.txt"),
            Ok(Request::Command(Command::Read("notes.txt".into())))
        );
        assert_eq!(
            parse("/search  Report "),
            Ok(Request::Command(Command::Search("Report".into())))
        );
    }

    #[test]
    fn missing_argument_is_a_protocol_error() {
        assert_eq!(
            parse("/read"),
            Err(ProtocolError::MissingArgument("/read <filename>"))
        );
        let reply = Response::from(ProtocolError::MissingArgument("/delete <filename>"));
        assert_eq!(reply.to_string(), "ERROR: usage: /delete <filename>");
    }

    #[test]
    fn unknown_slash_command_is_rejected() {
        assert_eq!(
            parse("/format c:"),
            Err(ProtocolError::UnknownCommand("/format".into()))
        );
    }

    #[test]
    fn login_splits_into_three_fields() {
        assert_eq!(
            parse("LOGIN_ADMIN:alice:pa:ss"),
            Ok(Request::AdminLogin {
                username: "alice".into(),
                password: "pa:ss".into()
            })
        );
        assert_eq!(parse("LOGIN_ADMIN:alice"), Err(ProtocolError::MalformedLogin));
        assert_eq!(parse("LOGIN_ADMIN"), Err(ProtocolError::MalformedLogin));
        assert_eq!(parse("LOGIN_ADMINX:a:b"), Err(ProtocolError::MalformedLogin));
    }

    #[test]
    fn upload_content_keeps_colons_and_whitespace() {
        assert_eq!(
            parse("UPLOAD:a.txt:key: value\n  indented\n"),
            Ok(Request::UploadContent {
                filename: "a.txt".into(),
                content: "key: value\n  indented\n".into()
            })
        );
        assert_eq!(
            parse("UPLOAD:empty.txt:"),
            Ok(Request::UploadContent {
                filename: "empty.txt".into(),
                content: String::new()
            })
        );
        assert_eq!(parse("UPLOAD:nocontent"), Err(ProtocolError::MalformedUpload));
    }

    #[test]
    fn upload_names_with_colons_are_refused() {
        assert_eq!(parse("/upload a:b.txt"), Err(ProtocolError::ColonInFilename));
        assert_eq!(
            Response::from(ProtocolError::ColonInFilename).to_string(),
            "ERROR: filename may not contain ':'"
        );
        // Reads are unaffected; only the content frame cannot carry the name
        assert_eq!(
            parse("/read a:b.txt"),
            Ok(Request::Command(Command::Read("a:b.txt".into())))
        );
    }

    #[test]
    fn anything_else_is_unrecognized() {
        assert_eq!(parse("hello there"), Ok(Request::Unrecognized));
        assert_eq!(Response::Acknowledged.to_string(), ACKNOWLEDGED);
    }

    #[test]
    fn non_utf8_payload_is_dropped() {
        assert_eq!(decode(&[0xff, 0xfe, 0x00]), None);
        assert_eq!(decode(b"ping"), Some("ping"));
    }

    #[test]
    fn download_frame_round_trips_through_parser() {
        let reply = Response::Download {
            name: "a.txt".into(),
            content: "x:y".into(),
        }
        .to_string();
        assert_eq!(reply, "DOWNLOAD:a.txt:x:y");
        assert_eq!(parse_download(&reply), Some(("a.txt", "x:y")));
    }
}

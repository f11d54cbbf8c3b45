//! File Operation Executor
//!
//! NIST 800-53: AC-3 (Access Enforcement), SC-7(12) (Boundary Protection)
//! Implementation: Every operation is confined to one sandbox root. Client
//! supplied names are reduced to a bare leaf name before they touch the
//! filesystem, and symbolic links inside the root are refused.

use chrono::{DateTime, Local};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

/// Prefix of in-flight upload files; hidden from listings and searches
pub const STAGING_PREFIX: &str = ".udpfs-staging-";

/// Filesystem failures, rendered after `ERROR: ` in replies
#[derive(Debug, Error)]
pub enum FsError {
    #[error("file not found")]
    NotFound,

    #[error("directory not found")]
    DirectoryNotFound,

    #[error("invalid filename")]
    InvalidName,

    #[error("access denied")]
    AccessDenied,

    #[error("not a regular file")]
    NotAFile,

    #[error("file too large ({size} bytes, limit {limit})")]
    TooLarge { size: u64, limit: u64 },

    #[error("file is not valid UTF-8 text")]
    NotUtf8,

    #[error("{0}")]
    Io(io::Error),
}

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => FsError::NotFound,
            io::ErrorKind::PermissionDenied => FsError::AccessDenied,
            _ => FsError::Io(err),
        }
    }
}

pub type FsResult<T> = std::result::Result<T, FsError>;

/// Reduce a client supplied name to a bare leaf name
///
/// Both `/` and `\` count as separators, so `../secret` and `..\secret` both
/// become `secret`. Names that reduce to nothing, `.` or `..` are rejected.
pub fn leaf_name(name: &str) -> FsResult<String> {
    let normalized = name.trim().replace('\\', "/");
    let leaf = normalized
        .split('/')
        .filter(|segment| !segment.is_empty())
        .next_back()
        .ok_or(FsError::InvalidName)?;

    if leaf == "." || leaf == ".." || leaf.contains('\0') || leaf.starts_with(STAGING_PREFIX) {
        return Err(FsError::InvalidName);
    }

    Ok(leaf.to_string())
}

/// Metadata reported by `/info`
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub created: Option<DateTime<Local>>,
    pub modified: Option<DateTime<Local>>,
}

impl fmt::Display for FileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn stamp(time: &Option<DateTime<Local>>) -> String {
            time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "unknown".to_string())
        }

        writeln!(f, "name: {}", self.name)?;
        writeln!(f, "size: {} bytes", self.size)?;
        writeln!(f, "created: {}", stamp(&self.created))?;
        write!(f, "modified: {}", stamp(&self.modified))
    }
}

/// Outcome of a completed upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub bytes_written: u64,
    /// `false` when an existing file was replaced
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    max_file_size: u64,
}

impl Sandbox {
    pub fn new(root: impl Into<PathBuf>, max_file_size: u64) -> Self {
        Self {
            root: root.into(),
            max_file_size,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a name to a path directly under the root
    ///
    /// The path may not exist yet. Symlinks are refused.
    async fn resolve(&self, name: &str) -> FsResult<PathBuf> {
        let leaf = leaf_name(name)?;
        let path = self.root.join(&leaf);

        match fs::symlink_metadata(&path).await {
            Ok(meta) if meta.file_type().is_symlink() => {
                warn!(path = %path.display(), "Refusing symlink inside sandbox");
                Err(FsError::AccessDenied)
            }
            Ok(_) => Ok(path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(path),
            Err(e) => Err(e.into()),
        }
    }

    /// Enumerate a directory, defaulting to (and clamped to) the root
    pub async fn list(&self, dir: Option<&str>) -> FsResult<Vec<String>> {
        let dir_path = match dir.map(leaf_name) {
            None | Some(Err(FsError::InvalidName)) => self.root.clone(),
            Some(Err(e)) => return Err(e),
            Some(Ok(leaf)) => {
                let path = self.resolve(&leaf).await?;
                match fs::metadata(&path).await {
                    Ok(meta) if meta.is_dir() => path,
                    Ok(_) => return Err(FsError::DirectoryNotFound),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        return Err(FsError::DirectoryNotFound);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let mut names = self.entry_names(&dir_path).await?;
        names.sort();
        Ok(names)
    }

    pub async fn read(&self, name: &str) -> FsResult<String> {
        let path = self.resolve(name).await?;
        let meta = fs::metadata(&path).await?;
        if !meta.is_file() {
            return Err(FsError::NotAFile);
        }
        self.check_size(meta.len())?;

        let bytes = fs::read(&path).await?;
        String::from_utf8(bytes).map_err(|_| FsError::NotUtf8)
    }

    /// Replace `name` with `content` atomically
    ///
    /// Content is written to a staging file in the root and renamed into
    /// place, so concurrent writers never observe each other's partial data.
    /// Last writer wins.
    pub async fn write(&self, name: &str, content: &str) -> FsResult<WriteOutcome> {
        self.check_size(content.len() as u64)?;
        let path = self.resolve(name).await?;

        let created = match fs::metadata(&path).await {
            Ok(meta) if !meta.is_file() => return Err(FsError::NotAFile),
            Ok(_) => false,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => return Err(e.into()),
        };

        let staging = self
            .root
            .join(format!("{}{}", STAGING_PREFIX, uuid::Uuid::new_v4()));
        fs::write(&staging, content.as_bytes()).await?;

        if let Err(e) = fs::rename(&staging, &path).await {
            if let Err(cleanup) = fs::remove_file(&staging).await {
                warn!(staging = %staging.display(), error = %cleanup, "Failed to remove staging file");
            }
            return Err(e.into());
        }

        debug!(path = %path.display(), bytes = content.len(), created, "File written");
        Ok(WriteOutcome {
            bytes_written: content.len() as u64,
            created,
        })
    }

    pub async fn delete(&self, name: &str) -> FsResult<()> {
        let path = self.resolve(name).await?;
        let meta = fs::symlink_metadata(&path).await?;
        if !meta.is_file() {
            return Err(FsError::NotAFile);
        }
        fs::remove_file(&path).await?;
        Ok(())
    }

    /// Case-insensitive substring match over names in the root
    pub async fn search(&self, keyword: &str) -> FsResult<Vec<String>> {
        let needle = keyword.trim().to_lowercase();
        let mut matches: Vec<String> = self
            .entry_names(&self.root)
            .await?
            .into_iter()
            .filter(|name| name.to_lowercase().contains(&needle))
            .collect();
        matches.sort();
        Ok(matches)
    }

    pub async fn info(&self, name: &str) -> FsResult<FileInfo> {
        let path = self.resolve(name).await?;
        let meta = fs::metadata(&path).await?;
        let local = |time: io::Result<SystemTime>| time.ok().map(DateTime::<Local>::from);

        Ok(FileInfo {
            name: leaf_name(name)?,
            size: meta.len(),
            created: local(meta.created()),
            modified: local(meta.modified()),
        })
    }

    fn check_size(&self, size: u64) -> FsResult<()> {
        if size > self.max_file_size {
            return Err(FsError::TooLarge {
                size,
                limit: self.max_file_size,
            });
        }
        Ok(())
    }

    async fn entry_names(&self, dir: &Path) -> FsResult<Vec<String>> {
        let mut entries = fs::read_dir(dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(STAGING_PREFIX) {
                names.push(name);
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sandbox() -> (Sandbox, TempDir) {
        let dir = TempDir::new().unwrap();
        (Sandbox::new(dir.path(), 1024), dir)
    }

    #[test]
    fn leaf_name_strips_directories() {
        assert_eq!(leaf_name("notes.txt").unwrap(), "notes.txt");
        assert_eq!(leaf_name("../secret").unwrap(), "secret");
        assert_eq!(leaf_name("..\\..\\secret").unwrap(), "secret");
        assert_eq!(leaf_name("/etc/passwd").unwrap(), "passwd");
        assert_eq!(leaf_name("dir/").unwrap(), "dir");
        assert!(matches!(leaf_name(".."), Err(FsError::InvalidName)));
        assert!(matches!(leaf_name("a/.."), Err(FsError::InvalidName)));
        assert!(matches!(leaf_name("/"), Err(FsError::InvalidName)));
        assert!(matches!(leaf_name(""), Err(FsError::InvalidName)));
    }

    #[tokio::test]
    async fn write_read_delete_cycle() {
        let (sandbox, _dir) = sandbox();

        let outcome = sandbox.write("a.txt", "hello: world").await.unwrap();
        assert_eq!(outcome.bytes_written, 12);
        assert!(outcome.created);
        assert_eq!(sandbox.read("a.txt").await.unwrap(), "hello: world");

        let outcome = sandbox.write("a.txt", "again").await.unwrap();
        assert!(!outcome.created);

        sandbox.delete("a.txt").await.unwrap();
        assert!(matches!(sandbox.read("a.txt").await, Err(FsError::NotFound)));
        assert!(matches!(sandbox.delete("a.txt").await, Err(FsError::NotFound)));
    }

    #[tokio::test]
    async fn traversal_names_stay_in_root() {
        let outer = TempDir::new().unwrap();
        let root = outer.path().join("root");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(outer.path().join("secret"), "top secret").unwrap();

        let sandbox = Sandbox::new(&root, 1024);
        assert!(matches!(sandbox.read("../secret").await, Err(FsError::NotFound)));

        sandbox.write("../escape.txt", "x").await.unwrap();
        assert!(root.join("escape.txt").exists());
        assert!(!outer.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn list_defaults_to_root_and_hides_staging() {
        let (sandbox, dir) = sandbox();
        assert!(sandbox.list(None).await.unwrap().is_empty());

        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join(format!("{STAGING_PREFIX}tmp")), "x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("inner.txt"), "i").unwrap();

        assert_eq!(sandbox.list(None).await.unwrap(), vec!["a.txt", "b.txt", "sub"]);
        assert_eq!(sandbox.list(Some("/")).await.unwrap(), vec!["a.txt", "b.txt", "sub"]);
        assert_eq!(sandbox.list(Some("sub")).await.unwrap(), vec!["inner.txt"]);
        assert!(matches!(
            sandbox.list(Some("/etc")).await,
            Err(FsError::DirectoryNotFound)
        ));
        assert!(matches!(
            sandbox.list(Some("a.txt")).await,
            Err(FsError::DirectoryNotFound)
        ));
    }

    #[tokio::test]
    async fn search_is_case_insensitive() {
        let (sandbox, dir) = sandbox();
        std::fs::write(dir.path().join("Report-2024.txt"), "").unwrap();
        std::fs::write(dir.path().join("notes.md"), "").unwrap();

        assert_eq!(sandbox.search("report").await.unwrap(), vec!["Report-2024.txt"]);
        assert!(sandbox.search("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn size_limit_applies_to_read_and_write() {
        let (sandbox, dir) = sandbox();
        std::fs::write(dir.path().join("big.txt"), "x".repeat(2048)).unwrap();

        assert!(matches!(
            sandbox.read("big.txt").await,
            Err(FsError::TooLarge { size: 2048, limit: 1024 })
        ));
        assert!(matches!(
            sandbox.write("big2.txt", &"y".repeat(2048)).await,
            Err(FsError::TooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn binary_files_are_refused_explicitly() {
        let (sandbox, dir) = sandbox();
        std::fs::write(dir.path().join("blob.bin"), [0xff, 0x00, 0xfe]).unwrap();
        assert!(matches!(sandbox.read("blob.bin").await, Err(FsError::NotUtf8)));
    }

    #[tokio::test]
    async fn info_reports_size() {
        let (sandbox, dir) = sandbox();
        std::fs::write(dir.path().join("a.txt"), "12345").unwrap();

        let info = sandbox.info("../a.txt").await.unwrap();
        assert_eq!(info.name, "a.txt");
        assert_eq!(info.size, 5);
        let text = info.to_string();
        assert!(text.contains("size: 5 bytes"));
        assert!(text.contains("modified: "));
        assert!(matches!(sandbox.info("nope").await, Err(FsError::NotFound)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_are_refused() {
        let outer = TempDir::new().unwrap();
        let root = outer.path().join("root");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(outer.path().join("secret"), "s").unwrap();
        std::os::unix::fs::symlink(outer.path().join("secret"), root.join("link")).unwrap();

        let sandbox = Sandbox::new(&root, 1024);
        assert!(matches!(sandbox.read("link").await, Err(FsError::AccessDenied)));
        assert!(matches!(sandbox.delete("link").await, Err(FsError::AccessDenied)));
    }

    #[tokio::test]
    async fn concurrent_writes_leave_one_complete_version() {
        let (sandbox, _dir) = sandbox();
        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..8 {
            let sandbox = sandbox.clone();
            tasks.spawn(async move {
                let body = format!("{i}").repeat(100);
                sandbox.write("shared.txt", &body).await.unwrap();
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }

        let content = sandbox.read("shared.txt").await.unwrap();
        assert_eq!(content.len(), 100);
        let first = content.chars().next().unwrap();
        assert!(content.chars().all(|c| c == first));
        assert!(sandbox.list(None).await.unwrap() == vec!["shared.txt"]);
    }
}

/// Instance lock: an exclusive advisory lock on a named file.
///
/// The try-lock is the atomic "did I create it or was it already held"
/// decision. The kernel drops the lock when the owning process dies, so a
/// crashed primary never leaves the name poisoned.
use chrono::{DateTime, Utc};
use fs2::FileExt;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// Outcome of a single acquisition attempt.
#[derive(Debug)]
pub enum Acquire {
    /// This process now owns the lock.
    Acquired(InstanceLock),
    /// Another open file description already owns it.
    Contended,
}

/// Ownership of the instance lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

/// Written into the lock file by the primary so `status` can report who owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub pid: u32,
    pub app_id: String,
    pub started_at: DateTime<Utc>,
}

impl LockRecord {
    pub fn for_current_process(app_id: &str) -> Self {
        Self {
            pid: std::process::id(),
            app_id: app_id.to_string(),
            started_at: Utc::now(),
        }
    }
}

/// Result of [`read_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InstanceStatus {
    NotRunning,
    Running { record: LockRecord },
}

impl InstanceLock {
    /// Open (creating if needed, never truncating) and try to lock `path`.
    ///
    /// An existing file is opened without `O_CREAT`: in a sticky directory
    /// with `fs.protected_regular` set, `O_CREAT` on another user's file fails
    /// with EACCES even though a plain open is allowed.
    ///
    /// Returns `Contended` only for the lock-held case; every other failure
    /// is an I/O error.
    pub fn try_acquire(path: &Path, mode: u32) -> std::io::Result<Acquire> {
        let file = open_or_create(path, mode)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Acquire::Acquired(Self {
                file,
                path: path.to_path_buf(),
            })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(Acquire::Contended),
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file contents with `record`.
    pub fn write_record(&mut self, record: &LockRecord) -> std::io::Result<()> {
        let json = serde_json::to_vec(record).map_err(std::io::Error::other)?;
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&json)?;
        self.file.sync_data()
    }

    /// Clear the record and unlock. The handle is closed when `self` drops.
    pub fn release(self) -> std::io::Result<()> {
        self.file.set_len(0)?;
        FileExt::unlock(&self.file)
    }
}

fn open_existing(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().read(true).write(true).open(path)
}

fn open_or_create(path: &Path, mode: u32) -> std::io::Result<File> {
    match open_existing(path) {
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        other => return other,
    }
    match OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)
    {
        Ok(file) => {
            widen_permissions(&file, path, mode);
            Ok(file)
        }
        // Lost the create race to another launch.
        Err(e) if e.kind() == ErrorKind::AlreadyExists => open_existing(path),
        Err(e) => Err(e),
    }
}

/// umask strips group/other bits on create; machine scope needs them back.
fn widen_permissions(file: &File, path: &Path, mode: u32) {
    if mode & 0o077 == 0 {
        return;
    }
    if let Err(e) = file.set_permissions(std::fs::Permissions::from_mode(mode)) {
        tracing::debug!(path = %path.display(), error = %e, "could not widen lock file permissions");
    }
}

/// Report who owns the instance at `path` from its lock record.
///
/// Never locks or creates the file, so it cannot disturb a launch in
/// progress. A missing, empty, unparsable or dead-pid record reads as
/// `NotRunning`; a primary that has locked but not yet written its record
/// is reported the same way.
pub fn read_status(path: &Path) -> std::io::Result<InstanceStatus> {
    let contents = match std::fs::read(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(InstanceStatus::NotRunning),
        Err(e) => return Err(e),
    };
    match serde_json::from_slice::<LockRecord>(&contents) {
        Ok(record) if pid_alive(record.pid) => Ok(InstanceStatus::Running { record }),
        _ => Ok(InstanceStatus::NotRunning),
    }
}

/// `kill(pid, 0)`. EPERM means the process exists but belongs to someone else.
pub fn pid_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

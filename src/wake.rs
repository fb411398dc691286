/// Wake event: a named auto-reset signal backed by a FIFO.
///
/// Every participant opens the FIFO read-write and non-blocking, so the pipe
/// never reports EOF and a raise never fails for lack of a reader. Raising
/// writes one byte; a wait drains whatever is pending, which collapses any
/// number of raises into a single wakeup.
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What a single [`WakeEvent::wait`] observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A raise was pending and has been consumed.
    Signaled,
    /// Nothing arrived within the timeout.
    TimedOut,
    /// The cancellation fd became readable. A raise pending at the same
    /// time is left in the FIFO; a waiter that stops here should
    /// [`discard_pending`](WakeEvent::discard_pending) so the raise is not
    /// delivered to whichever primary holds the name next.
    Cancelled,
}

#[derive(Debug)]
pub struct WakeEvent {
    file: File,
    path: PathBuf,
}

impl WakeEvent {
    /// Create the FIFO if missing and open it.
    ///
    /// Fails with `AlreadyExists` when something other than a FIFO occupies
    /// the name.
    pub fn open_or_create(path: &Path, mode: u32) -> std::io::Result<Self> {
        match mkfifo(path, Mode::from_bits_truncate(mode as nix::libc::mode_t)) {
            Ok(()) => {
                if mode & 0o077 != 0 {
                    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
                }
            }
            Err(Errno::EEXIST) => {}
            Err(e) => return Err(e.into()),
        }

        let meta = std::fs::metadata(path)?;
        if !meta.file_type().is_fifo() {
            return Err(std::io::Error::new(
                ErrorKind::AlreadyExists,
                format!("{} exists and is not a FIFO", path.display()),
            ));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(path)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raise the event. A full pipe means a raise is already pending.
    pub fn set(&self) -> std::io::Result<()> {
        loop {
            match (&self.file).write(&[1]) {
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Block for at most `timeout` (clamped to 65535ms) waiting for a raise.
    ///
    /// When `cancel` is given and becomes readable, returns `Cancelled` even
    /// if a raise is also pending; the raise stays queued.
    pub fn wait(
        &self,
        timeout: Duration,
        cancel: Option<BorrowedFd<'_>>,
    ) -> std::io::Result<WaitOutcome> {
        let timeout_ms = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);

        let mut fds = vec![PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
        if let Some(fd) = cancel {
            fds.push(PollFd::new(fd, PollFlags::POLLIN));
        }

        let ready = match poll(&mut fds, timeout_ms) {
            Ok(n) => n,
            Err(Errno::EINTR) => return Ok(WaitOutcome::TimedOut),
            Err(e) => return Err(e.into()),
        };
        if ready == 0 {
            return Ok(WaitOutcome::TimedOut);
        }

        let cancelled = fds
            .get(1)
            .and_then(|p| p.revents())
            .is_some_and(|r| r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP));
        let event = fds[0].revents().unwrap_or(PollFlags::empty());
        drop(fds);

        if cancelled {
            return Ok(WaitOutcome::Cancelled);
        }
        if event.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
            return Err(std::io::Error::other(format!(
                "poll reported {event:?} on {}",
                self.path.display()
            )));
        }
        if event.contains(PollFlags::POLLIN) && self.discard_pending()? > 0 {
            return Ok(WaitOutcome::Signaled);
        }
        // Readable but empty: another waiter consumed the raise first.
        Ok(WaitOutcome::TimedOut)
    }

    /// Consume every pending byte. Returns how many were read.
    pub fn discard_pending(&self) -> std::io::Result<usize> {
        let mut buf = [0u8; 64];
        let mut total = 0;
        loop {
            match (&self.file).read(&mut buf) {
                Ok(0) => return Ok(total),
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(total),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::tempdir;

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn test_set_then_wait_is_signaled_once() {
        let dir = tempdir().unwrap();
        let ev = WakeEvent::open_or_create(&dir.path().join("app.wake"), 0o600).unwrap();

        ev.set().unwrap();
        assert_eq!(ev.wait(SHORT, None).unwrap(), WaitOutcome::Signaled);
        assert_eq!(ev.wait(SHORT, None).unwrap(), WaitOutcome::TimedOut);
    }

    #[test]
    fn test_raises_coalesce_into_one_wakeup() {
        let dir = tempdir().unwrap();
        let ev = WakeEvent::open_or_create(&dir.path().join("app.wake"), 0o600).unwrap();

        for _ in 0..3 {
            ev.set().unwrap();
        }
        assert_eq!(ev.wait(SHORT, None).unwrap(), WaitOutcome::Signaled);
        assert_eq!(ev.wait(SHORT, None).unwrap(), WaitOutcome::TimedOut);
    }

    #[test]
    fn test_wait_times_out() {
        let dir = tempdir().unwrap();
        let ev = WakeEvent::open_or_create(&dir.path().join("app.wake"), 0o600).unwrap();

        let start = Instant::now();
        assert_eq!(
            ev.wait(Duration::from_millis(100), None).unwrap(),
            WaitOutcome::TimedOut
        );
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[test]
    fn test_raise_from_other_handle_survives_its_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.wake");
        let primary = WakeEvent::open_or_create(&path, 0o600).unwrap();

        {
            let secondary = WakeEvent::open_or_create(&path, 0o600).unwrap();
            secondary.set().unwrap();
        }

        assert_eq!(primary.wait(SHORT, None).unwrap(), WaitOutcome::Signaled);
    }

    #[test]
    fn test_set_on_full_pipe_still_succeeds() {
        let dir = tempdir().unwrap();
        let ev = WakeEvent::open_or_create(&dir.path().join("app.wake"), 0o600).unwrap();

        // Default pipe capacity on Linux is 64KiB.
        for _ in 0..(70 * 1024) {
            ev.set().unwrap();
        }
        assert_eq!(ev.wait(SHORT, None).unwrap(), WaitOutcome::Signaled);
        assert_eq!(ev.wait(SHORT, None).unwrap(), WaitOutcome::TimedOut);
    }

    #[test]
    fn test_regular_file_at_name_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.wake");
        std::fs::write(&path, "not a fifo").unwrap();

        let err = WakeEvent::open_or_create(&path, 0o600).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_missing_parent_dir_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing/app.wake");
        assert!(WakeEvent::open_or_create(&path, 0o600).is_err());
    }

    #[test]
    fn test_cancel_wins_over_pending_signal() {
        let dir = tempdir().unwrap();
        let ev = WakeEvent::open_or_create(&dir.path().join("app.wake"), 0o600).unwrap();
        let (read_end, write_end) = nix::unistd::pipe().unwrap();
        let mut write_end = File::from(write_end);

        ev.set().unwrap();
        write_end.write_all(&[1]).unwrap();

        assert_eq!(
            ev.wait(Duration::from_secs(5), Some(read_end.as_fd()))
                .unwrap(),
            WaitOutcome::Cancelled
        );
        // The raise is still pending until someone discards it.
        assert_eq!(ev.discard_pending().unwrap(), 1);
        assert_eq!(ev.wait(SHORT, None).unwrap(), WaitOutcome::TimedOut);
    }

    #[test]
    fn test_cancel_interrupts_long_wait() {
        let dir = tempdir().unwrap();
        let ev = WakeEvent::open_or_create(&dir.path().join("app.wake"), 0o600).unwrap();
        let (read_end, write_end) = nix::unistd::pipe().unwrap();

        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            File::from(write_end).write_all(&[1]).unwrap();
        });

        let start = Instant::now();
        assert_eq!(
            ev.wait(Duration::from_secs(10), Some(read_end.as_fd()))
                .unwrap(),
            WaitOutcome::Cancelled
        );
        assert!(start.elapsed() < Duration::from_secs(5));
        writer.join().unwrap();
    }

    #[test]
    fn test_machine_mode_fifo_permissions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.wake");
        WakeEvent::open_or_create(&path, 0o666).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o666);
    }
}

//! Mount lifecycle.
//!
//! [`MountManager`] owns at most one FUSE session at a time. `attach`
//! mounts read-only, starts the serve loop on a background thread and
//! returns once the kernel has completed the handshake. `wait` blocks until
//! the serve loop exits. `detach` unmounts, which ends the serve loop.

use crate::config::MountConfig;
use crate::error::{MountError, MountResult};
use crate::filesystem::SquashFs;
use crate::signal::Signal;
use fuser::{Session, SessionUnmounter};
use parking_lot::Mutex;
use squashfuse_core::{ArchiveTree, FsNode, NodeOps};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Closes the kernel connection of a live session.
trait Unmounter: Send {
    fn unmount(&mut self) -> io::Result<()>;
}

impl Unmounter for SessionUnmounter {
    fn unmount(&mut self) -> io::Result<()> {
        SessionUnmounter::unmount(self)
    }
}

/// A live session: the connection handle plus its serve thread.
struct ActiveMount {
    mountpoint: PathBuf,
    unmounter: Box<dyn Unmounter>,
    thread: JoinHandle<io::Result<()>>,
    done: Arc<Signal>,
}

impl ActiveMount {
    /// Waits for the serve thread and logs how it ended.
    fn join(self) {
        match self.thread.join() {
            Ok(Ok(())) => debug!(mountpoint = %self.mountpoint.display(), "serve loop exited"),
            Ok(Err(e)) => warn!(
                mountpoint = %self.mountpoint.display(),
                error = %e,
                "serve loop exited with error"
            ),
            Err(_) => warn!(mountpoint = %self.mountpoint.display(), "serve loop panicked"),
        }
    }
}

/// Mounts a node tree read-only and manages the resulting session.
///
/// # Example
///
/// ```ignore
/// use squashfuse::{MountConfig, MountManager};
/// use squashfuse_core::MemoryArchive;
/// use std::sync::Arc;
///
/// let archive = MemoryArchive::builder()
///     .file("hello.txt", 0o644, &b"hi\n"[..])
///     .build()?;
/// let manager = MountManager::for_archive(Arc::new(archive), MountConfig::default());
/// manager.attach("/mnt/image")?;
/// manager.wait();
/// ```
pub struct MountManager<N: NodeOps> {
    root: N,
    config: MountConfig,
    session: Mutex<Option<ActiveMount>>,
    /// Completion signal of the most recent session. Kept after detach so
    /// `wait` never blocks on a session that is gone.
    done: Mutex<Option<Arc<Signal>>>,
}

impl<A: ArchiveTree> MountManager<FsNode<A>> {
    /// Creates a manager serving the root directory of `archive`.
    pub fn for_archive(archive: Arc<A>, config: MountConfig) -> Self {
        Self::new(FsNode::root(archive), config)
    }
}

impl<N: NodeOps> MountManager<N> {
    /// Creates a manager that serves `root` once attached.
    pub fn new(root: N, config: MountConfig) -> Self {
        Self {
            root,
            config,
            session: Mutex::new(None),
            done: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    /// Mounts the tree read-only at `mountpoint`.
    ///
    /// Blocks until the kernel completes the handshake or the configured
    /// ready timeout passes. Serving continues on a background thread after
    /// this returns. On failure the manager stays unmounted, unless the
    /// handshake timed out and the kernel also refused the unmount; the
    /// session is then kept so `detach` can retry.
    pub fn attach(&self, mountpoint: impl AsRef<Path>) -> MountResult<()> {
        let mut session = self.session.lock();
        if let Some(active) = session.as_ref() {
            return Err(MountError::AlreadyMounted(active.mountpoint.clone()));
        }

        let mountpoint = mountpoint.as_ref().to_path_buf();
        let ready = Arc::new(Signal::new());
        let done = Arc::new(Signal::new());
        let fs = SquashFs::new(self.root.clone(), &self.config).with_ready_signal(Arc::clone(&ready));

        debug!(mountpoint = %mountpoint.display(), "mounting squashfs archive");
        let mut fuse_session = Session::new(fs, &mountpoint, &self.config.mount_options())?;
        let unmounter = fuse_session.unmount_callable();

        let thread = {
            let ready = Arc::clone(&ready);
            let done = Arc::clone(&done);
            thread::Builder::new()
                .name("squashfuse-serve".to_string())
                .spawn(move || {
                    let result = fuse_session.run();
                    done.notify();
                    // Wakes attach if the loop dies before the handshake.
                    ready.notify();
                    result
                })?
        };

        let active = ActiveMount {
            mountpoint,
            unmounter: Box::new(unmounter),
            thread,
            done,
        };
        self.settle(&mut session, active, &ready)
    }

    /// Waits for the handshake of a freshly started session and records it.
    fn settle(
        &self,
        session: &mut Option<ActiveMount>,
        mut active: ActiveMount,
        ready: &Signal,
    ) -> MountResult<()> {
        let timeout = self.config.ready_timeout;
        if !ready.wait_until(Instant::now() + timeout) {
            warn!(mountpoint = %active.mountpoint.display(), ?timeout, "mount not ready, unmounting");
            match active.unmounter.unmount() {
                Ok(()) => active.join(),
                Err(e) => {
                    // The serve loop is still attached to the kernel; joining it would block.
                    warn!(error = %e, "unmount after failed handshake failed, keeping session");
                    *self.done.lock() = Some(Arc::clone(&active.done));
                    *session = Some(active);
                }
            }
            return Err(MountError::NotReady(timeout));
        }
        if active.done.is_set() {
            return match active.thread.join() {
                Ok(Err(e)) => Err(MountError::Mount(e)),
                _ => Err(MountError::ServeExited),
            };
        }

        info!(mountpoint = %active.mountpoint.display(), "squashfs archive mounted");
        *self.done.lock() = Some(Arc::clone(&active.done));
        *session = Some(active);
        Ok(())
    }

    /// Blocks until the serve loop of the last attached session exits.
    ///
    /// Returns immediately if nothing was ever attached.
    pub fn wait(&self) {
        let done = self.done.lock().clone();
        if let Some(done) = done {
            done.wait();
        }
    }

    /// Unmounts the active session and waits for its serve loop to finish.
    ///
    /// After success a new `attach` is allowed. If the kernel refuses the
    /// unmount the session stays attached.
    pub fn detach(&self) -> MountResult<()> {
        let mut session = self.session.lock();
        let Some(mut active) = session.take() else {
            return Err(MountError::NotMounted);
        };

        if active.done.is_set() {
            debug!(mountpoint = %active.mountpoint.display(), "serve loop already exited");
        } else {
            info!(mountpoint = %active.mountpoint.display(), "unmounting squashfs archive");
            if let Err(e) = active.unmounter.unmount() {
                *session = Some(active);
                return Err(MountError::Mount(e));
            }
        }

        let mountpoint = active.mountpoint.clone();
        active.join();
        info!(mountpoint = %mountpoint.display(), "squashfs archive unmounted");
        Ok(())
    }

    pub fn is_mounted(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Returns where the active session is mounted.
    pub fn mountpoint(&self) -> Option<PathBuf> {
        self.session
            .lock()
            .as_ref()
            .map(|active| active.mountpoint.clone())
    }
}

impl<N: NodeOps> Drop for MountManager<N> {
    fn drop(&mut self) {
        if self.session.get_mut().is_none() {
            return;
        }
        if let Err(e) = self.detach() {
            warn!(error = %e, "failed to unmount on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use squashfuse_core::MemoryArchive;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn manager_with(config: MountConfig) -> MountManager<FsNode<MemoryArchive>> {
        let archive = MemoryArchive::builder()
            .file("a.txt", 0o644, &b"a"[..])
            .build()
            .unwrap();
        MountManager::for_archive(Arc::new(archive), config)
    }

    fn manager() -> MountManager<FsNode<MemoryArchive>> {
        manager_with(MountConfig::default())
    }

    /// Stands in for the kernel connection: unmounting ends the serve thread.
    struct FakeUnmounter {
        refuse: bool,
        stop: Arc<Signal>,
        calls: Arc<AtomicUsize>,
    }

    impl Unmounter for FakeUnmounter {
        fn unmount(&mut self) -> io::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                return Err(io::Error::from_raw_os_error(libc::EBUSY));
            }
            self.stop.notify();
            Ok(())
        }
    }

    struct FakeSession {
        active: ActiveMount,
        ready: Arc<Signal>,
        stop: Arc<Signal>,
        unmount_calls: Arc<AtomicUsize>,
    }

    /// A session whose serve thread runs until unmounted, or exits at once
    /// with `exit_now` if given. It never completes the handshake itself.
    fn fake_session(refuse_unmount: bool, exit_now: Option<io::Result<()>>) -> FakeSession {
        let ready = Arc::new(Signal::new());
        let done = Arc::new(Signal::new());
        let stop = Arc::new(Signal::new());
        let unmount_calls = Arc::new(AtomicUsize::new(0));

        let thread = {
            let ready = Arc::clone(&ready);
            let done = Arc::clone(&done);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let result = match exit_now {
                    Some(result) => result,
                    None => {
                        stop.wait();
                        Ok(())
                    }
                };
                done.notify();
                ready.notify();
                result
            })
        };

        let active = ActiveMount {
            mountpoint: PathBuf::from("/mnt/squashfuse-test"),
            unmounter: Box::new(FakeUnmounter {
                refuse: refuse_unmount,
                stop: Arc::clone(&stop),
                calls: Arc::clone(&unmount_calls),
            }),
            thread,
            done,
        };
        FakeSession {
            active,
            ready,
            stop,
            unmount_calls,
        }
    }

    fn settle(manager: &MountManager<FsNode<MemoryArchive>>, fake: FakeSession) -> MountResult<()> {
        let mut session = manager.session.lock();
        manager.settle(&mut session, fake.active, &fake.ready)
    }

    #[test]
    fn test_handshake_timeout_unmounts() {
        let manager = manager_with(MountConfig::default().ready_timeout(Duration::from_millis(20)));
        let fake = fake_session(false, None);
        let calls = Arc::clone(&fake.unmount_calls);

        let err = settle(&manager, fake).unwrap_err();
        assert!(matches!(err, MountError::NotReady(t) if t == Duration::from_millis(20)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!manager.is_mounted());
    }

    #[test]
    fn test_handshake_timeout_with_refused_unmount_keeps_session() {
        let manager = manager_with(MountConfig::default().ready_timeout(Duration::from_millis(20)));
        let fake = fake_session(true, None);
        let stop = Arc::clone(&fake.stop);
        let calls = Arc::clone(&fake.unmount_calls);

        // Returns instead of joining the still-running serve thread.
        let err = settle(&manager, fake).unwrap_err();
        assert!(matches!(err, MountError::NotReady(_)));
        assert!(manager.is_mounted());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A later detach retries and keeps the session while the kernel refuses.
        assert!(matches!(manager.detach(), Err(MountError::Mount(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(manager.is_mounted());

        // Once the loop is gone, detach just reaps it.
        stop.notify();
        manager.wait();
        manager.detach().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!manager.is_mounted());
    }

    #[test]
    fn test_serve_loop_exiting_before_handshake() {
        let manager = manager();
        let err = settle(&manager, fake_session(false, Some(Ok(())))).unwrap_err();
        assert!(matches!(err, MountError::ServeExited));
        assert!(!manager.is_mounted());

        let failure = io::Error::from_raw_os_error(libc::EACCES);
        let err = settle(&manager, fake_session(false, Some(Err(failure)))).unwrap_err();
        match err {
            MountError::Mount(e) => assert_eq!(e.raw_os_error(), Some(libc::EACCES)),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!manager.is_mounted());
    }

    #[test]
    fn test_ready_session_is_recorded() {
        let manager = manager();
        let fake = fake_session(false, None);
        fake.ready.notify();
        let calls = Arc::clone(&fake.unmount_calls);

        settle(&manager, fake).unwrap();
        assert!(manager.is_mounted());
        assert_eq!(manager.mountpoint().as_deref(), Some(Path::new("/mnt/squashfuse-test")));

        manager.detach().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        manager.wait();
    }

    #[test]
    fn test_detach_without_attach() {
        let manager = manager();
        assert!(matches!(manager.detach(), Err(MountError::NotMounted)));
        assert!(!manager.is_mounted());
    }

    #[test]
    fn test_wait_without_attach_returns() {
        let manager = manager();
        manager.wait();
        assert!(manager.mountpoint().is_none());
    }

    #[test]
    fn test_attach_to_missing_directory_fails() {
        let manager = manager();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");

        assert!(manager.attach(&missing).is_err());
        assert!(!manager.is_mounted());
        assert!(matches!(manager.detach(), Err(MountError::NotMounted)));
    }
}

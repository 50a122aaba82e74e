//! Test mount harness for FUSE integration tests.
//!
//! Provides `TestMount`, which mounts an archive on a temporary directory
//! through `MountManager` and detaches it on drop.

// Not all tests use all TestMount methods
#![allow(dead_code)]

use squashfuse::{MountConfig, MountManager};
use squashfuse_core::{ArchiveTree, FsNode, MemoryArchive, NodeOps};
use std::fs::{self, File, Metadata};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

static TRACING_ONCE: Once = Once::new();

/// Installs a test subscriber honouring `RUST_LOG`, at most once per process.
pub fn init_tracing() {
    TRACING_ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// How long `attach` may wait for the kernel handshake in tests.
const MOUNT_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Content of `docs/data.bin` in the sample archive.
pub fn sample_content() -> Vec<u8> {
    (0..1000u32).map(|i| (i * 7 % 251) as u8).collect()
}

/// One directory holding a 1000-byte file and a symlink to it.
pub fn sample_archive() -> MemoryArchive {
    MemoryArchive::builder()
        .mtime(1_700_000_000)
        .dir("docs", 0o755)
        .file("docs/data.bin", 0o644, sample_content())
        .symlink("docs/latest", "data.bin")
        .build()
        .expect("sample archive")
}

/// A mounted archive for testing. Defaults to an in-memory archive.
///
/// # Example
///
/// ```ignore
/// use common::TestMount;
///
/// #[test]
/// fn test_read() {
///     let mount = TestMount::sample().unwrap();
///     assert_eq!(mount.read("docs/data.bin").unwrap().len(), 1000);
/// }
/// ```
pub struct TestMount<N: NodeOps = FsNode<MemoryArchive>> {
    pub manager: MountManager<N>,
    /// Path where the archive is mounted.
    pub mount_path: PathBuf,
    /// Temporary mount point directory.
    _temp_mount: TempDir,
}

impl TestMount {
    /// Mounts the sample archive.
    pub fn sample() -> Result<Self, String> {
        Self::with_archive(sample_archive())
    }

    /// Mounts `archive` on a fresh temporary directory.
    pub fn with_archive<A: ArchiveTree>(archive: A) -> Result<TestMount<FsNode<A>>, String> {
        init_tracing();

        let temp_mount = TempDir::new().map_err(|e| format!("Failed to create temp dir: {e}"))?;
        let mount_path = temp_mount.path().join("mnt");
        fs::create_dir(&mount_path).map_err(|e| format!("Failed to create mount point: {e}"))?;

        let config = MountConfig::default()
            .fsname("squashfuse-test")
            .ready_timeout(MOUNT_READY_TIMEOUT);
        let manager = MountManager::for_archive(Arc::new(archive), config);
        manager
            .attach(&mount_path)
            .map_err(|e| format!("Failed to mount: {e}"))?;

        Ok(TestMount {
            manager,
            mount_path,
            _temp_mount: temp_mount,
        })
    }
}

impl<N: NodeOps> TestMount<N> {
    // =========================================================================
    // Filesystem convenience methods
    // =========================================================================

    /// Build a full path from a relative path.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.mount_path.join(relative.trim_start_matches('/'))
    }

    /// Read a file's contents.
    pub fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let mut content = Vec::new();
        File::open(self.path(path))?.read_to_end(&mut content)?;
        Ok(content)
    }

    /// Read up to `len` bytes starting at `offset`.
    pub fn read_at(&self, path: &str, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut file = File::open(self.path(path))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut content = Vec::new();
        file.take(len as u64).read_to_end(&mut content)?;
        Ok(content)
    }

    /// Get file/directory metadata.
    pub fn metadata(&self, path: &str) -> io::Result<Metadata> {
        fs::metadata(self.path(path))
    }

    /// Get symlink metadata (doesn't follow symlinks).
    pub fn symlink_metadata(&self, path: &str) -> io::Result<Metadata> {
        fs::symlink_metadata(self.path(path))
    }

    /// List directory entries (names only, without `.` and `..`).
    pub fn list(&self, path: &str) -> io::Result<Vec<String>> {
        let entries = fs::read_dir(self.path(path))?;
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Read a symbolic link's target.
    pub fn read_link(&self, path: &str) -> io::Result<PathBuf> {
        fs::read_link(self.path(path))
    }
}

impl<N: NodeOps> Drop for TestMount<N> {
    fn drop(&mut self) {
        if self.manager.is_mounted()
            && let Err(e) = self.manager.detach()
        {
            eprintln!("[test-harness] Warning: failed to unmount {}: {e}", self.mount_path.display());
        }
    }
}

/// Check if FUSE is available on this system.
pub fn fuse_available() -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new("/dev/fuse").exists()
    }
    #[cfg(target_os = "macos")]
    {
        Path::new("/Library/Filesystems/macfuse.fs").exists()
            || Path::new("/Library/Filesystems/osxfuse.fs").exists()
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        false
    }
}

/// Skip test if FUSE is not available.
#[macro_export]
macro_rules! skip_if_no_fuse {
    () => {
        if !$crate::common::harness::fuse_available() {
            eprintln!("Skipping test: FUSE not available on this system");
            return;
        }
    };
}

/// Skip test if mounting fails (common in CI environments).
#[macro_export]
macro_rules! require_mount {
    ($mount_result:expr) => {
        match $mount_result {
            Ok(m) => m,
            Err(e) => {
                eprintln!("Skipping test: {}", e);
                return;
            }
        }
    };
}

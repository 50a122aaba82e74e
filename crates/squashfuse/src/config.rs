//! Mount configuration for the FUSE filesystem.
//!
//! Archive content never changes while mounted, so the kernel may cache
//! attributes and entries freely. The defaults stay short so that a
//! remount of a different image under the same path shows up quickly.

use fuser::MountOption;
use std::time::Duration;

/// Default TTL for attributes and directory entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(1);

/// Default bound on how long `attach` waits for the kernel handshake.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default filesystem name shown in the mount table.
pub const DEFAULT_FSNAME: &str = "squashfs";

/// Configuration options for a squashfs mount.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Time-to-live for attributes returned by `getattr` and `lookup`.
    pub attr_ttl: Duration,

    /// Time-to-live for name lookups.
    pub entry_ttl: Duration,

    /// Source name reported in the mount table.
    pub fsname: String,

    /// Filesystem subtype (`fuse.<subtype>`), if any.
    pub subtype: Option<String>,

    /// Let users other than the mounting user access the filesystem.
    ///
    /// Requires `user_allow_other` in `/etc/fuse.conf` for unprivileged mounts.
    pub allow_other: bool,

    /// Ask the kernel to unmount automatically when the process exits.
    pub auto_unmount: bool,

    /// Let the kernel enforce permission bits.
    pub default_permissions: bool,

    /// How long `attach` waits for the kernel to complete the handshake.
    pub ready_timeout: Duration,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            attr_ttl: DEFAULT_TTL,
            entry_ttl: DEFAULT_TTL,
            fsname: DEFAULT_FSNAME.to_string(),
            subtype: Some("squashfuse".to_string()),
            allow_other: false,
            auto_unmount: false,
            default_permissions: true,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

impl MountConfig {
    /// Creates a configuration with custom TTL values.
    pub fn with_ttl(attr_ttl: Duration, entry_ttl: Duration) -> Self {
        Self {
            attr_ttl,
            entry_ttl,
            ..Default::default()
        }
    }

    /// Sets the TTL for attributes.
    #[must_use]
    pub fn attr_ttl(mut self, ttl: Duration) -> Self {
        self.attr_ttl = ttl;
        self
    }

    /// Sets the TTL for name lookups.
    #[must_use]
    pub fn entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    #[must_use]
    pub fn fsname(mut self, name: impl Into<String>) -> Self {
        self.fsname = name.into();
        self
    }

    #[must_use]
    pub fn subtype(mut self, subtype: Option<String>) -> Self {
        self.subtype = subtype;
        self
    }

    #[must_use]
    pub fn allow_other(mut self, allow: bool) -> Self {
        self.allow_other = allow;
        self
    }

    #[must_use]
    pub fn auto_unmount(mut self, enabled: bool) -> Self {
        self.auto_unmount = enabled;
        self
    }

    #[must_use]
    pub fn default_permissions(mut self, enabled: bool) -> Self {
        self.default_permissions = enabled;
        self
    }

    /// Sets the readiness timeout for `attach`.
    #[must_use]
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Renders the fuser mount options. `RO` is always present.
    pub fn mount_options(&self) -> Vec<MountOption> {
        let mut options = vec![MountOption::RO, MountOption::FSName(self.fsname.clone())];
        if let Some(subtype) = &self.subtype {
            options.push(MountOption::Subtype(subtype.clone()));
        }
        if self.allow_other {
            options.push(MountOption::AllowOther);
        }
        if self.auto_unmount {
            options.push(MountOption::AutoUnmount);
        }
        if self.default_permissions {
            options.push(MountOption::DefaultPermissions);
        }
        options
    }
}

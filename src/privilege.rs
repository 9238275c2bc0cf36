//! Unprivileged build identity.
//!
//! The daemon never changes its own credentials. Each spawned command is
//! started directly under the build user's uid and gid instead, so lowered
//! privileges apply to that command only and cannot leak into other tasks
//! sharing the runtime's worker threads.

use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Uid, User, chown, getegid, geteuid};
use tokio::process::Command;

use crate::errors::PrivilegeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildIdentity {
    name: String,
    uid: u32,
    gid: u32,
    home: PathBuf,
}

impl BuildIdentity {
    pub fn new(name: impl Into<String>, uid: u32, gid: u32, home: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            uid,
            gid,
            home: home.into(),
        }
    }

    /// Resolves `name` through the system user database.
    pub fn lookup(name: &str) -> Result<Self, PrivilegeError> {
        let user = User::from_name(name)
            .map_err(|source| PrivilegeError::Lookup {
                name: name.to_string(),
                source,
            })?
            .ok_or_else(|| PrivilegeError::UnknownUser {
                name: name.to_string(),
            })?;
        Ok(Self::new(user.name, user.uid.as_raw(), user.gid.as_raw(), user.dir))
    }

    /// The identity the daemon itself is running as.
    pub fn current() -> Self {
        let uid = geteuid();
        let (name, home) = match User::from_uid(uid).ok().flatten() {
            Some(user) => (user.name, user.dir),
            None => (uid.to_string(), dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))),
        };
        Self::new(name, uid.as_raw(), getegid().as_raw(), home)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Checks that commands can be started as this identity: the daemon must
    /// either be root or already run as the target uid.
    pub fn verify(&self) -> Result<(), PrivilegeError> {
        let euid = geteuid();
        if euid.is_root() || euid == Uid::from_raw(self.uid) {
            return Ok(());
        }
        Err(PrivilegeError::NotPermitted {
            uid: self.uid,
            euid: euid.as_raw(),
        })
    }

    fn needs_switch(&self) -> bool {
        geteuid() != Uid::from_raw(self.uid) || getegid() != Gid::from_raw(self.gid)
    }

    /// Login variables a command started as this identity should see.
    pub fn session_env(&self) -> [(&'static str, String); 3] {
        [
            ("HOME", self.home.to_string_lossy().into_owned()),
            ("USER", self.name.clone()),
            ("LOGNAME", self.name.clone()),
        ]
    }

    /// Makes `command` start under this identity.
    ///
    /// When the ids differ from the daemon's, the login variables are replaced
    /// too. Variables set on `command` afterwards take precedence.
    pub fn apply(&self, command: &mut Command) {
        if self.needs_switch() {
            command.gid(self.gid).uid(self.uid).envs(self.session_env());
        }
    }

    /// Creates `path` if missing and makes sure this identity can write it.
    ///
    /// A directory owned by the daemon that the build user can't write is
    /// handed over to the build user.
    pub fn prepare_workdir(&self, path: &Path) -> Result<(), PrivilegeError> {
        let workdir_err = |source| PrivilegeError::Workdir {
            path: path.to_path_buf(),
            source,
        };
        std::fs::create_dir_all(path).map_err(workdir_err)?;
        let metadata = std::fs::metadata(path).map_err(workdir_err)?;
        if self.can_write(&metadata) {
            return Ok(());
        }

        if self.needs_switch() && metadata.uid() == geteuid().as_raw() {
            chown(path, Some(Uid::from_raw(self.uid)), Some(Gid::from_raw(self.gid))).map_err(
                |source| PrivilegeError::Chown {
                    path: path.to_path_buf(),
                    source,
                },
            )?;
            tracing::info!(workdir = %path.display(), user = %self.name, "workdir handed to build user");
            return Ok(());
        }

        Err(PrivilegeError::WorkdirNotWritable {
            path: path.to_path_buf(),
            name: self.name.clone(),
        })
    }

    /// Permission bits only; supplementary groups are not consulted.
    fn can_write(&self, metadata: &Metadata) -> bool {
        let mode = metadata.mode();
        if self.uid == 0 {
            true
        } else if metadata.uid() == self.uid {
            mode & 0o200 != 0
        } else if metadata.gid() == self.gid {
            mode & 0o020 != 0
        } else {
            mode & 0o002 != 0
        }
    }
}

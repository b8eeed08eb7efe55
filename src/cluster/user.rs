//! Daemon User
//!
//! Releases before 0.95 run every daemon as root. Later releases run them
//! as the unprivileged `ceph` account, so monitor files must be owned by it
//! and `ceph-mon --mkfs` runs under its identity.

use crate::config::ToolPaths;
use crate::domain::ports::CommandLine;
use crate::error::{Error, Result};
use crate::model::NodeModel;
use std::fs;
use std::os::unix::fs::chown;
use std::path::Path;
use tracing::debug;

pub const CEPH_USER: &str = "ceph";

/// Account the ceph daemons run as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonUser {
    Root,
    Ceph { uid: u32, gid: u32 },
}

impl DaemonUser {
    /// Pick the daemon user for the installed release
    ///
    /// The ceph account is looked up in `passwd_file`; it must exist when the
    /// release needs it.
    pub fn for_model(model: &NodeModel, passwd_file: &Path) -> Result<Self> {
        if model.ceph_daemon_user() == "root" {
            return Ok(DaemonUser::Root);
        }
        let text = fs::read_to_string(passwd_file)
            .map_err(|e| Error::resource("read", passwd_file, e))?;
        let (uid, gid) = lookup_passwd(&text, CEPH_USER).ok_or_else(|| {
            Error::Configuration(format!(
                "user '{CEPH_USER}' not found in {}",
                passwd_file.display()
            ))
        })?;
        debug!("Daemons run as {} ({}:{})", CEPH_USER, uid, gid);
        Ok(DaemonUser::Ceph { uid, gid })
    }

    /// Run `command` as this user
    pub fn wrap(&self, command: CommandLine, tools: &ToolPaths) -> CommandLine {
        match self {
            DaemonUser::Root => command,
            DaemonUser::Ceph { .. } => command.wrapped([tools.sudo.as_str(), "-u", CEPH_USER]),
        }
    }

    /// Hand `path` over to this user
    pub fn chown(&self, path: &Path) -> Result<()> {
        let (uid, gid) = match self {
            DaemonUser::Root => (0, 0),
            DaemonUser::Ceph { uid, gid } => (*uid, *gid),
        };
        chown(path, Some(uid), Some(gid)).map_err(|e| Error::resource("chown", path, e))
    }
}

/// uid and gid of `user` from passwd-format text
pub fn lookup_passwd(text: &str, user: &str) -> Option<(u32, u32)> {
    text.lines()
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 4 || fields[0] != user {
                return None;
            }
            Some((fields[2].parse().ok()?, fields[3].parse().ok()?))
        })
}

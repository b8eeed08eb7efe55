//! Keyring Authority
//!
//! Per-role cephx keyrings: where each lives, which principal and
//! capabilities it carries, and how it is generated, persisted, authorized
//! against the cluster, and removed. A keyring on disk is never regenerated
//! or overwritten.

pub mod format;

pub use format::{canonicalize, is_valid_secret};

use crate::config::NodeLayout;
use crate::context::NodeContext;
use crate::controllers::mon::ensure_in_quorum;
use crate::domain::ports::CommandLine;
use crate::error::{Error, Result};
use crate::idempotent::{ensure_file, read_or_create, remove_file_if_present, Ensured};
use crate::model::NodeModel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

// =============================================================================
// Roles
// =============================================================================

/// Keyring roles the node manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyringRole {
    Admin,
    Mon,
    Osd,
    Mds,
    Rgw,
}

impl KeyringRole {
    pub const ALL: [KeyringRole; 5] = [
        KeyringRole::Admin,
        KeyringRole::Mon,
        KeyringRole::Osd,
        KeyringRole::Mds,
        KeyringRole::Rgw,
    ];

    /// Order in which keyrings are tried when connecting to the cluster
    pub const CONNECT_ORDER: [KeyringRole; 5] = [
        KeyringRole::Admin,
        KeyringRole::Osd,
        KeyringRole::Mds,
        KeyringRole::Rgw,
        KeyringRole::Mon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyringRole::Admin => "admin",
            KeyringRole::Mon => "mon",
            KeyringRole::Osd => "osd",
            KeyringRole::Mds => "mds",
            KeyringRole::Rgw => "rgw",
        }
    }

    /// cephx entity the keyring authenticates as
    pub fn principal(&self) -> &'static str {
        match self {
            KeyringRole::Admin => "client.admin",
            KeyringRole::Mon => "mon.",
            KeyringRole::Osd => "client.bootstrap-osd",
            KeyringRole::Mds => "client.bootstrap-mds",
            KeyringRole::Rgw => "client.bootstrap-rgw",
        }
    }

    /// `(service, capability)` grants, in the order they are passed to the tool
    pub fn capabilities(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            KeyringRole::Admin => &[("mon", "allow *"), ("mds", "allow *"), ("osd", "allow *")],
            KeyringRole::Mon => &[("mon", "allow *")],
            KeyringRole::Osd => &[("mon", "allow profile bootstrap-osd")],
            KeyringRole::Mds => &[("mon", "allow profile bootstrap-mds")],
            KeyringRole::Rgw => &[("mon", "allow profile bootstrap-rgw")],
        }
    }

    /// Whether the keyring may be imported into or deleted from the cluster auth database
    pub fn may_authorize(&self) -> bool {
        !matches!(self, KeyringRole::Admin | KeyringRole::Mon)
    }

    /// Canonical keyring location
    ///
    /// The monitor keyring moves from the bootstrap directory into the
    /// monitor's data directory once the monitor has been provisioned.
    pub fn path(&self, layout: &NodeLayout, cluster: &str, hostname: Option<&str>) -> Result<PathBuf> {
        Ok(match self {
            KeyringRole::Admin => layout.admin_keyring(cluster),
            KeyringRole::Osd => layout.osd_bootstrap_keyring(cluster),
            KeyringRole::Mds => layout.mds_bootstrap_keyring(cluster),
            KeyringRole::Rgw => layout.rgw_bootstrap_keyring(cluster),
            KeyringRole::Mon => {
                let hostname = hostname.ok_or(Error::MissingParameter("hostname"))?;
                if layout.mon_done_file(cluster, hostname).is_file() {
                    layout.mon_keyring(cluster, hostname)
                } else {
                    layout.mon_bootstrap_keyring(cluster, hostname)
                }
            }
        })
    }
}

impl fmt::Display for KeyringRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for KeyringRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        KeyringRole::ALL
            .into_iter()
            .find(|r| r.as_str() == s.to_lowercase())
            .ok_or_else(|| Error::InvalidValue {
                field: "keyring_type",
                value: s.to_string(),
            })
    }
}

// =============================================================================
// Keyring
// =============================================================================

/// One role's keyring for one cluster on this host
pub struct Keyring<'a> {
    ctx: &'a NodeContext,
    role: KeyringRole,
    cluster: String,
    hostname: Option<String>,
}

/// Build the keyring handle for `role`
///
/// The monitor role is bound to a host and fails without a hostname.
pub fn make<'a>(
    ctx: &'a NodeContext,
    role: KeyringRole,
    cluster: &str,
    hostname: Option<&str>,
) -> Result<Keyring<'a>> {
    if cluster.is_empty() {
        return Err(Error::MissingParameter("cluster_name"));
    }
    if role == KeyringRole::Mon && hostname.is_none() {
        return Err(Error::MissingParameter("hostname"));
    }
    Ok(Keyring {
        ctx,
        role,
        cluster: cluster.to_string(),
        hostname: hostname.map(str::to_string),
    })
}

impl<'a> Keyring<'a> {
    pub fn role(&self) -> KeyringRole {
        self.role
    }

    pub fn principal(&self) -> &'static str {
        self.role.principal()
    }

    pub fn path(&self) -> Result<PathBuf> {
        self.role
            .path(self.ctx.layout(), &self.cluster, self.hostname.as_deref())
    }

    pub fn present(&self) -> bool {
        self.path().map(|p| p.is_file()).unwrap_or(false)
    }

    fn creation_command(&self, target: &Path, secret: Option<&str>) -> CommandLine {
        let mut command = CommandLine::new(&self.ctx.tools().ceph_authtool)
            .arg("--create-keyring")
            .arg(target.to_string_lossy());
        command = match secret {
            Some(secret) => command.args(["--add-key", secret]),
            None => command.arg("--gen-key"),
        };
        command = command.args(["-n", self.principal()]);
        if self.role == KeyringRole::Admin {
            command = command.arg("--set-uid=0");
        }
        for (service, capability) in self.role.capabilities() {
            command = command.args(["--cap", service, capability]);
        }
        command
    }

    /// Keyring text for this role
    ///
    /// An existing keyring is returned as it is. Otherwise a new one is
    /// generated in a scratch directory, from `secret` when given, and
    /// returned without being saved.
    pub async fn create(&self, secret: Option<&str>) -> Result<String> {
        if let Some(secret) = secret {
            if !is_valid_secret(secret) {
                return Err(Error::InvalidValue {
                    field: "secret",
                    value: "<redacted>".into(),
                });
            }
        }
        let path = self.path()?;
        read_or_create(&path, || self.generate(secret)).await
    }

    async fn generate(&self, secret: Option<&str>) -> Result<String> {
        let root = self.ctx.layout().scratch_root();
        fs::create_dir_all(&root).map_err(|e| Error::resource("create directory", &root, e))?;
        let scratch = tempfile::Builder::new()
            .prefix("ceph-keyring.")
            .tempdir_in(&root)
            .map_err(|e| Error::resource("create scratch directory in", &root, e))?;
        let target = scratch.path().join("keyring");

        info!("Generating {} keyring for {}", self.role, self.cluster);
        self.ctx.run(&self.creation_command(&target, secret)).await?;
        let text = fs::read_to_string(&target).map_err(|e| Error::resource("read", &target, e))?;
        scratch
            .close()
            .map_err(|e| Error::resource("remove", &root, e))?;
        Ok(text)
    }

    /// Save keyring text at the canonical path unless something is already there
    pub fn write(&self, content: &str) -> Result<Ensured> {
        if format::sections(content).is_empty() {
            return Err(Error::InvalidValue {
                field: "keyring",
                value: "no [section] header".into(),
            });
        }
        let path = self.path()?;
        let outcome = ensure_file(&path, canonicalize(content).as_bytes())?;
        if outcome.created() {
            info!("Saved {} keyring to {}", self.role, path.display());
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
                .map_err(|e| Error::resource("set permissions on", &path, e))?;
        } else {
            debug!("{} keyring already present at {}", self.role, path.display());
        }
        Ok(outcome)
    }

    /// Create from `secret` and save in one step
    pub async fn create_and_save(&self, secret: &str) -> Result<Ensured> {
        let text = self.create(Some(secret)).await?;
        self.write(&text)
    }

    /// Delete the keyring file; absence is fine, failure to delete is not
    pub fn remove(&self) -> Result<bool> {
        let path = self.path()?;
        let removed = remove_file_if_present(&path)?;
        if removed {
            info!("Removed {} keyring {}", self.role, path.display());
        }
        Ok(removed)
    }

    fn require_authorizable(&self, operation: &str) -> Result<PathBuf> {
        if !self.role.may_authorize() {
            return Err(Error::RoleNotPermitted {
                role: self.role.to_string(),
                operation: operation.to_string(),
            });
        }
        let path = self.path()?;
        if !path.is_file() {
            return Err(Error::KeyringMissing { path });
        }
        Ok(path)
    }

    /// Import the keyring into the cluster auth database through the local monitor
    pub async fn auth_add(&self, model: &mut NodeModel) -> Result<()> {
        let path = self.require_authorizable("auth add")?;
        ensure_in_quorum(self.ctx, model).await?;
        let command = CommandLine::new(&self.ctx.tools().ceph)
            .args(["--cluster", &self.cluster])
            .args(["auth", "import", "-i"])
            .arg(path.to_string_lossy());
        self.ctx.run(&command).await?;
        info!("Authorized {}", self.principal());
        Ok(())
    }

    /// Delete the principal from the cluster auth database through the local monitor
    pub async fn auth_del(&self, model: &mut NodeModel) -> Result<()> {
        self.require_authorizable("auth del")?;
        ensure_in_quorum(self.ctx, model).await?;
        let command = CommandLine::new(&self.ctx.tools().ceph)
            .args(["--cluster", &self.cluster])
            .args(["auth", "del", self.principal()]);
        self.ctx.run(&command).await?;
        info!("Revoked {}", self.principal());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperatorConfig;
    use crate::domain::ports::CommandOutput;
    use crate::exec::mock::ScriptedExecutor;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    const KEY: &str = "AQA/vZ9WyDwsKRAAxQ6wjGJH6WV8fDJeyzxHrg==";

    fn context(root: &Path, exec: Arc<ScriptedExecutor>) -> NodeContext {
        NodeContext::new(
            exec,
            OperatorConfig {
                layout: NodeLayout::rooted(root),
                ..Default::default()
            },
        )
    }

    fn authtool() -> Arc<ScriptedExecutor> {
        Arc::new(ScriptedExecutor::new())
    }

    #[test]
    fn test_role_bindings() {
        assert_eq!(KeyringRole::Osd.principal(), "client.bootstrap-osd");
        assert_eq!(
            KeyringRole::Osd.capabilities(),
            &[("mon", "allow profile bootstrap-osd")]
        );
        assert_eq!(KeyringRole::Admin.capabilities().len(), 3);
        assert!(!KeyringRole::Admin.may_authorize());
        assert!(KeyringRole::Rgw.may_authorize());
        assert_eq!("MDS".parse::<KeyringRole>().unwrap(), KeyringRole::Mds);
        assert!("client".parse::<KeyringRole>().is_err());
    }

    #[test]
    fn test_mon_path_follows_done_sentinel() {
        let root = tempfile::tempdir().unwrap();
        let layout = NodeLayout::rooted(root.path());
        let before = KeyringRole::Mon.path(&layout, "ceph", Some("a")).unwrap();
        assert_eq!(before, layout.mon_bootstrap_keyring("ceph", "a"));

        fs::create_dir_all(layout.mon_data_dir("ceph", "a")).unwrap();
        fs::write(layout.mon_done_file("ceph", "a"), "").unwrap();
        let after = KeyringRole::Mon.path(&layout, "ceph", Some("a")).unwrap();
        assert_eq!(after, layout.mon_keyring("ceph", "a"));

        assert_matches!(
            KeyringRole::Mon.path(&layout, "ceph", None),
            Err(Error::MissingParameter("hostname"))
        );
    }

    #[test]
    fn test_creation_command() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), authtool());

        let admin = make(&ctx, KeyringRole::Admin, "ceph", None).unwrap();
        let cmd = admin.creation_command(Path::new("/tmp/k"), None);
        assert_eq!(
            cmd.argv(),
            &[
                "ceph-authtool", "--create-keyring", "/tmp/k", "--gen-key", "-n", "client.admin",
                "--set-uid=0", "--cap", "mon", "allow *", "--cap", "mds", "allow *", "--cap",
                "osd", "allow *",
            ]
        );

        let mon = make(&ctx, KeyringRole::Mon, "ceph", Some("a")).unwrap();
        let cmd = mon.creation_command(Path::new("/tmp/k"), Some(KEY));
        assert_eq!(&cmd.argv()[3..7], &["--add-key", KEY, "-n", "mon."]);
    }

    #[test]
    fn test_make_requires_hostname_for_mon() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), authtool());
        assert!(make(&ctx, KeyringRole::Mon, "ceph", None).is_err());
        assert!(make(&ctx, KeyringRole::Osd, "", None).is_err());
    }

    #[tokio::test]
    async fn test_create_returns_existing_without_tool() {
        let root = tempfile::tempdir().unwrap();
        let exec = authtool();
        let ctx = context(root.path(), exec.clone());
        let keyring = make(&ctx, KeyringRole::Osd, "ceph", None).unwrap();

        let path = keyring.path().unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "[client.bootstrap-osd]\n\tkey = x\n").unwrap();

        let first = keyring.create(None).await.unwrap();
        let second = keyring.create(None).await.unwrap();
        assert_eq!(first, second);
        assert!(exec.calls().is_empty());
    }

    #[tokio::test]
    async fn test_generate_then_write() {
        let root = tempfile::tempdir().unwrap();
        let exec = authtool();
        exec.on_effect(&["ceph-authtool", "--create-keyring"], |argv| {
            fs::write(&argv[2], "[client.bootstrap-osd]\n\tkey = AQBHCbtT4GxqORAADE5u7RkpCN/oo4e5W0uBtw==\n")
                .unwrap();
        });
        let ctx = context(root.path(), exec.clone());
        let keyring = make(&ctx, KeyringRole::Osd, "ceph", None).unwrap();

        let text = keyring.create(None).await.unwrap();
        assert!(text.starts_with("[client.bootstrap-osd]"));
        assert!(!keyring.present());
        assert_eq!(fs::read_dir(root.path().join("tmp")).unwrap().count(), 0);

        assert!(keyring.write(&text).unwrap().created());
        assert!(keyring.present());
        // second create reads the saved file instead of running the tool
        assert_eq!(keyring.create(None).await.unwrap(), text);
        assert_eq!(exec.calls_matching(&["ceph-authtool"]).len(), 1);
    }

    #[tokio::test]
    async fn test_generation_failure_cleans_scratch() {
        let root = tempfile::tempdir().unwrap();
        let exec = authtool();
        exec.on(&["ceph-authtool"], CommandOutput::failed(1, "bad cap"));
        let ctx = context(root.path(), exec.clone());
        let keyring = make(&ctx, KeyringRole::Mds, "ceph", None).unwrap();

        let err = keyring.create(None).await.unwrap_err();
        assert_matches!(err, Error::CommandFailed { exit_code: 1, .. });
        assert_eq!(fs::read_dir(root.path().join("tmp")).unwrap().count(), 0);
        assert!(!keyring.present());
    }

    #[tokio::test]
    async fn test_invalid_secret_rejected_before_tool() {
        let root = tempfile::tempdir().unwrap();
        let exec = authtool();
        let ctx = context(root.path(), exec.clone());
        let keyring = make(&ctx, KeyringRole::Mon, "ceph", Some("a")).unwrap();

        let err = keyring.create_and_save("not a key").await.unwrap_err();
        assert_matches!(err, Error::InvalidValue { field: "secret", .. });
        assert!(exec.calls().is_empty());
    }

    #[test]
    fn test_write_is_no_clobber_and_canonical() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), authtool());
        let keyring = make(&ctx, KeyringRole::Admin, "ceph", None).unwrap();

        let outcome = keyring
            .write("[client.admin]\nkey = AAAA\ncaps mon = \"allow *\"\n")
            .unwrap();
        assert!(outcome.created());
        let outcome = keyring.write("[client.admin]\nkey = BBBB\n").unwrap();
        assert_eq!(outcome, Ensured::AlreadyPresent);

        let saved = fs::read_to_string(keyring.path().unwrap()).unwrap();
        assert_eq!(saved, "[client.admin]\n\tkey = AAAA\n\tcaps mon = \"allow *\"\n");
        let mode = fs::metadata(keyring.path().unwrap()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        assert!(keyring.write("key = CCCC").is_err());
    }

    #[test]
    fn test_remove() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), authtool());
        let keyring = make(&ctx, KeyringRole::Rgw, "ceph", None).unwrap();

        assert!(!keyring.remove().unwrap());
        keyring.write("[client.bootstrap-rgw]\nkey = x\n").unwrap();
        assert!(keyring.remove().unwrap());
        assert!(!keyring.present());
    }

    #[tokio::test]
    async fn test_auth_add_refused_for_admin() {
        let root = tempfile::tempdir().unwrap();
        let exec = authtool();
        let ctx = context(root.path(), exec.clone());
        let keyring = make(&ctx, KeyringRole::Admin, "ceph", None).unwrap();

        let err = keyring.auth_add(&mut NodeModel::default()).await.unwrap_err();
        assert_matches!(err, Error::RoleNotPermitted { .. });
        assert!(exec.calls().is_empty());
    }

    #[tokio::test]
    async fn test_auth_add_requires_keyring() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), authtool());
        let keyring = make(&ctx, KeyringRole::Osd, "ceph", None).unwrap();

        let err = keyring.auth_add(&mut NodeModel::default()).await.unwrap_err();
        assert_matches!(err, Error::KeyringMissing { .. });
    }
}

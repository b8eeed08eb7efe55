//! Remote Cluster Query
//!
//! Authenticated administrative calls against the live cluster. The first
//! local keyring that can fetch the cluster status becomes the identity for
//! every later call in the session.

use crate::context::NodeContext;
use crate::domain::ports::CommandLine;
use crate::error::{Error, Result};
use crate::keyring::KeyringRole;
use crate::model::{AuthEntry, NodeModel, PoolInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Principal and keyring that authenticated against the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub role: KeyringRole,
    pub name: String,
    pub keyring: PathBuf,
    pub connect_timeout_secs: u64,
}

// =============================================================================
// Pool Options
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolType {
    Replicated,
    Erasure,
}

impl fmt::Display for PoolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolType::Replicated => write!(f, "replicated"),
            PoolType::Erasure => write!(f, "erasure"),
        }
    }
}

impl FromStr for PoolType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "replicated" => Ok(PoolType::Replicated),
            "erasure" => Ok(PoolType::Erasure),
            other => Err(Error::InvalidValue {
                field: "pool_type",
                value: other.to_string(),
            }),
        }
    }
}

/// How a new pool is laid out
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolOptions {
    /// Placement groups; the configured default when unset
    pub pg_num: Option<u32>,
    /// Defaults to `pg_num`
    pub pgp_num: Option<u32>,
    pub pool_type: Option<PoolType>,
    pub erasure_code_profile: Option<String>,
    pub crush_ruleset: Option<String>,
}

impl PoolOptions {
    pub fn with_pg_num(pg_num: u32) -> Self {
        Self {
            pg_num: Some(pg_num),
            ..Default::default()
        }
    }

    fn create_arguments(&self, name: &str, default_pg_num: u32) -> Vec<String> {
        let pg_num = self.pg_num.unwrap_or(default_pg_num);
        let pgp_num = self.pgp_num.unwrap_or(pg_num);
        let mut args = vec![
            "osd".to_string(),
            "pool".into(),
            "create".into(),
            name.into(),
            pg_num.to_string(),
            pgp_num.to_string(),
        ];
        match self.pool_type {
            Some(PoolType::Replicated) => args.push("replicated".into()),
            Some(PoolType::Erasure) => {
                args.push("erasure".into());
                if let Some(profile) = &self.erasure_code_profile {
                    args.push(format!("erasure-code-profile={profile}"));
                }
            }
            None => {}
        }
        if let Some(ruleset) = &self.crush_ruleset {
            args.push(ruleset.clone());
        }
        args
    }
}

// =============================================================================
// Output Parsing
// =============================================================================

#[derive(Deserialize)]
struct LsPoolsEntry {
    poolnum: i64,
    poolname: String,
}

/// Parse `ceph -f json osd lspools`
pub fn parse_pool_list(stdout: &str) -> Result<BTreeMap<String, PoolInfo>> {
    let entries: Vec<LsPoolsEntry> = serde_json::from_str(stdout.trim())?;
    Ok(entries
        .into_iter()
        .map(|e| (e.poolname, PoolInfo { poolnum: e.poolnum }))
        .collect())
}

/// Parse the plain-text `ceph auth list`
///
/// Entity names start at column zero; their `key:` and `caps:` lines are
/// tab-indented beneath them.
pub fn parse_auth_list(stdout: &str) -> BTreeMap<String, AuthEntry> {
    let mut entries = BTreeMap::new();
    let mut current: Option<(String, AuthEntry)> = None;

    for line in stdout.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if !line.starts_with(char::is_whitespace) {
            if let Some((name, entry)) = current.take() {
                entries.insert(name, entry);
            }
            // header printed by newer releases
            if line.ends_with(':') {
                continue;
            }
            current = Some((line.trim().to_string(), AuthEntry::default()));
            continue;
        }
        let Some((_, entry)) = current.as_mut() else {
            continue;
        };
        let line = line.trim();
        if let Some(key) = line.strip_prefix("key:") {
            entry.key = Some(key.trim().to_string());
        } else if let Some(cap) = line.strip_prefix("caps:") {
            let cap = cap.trim();
            let (service, grant) = cap.split_once(' ').unwrap_or((cap, ""));
            entry.caps.push(vec![
                service.trim_matches(|c| c == '[' || c == ']').to_string(),
                grant.trim().to_string(),
            ]);
        }
    }
    if let Some((name, entry)) = current {
        entries.insert(name, entry);
    }
    entries
}

// =============================================================================
// Remote Cluster
// =============================================================================

/// Session against the live cluster
pub struct RemoteCluster<'a> {
    ctx: &'a NodeContext,
    cluster: String,
    identity: Option<Identity>,
}

impl<'a> RemoteCluster<'a> {
    pub fn new(ctx: &'a NodeContext, cluster: &str) -> Self {
        Self {
            ctx,
            cluster: cluster.to_string(),
            identity: None,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    fn authenticated(&self, role: KeyringRole, keyring: &Path) -> CommandLine {
        CommandLine::new(&self.ctx.tools().ceph)
            .arg("--connect-timeout")
            .arg(self.ctx.config.connect_timeout_secs.to_string())
            .args(["--cluster", &self.cluster])
            .arg("--keyring")
            .arg(keyring.to_string_lossy())
            .args(["--name", role.principal()])
    }

    fn command(&self) -> Result<CommandLine> {
        let identity = self.identity.as_ref().ok_or(Error::NotConnected)?;
        Ok(self.authenticated(identity.role, &identity.keyring))
    }

    /// Find a keyring the cluster accepts
    ///
    /// Roles are tried in [`KeyringRole::CONNECT_ORDER`]; roles without a
    /// keyring on this host are skipped. Returns `false` when none
    /// authenticates.
    pub async fn connect(&mut self, model: &mut NodeModel) -> Result<bool> {
        for role in KeyringRole::CONNECT_ORDER {
            let Ok(keyring) = role.path(self.ctx.layout(), &self.cluster, model.hostname.as_deref())
            else {
                continue;
            };
            if !keyring.is_file() {
                debug!("Skipping keyring {}", keyring.display());
                continue;
            }

            let command = self
                .authenticated(role, &keyring)
                .args(["-f", "json-pretty", "status"]);
            let output = self.ctx.run_unchecked(&command).await?;
            if !output.success() {
                debug!("{} could not connect: {}", role.principal(), output.stderr.trim());
                continue;
            }
            let Ok(status) = serde_json::from_str::<serde_json::Value>(output.stdout.trim()) else {
                debug!("{} returned unreadable status", role.principal());
                continue;
            };

            info!("Connected to {} as {}", self.cluster, role.principal());
            model.cluster_status = Some(status);
            self.identity = Some(Identity {
                role,
                name: role.principal().to_string(),
                keyring,
                connect_timeout_secs: self.ctx.config.connect_timeout_secs,
            });
            return Ok(true);
        }
        Ok(false)
    }

    /// Connect if needed and fail when nothing authenticates
    pub async fn ensure_connected(&mut self, model: &mut NodeModel) -> Result<()> {
        if self.identity.is_some() || self.connect(model).await? {
            return Ok(());
        }
        Err(Error::NotConnected)
    }

    /// Refetch the cluster status with the established identity
    pub async fn status_refresh(&self, model: &mut NodeModel) -> Result<()> {
        let command = self.command()?.args(["-f", "json-pretty", "status"]);
        let output = self.ctx.run(&command).await?;
        model.cluster_status = Some(serde_json::from_str(output.stdout.trim())?);
        Ok(())
    }

    pub async fn pool_list(&self, model: &mut NodeModel) -> Result<()> {
        let command = self.command()?.args(["-f", "json", "osd", "lspools"]);
        let output = self.ctx.run(&command).await?;
        model.pool_list = parse_pool_list(&output.stdout)?;
        Ok(())
    }

    /// Create a pool unless the last pool listing already had it
    ///
    /// Returns whether a pool was created.
    pub async fn pool_add(&self, model: &mut NodeModel, name: &str, options: &PoolOptions) -> Result<bool> {
        let mut command = self.command()?;
        if model.pool_list.contains_key(name) {
            debug!("Pool {} already exists", name);
            return Ok(false);
        }
        command = command.args(options.create_arguments(name, self.ctx.config.default_pool_pg_num));
        self.ctx.run(&command).await?;
        info!("Created pool {}", name);
        Ok(true)
    }

    /// Delete a pool if the last pool listing had it
    pub async fn pool_del(&self, model: &mut NodeModel, name: &str) -> Result<bool> {
        let command = self.command()?;
        if !model.pool_list.contains_key(name) {
            debug!("Pool {} does not exist", name);
            return Ok(false);
        }
        let command = command
            .args(["osd", "pool", "delete", name, name])
            .arg("--yes-i-really-really-mean-it");
        self.ctx.run(&command).await?;
        model.pool_list.remove(name);
        info!("Deleted pool {}", name);
        Ok(true)
    }

    pub async fn auth_list(&self, model: &mut NodeModel) -> Result<()> {
        let command = self.command()?.args(["auth", "list"]);
        let output = self.ctx.run(&command).await?;
        model.auth_list = parse_auth_list(&output.stdout);
        Ok(())
    }

    /// Import a keyring file into the auth database
    pub async fn auth_add(&self, keyring: &Path) -> Result<()> {
        let command = self
            .command()?
            .args(["auth", "import", "-i"])
            .arg(keyring.to_string_lossy());
        self.ctx.run(&command).await?;
        Ok(())
    }

    pub async fn auth_del(&self, principal: &str) -> Result<()> {
        let command = self.command()?.args(["auth", "del", principal]);
        self.ctx.run(&command).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NodeLayout, OperatorConfig};
    use crate::domain::ports::CommandOutput;
    use crate::exec::mock::ScriptedExecutor;
    use assert_matches::assert_matches;
    use std::fs;
    use std::sync::Arc;

    const AUTH_LIST: &str = "installed auth entries:

osd.0
\tkey: AQCvCbtToC6MDhAATtuT70Sl+DymPCfDSsyV4w==
\tcaps: [mon] allow profile osd
\tcaps: [osd] allow *
client.admin
\tkey: AQBHCbtT6APDHhAA5W00cBchwkQjh3dkKsyPjw==
\tcaps: [mds] allow
\tcaps: [mon] allow *
\tcaps: [osd] allow *
client.bootstrap-osd
\tkey: AQBHCbtT4GxqORAADE5u7RkpCN/oo4e5W0uBtw==
\tcaps: [mon] allow profile bootstrap-osd
";

    fn setup(keyrings: &[KeyringRole]) -> (tempfile::TempDir, Arc<ScriptedExecutor>, NodeContext) {
        let root = tempfile::tempdir().unwrap();
        let layout = NodeLayout::rooted(root.path());
        for role in keyrings {
            let path = role.path(&layout, "ceph", Some("a")).unwrap();
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, format!("[{}]\n\tkey = x\n", role.principal())).unwrap();
        }
        let exec = Arc::new(ScriptedExecutor::new());
        let ctx = NodeContext::new(
            exec.clone(),
            OperatorConfig {
                layout,
                ..Default::default()
            },
        );
        (root, exec, ctx)
    }

    #[test]
    fn test_parse_auth_list() {
        let entries = parse_auth_list(AUTH_LIST);
        assert_eq!(entries.len(), 3);
        let osd = &entries["osd.0"];
        assert_eq!(osd.key.as_deref(), Some("AQCvCbtToC6MDhAATtuT70Sl+DymPCfDSsyV4w=="));
        assert_eq!(
            osd.caps,
            vec![
                vec!["mon".to_string(), "allow profile osd".to_string()],
                vec!["osd".to_string(), "allow *".to_string()],
            ]
        );
        assert_eq!(entries["client.admin"].caps.len(), 3);
    }

    #[test]
    fn test_parse_pool_list() {
        let pools = parse_pool_list(r#"[{"poolnum":0,"poolname":"rbd"},{"poolnum":3,"poolname":".rgw"}]"#).unwrap();
        assert_eq!(pools[".rgw"].poolnum, 3);
        assert!(parse_pool_list("not json").is_err());
    }

    #[test]
    fn test_create_arguments() {
        let args = PoolOptions::default().create_arguments("data", 8);
        assert_eq!(args, ["osd", "pool", "create", "data", "8", "8"]);

        let options = PoolOptions {
            pg_num: Some(64),
            pgp_num: Some(32),
            pool_type: Some(PoolType::Erasure),
            erasure_code_profile: Some("k4m2".into()),
            crush_ruleset: Some("ec-rule".into()),
        };
        assert_eq!(
            options.create_arguments("ec", 8),
            ["osd", "pool", "create", "ec", "64", "32", "erasure", "erasure-code-profile=k4m2", "ec-rule"]
        );
    }

    #[tokio::test]
    async fn test_connect_tries_roles_in_order() {
        let (_root, exec, ctx) = setup(&[KeyringRole::Admin, KeyringRole::Osd]);
        let admin = ctx.layout().admin_keyring("ceph");
        let admin = admin.to_string_lossy();
        exec.on(&["ceph", "--connect-timeout"], CommandOutput::ok(r#"{"fsid": "f00d"}"#));
        exec.on(
            &["ceph", "--connect-timeout", "5", "--cluster", "ceph", "--keyring", &admin],
            CommandOutput::failed(13, "permission denied"),
        );

        let mut model = NodeModel::default();
        let mut remote = RemoteCluster::new(&ctx, "ceph");
        assert!(remote.connect(&mut model).await.unwrap());

        let identity = remote.identity().unwrap();
        assert_eq!(identity.role, KeyringRole::Osd);
        assert_eq!(identity.name, "client.bootstrap-osd");
        assert_eq!(model.cluster_status.unwrap()["fsid"], "f00d");
        // mds, rgw, mon keyrings are absent and never tried
        assert_eq!(exec.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_connect_without_keyrings() {
        let (_root, exec, ctx) = setup(&[]);
        let mut model = NodeModel::default();
        let mut remote = RemoteCluster::new(&ctx, "ceph");
        assert!(!remote.connect(&mut model).await.unwrap());
        assert!(exec.calls().is_empty());
        assert!(!model.cluster_quorum());

        assert_matches!(remote.pool_list(&mut model).await, Err(Error::NotConnected));
        assert_matches!(remote.ensure_connected(&mut model).await, Err(Error::NotConnected));
    }

    #[tokio::test]
    async fn test_pool_add_and_delete_are_idempotent() {
        let (_root, exec, ctx) = setup(&[KeyringRole::Admin]);
        exec.on(&["ceph", "--connect-timeout"], CommandOutput::ok("{}"));
        let mut model = NodeModel::default();
        let mut remote = RemoteCluster::new(&ctx, "ceph");
        remote.ensure_connected(&mut model).await.unwrap();

        model.pool_list.insert("rbd".into(), PoolInfo { poolnum: 0 });
        assert!(!remote.pool_add(&mut model, "rbd", &PoolOptions::default()).await.unwrap());
        assert!(remote
            .pool_add(&mut model, "data", &PoolOptions::with_pg_num(16))
            .await
            .unwrap());
        assert!(!remote.pool_del(&mut model, "data").await.unwrap());
        assert!(remote.pool_del(&mut model, "rbd").await.unwrap());
        assert!(model.pool_list.is_empty());

        let creates: Vec<_> = exec
            .calls()
            .into_iter()
            .filter(|argv| argv.iter().any(|a| a == "create"))
            .collect();
        assert_eq!(creates.len(), 1);
        assert!(creates[0].ends_with(&["data".to_string(), "16".into(), "16".into()]));

        let deletes: Vec<_> = exec
            .calls()
            .into_iter()
            .filter(|argv| argv.iter().any(|a| a == "--yes-i-really-really-mean-it"))
            .collect();
        assert_eq!(deletes.len(), 1);
    }
}

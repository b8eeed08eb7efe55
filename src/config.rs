//! Operator Configuration
//!
//! Filesystem layout, tool names, and tunables. Every path the operator
//! touches hangs off [`NodeLayout`] so the whole node can be relocated into
//! a scratch tree.

use crate::error::{Error, Result};
use crate::service::InitSystem;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Filesystem Layout
// =============================================================================

/// Where the operator finds and keeps node state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeLayout {
    /// Cluster configuration and admin keyrings
    pub conf_dir: PathBuf,
    /// Daemon data directories and bootstrap keyrings
    pub lib_dir: PathBuf,
    /// Admin sockets
    pub run_dir: PathBuf,
    /// Stable device aliases (by-id, by-path, ...)
    pub disk_alias_dir: PathBuf,
    /// Kernel view of whole disks
    pub sys_block_dir: PathBuf,
    pub hostname_file: PathBuf,
    pub passwd_file: PathBuf,
    /// Parent directory for scratch mounts and key generation; system temp if unset
    pub scratch_dir: Option<PathBuf>,
}

impl Default for NodeLayout {
    fn default() -> Self {
        Self {
            conf_dir: PathBuf::from("/etc/ceph"),
            lib_dir: PathBuf::from("/var/lib/ceph"),
            run_dir: PathBuf::from("/var/run/ceph"),
            disk_alias_dir: PathBuf::from("/dev/disk"),
            sys_block_dir: PathBuf::from("/sys/block"),
            hostname_file: PathBuf::from("/etc/hostname"),
            passwd_file: PathBuf::from("/etc/passwd"),
            scratch_dir: None,
        }
    }
}

impl NodeLayout {
    /// Layout with every root placed under `root`, used for tests and chroots
    pub fn rooted(root: &Path) -> Self {
        Self {
            conf_dir: root.join("etc/ceph"),
            lib_dir: root.join("var/lib/ceph"),
            run_dir: root.join("var/run/ceph"),
            disk_alias_dir: root.join("dev/disk"),
            sys_block_dir: root.join("sys/block"),
            hostname_file: root.join("etc/hostname"),
            passwd_file: root.join("etc/passwd"),
            scratch_dir: Some(root.join("tmp")),
        }
    }

    pub fn cluster_conf(&self, cluster: &str) -> PathBuf {
        self.conf_dir.join(format!("{cluster}.conf"))
    }

    pub fn admin_keyring(&self, cluster: &str) -> PathBuf {
        self.conf_dir.join(format!("{cluster}.client.admin.keyring"))
    }

    pub fn mon_root(&self) -> PathBuf {
        self.lib_dir.join("mon")
    }

    pub fn osd_root(&self) -> PathBuf {
        self.lib_dir.join("osd")
    }

    pub fn mds_root(&self) -> PathBuf {
        self.lib_dir.join("mds")
    }

    pub fn rgw_root(&self) -> PathBuf {
        self.lib_dir.join("radosgw")
    }

    /// `<lib>/mon/<cluster>-<host>`
    pub fn mon_data_dir(&self, cluster: &str, hostname: &str) -> PathBuf {
        self.mon_root().join(format!("{cluster}-{hostname}"))
    }

    /// Sentinel written once a monitor has been fully provisioned
    pub fn mon_done_file(&self, cluster: &str, hostname: &str) -> PathBuf {
        self.mon_data_dir(cluster, hostname).join("done")
    }

    pub fn mon_keyring(&self, cluster: &str, hostname: &str) -> PathBuf {
        self.mon_data_dir(cluster, hostname).join("keyring")
    }

    pub fn mon_bootstrap_keyring(&self, cluster: &str, hostname: &str) -> PathBuf {
        self.lib_dir
            .join("bootstrap-mon")
            .join(format!("{cluster}-{hostname}.keyring"))
    }

    pub fn osd_bootstrap_keyring(&self, cluster: &str) -> PathBuf {
        self.lib_dir
            .join("bootstrap-osd")
            .join(format!("{cluster}.keyring"))
    }

    pub fn mds_bootstrap_keyring(&self, cluster: &str) -> PathBuf {
        self.lib_dir
            .join("bootstrap-mds")
            .join(format!("{cluster}.keyring"))
    }

    pub fn rgw_bootstrap_keyring(&self, cluster: &str) -> PathBuf {
        self.lib_dir
            .join("bootstrap-rgw")
            .join(format!("{cluster}.keyring"))
    }

    /// `<lib>/osd/<cluster>-<id>`
    pub fn osd_data_dir(&self, cluster: &str, osd_id: &str) -> PathBuf {
        self.osd_root().join(format!("{cluster}-{osd_id}"))
    }

    pub fn mon_admin_socket(&self, cluster: &str, hostname: &str) -> PathBuf {
        self.run_dir.join(format!("{cluster}-mon.{hostname}.asok"))
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

// =============================================================================
// Tool Names
// =============================================================================

/// Programs the operator shells out to, resolved through `PATH` unless absolute
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub lsblk: String,
    pub parted: String,
    pub sgdisk: String,
    pub partprobe: String,
    pub ceph_disk: String,
    pub ceph_authtool: String,
    pub ceph: String,
    pub ceph_mon: String,
    pub monmaptool: String,
    pub systemctl: String,
    pub service: String,
    pub chkconfig: String,
    pub mount: String,
    pub umount: String,
    pub sudo: String,
    pub hostname: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            lsblk: "lsblk".into(),
            parted: "parted".into(),
            sgdisk: "sgdisk".into(),
            partprobe: "partprobe".into(),
            ceph_disk: "ceph-disk".into(),
            ceph_authtool: "ceph-authtool".into(),
            ceph: "ceph".into(),
            ceph_mon: "ceph-mon".into(),
            monmaptool: "monmaptool".into(),
            systemctl: "systemctl".into(),
            service: "service".into(),
            chkconfig: "chkconfig".into(),
            mount: "mount".into(),
            umount: "umount".into(),
            sudo: "sudo".into(),
            hostname: "hostname".into(),
        }
    }
}

// =============================================================================
// Operator Configuration
// =============================================================================

/// Complete operator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    pub layout: NodeLayout,
    pub tools: ToolPaths,
    /// Init system managing daemon services
    pub init_system: InitSystem,
    /// Use this hostname instead of asking the host
    pub hostname: Option<String>,
    /// Cluster name used when neither name nor fsid is given
    pub default_cluster_name: String,
    /// `--connect-timeout` passed to authenticated cluster calls
    pub connect_timeout_secs: u64,
    /// Interval between monitor responsiveness checks
    #[serde(with = "duration_secs")]
    pub mon_poll_interval: Duration,
    /// Give up waiting for a new monitor after this long
    #[serde(with = "duration_secs")]
    pub mon_start_timeout: Duration,
    /// Placement groups for gateway pools created on demand
    pub rgw_pool_pg_num: u32,
    /// Placement groups when a pool is added without an explicit count
    pub default_pool_pg_num: u32,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            layout: NodeLayout::default(),
            tools: ToolPaths::default(),
            init_system: InitSystem::Systemd,
            hostname: None,
            default_cluster_name: "ceph".to_string(),
            connect_timeout_secs: 5,
            mon_poll_interval: Duration::from_secs(5),
            mon_start_timeout: Duration::from_secs(60),
            rgw_pool_pg_num: 16,
            default_pool_pg_num: 8,
        }
    }
}

impl OperatorConfig {
    /// Load configuration from a YAML file; absent keys keep their defaults
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::resource("read", path, e))?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: OperatorConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_cluster_name.trim().is_empty() {
            return Err(Error::Configuration(
                "default_cluster_name must not be empty".into(),
            ));
        }
        if self.mon_poll_interval.is_zero() {
            return Err(Error::Configuration(
                "mon_poll_interval must be greater than zero".into(),
            ));
        }
        if self.mon_poll_interval > self.mon_start_timeout {
            return Err(Error::Configuration(
                "mon_poll_interval must not exceed mon_start_timeout".into(),
            ));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

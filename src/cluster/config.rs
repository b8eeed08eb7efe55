//! Cluster Config Reader
//!
//! Parses `/etc/ceph/<cluster>.conf`, resolves the cluster name and fsid
//! from each other, and pairs up the initial monitor members.

use crate::config::NodeLayout;
use crate::error::{Error, Result};
use crate::model::{MonitorMember, NodeModel};
use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

// =============================================================================
// INI Document
// =============================================================================

/// A parsed ceph configuration file
///
/// Option names are normalized the way ceph reads them: case-insensitive,
/// with spaces and dashes equivalent to underscores.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CephConf {
    pub path: Option<PathBuf>,
    sections: IndexMap<String, IndexMap<String, String>>,
}

pub fn normalize_key(key: &str) -> String {
    key.trim()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

impl CephConf {
    pub fn parse(text: &str) -> Self {
        let mut sections: IndexMap<String, IndexMap<String, String>> = IndexMap::new();
        let mut current: Option<String> = None;

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = name.trim().to_lowercase();
                sections.entry(name.clone()).or_default();
                current = Some(name);
                continue;
            }
            let Some(section) = &current else {
                continue;
            };
            let Some((key, value)) = line.split_once('=').or_else(|| line.split_once(':')) else {
                continue;
            };
            let value = strip_inline_comment(value).trim().to_string();
            if let Some(options) = sections.get_mut(section) {
                options.insert(normalize_key(key), value);
            }
        }
        Self {
            path: None,
            sections,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::ConfigFileMissing {
                path: path.to_path_buf(),
            });
        }
        let text = fs::read_to_string(path).map_err(|e| Error::resource("read", path, e))?;
        let mut conf = Self::parse(&text);
        conf.path = Some(path.to_path_buf());
        Ok(conf)
    }

    pub fn get(&self, section: &str, option: &str) -> Option<&str> {
        self.sections
            .get(&section.to_lowercase())?
            .get(&normalize_key(option))
            .map(String::as_str)
    }

    /// Like [`CephConf::get`] but a missing option is an error
    pub fn require(&self, section: &str, option: &str) -> Result<&str> {
        self.get(section, option).ok_or_else(|| Error::ConfigOptionMissing {
            path: self.path.clone().unwrap_or_default(),
            section: section.to_string(),
            option: option.to_string(),
        })
    }

    pub fn fsid(&self) -> Option<&str> {
        self.get("global", "fsid")
    }
}

fn strip_inline_comment(value: &str) -> &str {
    match value.find([';', '#']) {
        Some(idx) => &value[..idx],
        None => value,
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// =============================================================================
// Cluster Identity
// =============================================================================

/// fsid recorded in the named cluster's config file
pub fn cluster_uuid_from_name(layout: &NodeLayout, cluster_name: &str) -> Result<String> {
    let conf = CephConf::load(&layout.cluster_conf(cluster_name))?;
    conf.require("global", "fsid").map(str::to_string)
}

/// Name of the cluster whose config file records `fsid`
pub fn cluster_name_from_uuid(layout: &NodeLayout, fsid: &str) -> Result<String> {
    let pattern = layout.conf_dir.join("*.conf");
    let pattern = pattern.to_string_lossy();
    let entries = glob::glob(&pattern).map_err(|e| Error::Configuration(e.to_string()))?;

    for path in entries.flatten() {
        let Ok(conf) = CephConf::load(&path) else {
            continue;
        };
        if conf.fsid() != Some(fsid) {
            continue;
        }
        if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
            debug!("Cluster {} found in {}", fsid, path.display());
            return Ok(name.to_string());
        }
    }
    Err(Error::ClusterNotFound {
        dir: layout.conf_dir.clone(),
        fsid: fsid.to_string(),
    })
}

/// Fill in whichever of cluster name and fsid is missing
///
/// With neither set the name falls back to `default_name`, and then the fsid
/// is read from that cluster's config like any other named cluster.
pub fn defaults_refresh(model: &mut NodeModel, layout: &NodeLayout, default_name: &str) -> Result<()> {
    if model.cluster_name.is_none() && model.cluster_uuid.is_none() {
        model.cluster_name = Some(default_name.to_string());
    }
    match (model.cluster_name.clone(), model.cluster_uuid.clone()) {
        (Some(name), None) => {
            model.cluster_uuid = Some(cluster_uuid_from_name(layout, &name)?);
        }
        (None, Some(fsid)) => {
            model.cluster_name = Some(cluster_name_from_uuid(layout, &fsid)?);
        }
        _ => {}
    }
    Ok(())
}

/// Resolve only the cluster name; the config file is read only when an fsid
/// alone was given
pub fn name_refresh(model: &mut NodeModel, layout: &NodeLayout, default_name: &str) -> Result<String> {
    if let Some(name) = &model.cluster_name {
        return Ok(name.clone());
    }
    let name = match &model.cluster_uuid {
        Some(fsid) => cluster_name_from_uuid(layout, fsid)?,
        None => default_name.to_string(),
    };
    model.cluster_name = Some(name.clone());
    Ok(name)
}

/// Load the cluster's config file into the model
pub fn load_conf(model: &mut NodeModel, layout: &NodeLayout) -> Result<()> {
    let name = model
        .cluster_name
        .as_deref()
        .ok_or(Error::MissingParameter("cluster_name"))?;
    model.conf = Some(CephConf::load(&layout.cluster_conf(name))?);
    Ok(())
}

/// Outcome of reading monitor membership
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// This host is an initial monitor; members are in the model
    Member,
    /// This host is not listed; members were not read
    NotMember,
}

/// Pair `mon_initial_members` with `mon_host` in order
pub fn mon_members(conf: &CephConf) -> Result<Vec<MonitorMember>> {
    let names = split_list(conf.require("global", "mon_initial_members")?);
    let addrs = split_list(conf.require("global", "mon_host")?);
    if names.len() != addrs.len() {
        return Err(Error::MonitorMembersMismatch {
            names: names.len(),
            addrs: addrs.len(),
        });
    }
    Ok(names
        .into_iter()
        .zip(addrs)
        .map(|(name, addr)| MonitorMember::new(name, addr))
        .collect())
}

/// Record the monitor members when this host is one of them
///
/// When the local host is not an initial member the address list is not
/// consulted at all and the model's member list is left empty.
pub fn mon_members_refresh(model: &mut NodeModel) -> Result<Membership> {
    let conf = model
        .conf
        .as_ref()
        .ok_or_else(|| Error::Configuration("cluster config not loaded".into()))?;
    let names = split_list(conf.require("global", "mon_initial_members")?);

    let hostname = model.hostname.as_deref().unwrap_or_default();
    if !names.iter().any(|n| n == hostname) {
        debug!("Mon not needed on {}", hostname);
        model.monitor_members.clear();
        return Ok(Membership::NotMember);
    }
    model.monitor_members = mon_members(conf)?;
    Ok(Membership::Member)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const CONF: &str = "\
[global]
fsid = 0a4e6fe7-8e16-4f57-a8c6-7e0a2e5f7c36
mon initial members = a, b ,c
mon_host = 10.0.0.1,10.0.0.2,10.0.0.3 ; three mons
auth-cluster-required = cephx

[osd]
osd journal size = 1024
";

    fn layout_with(confs: &[(&str, &str)]) -> (tempfile::TempDir, NodeLayout) {
        let root = tempfile::tempdir().unwrap();
        let layout = NodeLayout::rooted(root.path());
        fs::create_dir_all(&layout.conf_dir).unwrap();
        for (name, text) in confs {
            fs::write(layout.cluster_conf(name), text).unwrap();
        }
        (root, layout)
    }

    #[test]
    fn test_key_normalization() {
        let conf = CephConf::parse(CONF);
        assert_eq!(conf.get("global", "mon_initial_members"), Some("a, b ,c"));
        assert_eq!(conf.get("GLOBAL", "auth cluster required"), Some("cephx"));
        assert_eq!(conf.get("global", "mon host"), Some("10.0.0.1,10.0.0.2,10.0.0.3"));
        assert_eq!(conf.get("osd", "osd_journal_size"), Some("1024"));
        assert_eq!(conf.get("mon", "anything"), None);
    }

    #[test]
    fn test_members_for_member_host() {
        let mut model = NodeModel::default();
        model.hostname = Some("b".into());
        model.conf = Some(CephConf::parse(CONF));

        assert_eq!(mon_members_refresh(&mut model).unwrap(), Membership::Member);
        assert_eq!(
            model.monitor_members,
            vec![
                MonitorMember::new("a", "10.0.0.1"),
                MonitorMember::new("b", "10.0.0.2"),
                MonitorMember::new("c", "10.0.0.3"),
            ]
        );
        assert!(model.mon_is());
    }

    #[test]
    fn test_members_for_non_member_host() {
        let mut model = NodeModel::default();
        model.hostname = Some("z".into());
        model.conf = Some(CephConf::parse(
            "[global]\nmon_initial_members = a,b\nmon_host = 10.0.0.1\n",
        ));

        // mismatched lengths are not checked on a non-member
        assert_eq!(mon_members_refresh(&mut model).unwrap(), Membership::NotMember);
        assert!(model.monitor_members.is_empty());
        assert!(!model.mon_is());
    }

    #[test]
    fn test_members_length_mismatch() {
        let mut model = NodeModel::default();
        model.hostname = Some("a".into());
        model.conf = Some(CephConf::parse(
            "[global]\nmon_initial_members = a,b\nmon_host = 10.0.0.1\n",
        ));
        assert_matches!(
            mon_members_refresh(&mut model),
            Err(Error::MonitorMembersMismatch { names: 2, addrs: 1 })
        );
    }

    #[test]
    fn test_missing_members_option() {
        let mut model = NodeModel::default();
        model.hostname = Some("a".into());
        model.conf = Some(CephConf::parse("[global]\nfsid = x\n"));
        assert_matches!(
            mon_members_refresh(&mut model),
            Err(Error::ConfigOptionMissing { .. })
        );
    }

    #[test]
    fn test_defaults_refresh() {
        let (_root, layout) = layout_with(&[
            ("ceph", CONF),
            ("backup", "[global]\nfsid = 11111111-2222-3333-4444-555555555555\n"),
        ]);

        let mut model = NodeModel::default();
        defaults_refresh(&mut model, &layout, "ceph").unwrap();
        assert_eq!(model.cluster_name.as_deref(), Some("ceph"));
        assert_eq!(
            model.cluster_uuid.as_deref(),
            Some("0a4e6fe7-8e16-4f57-a8c6-7e0a2e5f7c36")
        );

        let mut model = NodeModel::new(None, Some("11111111-2222-3333-4444-555555555555".into()));
        defaults_refresh(&mut model, &layout, "ceph").unwrap();
        assert_eq!(model.cluster_name.as_deref(), Some("backup"));
    }

    #[test]
    fn test_defaults_refresh_errors() {
        let (_root, layout) = layout_with(&[("ceph", CONF)]);

        let mut model = NodeModel::new(Some("other".into()), None);
        assert_matches!(
            defaults_refresh(&mut model, &layout, "ceph"),
            Err(Error::ConfigFileMissing { .. })
        );

        let mut model = NodeModel::new(None, Some("no-such-fsid".into()));
        assert_matches!(
            defaults_refresh(&mut model, &layout, "ceph"),
            Err(Error::ClusterNotFound { .. })
        );
    }

    #[test]
    fn test_name_refresh_does_not_need_conf() {
        let (_root, layout) = layout_with(&[]);
        let mut model = NodeModel::default();
        assert_eq!(name_refresh(&mut model, &layout, "ceph").unwrap(), "ceph");
        assert_eq!(model.cluster_uuid, None);
    }
}

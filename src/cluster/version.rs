//! Ceph Version Detection

use crate::context::NodeContext;
use crate::domain::ports::CommandLine;
use crate::error::{Error, Result};
use crate::model::{CephVersion, NodeModel};
use tracing::debug;

/// Parse `ceph version 10.2.3 (ecc23778eb545d8dd55e2e4735b53cc93f92e65b)`
///
/// Newer releases append a codename and stability tag; anything after the
/// commit is ignored.
pub fn parse_version(stdout: &str) -> Result<CephVersion> {
    let raw = stdout.trim();
    let invalid = |reason: &str| Error::ToolOutput {
        tool: "ceph".into(),
        reason: format!("{reason}: '{raw}'"),
    };

    let tokens: Vec<&str> = raw.split_whitespace().collect();
    if tokens.len() < 4 {
        return Err(invalid("invalid version"));
    }
    if tokens[0] != "ceph" {
        return Err(invalid("first value is not 'ceph'"));
    }
    if tokens[1] != "version" {
        return Err(invalid("second value is not 'version'"));
    }

    let public: Vec<&str> = tokens[2].split('.').collect();
    if public.len() < 3 {
        return Err(invalid("version has fewer than three parts"));
    }
    let number = |s: &str| s.parse::<u32>().map_err(|_| invalid("non-numeric version"));
    Ok(CephVersion {
        major: number(public[0])?,
        minor: number(public[1])?,
        revision: public[2..].join("."),
        uuid: tokens[3].trim_matches(|c| c == '(' || c == ')').to_string(),
    })
}

/// Store the installed ceph version in the model
pub async fn ceph_version_refresh(ctx: &NodeContext, model: &mut NodeModel) -> Result<()> {
    let command = CommandLine::new(&ctx.tools().ceph).arg("--version");
    let output = ctx.run(&command).await?;
    let version = parse_version(&output.stdout)?;
    debug!("ceph {}.{}.{}", version.major, version.minor, version.revision);
    model.ceph_version = Some(version);
    Ok(())
}

//! lsblk Listing
//!
//! Version gating and parsing of `lsblk --pairs` output into disk and
//! partition records.

use crate::error::{Error, Result};
use crate::model::{DeviceAttributes, DiskRecord, PartitionRecord, ToolVersion};
use std::collections::BTreeMap;

/// Columns requested from lsblk releases that lack `PARTTYPE` in `--output-all`
pub const RESTRICTED_COLUMNS: &str =
    "NAME,FSTYPE,MOUNTPOINT,PARTLABEL,PARTUUID,PKNAME,ROTA,RQ-SIZE,SCHED,SIZE,TYPE,UUID,VENDOR";

/// Parse `lsblk --version`, e.g. `lsblk from util-linux 2.29.2`
pub fn parse_version(stdout: &str) -> Result<ToolVersion> {
    let text = stdout.trim();
    let invalid = || Error::ToolOutput {
        tool: "lsblk".into(),
        reason: format!("could not parse version string '{text}'"),
    };

    let token = text.split_whitespace().nth(3).ok_or_else(invalid)?;
    let mut parts = token.split('.');
    let mut next = |required: bool| -> Result<u32> {
        match parts.next() {
            Some(p) => p.parse().map_err(|_| invalid()),
            None if required => Err(invalid()),
            None => Ok(0),
        }
    };
    let major = next(true)?;
    let minor = next(false)?;
    let revision = next(false)?;
    Ok(ToolVersion::new(major, minor, revision))
}

/// Arguments for the listing, chosen by tool version
pub fn listing_arguments(version: &ToolVersion) -> Result<Vec<&'static str>> {
    let too_old = || Error::UnsupportedToolVersion {
        tool: "lsblk".into(),
        version: version.to_string(),
    };
    if version.major < 2 {
        return Err(too_old());
    }
    if version.major == 2 && version.minor < 23 {
        return Err(too_old());
    }
    if version.major == 2 && version.minor < 25 {
        return Ok(vec![
            "--ascii",
            "--output",
            RESTRICTED_COLUMNS,
            "--pairs",
            "--paths",
            "--bytes",
        ]);
    }
    Ok(vec!["--ascii", "--output-all", "--pairs", "--paths", "--bytes"])
}

/// Split one `KEY="value" KEY="value"` line into its pairs
///
/// lsblk escapes unsafe bytes as `\xNN` inside values; those are decoded.
/// Pairs with an empty value are dropped.
pub fn parse_pairs(line: &str) -> DeviceAttributes {
    let mut attributes = DeviceAttributes::new();
    let bytes = line.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let key_start = i;
        while i < bytes.len() && bytes[i] != b'=' && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] != b'=' {
            continue;
        }
        let key = &line[key_start..i];
        i += 1;

        let mut value = Vec::new();
        if i < bytes.len() && bytes[i] == b'"' {
            i += 1;
            while i < bytes.len() && bytes[i] != b'"' {
                if bytes[i] == b'\\' && i + 1 < bytes.len() {
                    if let Some(decoded) = decode_hex_escape(&bytes[i..]) {
                        value.push(decoded);
                        i += 4;
                        continue;
                    }
                    value.push(bytes[i + 1]);
                    i += 2;
                    continue;
                }
                value.push(bytes[i]);
                i += 1;
            }
            i += 1;
        } else {
            while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                value.push(bytes[i]);
                i += 1;
            }
        }

        if key.is_empty() || value.is_empty() {
            continue;
        }
        attributes.insert(key.to_string(), String::from_utf8_lossy(&value).into_owned());
    }
    attributes
}

fn decode_hex_escape(bytes: &[u8]) -> Option<u8> {
    if bytes.len() < 4 || bytes[1] != b'x' {
        return None;
    }
    let hex = std::str::from_utf8(&bytes[2..4]).ok()?;
    u8::from_str_radix(hex, 16).ok()
}

/// Disks keyed by device path, plus the partition to disk index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockListing {
    pub disks: BTreeMap<String, DiskRecord>,
    pub partition_parent: BTreeMap<String, String>,
}

/// Build disk and partition records from a full listing
///
/// Rows of type `disk` become disks. Every other row is attached to the
/// disk named by its `PKNAME`, and dropped when that disk has not been seen.
pub fn parse_listing(stdout: &str) -> BlockListing {
    let mut listing = BlockListing::default();

    for line in stdout.lines() {
        let attributes = parse_pairs(line);
        let Some(name) = attributes.get("NAME").cloned() else {
            continue;
        };

        if attributes.get("TYPE").map(String::as_str) == Some("disk") {
            listing.disks.insert(
                name.clone(),
                DiskRecord {
                    name,
                    attributes,
                    ..Default::default()
                },
            );
            continue;
        }

        let Some(parent) = attributes.get("PKNAME").cloned() else {
            continue;
        };
        let Some(disk) = listing.disks.get_mut(&parent) else {
            continue;
        };
        disk.partitions.insert(
            name.clone(),
            PartitionRecord {
                name: name.clone(),
                attributes,
            },
        );
        listing.partition_parent.insert(name, parent);
    }
    listing
}

//! Stable Device Aliases
//!
//! Index the udev alias trees by the device each link resolves to.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Alias trees worth indexing
pub const ALIAS_DIRS: &[&str] = &["by-path", "by-id", "by-uuid", "by-partuuid"];

/// Map each real device path to the aliases that point at it
pub fn scan_aliases(alias_root: &Path) -> BTreeMap<String, BTreeSet<String>> {
    let mut links: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for dir in ALIAS_DIRS {
        let dir = alias_root.join(dir);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Skipping {}: {}", dir.display(), e);
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_link = fs::symlink_metadata(&path)
                .map(|m| m.file_type().is_symlink())
                .unwrap_or(false);
            if !is_link {
                continue;
            }
            // Dangling links still name a device; keep the unresolved target
            let real = fs::canonicalize(&path).or_else(|_| fs::read_link(&path));
            let Ok(real) = real else {
                continue;
            };
            links
                .entry(real.to_string_lossy().into_owned())
                .or_default()
                .insert(path.to_string_lossy().into_owned());
        }
    }
    links
}

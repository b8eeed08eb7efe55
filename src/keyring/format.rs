//! Keyring text format

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Rewrite keyring text into the canonical layout
///
/// Section headers are kept as they are, every other non-empty line is
/// indented by one tab, and blank lines are dropped.
pub fn canonicalize(content: &str) -> String {
    let mut out = String::with_capacity(content.len() + 16);
    for line in content.lines() {
        let stripped = line.trim();
        if stripped.is_empty() {
            continue;
        }
        if !stripped.starts_with('[') {
            out.push('\t');
        }
        out.push_str(stripped);
        out.push('\n');
    }
    out
}

/// Principal names of every section in a keyring
pub fn sections(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|l| {
            let l = l.trim();
            l.strip_prefix('[')?.strip_suffix(']').map(str::to_string)
        })
        .collect()
}

/// Check that a secret is usable as a cephx key
pub fn is_valid_secret(secret: &str) -> bool {
    let secret = secret.trim();
    !secret.is_empty()
        && !secret.contains(char::is_whitespace)
        && STANDARD.decode(secret).is_ok_and(|bytes| !bytes.is_empty())
}

//! Local internal options: a flat `key=value` store.
//!
//! The file is line oriented: `#` comments and blank lines are kept verbatim,
//! every other line is `key=value` (whitespace around both trimmed).
//! Merging replaces values in place and appends unknown keys at the end, so
//! a restored file is byte-identical to the captured one.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::SnapshotError;
use crate::snapshot::ConfigSnapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Verbatim(String),
    Entry { key: String, value: String },
}

/// Parsed internal options file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalOptions {
    lines: Vec<Line>,
}

impl LocalOptions {
    pub fn parse(text: &str) -> Self {
        let lines = text
            .lines()
            .map(|raw| {
                let trimmed = raw.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    return Line::Verbatim(raw.to_string());
                }
                match trimmed.split_once('=') {
                    Some((key, value)) => Line::Entry {
                        key: key.trim().to_string(),
                        value: value.trim().to_string(),
                    },
                    None => Line::Verbatim(raw.to_string()),
                }
            })
            .collect();
        Self { lines }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().rev().find_map(|line| match line {
            Line::Entry { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// All entries in file order (last write wins for repeated keys).
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        for line in &self.lines {
            if let Line::Entry { key, value } = line {
                map.insert(key.clone(), value.clone());
            }
        }
        map
    }

    pub fn set(&mut self, key: &str, value: &str) {
        let mut found = false;
        for line in &mut self.lines {
            if let Line::Entry { key: k, value: v } = line {
                if k == key {
                    *v = value.to_string();
                    found = true;
                }
            }
        }
        if !found {
            self.lines.push(Line::Entry {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
    }

    pub fn merge<'a, I>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (key, value) in overrides {
            self.set(key, value);
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Verbatim(raw) => out.push_str(raw),
                Line::Entry { key, value } => {
                    out.push_str(key);
                    out.push('=');
                    out.push_str(value);
                }
            }
            out.push('\n');
        }
        out
    }
}

/// Snapshot `path`, merge `overrides` into its entries and apply the result.
///
/// The returned snapshot restores the file exactly as captured (including
/// removing it if it did not exist).
pub fn capture_and_merge(
    path: &Path,
    overrides: &BTreeMap<String, String>,
) -> Result<ConfigSnapshot, SnapshotError> {
    let mut snapshot = ConfigSnapshot::capture(path)?;
    let text = String::from_utf8_lossy(snapshot.prior().unwrap_or_default()).into_owned();
    let mut options = LocalOptions::parse(&text);
    options.merge(overrides);
    snapshot.apply(options.render())?;
    tracing::info!(
        "merged {} internal option(s) into {}",
        overrides.len(),
        path.display()
    );
    Ok(snapshot)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SAMPLE: &str = "# local_internal_options.conf\n\nmonitord.rotate_log=1\nsyscheck.debug = 0\n";

    #[test]
    fn parse_and_render_normalises_entry_whitespace_only() {
        let opts = LocalOptions::parse(SAMPLE);
        assert_eq!(opts.get("syscheck.debug"), Some("0"));
        assert_eq!(
            opts.render(),
            "# local_internal_options.conf\n\nmonitord.rotate_log=1\nsyscheck.debug=0\n"
        );
    }

    #[test]
    fn merge_replaces_in_place_and_appends_new_keys() {
        let mut opts = LocalOptions::parse(SAMPLE);
        let overrides: BTreeMap<String, String> = [
            ("monitord.rotate_log".to_string(), "0".to_string()),
            ("analysisd.debug".to_string(), "2".to_string()),
        ]
        .into_iter()
        .collect();
        opts.merge(&overrides);

        let rendered = opts.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[2], "monitord.rotate_log=0");
        assert_eq!(lines.last(), Some(&"analysisd.debug=2"));
        assert_eq!(opts.to_map().len(), 3);
    }

    #[test]
    fn capture_and_merge_restores_byte_identical() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("local_internal_options.conf");
        fs::write(&path, SAMPLE).unwrap();

        let overrides: BTreeMap<String, String> =
            [("syscheck.debug".to_string(), "2".to_string())]
                .into_iter()
                .collect();
        let snap = capture_and_merge(&path, &overrides).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("syscheck.debug=2"));

        snap.restore().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), SAMPLE);
    }

    #[test]
    fn capture_and_merge_on_missing_file_creates_then_removes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("local_internal_options.conf");
        let overrides: BTreeMap<String, String> =
            [("wazuh_modules.debug".to_string(), "2".to_string())]
                .into_iter()
                .collect();

        let snap = capture_and_merge(&path, &overrides).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "wazuh_modules.debug=2\n");
        snap.restore().unwrap();
        assert!(!path.exists());
    }
}

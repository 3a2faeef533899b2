//! Test selection by tier, platform and host type.
//!
//! An item is retained only if all three hold:
//! 1. it has no platform tag, or the running platform is one of them;
//! 2. it has no host-type tag, or the current host role is one of them;
//! 3. its tier is in the explicit allow-list when one is given, otherwise
//!    it lies within `[minimum, maximum]`. Untiered items always pass.
//!
//! Deselected items are handed to a [`DeselectionHook`] rather than dropped.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};

/// Operating system a test may be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Windows,
    Macos,
    Solaris,
}

impl Platform {
    /// Platform of the running process, if it is one the product ships on.
    pub fn current() -> Option<Self> {
        if cfg!(target_os = "linux") {
            Some(Platform::Linux)
        } else if cfg!(target_os = "windows") {
            Some(Platform::Windows)
        } else if cfg!(target_os = "macos") {
            Some(Platform::Macos)
        } else if cfg!(target_os = "solaris") || cfg!(target_os = "illumos") {
            Some(Platform::Solaris)
        } else {
            None
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Linux => write!(f, "linux"),
            Platform::Windows => write!(f, "windows"),
            Platform::Macos => write!(f, "macos"),
            Platform::Solaris => write!(f, "solaris"),
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(Platform::Linux),
            "windows" | "win32" => Ok(Platform::Windows),
            "macos" | "darwin" => Ok(Platform::Macos),
            "solaris" | "sunos5" => Ok(Platform::Solaris),
            other => Err(format!(
                "unknown platform '{other}'; expected: linux, windows, macos, solaris"
            )),
        }
    }
}

/// Role of the host running the product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostType {
    Server,
    Agent,
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostType::Server => write!(f, "server"),
            HostType::Agent => write!(f, "agent"),
        }
    }
}

impl FromStr for HostType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "server" | "manager" => Ok(HostType::Server),
            "agent" => Ok(HostType::Agent),
            other => Err(format!(
                "unknown host type '{other}'; expected: server, agent"
            )),
        }
    }
}

/// One collected test with its selection markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<Platform>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host_types: Vec<HostType>,
}

/// Tier constraint: explicit allow-list, else an inclusive range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierFilter {
    pub allow: Option<Vec<i64>>,
    pub minimum: i64,
    pub maximum: i64,
}

impl Default for TierFilter {
    fn default() -> Self {
        Self {
            allow: None,
            minimum: i64::MIN,
            maximum: i64::MAX,
        }
    }
}

impl TierFilter {
    pub fn admits(&self, tier: i64) -> bool {
        match &self.allow {
            Some(allowed) => allowed.contains(&tier),
            None => self.minimum <= tier && tier <= self.maximum,
        }
    }
}

/// Where the selection runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionContext {
    pub platform: Option<Platform>,
    pub host_type: HostType,
}

impl SelectionContext {
    pub fn current(host_type: HostType) -> Self {
        Self {
            platform: Platform::current(),
            host_type,
        }
    }
}

/// Receives the items a selection pass rejected.
pub trait DeselectionHook {
    fn deselected(&mut self, items: &[TestItem]);
}

impl DeselectionHook for Vec<TestItem> {
    fn deselected(&mut self, items: &[TestItem]) {
        self.extend_from_slice(items);
    }
}

/// Whether `item` survives the three selection rules.
pub fn is_selected(item: &TestItem, filter: &TierFilter, ctx: &SelectionContext) -> bool {
    if !item.platforms.is_empty() {
        match ctx.platform {
            Some(platform) if item.platforms.contains(&platform) => {}
            _ => return false,
        }
    }

    if !item.host_types.is_empty() && !item.host_types.contains(&ctx.host_type) {
        return false;
    }

    item.tier.map_or(true, |tier| filter.admits(tier))
}

/// Partition `items`, report the rejected ones to `hook`, return the rest in order.
pub fn select<H: DeselectionHook + ?Sized>(
    items: Vec<TestItem>,
    filter: &TierFilter,
    ctx: &SelectionContext,
    hook: &mut H,
) -> Vec<TestItem> {
    let (selected, deselected): (Vec<_>, Vec<_>) = items
        .into_iter()
        .partition(|item| is_selected(item, filter, ctx));
    hook.deselected(&deselected);
    selected
}

/// A YAML list of collected tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Manifest {
    #[serde(default)]
    pub tests: Vec<TestItem>,
}

pub fn load_manifest(path: &Path) -> Result<Manifest, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

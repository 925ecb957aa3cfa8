//! Resolution of GitLab web URLs into typed item references.
//!
//! Recognised shapes (paths may contain subgroups):
//!
//! ```text
//! {origin}/{project}/-/issues/{iid}
//! {origin}/{project}/-/milestones/{iid}
//! {origin}/groups/{group}/-/milestones/{iid}
//! {origin}/groups/{group}/-/cadences/{cadence}/iterations/{id}
//! {origin}/groups/{group}/-/epics/{iid}
//! {origin}/{namespace}/{project}
//! ```

use crate::error::{Result, SyncError};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// MilestoneScope
// ---------------------------------------------------------------------------

/// Owner of a milestone: GitLab has both group-level and project-level milestones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneScope {
    Group(String),
    Project(String),
}

impl MilestoneScope {
    pub fn path(&self) -> &str {
        match self {
            MilestoneScope::Group(path) | MilestoneScope::Project(path) => path,
        }
    }
}

// ---------------------------------------------------------------------------
// ItemKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemKind {
    Issue { project: String, iid: u64 },
    Milestone { scope: MilestoneScope, iid: u64 },
    Iteration { group: String, cadence: u64, id: u64 },
    Epic { group: String, iid: u64 },
    Project { project: String },
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Issue { .. } => "issue",
            ItemKind::Milestone { .. } => "milestone",
            ItemKind::Iteration { .. } => "iteration",
            ItemKind::Epic { .. } => "epic",
            ItemKind::Project { .. } => "project",
        }
    }
}

// ---------------------------------------------------------------------------
// ItemReference
// ---------------------------------------------------------------------------

/// A resolved pointer to a GitLab item. Only produced by [`resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ItemReference {
    /// Scheme and host, e.g. `https://gitlab.com`.
    pub origin: String,
    #[serde(flatten)]
    pub kind: ItemKind,
}

impl ItemReference {
    pub fn kind_name(&self) -> &'static str {
        self.kind.as_str()
    }

    /// Rebuild the canonical web URL of the referenced item.
    pub fn web_url(&self) -> String {
        let origin = &self.origin;
        match &self.kind {
            ItemKind::Issue { project, iid } => format!("{origin}/{project}/-/issues/{iid}"),
            ItemKind::Milestone {
                scope: MilestoneScope::Group(group),
                iid,
            } => format!("{origin}/groups/{group}/-/milestones/{iid}"),
            ItemKind::Milestone {
                scope: MilestoneScope::Project(project),
                iid,
            } => format!("{origin}/{project}/-/milestones/{iid}"),
            ItemKind::Iteration { group, cadence, id } => {
                format!("{origin}/groups/{group}/-/cadences/{cadence}/iterations/{id}")
            }
            ItemKind::Epic { group, iid } => format!("{origin}/groups/{group}/-/epics/{iid}"),
            ItemKind::Project { project } => format!("{origin}/{project}"),
        }
    }
}

/// GitLab reference notation (`group/project#12`, `group&3`, ...).
impl fmt::Display for ItemReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ItemKind::Issue { project, iid } => write!(f, "{project}#{iid}"),
            ItemKind::Milestone { scope, iid } => write!(f, "{}%{iid}", scope.path()),
            ItemKind::Iteration { group, id, .. } => write!(f, "{group}*iteration:{id}"),
            ItemKind::Epic { group, iid } => write!(f, "{group}&{iid}"),
            ItemKind::Project { project } => f.write_str(project),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

static URL_RE: OnceLock<Regex> = OnceLock::new();
static SEGMENT_RE: OnceLock<Regex> = OnceLock::new();

fn url_re() -> &'static Regex {
    URL_RE.get_or_init(|| {
        Regex::new(r"^(?P<origin>https?://[^/?#\s]+)/(?P<path>[^?#\s]*?)/?(?:[?#].*)?$").unwrap()
    })
}

fn segment_re() -> &'static Regex {
    SEGMENT_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").unwrap())
}

/// Parse a GitLab web URL into an [`ItemReference`].
pub fn resolve(url: &str) -> Result<ItemReference> {
    let caps = url_re()
        .captures(url.trim())
        .ok_or_else(|| SyncError::invalid_reference(url, "not an http(s) URL with a path"))?;
    let origin = caps["origin"].to_string();
    let path = &caps["path"];

    let kind = match path.split_once("/-/") {
        Some((owner, tail)) => parse_item(url, owner, tail)?,
        None => {
            if path.starts_with("groups/") {
                return Err(SyncError::invalid_reference(
                    url,
                    "group URL does not point at a milestone, iteration or epic",
                ));
            }
            ItemKind::Project {
                project: namespace_path(url, path, 2)?,
            }
        }
    };

    Ok(ItemReference { origin, kind })
}

fn parse_item(url: &str, owner: &str, tail: &str) -> Result<ItemKind> {
    let segments: Vec<&str> = tail.split('/').collect();
    match (owner.strip_prefix("groups/"), segments.as_slice()) {
        (None, ["issues", iid]) => Ok(ItemKind::Issue {
            project: namespace_path(url, owner, 2)?,
            iid: parse_id(url, "issue", iid)?,
        }),
        (None, ["milestones", iid]) => Ok(ItemKind::Milestone {
            scope: MilestoneScope::Project(namespace_path(url, owner, 2)?),
            iid: parse_id(url, "milestone", iid)?,
        }),
        (Some(group), ["milestones", iid]) => Ok(ItemKind::Milestone {
            scope: MilestoneScope::Group(namespace_path(url, group, 1)?),
            iid: parse_id(url, "milestone", iid)?,
        }),
        (Some(group), ["epics", iid]) => Ok(ItemKind::Epic {
            group: namespace_path(url, group, 1)?,
            iid: parse_id(url, "epic", iid)?,
        }),
        (Some(group), ["cadences", cadence, "iterations", id]) => Ok(ItemKind::Iteration {
            group: namespace_path(url, group, 1)?,
            cadence: parse_id(url, "cadence", cadence)?,
            id: parse_id(url, "iteration", id)?,
        }),
        _ => Err(SyncError::invalid_reference(
            url,
            format!("unrecognised item path '/-/{tail}'"),
        )),
    }
}

fn namespace_path(url: &str, path: &str, min_segments: usize) -> Result<String> {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() < min_segments {
        return Err(SyncError::invalid_reference(
            url,
            format!("expected at least {min_segments} path segment(s) in '{path}'"),
        ));
    }
    if let Some(bad) = segments.iter().find(|s| !segment_re().is_match(s)) {
        return Err(SyncError::invalid_reference(
            url,
            format!("invalid path segment '{bad}'"),
        ));
    }
    Ok(path.to_string())
}

fn parse_id(url: &str, what: &str, raw: &str) -> Result<u64> {
    raw.parse::<u64>().map_err(|_| {
        SyncError::invalid_reference(url, format!("{what} id '{raw}' is not numeric"))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

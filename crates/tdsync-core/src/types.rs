use crate::error::{Result, SyncError};
use crate::reference::ItemReference;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Thunderdome's "no priority" value.
pub const NO_PRIORITY: u8 = 99;

/// Priority values Thunderdome accepts on a plan.
pub const VALID_PRIORITIES: &[u8] = &[1, 2, 3, 4, 5, 6, NO_PRIORITY];

// ---------------------------------------------------------------------------
// Tracker-side values
// ---------------------------------------------------------------------------

/// A GitLab issue as returned by the REST API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: u64,
    pub iid: u64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub state: String,
    #[serde(default)]
    pub weight: Option<u32>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub web_url: String,
}

impl Issue {
    pub fn is_open(&self) -> bool {
        self.state == "opened"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemMetadata {
    pub title: String,
    pub description: Option<String>,
    pub web_url: String,
}

// ---------------------------------------------------------------------------
// Story
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Story {
    pub title: String,
    pub description: String,
    pub link: String,
    pub points: Option<String>,
    pub priority: u8,
    pub reference_id: Option<String>,
    pub story_type: String,
}

impl Story {
    /// Build a story for `issue`; `reference` is the resolved issue URL.
    pub fn from_issue(issue: &Issue, reference: &ItemReference, priority: u8) -> Self {
        Self {
            title: issue.title.clone(),
            description: issue.description.clone().unwrap_or_default(),
            link: issue.web_url.clone(),
            points: None,
            priority,
            reference_id: Some(reference.to_string()),
            story_type: "Task".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// How Thunderdome averages votes into a final point value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointRounding {
    #[default]
    Ceil,
    Round,
    Floor,
}

impl PointRounding {
    pub fn as_str(self) -> &'static str {
        match self {
            PointRounding::Ceil => "ceil",
            PointRounding::Round => "round",
            PointRounding::Floor => "floor",
        }
    }
}

impl fmt::Display for PointRounding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PointRounding {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ceil" => Ok(PointRounding::Ceil),
            "round" => Ok(PointRounding::Round),
            "floor" => Ok(PointRounding::Floor),
            other => Err(SyncError::Validation(format!(
                "unknown rounding '{other}': expected ceil, round or floor"
            ))),
        }
    }
}

/// Settings submitted once when a game is created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionConfig {
    pub name: String,
    pub auto_finish: bool,
    pub join_password: Option<String>,
    pub leader_password: Option<String>,
    pub team_id: Option<String>,
    pub allowed_point_values: Vec<String>,
    pub point_rounding: PointRounding,
    pub leaders: Vec<String>,
    pub estimation_scale_id: Option<String>,
    pub hide_voter_identity: bool,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SyncError::Validation("game name must not be empty".into()));
        }
        if self.allowed_point_values.is_empty() {
            return Err(SyncError::Validation(
                "allowed point values must not be empty".into(),
            ));
        }
        let mut seen = BTreeSet::new();
        for value in &self.allowed_point_values {
            if !seen.insert(value.as_str()) {
                return Err(SyncError::Validation(format!(
                    "duplicate allowed point value '{value}'"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Results and storyboard items
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteResult {
    pub story_id: String,
    pub story_link: String,
    pub final_points: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationAssignment {
    pub item: ItemReference,
    pub iteration: ItemReference,
}

/// Goal and column names to restrict a storyboard scan to. Empty sets match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoryboardFilter {
    pub goals: BTreeSet<String>,
    pub columns: BTreeSet<String>,
}

impl StoryboardFilter {
    pub fn matches(&self, goal: &str, column: &str) -> bool {
        (self.goals.is_empty() || self.goals.contains(goal))
            && (self.columns.is_empty() || self.columns.contains(column))
    }
}

/// A storyboard story whose link resolved to a tracker item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardItem {
    pub story_id: String,
    pub goal: String,
    pub column: String,
    pub reference: ItemReference,
}

/// A storyboard story whose link could not be resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnresolvedStory {
    pub story_id: String,
    pub link: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoryboardItems {
    pub resolved: Vec<BoardItem>,
    pub unresolved: Vec<UnresolvedStory>,
}

// ---------------------------------------------------------------------------
// Issue selection
// ---------------------------------------------------------------------------

/// Ordered mapping of GitLab label to Thunderdome priority.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelPriority {
    entries: Vec<(String, u8)>,
}

impl LabelPriority {
    pub fn new(pairs: impl IntoIterator<Item = (String, u8)>) -> Result<Self> {
        let mut entries: Vec<(String, u8)> = Vec::new();
        for (label, priority) in pairs {
            if !VALID_PRIORITIES.contains(&priority) {
                return Err(SyncError::Validation(format!(
                    "priority {priority} for label '{label}' must be one of 1,2,3,4,5,6,99"
                )));
            }
            entries.retain(|(l, _)| l != &label);
            entries.push((label, priority));
        }
        entries.sort_by_key(|(_, p)| *p);
        Ok(Self { entries })
    }

    /// Parse alternating `label priority` command-line values.
    pub fn from_pairs(values: &[String]) -> Result<Self> {
        if values.len() % 2 != 0 {
            return Err(SyncError::Validation(
                "label priority list must contain label/priority pairs".into(),
            ));
        }
        let mut entries = Vec::with_capacity(values.len() / 2);
        for pair in values.chunks(2) {
            let priority = pair[1].parse::<u8>().map_err(|_| {
                SyncError::Validation(format!(
                    "priority '{}' for label '{}' is not a number",
                    pair[1], pair[0]
                ))
            })?;
            entries.push((pair[0].clone(), priority));
        }
        Self::new(entries)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Priority of the highest-ranked label present in `labels`.
    pub fn priority_for(&self, labels: &[String]) -> u8 {
        self.entries
            .iter()
            .find(|(label, _)| labels.contains(label))
            .map(|(_, p)| *p)
            .unwrap_or(NO_PRIORITY)
    }
}

/// Which tracker issues become stories.
#[derive(Debug, Clone, Default)]
pub struct IssueSelection {
    pub with_weighted: bool,
    pub with_closed: bool,
    pub label_priority: LabelPriority,
}

impl IssueSelection {
    /// Reason `issue` is excluded, or `None` if it should become a story.
    pub fn exclusion(&self, issue: &Issue) -> Option<&'static str> {
        if !self.with_weighted && issue.weight.is_some() {
            return Some("issue already has a weight set");
        }
        if !self.with_closed && !issue.is_open() {
            return Some("issue is closed");
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(weight: Option<u32>, state: &str, labels: &[&str]) -> Issue {
        Issue {
            id: 1,
            iid: 1,
            title: "t".into(),
            description: None,
            state: state.into(),
            weight,
            labels: labels.iter().map(|l| l.to_string()).collect(),
            web_url: "https://gitlab.com/acme/app/-/issues/1".into(),
        }
    }

    fn config(values: &[&str]) -> SessionConfig {
        SessionConfig {
            name: "Sprint 12".into(),
            auto_finish: false,
            join_password: None,
            leader_password: None,
            team_id: None,
            allowed_point_values: values.iter().map(|v| v.to_string()).collect(),
            point_rounding: PointRounding::Ceil,
            leaders: vec![],
            estimation_scale_id: None,
            hide_voter_identity: false,
        }
    }

    #[test]
    fn session_config_rejects_empty_values() {
        let err = config(&[]).validate().unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[test]
    fn session_config_rejects_duplicate_values() {
        let err = config(&["1", "2", "1"]).validate().unwrap_err();
        assert!(err.to_string().contains("duplicate allowed point value '1'"));
        config(&["0", "1", "2", "3"]).validate().unwrap();
    }

    #[test]
    fn rounding_parses() {
        assert_eq!("round".parse::<PointRounding>().unwrap(), PointRounding::Round);
        assert!("up".parse::<PointRounding>().is_err());
    }

    #[test]
    fn filter_is_and_of_goal_and_column() {
        let filter = StoryboardFilter {
            goals: ["Common".to_string()].into(),
            columns: ["Picked".to_string()].into(),
        };
        assert!(filter.matches("Common", "Picked"));
        assert!(!filter.matches("Common", "Backlog"));
        assert!(!filter.matches("Other", "Picked"));
        assert!(StoryboardFilter::default().matches("any", "thing"));
    }

    #[test]
    fn label_priority_first_ranked_label_wins() {
        let lp = LabelPriority::from_pairs(&[
            "prio::low".into(),
            "3".into(),
            "prio::high".into(),
            "1".into(),
        ])
        .unwrap();
        assert_eq!(lp.priority_for(&["prio::low".into(), "prio::high".into()]), 1);
        assert_eq!(lp.priority_for(&["prio::low".into()]), 3);
        assert_eq!(lp.priority_for(&["bug".into()]), NO_PRIORITY);
    }

    #[test]
    fn label_priority_rejects_bad_input() {
        assert!(LabelPriority::from_pairs(&["prio::high".into()]).is_err());
        assert!(LabelPriority::from_pairs(&["prio::high".into(), "7".into()]).is_err());
        assert!(LabelPriority::from_pairs(&["prio::high".into(), "x".into()]).is_err());
    }

    #[test]
    fn selection_skips_weighted_and_closed_by_default() {
        let sel = IssueSelection::default();
        assert_eq!(sel.exclusion(&issue(None, "opened", &[])), None);
        assert!(sel.exclusion(&issue(Some(3), "opened", &[])).is_some());
        assert!(sel.exclusion(&issue(None, "closed", &[])).is_some());

        let all = IssueSelection {
            with_weighted: true,
            with_closed: true,
            ..Default::default()
        };
        assert_eq!(all.exclusion(&issue(Some(3), "closed", &[])), None);
    }
}

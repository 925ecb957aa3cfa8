//! The item-sync pipeline: tracker items into games, votes back into weights,
//! storyboard columns into iterations.

use crate::batch::{process_batch, BatchPolicy, BatchReport, ItemOutcome, Step};
use crate::error::{Result, SyncError};
use crate::reference::{resolve, ItemKind, ItemReference};
use crate::types::{
    BoardItem, Issue, IssueSelection, ItemMetadata, IterationAssignment, SessionConfig, Story,
    StoryboardFilter, StoryboardItems, VoteResult,
};
use serde::Serialize;
use std::collections::HashSet;

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Issue-tracker operations the pipeline needs.
pub trait Tracker {
    fn fetch_metadata(&self, reference: &ItemReference) -> Result<ItemMetadata>;
    fn fetch_issue(&self, reference: &ItemReference) -> Result<Issue>;
    /// Issues held by a container reference; an issue reference yields itself.
    fn list_issues(&self, reference: &ItemReference) -> Result<Vec<Issue>>;
    fn current_estimate(&self, reference: &ItemReference) -> Result<Option<u32>>;
    fn set_estimate(&self, reference: &ItemReference, points: u32) -> Result<()>;
    fn set_iteration(&self, reference: &ItemReference, iteration: &ItemReference) -> Result<()>;
}

/// Planning-poker session operations the pipeline needs.
pub trait Sessions {
    fn create_game(&self, config: &SessionConfig, stories: &[Story]) -> Result<String>;
    fn update_game(&self, game_id: &str, stories: &[Story]) -> Result<()>;
    fn game_stories(&self, game_id: &str) -> Result<Vec<Story>>;
    fn fetch_results(&self, game_id: &str) -> Result<Vec<VoteResult>>;
    fn fetch_storyboard_items(
        &self,
        board_id: &str,
        filter: &StoryboardFilter,
    ) -> Result<StoryboardItems>;
    fn cleanup_iteration(&self, board_id: &str, item: &BoardItem) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct GameOutcome {
    /// `None` when there was nothing to add and no request was sent.
    pub game_id: Option<String>,
    pub stories: Vec<Story>,
    /// Per-issue record of what became a story and what was left out.
    pub issues: BatchReport,
}

#[derive(Debug, Serialize)]
pub struct IterationOutcome {
    pub iteration: ItemReference,
    pub assignments: BatchReport,
    pub cleanup: Option<BatchReport>,
}

impl IterationOutcome {
    pub fn has_failures(&self) -> bool {
        self.assignments.has_failures()
            || self.cleanup.as_ref().is_some_and(BatchReport::has_failures)
    }
}

// ---------------------------------------------------------------------------
// Story collection
// ---------------------------------------------------------------------------

/// Resolve `sources`, expand them into issues, and turn the selected issues
/// into stories. Any failure aborts: a half-filled game would be misleading.
fn collect_stories(
    tracker: &impl Tracker,
    sources: &[String],
    selection: &IssueSelection,
    existing_links: &HashSet<String>,
) -> Result<(Vec<Story>, BatchReport)> {
    let references = sources
        .iter()
        .map(|url| resolve(url))
        .collect::<Result<Vec<_>>>()?;

    let mut issues: Vec<Issue> = Vec::new();
    let mut seen = HashSet::new();
    process_batch(
        &references,
        BatchPolicy::FailFast,
        |r| r.to_string(),
        |r| {
            let (found, title) = match r.kind {
                ItemKind::Issue { .. } => {
                    let issue = tracker.fetch_issue(r)?;
                    let title = issue.title.clone();
                    (vec![issue], title)
                }
                _ => {
                    let meta = tracker.fetch_metadata(r)?;
                    (tracker.list_issues(r)?, meta.title)
                }
            };
            let count = found.len();
            issues.extend(found.into_iter().filter(|i| seen.insert(i.id)));
            Ok(Step::Done(format!("{count} issue(s) from '{title}'")))
        },
    )?;
    tracing::info!("found {} unique issues", issues.len());

    let mut stories = Vec::new();
    let report = process_batch(
        &issues,
        BatchPolicy::FailFast,
        |i| i.web_url.clone(),
        |issue| {
            if existing_links.contains(&issue.web_url) {
                return Ok(Step::Skipped("already in the game".into()));
            }
            if let Some(reason) = selection.exclusion(issue) {
                return Ok(Step::Skipped(reason.into()));
            }
            let reference = resolve(&issue.web_url)?;
            let priority = selection.label_priority.priority_for(&issue.labels);
            stories.push(Story::from_issue(issue, &reference, priority));
            Ok(Step::Done(format!("story '{}'", issue.title)))
        },
    )?;

    if !selection.label_priority.is_empty() {
        stories.sort_by_key(|s| s.priority);
    }
    Ok((stories, report))
}

// ---------------------------------------------------------------------------
// Flows
// ---------------------------------------------------------------------------

/// Create a game holding one story per selected issue behind `sources`.
pub fn create_game(
    tracker: &impl Tracker,
    sessions: &impl Sessions,
    config: &SessionConfig,
    sources: &[String],
    selection: &IssueSelection,
) -> Result<GameOutcome> {
    config.validate()?;
    let (stories, issues) = collect_stories(tracker, sources, selection, &HashSet::new())?;
    if stories.is_empty() {
        tracing::info!("skipping game creation: no stories generated");
        return Ok(GameOutcome {
            game_id: None,
            stories,
            issues,
        });
    }
    let game_id = sessions.create_game(config, &stories)?;
    Ok(GameOutcome {
        game_id: Some(game_id),
        stories,
        issues,
    })
}

/// Add stories for issues behind `sources` that `game_id` does not link yet.
pub fn update_game(
    tracker: &impl Tracker,
    sessions: &impl Sessions,
    game_id: &str,
    sources: &[String],
    selection: &IssueSelection,
) -> Result<GameOutcome> {
    let existing: HashSet<String> = sessions
        .game_stories(game_id)?
        .into_iter()
        .map(|s| s.link)
        .filter(|l| !l.is_empty())
        .collect();
    tracing::info!("game {game_id} already links {} items", existing.len());

    let (stories, issues) = collect_stories(tracker, sources, selection, &existing)?;
    if stories.is_empty() {
        tracing::info!("game {game_id} is up to date");
        return Ok(GameOutcome {
            game_id: None,
            stories,
            issues,
        });
    }
    sessions.update_game(game_id, &stories)?;
    Ok(GameOutcome {
        game_id: Some(game_id.to_string()),
        stories,
        issues,
    })
}

/// Write each voted story's final points onto its issue as the weight.
pub fn transfer_points(
    tracker: &impl Tracker,
    sessions: &impl Sessions,
    game_id: &str,
    overwrite: bool,
) -> Result<BatchReport> {
    let results = sessions.fetch_results(game_id)?;
    tracing::info!("transferring {} voting results to the tracker", results.len());

    process_batch(
        results,
        BatchPolicy::BestEffort,
        |r| r.story_link.clone(),
        |result| {
            let reference = resolve(&result.story_link)?;
            // Read even when overwriting: a failed read means the weight is not writable either.
            let previous = tracker.current_estimate(&reference)?;
            if let (false, Some(previous)) = (overwrite, previous) {
                return Ok(Step::Skipped(format!(
                    "{reference} already has weight {previous}"
                )));
            }
            tracker.set_estimate(&reference, result.final_points)?;
            Ok(Step::Done(format!(
                "set weight {} on {reference}",
                result.final_points
            )))
        },
    )
}

/// Assign the iteration behind `iteration_url` to every item linked from the
/// storyboard, then optionally remove the assigned stories from the board.
pub fn assign_iteration(
    tracker: &impl Tracker,
    sessions: &impl Sessions,
    board_id: &str,
    iteration_url: &str,
    filter: &StoryboardFilter,
    cleanup: bool,
) -> Result<IterationOutcome> {
    let iteration = resolve(iteration_url)?;
    if !matches!(iteration.kind, ItemKind::Iteration { .. }) {
        return Err(SyncError::UnsupportedKind {
            operation: "iteration assignment",
            kind: iteration.kind_name(),
        });
    }

    let items = sessions.fetch_storyboard_items(board_id, filter)?;
    let mut assigned = Vec::new();
    let mut assignments = process_batch(
        items.resolved,
        BatchPolicy::BestEffort,
        |item| item.reference.to_string(),
        |item| {
            let assignment = IterationAssignment {
                item: item.reference.clone(),
                iteration: iteration.clone(),
            };
            tracker.set_iteration(&assignment.item, &assignment.iteration)?;
            assigned.push(item.clone());
            Ok(Step::Done(format!("assigned {}", assignment.iteration)))
        },
    )?;
    for story in &items.unresolved {
        assignments.failed.push(ItemOutcome {
            item: format!("story {} ({})", story.story_id, story.link),
            detail: story.reason.clone(),
        });
    }

    let cleanup = if cleanup {
        Some(process_batch(
            assigned,
            BatchPolicy::BestEffort,
            |item| format!("story {}", item.story_id),
            |item| {
                sessions.cleanup_iteration(board_id, item)?;
                Ok(Step::Done(format!("removed from {}/{}", item.goal, item.column)))
            },
        )?)
    } else {
        None
    };

    Ok(IterationOutcome {
        iteration,
        assignments,
        cleanup,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

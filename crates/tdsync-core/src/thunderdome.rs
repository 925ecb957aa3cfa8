//! Thunderdome REST client: games (API name "battles"), their plans, and storyboards.

use crate::error::{Result, SyncError};
use crate::http::{api_root, client, decode, ensure_success};
use crate::reference::resolve;
use crate::sync::Sessions;
use crate::types::{
    BoardItem, SessionConfig, Story, StoryboardFilter, StoryboardItems, UnresolvedStory,
    VoteResult, NO_PRIORITY,
};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const SERVICE: &str = "Thunderdome";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Identified {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Plan {
    pub id: String,
    #[serde(default, alias = "planName")]
    pub name: String,
    #[serde(default, rename = "type")]
    pub plan_type: Option<String>,
    #[serde(default)]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub points: Option<String>,
    #[serde(default)]
    pub priority: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct Battle {
    #[serde(default)]
    plans: Vec<Plan>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Storyboard {
    #[serde(default)]
    pub goals: Vec<Goal>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Goal {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<Column>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Column {
    pub name: String,
    #[serde(default)]
    pub stories: Vec<BoardStory>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BoardStory {
    pub id: String,
    #[serde(default)]
    pub link: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewPlan<'a> {
    name: &'a str,
    /// Adding a plan to an existing battle reads `planName` instead of `name`.
    #[serde(skip_serializing_if = "Option::is_none")]
    plan_name: Option<&'a str>,
    #[serde(rename = "type")]
    plan_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_id: Option<&'a str>,
    link: &'a str,
    description: &'a str,
    priority: u8,
}

impl<'a> NewPlan<'a> {
    fn from_story(story: &'a Story) -> Self {
        Self {
            name: &story.title,
            plan_name: None,
            plan_type: &story.story_type,
            reference_id: story.reference_id.as_deref(),
            link: &story.link,
            description: &story.description,
            priority: story.priority,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewBattle<'a> {
    name: &'a str,
    plans: Vec<NewPlan<'a>>,
    point_average_rounding: &'static str,
    point_values_allowed: &'a [String],
    auto_finish_voting: bool,
    hide_voter_identity: bool,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    leaders: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    estimation_scale_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    join_code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    leader_code: Option<&'a str>,
}

impl<'a> NewBattle<'a> {
    fn new(config: &'a SessionConfig, stories: &'a [Story]) -> Self {
        Self {
            name: &config.name,
            plans: stories.iter().map(NewPlan::from_story).collect(),
            point_average_rounding: config.point_rounding.as_str(),
            point_values_allowed: &config.allowed_point_values,
            auto_finish_voting: config.auto_finish,
            hide_voter_identity: config.hide_voter_identity,
            leaders: &config.leaders,
            estimation_scale_id: config.estimation_scale_id.as_deref(),
            join_code: config.join_password.as_deref(),
            leader_code: config.leader_password.as_deref(),
        }
    }
}

// ---------------------------------------------------------------------------
// ThunderdomeClient
// ---------------------------------------------------------------------------

pub struct ThunderdomeClient {
    http: Client,
    api: String,
    api_key: String,
}

impl ThunderdomeClient {
    /// `base_url` is the instance root, e.g. `https://thunderdome.dev`.
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: client()?,
            api: api_root(base_url, "/api"),
            api_key: api_key.into(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.api))
            .header("accept", "application/json")
            .header("X-API-Key", &self.api_key)
    }

    fn current_user_id(&self) -> Result<String> {
        let resp = self.request(reqwest::Method::GET, "/auth/user").send()?;
        let user: Identified = data(resp, "API key owner")?;
        Ok(user.id)
    }

    fn plans(&self, game_id: &str) -> Result<Vec<Plan>> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/battles/{game_id}"))
            .send()?;
        let battle: Battle = data(resp, &format!("game {game_id}"))?;
        tracing::debug!("fetched {} plans from game {game_id}", battle.plans.len());
        Ok(battle.plans)
    }
}

fn data<T: DeserializeOwned>(resp: Response, what: &str) -> Result<T> {
    let envelope: Envelope<T> = decode(check(resp, what)?)?;
    Ok(envelope.data)
}

/// Thunderdome reports rejected input as 400/422.
fn check(resp: Response, what: &str) -> Result<Response> {
    ensure_success(resp, SERVICE, what).map_err(|e| match e {
        SyncError::Api {
            status: 400 | 422,
            message,
            ..
        } => SyncError::Validation(message),
        other => other,
    })
}

/// Voting results for every plan that has a link and an integral final point value.
pub(crate) fn results_from_plans(plans: &[Plan]) -> Vec<VoteResult> {
    let mut results = Vec::new();
    for plan in plans {
        let Some(link) = plan.link.as_deref().filter(|l| !l.trim().is_empty()) else {
            tracing::warn!("skipping plan {}: no link set", plan.id);
            continue;
        };
        let Some(points) = plan.points.as_deref().map(str::trim).filter(|p| !p.is_empty()) else {
            tracing::warn!("skipping plan {}: no points set", plan.id);
            continue;
        };
        let Ok(final_points) = points.parse::<u32>() else {
            tracing::warn!("skipping plan {}: points '{points}' are not an integer", plan.id);
            continue;
        };
        results.push(VoteResult {
            story_id: plan.id.clone(),
            story_link: link.to_string(),
            final_points,
        });
    }
    results
}

/// Walk goals and columns, keep matching stories, and resolve their links.
pub(crate) fn select_items(board: &Storyboard, filter: &StoryboardFilter) -> StoryboardItems {
    let mut items = StoryboardItems::default();
    for goal in &board.goals {
        for column in &goal.columns {
            if !filter.matches(&goal.name, &column.name) {
                continue;
            }
            for story in &column.stories {
                let Some(link) = story.link.as_deref().filter(|l| !l.trim().is_empty()) else {
                    tracing::warn!("skipping story {}: no link set", story.id);
                    continue;
                };
                match resolve(link) {
                    Ok(reference) => items.resolved.push(BoardItem {
                        story_id: story.id.clone(),
                        goal: goal.name.clone(),
                        column: column.name.clone(),
                        reference,
                    }),
                    Err(e) => {
                        tracing::warn!("story {} has an unusable link: {e}", story.id);
                        items.unresolved.push(UnresolvedStory {
                            story_id: story.id.clone(),
                            link: link.to_string(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }
    }
    items
}

impl Sessions for ThunderdomeClient {
    fn create_game(&self, config: &SessionConfig, stories: &[Story]) -> Result<String> {
        config.validate()?;
        let user_id = self.current_user_id()?;

        let path = match &config.team_id {
            Some(team) => format!("/teams/{team}/users/{user_id}/battles"),
            None => format!("/users/{user_id}/battles"),
        };
        let mut query = vec![("userId", user_id.clone())];
        if let Some(team) = &config.team_id {
            query.push(("teamId", team.clone()));
        }

        let resp = self
            .request(reqwest::Method::POST, &path)
            .query(&query)
            .json(&NewBattle::new(config, stories))
            .send()?;
        let created: Identified = data(resp, "game")?;
        tracing::info!("created game {} with {} stories", created.id, stories.len());
        Ok(created.id)
    }

    fn update_game(&self, game_id: &str, stories: &[Story]) -> Result<()> {
        let path = format!("/battles/{game_id}/plans");
        for story in stories {
            let mut plan = NewPlan::from_story(story);
            plan.plan_name = Some(&story.title);
            let resp = self
                .request(reqwest::Method::POST, &path)
                .json(&plan)
                .send()?;
            check(resp, &format!("game {game_id}"))?;
            tracing::info!("added '{}' to game {game_id}", story.title);
        }
        Ok(())
    }

    fn game_stories(&self, game_id: &str) -> Result<Vec<Story>> {
        Ok(self
            .plans(game_id)?
            .into_iter()
            .map(|plan| Story {
                title: plan.name,
                description: plan.description.unwrap_or_default(),
                link: plan.link.unwrap_or_default(),
                points: plan.points.filter(|p| !p.is_empty()),
                priority: plan.priority.unwrap_or(NO_PRIORITY),
                reference_id: plan.reference_id,
                story_type: plan.plan_type.unwrap_or_else(|| "Story".to_string()),
            })
            .collect())
    }

    fn fetch_results(&self, game_id: &str) -> Result<Vec<VoteResult>> {
        Ok(results_from_plans(&self.plans(game_id)?))
    }

    fn fetch_storyboard_items(
        &self,
        board_id: &str,
        filter: &StoryboardFilter,
    ) -> Result<StoryboardItems> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/storyboards/{board_id}"))
            .send()?;
        let board: Storyboard = data(resp, &format!("storyboard {board_id}"))?;
        let items = select_items(&board, filter);
        tracing::debug!(
            "storyboard {board_id}: {} linked stories, {} unusable links",
            items.resolved.len(),
            items.unresolved.len()
        );
        Ok(items)
    }

    fn cleanup_iteration(&self, board_id: &str, item: &BoardItem) -> Result<()> {
        let resp = self
            .request(
                reqwest::Method::DELETE,
                &format!("/storyboards/{board_id}/stories/{}", item.story_id),
            )
            .send()?;
        check(resp, &format!("story {}", item.story_id))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

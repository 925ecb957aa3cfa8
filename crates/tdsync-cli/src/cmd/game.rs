use super::{Credentials, Settings};
use crate::output::{ensure_no_failures, print_json, print_report, print_table};
use anyhow::Context;
use clap::{Args, Subcommand};
use tdsync_core::config::Config;
use tdsync_core::sync::{self, GameOutcome};
use tdsync_core::types::{IssueSelection, LabelPriority, PointRounding, SessionConfig};

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum GameSubcommand {
    /// Create a game from GitLab items
    Create {
        #[command(flatten)]
        creds: Credentials,
        #[command(flatten)]
        session: SessionArgs,
        #[command(flatten)]
        items: ItemArgs,
        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Add stories for GitLab items that an existing game does not link yet
    Update {
        /// Game (battle) ID
        game_id: String,
        #[command(flatten)]
        creds: Credentials,
        #[command(flatten)]
        items: ItemArgs,
        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Write a game's voted points back to GitLab as issue weights
    Fetch {
        /// Game (battle) ID
        game_id: String,
        #[command(flatten)]
        creds: Credentials,
        /// Overwrite weights that are already set
        #[arg(long)]
        overwrite: bool,
    },
}

#[derive(Args)]
#[command(next_help_heading = "Game settings")]
pub struct SessionArgs {
    /// Name of the game (default from config, else "API Game")
    #[arg(long)]
    name: Option<String>,
    /// Finish the game automatically once everybody voted
    #[arg(long)]
    auto_finish: bool,
    /// User IDs of additional leaders
    #[arg(long, num_args = 1..)]
    leaders: Vec<String>,
    /// Estimation scale ID
    #[arg(long)]
    scale_id: Option<String>,
    /// Hide the identity of voters
    #[arg(long)]
    hide_identity: bool,
    /// Password for joining the game
    #[arg(long)]
    join_password: Option<String>,
    /// Password for leading the game
    #[arg(long)]
    leader_password: Option<String>,
    /// Team ID to create the game for
    #[arg(long = "teamid")]
    team_id: Option<String>,
    /// How votes are rounded into final points: ceil, round or floor
    #[arg(long)]
    round_type: Option<PointRounding>,
    /// Point values players may vote (default from config)
    #[arg(long, num_args = 1..)]
    allowed_values: Vec<String>,
}

impl SessionArgs {
    fn into_config(self, config: &Config) -> SessionConfig {
        let game = &config.game;
        SessionConfig {
            name: self.name.unwrap_or_else(|| game.name.clone()),
            auto_finish: self.auto_finish || game.auto_finish,
            join_password: self.join_password,
            leader_password: self.leader_password,
            team_id: self.team_id,
            allowed_point_values: if self.allowed_values.is_empty() {
                game.allowed_values.clone()
            } else {
                self.allowed_values
            },
            point_rounding: self.round_type.unwrap_or(game.round_type),
            leaders: self.leaders,
            estimation_scale_id: self.scale_id,
            hide_voter_identity: self.hide_identity || game.hide_identity,
        }
    }
}

#[derive(Args)]
#[command(next_help_heading = "GitLab items")]
pub struct ItemArgs {
    /// Links to milestones
    #[arg(long, num_args = 1..)]
    milestones: Vec<String>,
    /// Links to iterations
    #[arg(long, num_args = 1..)]
    iterations: Vec<String>,
    /// Links to projects
    #[arg(long, num_args = 1..)]
    projects: Vec<String>,
    /// Links to epics
    #[arg(long, num_args = 1..)]
    epics: Vec<String>,
    /// Links to issues
    #[arg(long, num_args = 1..)]
    issues: Vec<String>,
}

impl ItemArgs {
    /// All links, containers first: milestones, iterations, projects, epics, issues.
    fn sources(self) -> anyhow::Result<Vec<String>> {
        let sources: Vec<String> = [
            self.milestones,
            self.iterations,
            self.projects,
            self.epics,
            self.issues,
        ]
        .into_iter()
        .flatten()
        .collect();
        if sources.is_empty() {
            anyhow::bail!(
                "no GitLab items given; pass --milestones, --iterations, --projects, --epics or --issues"
            );
        }
        Ok(sources)
    }
}

#[derive(Args)]
#[command(next_help_heading = "Issue selection")]
pub struct SelectionArgs {
    /// Include issues that already have a weight
    #[arg(long)]
    with_weighted: bool,
    /// Include closed issues
    #[arg(long)]
    with_closed: bool,
    /// Label to priority pairs, e.g. `prio::high 1 prio::low 4` (priorities 1-6 or 99)
    #[arg(long, num_args = 2.., value_names = ["LABEL", "PRIORITY"])]
    label_priority: Vec<String>,
}

impl SelectionArgs {
    fn into_selection(self, config: &Config) -> anyhow::Result<IssueSelection> {
        let label_priority = if self.label_priority.is_empty() {
            config
                .label_priority()
                .context("invalid label_priority in config")?
        } else {
            LabelPriority::from_pairs(&self.label_priority)?
        };
        Ok(IssueSelection {
            with_weighted: self.with_weighted,
            with_closed: self.with_closed,
            label_priority,
        })
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(settings: &Settings, subcmd: GameSubcommand) -> anyhow::Result<()> {
    match subcmd {
        GameSubcommand::Create {
            creds,
            session,
            items,
            selection,
        } => create(settings, &creds, session, items, selection),
        GameSubcommand::Update {
            game_id,
            creds,
            items,
            selection,
        } => update(settings, &game_id, &creds, items, selection),
        GameSubcommand::Fetch {
            game_id,
            creds,
            overwrite,
        } => fetch(settings, &game_id, &creds, overwrite),
    }
}

// ---------------------------------------------------------------------------
// create / update
// ---------------------------------------------------------------------------

fn create(
    settings: &Settings,
    creds: &Credentials,
    session: SessionArgs,
    items: ItemArgs,
    selection: SelectionArgs,
) -> anyhow::Result<()> {
    let config = session.into_config(&settings.config);
    let sources = items.sources()?;
    let selection = selection.into_selection(&settings.config)?;
    let (gitlab, thunderdome) = settings.clients(creds)?;

    let outcome = sync::create_game(&gitlab, &thunderdome, &config, &sources, &selection)
        .context("failed to create game")?;
    render(settings, &outcome, "Created")
}

fn update(
    settings: &Settings,
    game_id: &str,
    creds: &Credentials,
    items: ItemArgs,
    selection: SelectionArgs,
) -> anyhow::Result<()> {
    let sources = items.sources()?;
    let selection = selection.into_selection(&settings.config)?;
    let (gitlab, thunderdome) = settings.clients(creds)?;

    let outcome = sync::update_game(&gitlab, &thunderdome, game_id, &sources, &selection)
        .with_context(|| format!("failed to update game {game_id}"))?;
    render(settings, &outcome, "Updated")
}

fn render(settings: &Settings, outcome: &GameOutcome, verb: &str) -> anyhow::Result<()> {
    if settings.json {
        return print_json(outcome);
    }
    let Some(game_id) = &outcome.game_id else {
        println!(
            "No stories to add ({} issue(s) skipped).",
            outcome.issues.skipped.len()
        );
        return Ok(());
    };

    println!(
        "{verb} game {game_id} with {} stor{}.",
        outcome.stories.len(),
        if outcome.stories.len() == 1 { "y" } else { "ies" }
    );
    println!(
        "  {}/game/{game_id}",
        settings.thunderdome_url.trim_end_matches('/')
    );
    println!();
    let rows = outcome
        .stories
        .iter()
        .map(|s| {
            vec![
                s.priority.to_string(),
                s.reference_id.clone().unwrap_or_default(),
                s.title.clone(),
            ]
        })
        .collect();
    print_table(&["PRIORITY", "REFERENCE", "TITLE"], rows);
    if !outcome.issues.skipped.is_empty() {
        println!();
        println!("Skipped {} issue(s):", outcome.issues.skipped.len());
        for o in &outcome.issues.skipped {
            println!("  {} ({})", o.item, o.detail);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// fetch
// ---------------------------------------------------------------------------

fn fetch(
    settings: &Settings,
    game_id: &str,
    creds: &Credentials,
    overwrite: bool,
) -> anyhow::Result<()> {
    let (gitlab, thunderdome) = settings.clients(creds)?;
    let report = sync::transfer_points(&gitlab, &thunderdome, game_id, overwrite)
        .with_context(|| format!("failed to transfer points from game {game_id}"))?;

    if settings.json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }
    ensure_no_failures(&report)
}

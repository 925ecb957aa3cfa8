use super::{Credentials, Settings};
use crate::output::{print_json, print_report};
use anyhow::Context;
use clap::Subcommand;
use tdsync_core::sync;
use tdsync_core::types::StoryboardFilter;

#[derive(Subcommand)]
pub enum StoryboardSubcommand {
    /// Assign a GitLab iteration to the items linked from a storyboard
    Fetch {
        /// Storyboard ID
        board_id: String,
        /// Link to the GitLab iteration to assign
        iteration: String,
        #[command(flatten)]
        creds: Credentials,
        /// Only consider stories in these goals
        #[arg(long, num_args = 1..)]
        filter_goals: Vec<String>,
        /// Only consider stories in these columns
        #[arg(long, num_args = 1..)]
        filter_columns: Vec<String>,
        /// Remove assigned stories from the storyboard afterwards
        #[arg(long)]
        cleanup_iteration: bool,
    },
}

pub fn run(settings: &Settings, subcmd: StoryboardSubcommand) -> anyhow::Result<()> {
    match subcmd {
        StoryboardSubcommand::Fetch {
            board_id,
            iteration,
            creds,
            filter_goals,
            filter_columns,
            cleanup_iteration,
        } => {
            let filter = StoryboardFilter {
                goals: filter_goals.into_iter().collect(),
                columns: filter_columns.into_iter().collect(),
            };
            fetch(settings, &board_id, &iteration, &creds, &filter, cleanup_iteration)
        }
    }
}

fn fetch(
    settings: &Settings,
    board_id: &str,
    iteration: &str,
    creds: &Credentials,
    filter: &StoryboardFilter,
    cleanup: bool,
) -> anyhow::Result<()> {
    let (gitlab, thunderdome) = settings.clients(creds)?;
    let outcome = sync::assign_iteration(&gitlab, &thunderdome, board_id, iteration, filter, cleanup)
        .with_context(|| format!("failed to assign storyboard {board_id} to {iteration}"))?;

    if settings.json {
        print_json(&outcome)?;
    } else {
        println!("Iteration {}:", outcome.iteration);
        print_report(&outcome.assignments);
        if let Some(cleanup) = &outcome.cleanup {
            println!();
            println!("Storyboard cleanup:");
            print_report(cleanup);
        }
    }
    if outcome.has_failures() {
        anyhow::bail!("storyboard {board_id}: some items could not be processed");
    }
    Ok(())
}

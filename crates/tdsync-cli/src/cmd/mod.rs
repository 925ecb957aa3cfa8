pub mod config;
pub mod game;
pub mod storyboard;

use anyhow::Context;
use clap::Args;
use std::path::Path;
use tdsync_core::config::Config;
use tdsync_core::{GitLabClient, ThunderdomeClient};

/// Config file values with command-line overrides applied.
pub struct Settings {
    pub config: Config,
    pub thunderdome_url: String,
    pub gitlab_url: String,
    pub json: bool,
}

impl Settings {
    pub fn load(
        config_path: &Path,
        thunderdome_url: Option<String>,
        gitlab_url: Option<String>,
        json: bool,
    ) -> anyhow::Result<Self> {
        let config = Config::load_or_default(config_path)
            .with_context(|| format!("failed to load config {}", config_path.display()))?;
        Ok(Self {
            thunderdome_url: thunderdome_url.unwrap_or_else(|| config.thunderdome_url.clone()),
            gitlab_url: gitlab_url.unwrap_or_else(|| config.gitlab_url.clone()),
            config,
            json,
        })
    }

    pub fn clients(&self, creds: &Credentials) -> anyhow::Result<(GitLabClient, ThunderdomeClient)> {
        let gitlab = GitLabClient::new(&self.gitlab_url, creds.token.clone())
            .context("failed to build GitLab client")?;
        let thunderdome = ThunderdomeClient::new(&self.thunderdome_url, creds.api_key.clone())
            .context("failed to build Thunderdome client")?;
        Ok((gitlab, thunderdome))
    }
}

#[derive(Args)]
pub struct Credentials {
    /// API key for the Thunderdome API
    #[arg(env = "THUNDERDOME_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Token for the GitLab API
    #[arg(env = "GITLAB_TOKEN", hide_env_values = true)]
    pub token: String,
}

use crate::error::Result;
use crate::types::{LabelPriority, PointRounding, VALID_PRIORITIES};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// File name looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "tdsync.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl WarnLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarnLevel::Warning => "warning",
            WarnLevel::Error => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// GameDefaults
// ---------------------------------------------------------------------------

/// Session settings used when the command line does not override them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameDefaults {
    #[serde(default = "default_game_name")]
    pub name: String,
    #[serde(default = "default_allowed_values")]
    pub allowed_values: Vec<String>,
    #[serde(default)]
    pub round_type: PointRounding,
    #[serde(default)]
    pub auto_finish: bool,
    #[serde(default)]
    pub hide_identity: bool,
}

fn default_game_name() -> String {
    "API Game".to_string()
}

fn default_allowed_values() -> Vec<String> {
    ["0", "1", "2", "3", "5", "8"]
        .iter()
        .map(|v| v.to_string())
        .collect()
}

impl Default for GameDefaults {
    fn default() -> Self {
        Self {
            name: default_game_name(),
            allowed_values: default_allowed_values(),
            round_type: PointRounding::default(),
            auto_finish: false,
            hide_identity: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_thunderdome_url")]
    pub thunderdome_url: String,
    #[serde(default = "default_gitlab_url")]
    pub gitlab_url: String,
    #[serde(default)]
    pub game: GameDefaults,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label_priority: BTreeMap<String, u8>,
}

fn default_version() -> u32 {
    1
}

fn default_thunderdome_url() -> String {
    "https://thunderdome.dev".to_string()
}

fn default_gitlab_url() -> String {
    "https://gitlab.com".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            thunderdome_url: default_thunderdome_url(),
            gitlab_url: default_gitlab_url(),
            game: GameDefaults::default(),
            label_priority: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    /// The configured label mapping as a validated [`LabelPriority`].
    pub fn label_priority(&self) -> Result<LabelPriority> {
        LabelPriority::new(
            self.label_priority
                .iter()
                .map(|(label, priority)| (label.clone(), *priority)),
        )
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.version != 1 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!("unknown config version {}", self.version),
            });
        }

        for (key, url) in [
            ("thunderdome_url", &self.thunderdome_url),
            ("gitlab_url", &self.gitlab_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("{key} '{url}' is not an http(s) URL"),
                });
            }
        }

        if self.game.name.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "game.name is empty".to_string(),
            });
        }
        if self.game.allowed_values.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "game.allowed_values is empty".to_string(),
            });
        }
        let mut seen = BTreeSet::new();
        for value in &self.game.allowed_values {
            if !seen.insert(value) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("game.allowed_values lists '{value}' more than once"),
                });
            }
        }

        for (label, priority) in &self.label_priority {
            if !VALID_PRIORITIES.contains(priority) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!(
                        "label_priority '{label}' has priority {priority}; expected 1-6 or 99"
                    ),
                });
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, cfg);
        assert!(!yaml.contains("label_priority"));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: Config = serde_yaml::from_str(
            "gitlab_url: https://gitlab.example.com\ngame:\n  round_type: floor\n",
        )
        .unwrap();
        assert_eq!(cfg.gitlab_url, "https://gitlab.example.com");
        assert_eq!(cfg.thunderdome_url, "https://thunderdome.dev");
        assert_eq!(cfg.game.round_type, PointRounding::Floor);
        assert_eq!(cfg.game.name, "API Game");
        assert_eq!(cfg.game.allowed_values.len(), 6);
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(DEFAULT_CONFIG_FILE);
        let mut cfg = Config::default();
        cfg.label_priority.insert("prio::high".into(), 1);
        cfg.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), cfg);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load_or_default(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "game: [not, a, map]\n").unwrap();
        assert!(Config::load_or_default(&path).is_err());
    }

    #[test]
    fn validate_valid_config_no_warnings() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn validate_flags_bad_values() {
        let mut cfg = Config::default();
        cfg.gitlab_url = "gitlab.com".into();
        cfg.game.allowed_values = vec!["1".into(), "2".into(), "1".into()];
        cfg.label_priority.insert("prio::high".into(), 7);

        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 3);
        assert!(warnings.iter().all(|w| w.level == WarnLevel::Error));
        assert!(warnings[0].message.contains("gitlab_url"));
        assert!(warnings[1].message.contains("'1'"));
        assert!(warnings[2].message.contains("prio::high"));
    }

    #[test]
    fn label_priority_from_config() {
        let mut cfg = Config::default();
        cfg.label_priority.insert("prio::low".into(), 4);
        cfg.label_priority.insert("prio::high".into(), 1);
        let lp = cfg.label_priority().unwrap();
        assert_eq!(lp.priority_for(&["prio::low".into(), "prio::high".into()]), 1);

        cfg.label_priority.insert("bad".into(), 0);
        assert!(cfg.label_priority().is_err());
    }
}

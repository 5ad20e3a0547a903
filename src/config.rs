// Configuration loading and parsing (server.toml and per-draft TOML files).

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::draft::{roster, OwnedPlayer, Player, TeamId};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },
}

// ---------------------------------------------------------------------------
// server.toml structs
// ---------------------------------------------------------------------------

/// Process-level settings: the listen port and where to find the per-draft
/// definition files.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub drafts_dir: PathBuf,
}

/// Load `config/server.toml` relative to `base_dir`.
pub fn load_server_config(base_dir: &Path) -> Result<ServerConfig, ConfigError> {
    let path = base_dir.join("config").join("server.toml");
    let text = read_file(&path)?;
    toml::from_str(&text).map_err(|e| ConfigError::ParseError { path, source: e })
}

// ---------------------------------------------------------------------------
// Per-draft TOML structs
// ---------------------------------------------------------------------------

fn default_reserve_per_slot() -> i64 {
    50
}

fn default_bid_window_secs() -> u64 {
    30
}

fn default_extension_secs() -> u64 {
    20
}

/// One draft's full definition: cap and timing rules, required position
/// slots, and the participating teams with any keeper players already on
/// their rosters. Loaded once per coordinator spawn; never reloaded while a
/// coordinator is running.
#[derive(Debug, Clone, Deserialize)]
pub struct DraftConfig {
    pub name: String,
    /// In cents.
    pub salary_cap: i64,
    /// Cents held back per unfilled roster slot when computing a team's
    /// maximum bid.
    #[serde(default = "default_reserve_per_slot")]
    pub reserve_per_slot: i64,
    #[serde(default = "default_bid_window_secs")]
    pub bid_window_secs: u64,
    #[serde(default = "default_extension_secs")]
    pub extension_secs: u64,
    /// Usernames allowed to approve nominations. Reserved for the approval
    /// flow; currently unused by the message handlers.
    #[serde(default)]
    pub leaders: Vec<String>,
    /// Required slot count per position tag.
    pub positions: HashMap<String, i64>,
    pub teams: Vec<TeamConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeamConfig {
    pub id: TeamId,
    pub name: String,
    /// Usernames whose connections belong to this team.
    pub owners: Vec<String>,
    /// Keeper players carried into the draft, with their salaries.
    #[serde(default)]
    pub players: Vec<OwnedPlayer>,
}

impl DraftConfig {
    /// Total roster size every team must reach.
    pub fn required_players(&self) -> i64 {
        self.positions.values().sum()
    }
}

/// Load and validate the definition for `draft_id` from
/// `<drafts_dir>/<draft_id>.toml`. A missing file means the draft does not
/// exist.
pub fn load_draft(drafts_dir: &Path, draft_id: i64) -> Result<DraftConfig, ConfigError> {
    let path = drafts_dir.join(format!("{draft_id}.toml"));
    let text = read_file(&path)?;
    let config: DraftConfig =
        toml::from_str(&text).map_err(|e| ConfigError::ParseError { path, source: e })?;
    validate(&config)?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &DraftConfig) -> Result<(), ConfigError> {
    if config.salary_cap <= 0 {
        return Err(ConfigError::ValidationError {
            field: "salary_cap".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.reserve_per_slot < 0 {
        return Err(ConfigError::ValidationError {
            field: "reserve_per_slot".into(),
            message: "must not be negative".into(),
        });
    }

    if config.positions.is_empty() {
        return Err(ConfigError::ValidationError {
            field: "positions".into(),
            message: "at least one required position slot is needed".into(),
        });
    }

    if config.teams.is_empty() {
        return Err(ConfigError::ValidationError {
            field: "teams".into(),
            message: "at least one team is needed".into(),
        });
    }

    let mut seen_ids = std::collections::HashSet::new();
    for team in &config.teams {
        if !seen_ids.insert(team.id) {
            return Err(ConfigError::ValidationError {
                field: "teams.id".into(),
                message: format!("duplicate team id {}", team.id),
            });
        }

        if team.owners.is_empty() {
            return Err(ConfigError::ValidationError {
                field: format!("teams[{}].owners", team.id),
                message: "every team needs at least one owner".into(),
            });
        }

        // Keeper rosters must already be legal under the position minimums
        // and the cap, or the coordinator's invariants fail from the start.
        let players: Vec<&Player> = team.players.iter().map(|p| &p.player).collect();
        if !roster::can_fill_roster(&players, &config.positions) {
            return Err(ConfigError::ValidationError {
                field: format!("teams[{}].players", team.id),
                message: "keeper players cannot be assigned to the required positions".into(),
            });
        }

        let spent: i64 = team.players.iter().map(|p| p.salary).sum();
        if spent > config.salary_cap {
            return Err(ConfigError::ValidationError {
                field: format!("teams[{}].players", team.id),
                message: format!(
                    "keeper salaries total {spent}, exceeding the cap of {}",
                    config.salary_cap
                ),
            });
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

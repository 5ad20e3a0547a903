// Core draft data model shared across the auction machinery.

use serde::{Deserialize, Serialize};

pub mod auction;
pub mod controller;
pub mod roster;
pub mod supervisor;

pub use auction::{AuctionInfo, DraftPhase, Lot};
pub use controller::{ClientConn, ConnId, DraftController, DraftEvent, RegisterError};
pub use supervisor::DraftSupervisor;

/// Identifier of a team within a draft. Stable across reconnects; assigned
/// by the draft configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(pub i64);

impl std::fmt::Display for TeamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable player reference data. Position tags are pre-derived (including
/// combo tags like "MI"/"CI" and the utility tag "U") by whatever produced
/// the player record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: i64,
    pub firstname: String,
    pub lastname: String,
    pub mlbteam: String,
    pub positions: Vec<String>,
}

impl Player {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.firstname, self.lastname)
    }
}

/// A player on a team's roster together with the salary paid to acquire
/// them. Created once, at auction completion (or from the draft
/// configuration for keepers), and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnedPlayer {
    #[serde(flatten)]
    pub player: Player,
    pub salary: i64,
}

// Wire protocol: every frame exchanged with a client is a tagged envelope
// `{"type": <tag>, "data": <payload>}`. The same envelope type is used in
// both directions; the coordinator simply never sends client-only tags and
// ignores server-only tags arriving from a client.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::draft::{OwnedPlayer, Player, TeamId};

/// A completed auction: the player (with winning salary), the team that put
/// the player up, and the team that won the bidding. Also the unit of the
/// coordinator's append-only draft log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedAuction {
    pub player: OwnedPlayer,
    pub offering_team: TeamId,
    pub winning_team: TeamId,
}

/// One team as it appears in a [`DraftSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSummary {
    pub id: TeamId,
    pub name: String,
    pub players: Vec<OwnedPlayer>,
}

/// Read-only snapshot of a draft, assembled by the coordinator at send time
/// and delivered to every newly registered connection. `team` identifies the
/// team the receiving connection belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftSummary {
    pub name: String,
    pub teams: Vec<TeamSummary>,
    pub picks: Vec<CompletedAuction>,
    pub positions: HashMap<String, i64>,
    pub salary_cap: i64,
    pub team: TeamId,
}

/// The set of recognized envelope payloads, keyed by the `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SocketMessage {
    /// Client asks for the server's clock (to render countdowns locally).
    TimeRequest {},
    /// Private reply to a `TimeRequest`.
    TimeResponse { time: DateTime<Utc> },
    /// The offering team nominates a player at an opening bid.
    Pick { player: Player, bid: i64 },
    /// Sent to the offering team while its nomination awaits leader
    /// approval. Modeled for the approval extension point; the current
    /// message flow starts the auction directly.
    PickPendingApproval { player: Player, bid: i64 },
    /// A nomination was rejected, with a reason. Addressed to the
    /// nominating team only.
    PlayerRejected {
        player: Player,
        bid: i64,
        reason: String,
    },
    /// Any team bids on the player currently up for auction.
    Bid { player: Player, bid: i64 },
    /// A bid was rejected, with a reason. Addressed to the bidding team only.
    BidRejected {
        player: Player,
        bid: i64,
        reason: String,
    },
    /// Broadcast snapshot of the live auction: current high bidder and bid,
    /// and when the countdown ends.
    Auction {
        player: Player,
        team: TeamId,
        bid: i64,
        end_time: DateTime<Utc>,
    },
    /// Broadcast when an auction finishes and the player joins a roster.
    AuctionComplete(CompletedAuction),
    /// Broadcast naming the team expected to nominate next.
    WaitingForPick { team: TeamId },
    /// Broadcast whenever a team's connection count transitions between
    /// zero and non-zero.
    #[serde(rename = "TeamJoinLeaveMessage")]
    TeamJoinLeave {
        connected: Vec<TeamId>,
        disconnected: Vec<TeamId>,
    },
    /// Full draft snapshot, sent once per registration.
    DraftSummary(DraftSummary),
    /// Broadcast when every roster is full; terminal.
    DraftComplete {},
}

// Auction lifecycle state for one draft: the phase machine, the live lot,
// and the countdown/extension rules.
//
// The timer itself lives in the coordinator's select loop; this module only
// owns the deadline arithmetic so it can be tested with paused time.

use chrono::{DateTime, Utc};
use tokio::time::{Duration, Instant};

use crate::draft::Player;

/// The nomination/bidding lifecycle for one draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftPhase {
    /// An offering team is chosen but not every team is connected yet.
    WaitingForTeams,
    /// Awaiting a nomination from the offering team.
    WaitingForPick,
    /// A nomination is awaiting leader approval. Modeled for the approval
    /// extension point; the current message flow never enters this phase.
    PickPendingApproval,
    /// A player is under active bidding with a live countdown.
    AuctionInProgress,
    /// Every roster is full; terminal.
    DraftComplete,
}

/// Transient state for the player currently up for bid. Exists only while a
/// nomination is pending approval or an auction is running; replaced
/// wholesale at the start of each auction.
#[derive(Debug, Clone)]
pub struct Lot {
    pub player: Player,
    /// Index into the coordinator's team list.
    pub high_bidder: usize,
    pub bid: i64,
    /// Drives the coordinator's timer. Pausable under tokio's test clock.
    pub deadline: Instant,
    /// Wall-clock rendering of `deadline` for the wire.
    pub ends_at: DateTime<Utc>,
}

impl Lot {
    /// Open bidding on `player` at `opening_bid`, with the offering team as
    /// the initial high bidder and the full bid window on the clock.
    pub fn open(player: Player, offering_team: usize, opening_bid: i64, window: Duration) -> Self {
        Lot {
            player,
            high_bidder: offering_team,
            bid: opening_bid,
            deadline: Instant::now() + window,
            ends_at: wire_deadline(window),
        }
    }

    /// Record a valid competing bid. If less than `extension` remains on the
    /// clock the deadline moves to now + `extension` (the anti-snipe rule);
    /// an earlier bid leaves the deadline untouched.
    pub fn register_bid(&mut self, bidder: usize, amount: i64, extension: Duration) {
        self.bid = amount;
        self.high_bidder = bidder;
        let now = Instant::now();
        if self.deadline.saturating_duration_since(now) < extension {
            self.deadline = now + extension;
            self.ends_at = wire_deadline(extension);
        }
    }
}

fn wire_deadline(remaining: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(remaining).unwrap_or(chrono::Duration::zero())
}

/// The current auction: which team is offering, and the live lot once a
/// nomination has been accepted. `lot` is `Some` exactly while the phase is
/// `PickPendingApproval` or `AuctionInProgress`.
#[derive(Debug, Clone)]
pub struct AuctionInfo {
    /// Index into the coordinator's team list.
    pub offering_team: usize,
    pub lot: Option<Lot>,
}

impl AuctionInfo {
    pub fn offering(offering_team: usize) -> Self {
        AuctionInfo {
            offering_team,
            lot: None,
        }
    }
}

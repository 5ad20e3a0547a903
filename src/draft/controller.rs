// Per-draft coordinator. One tokio task owns all mutable draft state; every
// connection, disconnection, and inbound frame arrives as a `DraftEvent` on a
// single queue, so no state is shared across tasks and no locks are needed.
//
// Outbound delivery never blocks the coordinator: each connection has a
// bounded outbox and a send that cannot be completed immediately severs that
// connection instead of waiting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, DraftConfig};
use crate::draft::{roster, AuctionInfo, DraftPhase, Lot, OwnedPlayer, Player, TeamId};
use crate::messages::{CompletedAuction, DraftSummary, SocketMessage, TeamSummary};

/// Capacity of each connection's outbox. A client that falls this many
/// messages behind is severed.
pub const OUTBOX_CAPACITY: usize = 512;

const EVENT_QUEUE_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Events and registration
// ---------------------------------------------------------------------------

/// Identifier of a single socket connection, unique across the process.
/// A user reconnecting gets a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

impl ConnId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ConnId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// The coordinator's handle to one client connection: who it is and where to
/// queue outbound frames.
#[derive(Debug, Clone)]
pub struct ClientConn {
    pub id: ConnId,
    pub user: String,
    pub outbox: mpsc::Sender<SocketMessage>,
}

/// Everything that can happen to a draft, multiplexed onto one queue.
#[derive(Debug)]
pub enum DraftEvent {
    Register {
        conn: ClientConn,
        reply: oneshot::Sender<Result<(), RegisterError>>,
    },
    Disconnect {
        user: String,
        conn_id: ConnId,
    },
    Inbound {
        user: String,
        conn_id: ConnId,
        message: SocketMessage,
    },
}

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("no draft with id {draft_id}")]
    DraftNotFound { draft_id: i64 },

    #[error("invalid draft definition: {0}")]
    Config(#[from] ConfigError),

    #[error("user {0} does not own a team in this draft")]
    NotAnOwner(String),

    #[error("draft coordinator stopped before registration completed")]
    ControllerClosed,
}

// ---------------------------------------------------------------------------
// Coordinator state
// ---------------------------------------------------------------------------

struct Team {
    id: TeamId,
    name: String,
    owners: Vec<String>,
    roster: Vec<OwnedPlayer>,
    connections: HashMap<ConnId, mpsc::Sender<SocketMessage>>,
}

pub struct DraftController {
    draft_id: i64,
    config: DraftConfig,
    teams: Vec<Team>,
    picks: Vec<CompletedAuction>,
    phase: DraftPhase,
    auction: AuctionInfo,
    events: mpsc::Receiver<DraftEvent>,
}

impl DraftController {
    /// Build a coordinator from a draft definition. The returned sender is
    /// the only way to reach the coordinator once `run` is spawned.
    pub fn new(draft_id: i64, config: DraftConfig) -> (Self, mpsc::Sender<DraftEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        let teams: Vec<Team> = config
            .teams
            .iter()
            .map(|tc| Team {
                id: tc.id,
                name: tc.name.clone(),
                owners: tc.owners.clone(),
                roster: tc.players.clone(),
                connections: HashMap::new(),
            })
            .collect();

        // Keepers may already fill a roster; the first nomination goes to
        // the first team with an open slot.
        let required = config.required_players();
        let first_open = teams
            .iter()
            .position(|t| (t.roster.len() as i64) < required);
        let (phase, auction) = match first_open {
            Some(idx) => (DraftPhase::WaitingForTeams, AuctionInfo::offering(idx)),
            None => (DraftPhase::DraftComplete, AuctionInfo::offering(0)),
        };

        let controller = DraftController {
            draft_id,
            config,
            teams,
            picks: Vec::new(),
            phase,
            auction,
            events: events_rx,
        };
        (controller, events_tx)
    }

    /// The coordinator's event loop. Runs until the last connection drops or
    /// every event sender is gone.
    pub async fn run(mut self) {
        info!(draft_id = self.draft_id, "draft coordinator started");
        loop {
            let deadline = match (&self.phase, &self.auction.lot) {
                (DraftPhase::AuctionInProgress, Some(lot)) => Some(lot.deadline),
                _ => None,
            };
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => {
                        if !self.handle_event(event) {
                            break;
                        }
                    }
                    None => break,
                },
                _ = deadline_elapsed(deadline) => self.finish_auction(),
            }
        }
        info!(draft_id = self.draft_id, "draft coordinator stopped");
    }

    /// Apply one event. Returns false when the coordinator should exit.
    fn handle_event(&mut self, event: DraftEvent) -> bool {
        match event {
            DraftEvent::Register { conn, reply } => self.handle_register(conn, reply),
            DraftEvent::Disconnect { user, conn_id } => self.handle_disconnect(&user, conn_id),
            DraftEvent::Inbound {
                user,
                conn_id,
                message,
            } => {
                self.handle_message(&user, conn_id, message);
                true
            }
        }
    }

    // -----------------------------------------------------------------------
    // Registration and disconnection
    // -----------------------------------------------------------------------

    fn handle_register(
        &mut self,
        conn: ClientConn,
        reply: oneshot::Sender<Result<(), RegisterError>>,
    ) -> bool {
        let Some(team_idx) = self.team_for_user(&conn.user) else {
            warn!(
                draft_id = self.draft_id,
                user = %conn.user,
                "registration from user with no team"
            );
            let _ = reply.send(Err(RegisterError::NotAnOwner(conn.user)));
            return self.num_connections() > 0;
        };

        info!(
            draft_id = self.draft_id,
            user = %conn.user,
            team = %self.teams[team_idx].id,
            "connection registered"
        );
        self.teams[team_idx].connections.insert(conn.id, conn.outbox);
        let _ = reply.send(Ok(()));

        // Every new connection gets the full snapshot first, then whatever
        // it needs to rejoin the current phase.
        let summary = SocketMessage::DraftSummary(self.summary_for(team_idx));
        self.send_to_conn(team_idx, conn.id, summary);

        match self.phase {
            DraftPhase::WaitingForTeams => {
                if self.all_teams_connected() {
                    self.begin_nomination();
                } else {
                    let msg = self.join_leave_message();
                    self.broadcast(msg);
                }
            }
            DraftPhase::WaitingForPick => {
                let team = self.teams[self.auction.offering_team].id;
                self.send_to_conn(team_idx, conn.id, SocketMessage::WaitingForPick { team });
            }
            DraftPhase::PickPendingApproval => {
                let msg = if team_idx == self.auction.offering_team {
                    self.auction.lot.as_ref().map(|lot| SocketMessage::PickPendingApproval {
                        player: lot.player.clone(),
                        bid: lot.bid,
                    })
                } else {
                    let team = self.teams[self.auction.offering_team].id;
                    Some(SocketMessage::WaitingForPick { team })
                };
                if let Some(msg) = msg {
                    self.send_to_conn(team_idx, conn.id, msg);
                }
            }
            DraftPhase::AuctionInProgress => {
                if let Some(msg) = self.auction_message() {
                    self.send_to_conn(team_idx, conn.id, msg);
                }
            }
            DraftPhase::DraftComplete => {
                self.send_to_conn(team_idx, conn.id, SocketMessage::DraftComplete {});
            }
        }
        true
    }

    fn handle_disconnect(&mut self, user: &str, conn_id: ConnId) -> bool {
        if let Some(team_idx) = self.team_for_user(user) {
            self.teams[team_idx].connections.remove(&conn_id);
            info!(
                draft_id = self.draft_id,
                user,
                team = %self.teams[team_idx].id,
                "connection removed"
            );
        }
        if self.num_connections() == 0 {
            info!(draft_id = self.draft_id, "last connection closed");
            return false;
        }
        let msg = self.join_leave_message();
        self.broadcast(msg);
        true
    }

    // -----------------------------------------------------------------------
    // Inbound message handling
    // -----------------------------------------------------------------------

    fn handle_message(&mut self, user: &str, conn_id: ConnId, message: SocketMessage) {
        let Some(team_idx) = self.team_for_user(user) else {
            return;
        };
        match message {
            SocketMessage::TimeRequest {} => {
                self.send_to_conn(
                    team_idx,
                    conn_id,
                    SocketMessage::TimeResponse { time: Utc::now() },
                );
            }
            SocketMessage::Pick { player, bid } => self.handle_pick(team_idx, conn_id, player, bid),
            SocketMessage::Bid { player, bid } => self.handle_bid(team_idx, conn_id, player, bid),
            other => {
                debug!(
                    draft_id = self.draft_id,
                    user,
                    "ignoring unexpected message: {other:?}"
                );
            }
        }
    }

    fn handle_pick(&mut self, team_idx: usize, conn_id: ConnId, player: Player, bid: i64) {
        if let Some(reason) = self.pick_rejection(team_idx, &player, bid) {
            debug!(
                draft_id = self.draft_id,
                team = %self.teams[team_idx].id,
                player = %player.full_name(),
                reason,
                "pick rejected"
            );
            self.send_to_conn(
                team_idx,
                conn_id,
                SocketMessage::PlayerRejected {
                    player,
                    bid,
                    reason,
                },
            );
            return;
        }

        info!(
            draft_id = self.draft_id,
            team = %self.teams[team_idx].id,
            player = %player.full_name(),
            bid,
            "player nominated"
        );
        let window = Duration::from_secs(self.config.bid_window_secs);
        self.auction.lot = Some(Lot::open(player, team_idx, bid, window));
        self.phase = DraftPhase::AuctionInProgress;
        if let Some(msg) = self.auction_message() {
            self.broadcast(msg);
        }
    }

    /// Nomination validation, first failure wins. The order is part of the
    /// client contract.
    fn pick_rejection(&self, team_idx: usize, player: &Player, bid: i64) -> Option<String> {
        if self.phase != DraftPhase::WaitingForPick {
            return Some("Pick received when not waiting for pick".into());
        }
        if team_idx != self.auction.offering_team {
            return Some("Not expecting pick from your team".into());
        }
        let max = self.max_bid(team_idx);
        if bid > max {
            return Some(format!("You cannot bid more than {}", format_money(max)));
        }
        if !roster::team_has_room_for(&self.teams[team_idx].roster, player, &self.config.positions)
        {
            return Some("No room for player on your roster".into());
        }
        None
    }

    fn handle_bid(&mut self, team_idx: usize, conn_id: ConnId, player: Player, bid: i64) {
        if let Some(reason) = self.bid_rejection(team_idx, &player, bid) {
            debug!(
                draft_id = self.draft_id,
                team = %self.teams[team_idx].id,
                bid,
                reason,
                "bid rejected"
            );
            self.send_to_conn(
                team_idx,
                conn_id,
                SocketMessage::BidRejected {
                    player,
                    bid,
                    reason,
                },
            );
            return;
        }

        let extension = Duration::from_secs(self.config.extension_secs);
        if let Some(lot) = self.auction.lot.as_mut() {
            lot.register_bid(team_idx, bid, extension);
        }
        info!(
            draft_id = self.draft_id,
            team = %self.teams[team_idx].id,
            bid,
            "bid accepted"
        );
        if let Some(msg) = self.auction_message() {
            self.broadcast(msg);
        }
    }

    /// Bid validation, first failure wins. A bid equal to the current high
    /// bid is accepted; only strictly lower bids are refused.
    fn bid_rejection(&self, team_idx: usize, player: &Player, bid: i64) -> Option<String> {
        if self.phase != DraftPhase::AuctionInProgress {
            return Some("No auction is in progress".into());
        }
        let Some(lot) = &self.auction.lot else {
            return Some("No auction is in progress".into());
        };
        if player.id != lot.player.id {
            return Some("Player is not up for auction".into());
        }
        let max = self.max_bid(team_idx);
        if bid > max {
            return Some(format!("You cannot bid more than {}", format_money(max)));
        }
        if bid < lot.bid {
            return Some("Bid is not the highest bid".into());
        }
        if !roster::team_has_room_for(&self.teams[team_idx].roster, player, &self.config.positions)
        {
            return Some("No room for player on your roster".into());
        }
        None
    }

    // -----------------------------------------------------------------------
    // Auction completion and rotation
    // -----------------------------------------------------------------------

    fn finish_auction(&mut self) {
        let Some(lot) = self.auction.lot.take() else {
            return;
        };
        let winner = lot.high_bidder;
        let owned = OwnedPlayer {
            player: lot.player,
            salary: lot.bid,
        };
        info!(
            draft_id = self.draft_id,
            team = %self.teams[winner].id,
            player = %owned.player.full_name(),
            salary = owned.salary,
            "auction won"
        );
        self.teams[winner].roster.push(owned.clone());
        let completed = CompletedAuction {
            player: owned,
            offering_team: self.teams[self.auction.offering_team].id,
            winning_team: self.teams[winner].id,
        };
        self.picks.push(completed.clone());
        self.broadcast(SocketMessage::AuctionComplete(completed));
        self.next_auction();
    }

    /// Rotate the nomination to the next team with an open roster slot, or
    /// finish the draft when there is none.
    fn next_auction(&mut self) {
        let required = self.config.required_players();
        let n = self.teams.len();
        for step in 1..=n {
            let idx = (self.auction.offering_team + step) % n;
            if (self.teams[idx].roster.len() as i64) < required {
                self.auction = AuctionInfo::offering(idx);
                self.phase = DraftPhase::WaitingForPick;
                let team = self.teams[idx].id;
                self.broadcast(SocketMessage::WaitingForPick { team });
                return;
            }
        }
        self.phase = DraftPhase::DraftComplete;
        self.auction.lot = None;
        self.broadcast(SocketMessage::DraftComplete {});
        info!(draft_id = self.draft_id, "draft complete");
    }

    /// First nomination, once every team has at least one connection.
    fn begin_nomination(&mut self) {
        self.phase = DraftPhase::WaitingForPick;
        let team = self.teams[self.auction.offering_team].id;
        info!(draft_id = self.draft_id, team = %team, "all teams connected, draft begins");
        self.broadcast(SocketMessage::WaitingForPick { team });
    }

    // -----------------------------------------------------------------------
    // Queries and message assembly
    // -----------------------------------------------------------------------

    fn team_for_user(&self, user: &str) -> Option<usize> {
        self.teams
            .iter()
            .position(|t| t.owners.iter().any(|o| o == user))
    }

    fn num_connections(&self) -> usize {
        self.teams.iter().map(|t| t.connections.len()).sum()
    }

    fn all_teams_connected(&self) -> bool {
        self.teams.iter().all(|t| !t.connections.is_empty())
    }

    fn max_bid(&self, team_idx: usize) -> i64 {
        roster::max_bid(
            self.config.salary_cap,
            &self.teams[team_idx].roster,
            self.config.required_players(),
            self.config.reserve_per_slot,
        )
    }

    fn summary_for(&self, team_idx: usize) -> DraftSummary {
        DraftSummary {
            name: self.config.name.clone(),
            teams: self
                .teams
                .iter()
                .map(|t| TeamSummary {
                    id: t.id,
                    name: t.name.clone(),
                    players: t.roster.clone(),
                })
                .collect(),
            picks: self.picks.clone(),
            positions: self.config.positions.clone(),
            salary_cap: self.config.salary_cap,
            team: self.teams[team_idx].id,
        }
    }

    fn auction_message(&self) -> Option<SocketMessage> {
        let lot = self.auction.lot.as_ref()?;
        Some(SocketMessage::Auction {
            player: lot.player.clone(),
            team: self.teams[lot.high_bidder].id,
            bid: lot.bid,
            end_time: lot.ends_at,
        })
    }

    fn join_leave_message(&self) -> SocketMessage {
        let (connected, disconnected) = self
            .teams
            .iter()
            .partition::<Vec<_>, _>(|t| !t.connections.is_empty());
        SocketMessage::TeamJoinLeave {
            connected: connected.iter().map(|t| t.id).collect(),
            disconnected: disconnected.iter().map(|t| t.id).collect(),
        }
    }

    // -----------------------------------------------------------------------
    // Outbound delivery
    // -----------------------------------------------------------------------

    fn send_to_conn(&mut self, team_idx: usize, conn_id: ConnId, message: SocketMessage) {
        let draft_id = self.draft_id;
        let team = &mut self.teams[team_idx];
        let Some(outbox) = team.connections.get(&conn_id) else {
            return;
        };
        if outbox.try_send(message).is_err() {
            warn!(draft_id, team = %team.id, "outbox full or closed, severing connection");
            team.connections.remove(&conn_id);
        }
    }

    fn broadcast(&mut self, message: SocketMessage) {
        let draft_id = self.draft_id;
        for team in &mut self.teams {
            let team_id = team.id;
            team.connections.retain(|_, outbox| {
                match outbox.try_send(message.clone()) {
                    Ok(()) => true,
                    Err(_) => {
                        warn!(draft_id, team = %team_id, "outbox full or closed, severing connection");
                        false
                    }
                }
            });
        }
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn format_money(cents: i64) -> String {
    format!("${:.2}", cents as f64 / 100.0)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

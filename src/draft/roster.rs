// Roster eligibility: can a set of players be assigned to position slots so
// that every per-position minimum is still satisfiable?
//
// Position eligibility overlaps (a middle infielder can fill "2B", "SS", or
// "MI"), so this is a small constraint-satisfaction problem solved by
// exhaustive backtracking. A greedy assignment would wrongly reject legal
// rosters; production roster sizes are a few dozen players, so the search is
// cheap.

use std::collections::HashMap;

use crate::draft::{OwnedPlayer, Player};

/// Whether every player in `players` can be placed into a distinct slot of
/// one of its eligible positions without exhausting any position's capacity.
///
/// An empty player list trivially succeeds; more players than total capacity
/// always fails.
pub fn can_fill_roster(players: &[&Player], required: &HashMap<String, i64>) -> bool {
    let mut remaining = required.clone();
    assign(players, &mut remaining)
}

fn assign(players: &[&Player], remaining: &mut HashMap<String, i64>) -> bool {
    let Some((player, rest)) = players.split_first() else {
        return true;
    };
    for pos in &player.positions {
        match remaining.get_mut(pos) {
            Some(count) if *count > 0 => *count -= 1,
            _ => continue,
        }
        let placed = assign(rest, remaining);
        if let Some(count) = remaining.get_mut(pos) {
            *count += 1;
        }
        if placed {
            return true;
        }
    }
    false
}

/// Whether `candidate` can be legally added to a roster already holding
/// `roster`, against the draft's required-position minimums.
pub fn team_has_room_for(
    roster: &[OwnedPlayer],
    candidate: &Player,
    required: &HashMap<String, i64>,
) -> bool {
    let mut players: Vec<&Player> = roster.iter().map(|owned| &owned.player).collect();
    players.push(candidate);
    can_fill_roster(&players, required)
}

/// The most a team may bid while still being able to fill its remaining
/// roster slots: cap minus salaries already paid, minus a fixed reserve for
/// every empty slot other than the one this bid would fill.
pub fn max_bid(
    salary_cap: i64,
    roster: &[OwnedPlayer],
    required_players: i64,
    reserve_per_slot: i64,
) -> i64 {
    let spent: i64 = roster.iter().map(|owned| owned.salary).sum();
    let slots_needed = required_players - roster.len() as i64;
    salary_cap - spent - (slots_needed - 1) * reserve_per_slot
}

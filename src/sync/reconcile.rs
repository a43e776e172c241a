//! Plans the cheapest engine patch that turns the mirror into a new snapshot.

use std::collections::HashMap;

use crate::models::PlayQueue;

use super::mirror::PlaybackMirror;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch {
    /// Mirror already equals the snapshot.
    None,
    /// Selection moved to the following item.
    Advance,
    /// Selection moved to the preceding item.
    Retreat,
    /// Same list, selection moved elsewhere.
    Jump(usize),
    /// Same items in a new order. `moves` are `(from, to)` single-entry
    /// moves applied in sequence; `select` is set when the selection also
    /// changed.
    Reorder {
        moves: Vec<(usize, usize)>,
        select: Option<usize>,
    },
    /// Anything else: load the whole list again.
    Reload { start_index: usize },
    /// The snapshot has no items left.
    Clear,
}

/// `snapshot` must already be validated.
pub fn plan(mirror: &PlaybackMirror, snapshot: &PlayQueue) -> Patch {
    let Some(target) = snapshot.selected_index() else {
        return if mirror.is_empty() { Patch::None } else { Patch::Clear };
    };

    if mirror.is_empty()
        || mirror.queue_id() != snapshot.id
        || mirror.shuffled() != snapshot.shuffled
    {
        return Patch::Reload {
            start_index: target,
        };
    }

    let old_ids = mirror.item_ids();
    let new_ids = snapshot.item_ids();

    if old_ids == new_ids {
        return match mirror.cursor() {
            Some(cursor) if cursor == target => Patch::None,
            Some(cursor) if target == cursor + 1 => Patch::Advance,
            Some(cursor) if cursor > 0 && target == cursor - 1 => Patch::Retreat,
            _ => Patch::Jump(target),
        };
    }

    if is_permutation(&old_ids, &new_ids) {
        let current = mirror.current().map(|item| item.id);
        let moves = reorder_moves(&old_ids, &new_ids, current);
        let select = if current == snapshot.selected_item_id {
            None
        } else {
            Some(target)
        };
        return Patch::Reorder { moves, select };
    }

    Patch::Reload {
        start_index: target,
    }
}

fn is_permutation(a: &[u64], b: &[u64]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_unstable();
    b.sort_unstable();
    a == b
}

/// Minimal sequence of single moves turning `old` into `new`.
///
/// Items on a longest run already in the right relative order stay put; every
/// other item is re-inserted right after its new predecessor. When `pinned`
/// can be part of such a run it is never moved.
pub fn reorder_moves(old: &[u64], new: &[u64], pinned: Option<u64>) -> Vec<(usize, usize)> {
    let new_index: HashMap<u64, usize> = new.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let seq: Vec<usize> = old.iter().map(|id| new_index[id]).collect();

    let mut stay = longest_increasing(&seq, |_| true);

    if let Some(pinned_pos) = pinned.and_then(|id| old.iter().position(|x| *x == id)) {
        let pinned_value = seq[pinned_pos];
        if !stay.contains(&pinned_pos) {
            let with_pinned = longest_increasing(&seq, |i| {
                i == pinned_pos
                    || (i < pinned_pos && seq[i] < pinned_value)
                    || (i > pinned_pos && seq[i] > pinned_value)
            });
            if with_pinned.len() == stay.len() {
                stay = with_pinned;
            }
        }
    }

    let staying: Vec<u64> = stay.iter().map(|&i| old[i]).collect();
    let mut working = old.to_vec();
    let mut moves = Vec::new();

    for (i, id) in new.iter().enumerate() {
        if staying.contains(id) {
            continue;
        }
        let Some(from) = working.iter().position(|x| x == id) else {
            continue;
        };
        working.remove(from);
        let to = if i == 0 {
            0
        } else {
            working
                .iter()
                .position(|x| *x == new[i - 1])
                .map_or(0, |p| p + 1)
        };
        working.insert(to, *id);
        if from != to {
            moves.push((from, to));
        }
    }

    moves
}

/// Indices of a longest strictly increasing subsequence of `seq`, restricted
/// to indices accepted by `allowed`.
fn longest_increasing(seq: &[usize], allowed: impl Fn(usize) -> bool) -> Vec<usize> {
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; seq.len()];

    for (i, &value) in seq.iter().enumerate() {
        if !allowed(i) {
            continue;
        }
        let pos = tails.partition_point(|&t| seq[t] < value);
        if pos > 0 {
            prev[i] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(i);
        } else {
            tails[pos] = i;
        }
    }

    let mut out = Vec::with_capacity(tails.len());
    let mut cur = tails.last().copied();
    while let Some(i) = cur {
        out.push(i);
        cur = prev[i];
    }
    out.reverse();
    out
}

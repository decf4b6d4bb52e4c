//! Pure snapshot diffing: turns two position snapshots into an ordered
//! sequence of change events.

use std::collections::HashMap;

use crate::models::{ChangeEvent, ChangeKind, Position};

/// Compare two snapshots of the master account and derive what changed.
///
/// At most one event is emitted per ticket per cycle: full absence wins
/// over everything (a close plus an unseen SL/TP change collapses to
/// `Closed`), and a volume decrease wins over a SL/TP change. A volume
/// increase never happens in the MT5 position model and is treated as a
/// no-op.
///
/// Output ordering is fixed: Closed, then PartiallyClosed, then
/// Modified, then Opened, each class sorted by ticket. Closes run first
/// so slave-side margin is freed before new copies are opened within
/// the same cycle.
pub fn diff(
    previous: &HashMap<u64, Position>,
    current: &HashMap<u64, Position>,
) -> Vec<ChangeEvent> {
    let mut closed = Vec::new();
    let mut partial = Vec::new();
    let mut modified = Vec::new();
    let mut opened = Vec::new();

    for (ticket, prev_pos) in previous {
        if !current.contains_key(ticket) {
            closed.push(ChangeEvent::new(
                *ticket,
                ChangeKind::Closed(prev_pos.clone()),
            ));
        }
    }

    for (ticket, cur_pos) in current {
        match previous.get(ticket) {
            None => {
                opened.push(ChangeEvent::new(*ticket, ChangeKind::Opened(cur_pos.clone())));
            }
            Some(prev_pos) => {
                if cur_pos.volume < prev_pos.volume && !cur_pos.volume.is_zero() {
                    partial.push(ChangeEvent::new(
                        *ticket,
                        ChangeKind::PartiallyClosed {
                            old_volume: prev_pos.volume,
                            new_volume: cur_pos.volume,
                            position: cur_pos.clone(),
                        },
                    ));
                } else if cur_pos.stop_loss != prev_pos.stop_loss
                    || cur_pos.take_profit != prev_pos.take_profit
                {
                    modified.push(ChangeEvent::new(
                        *ticket,
                        ChangeKind::Modified {
                            old: Box::new(prev_pos.clone()),
                            new: Box::new(cur_pos.clone()),
                        },
                    ));
                }
            }
        }
    }

    for class in [&mut closed, &mut partial, &mut modified, &mut opened] {
        class.sort_by_key(|e| e.master_ticket);
    }

    let mut events = closed;
    events.append(&mut partial);
    events.append(&mut modified);
    events.append(&mut opened);
    events
}

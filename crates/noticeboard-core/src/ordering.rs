//! Notice ordering
//!
//! Positions 1..=3 are reserved for pinned notices and hold at most one
//! notice each. Everything else floats from position 4 upward.

use std::collections::HashSet;

use crate::models::{Notice, FIRST_FLOATING_POSITION, RESERVED_POSITIONS};

/// Next free floating position: one past the highest order in use, never below 4
///
/// When `u32::MAX` is already taken the lowest unused floating position is
/// handed out instead.
pub fn next_floating_position(notices: &[Notice]) -> u32 {
    let max = notices.iter().map(|n| n.order).max().unwrap_or(0);
    match max.checked_add(1) {
        Some(next) => next.max(FIRST_FLOATING_POSITION),
        None => lowest_free_floating_position(notices),
    }
}

fn lowest_free_floating_position(notices: &[Notice]) -> u32 {
    let used: HashSet<u32> = notices.iter().map(|n| n.order).collect();
    (FIRST_FLOATING_POSITION..=u32::MAX)
        .find(|pos| !used.contains(pos))
        .unwrap_or(FIRST_FLOATING_POSITION)
}

/// Place the notice `id` at `requested`, evicting any prior holder of a
/// reserved slot to the next floating position.
///
/// `None` (or 0) auto-assigns a floating position. A requested floating
/// position that is already taken is also auto-assigned. Returns the order
/// the notice ended up with, or `None` if no notice has that id.
pub fn assign_order(notices: &mut [Notice], id: &str, requested: Option<u32>) -> Option<u32> {
    let target = notices.iter().position(|n| n.id == id)?;
    let next_free = next_floating_position(notices);

    let order = match requested {
        Some(pos) if RESERVED_POSITIONS.contains(&pos) => {
            if let Some(holder) = notices
                .iter()
                .position(|n| n.order == pos && n.id != id)
            {
                notices[holder].order = next_free;
                notices[holder].touch();
            }
            pos
        }
        Some(pos) if pos >= FIRST_FLOATING_POSITION => {
            let taken = notices.iter().any(|n| n.order == pos && n.id != id);
            if taken {
                next_free
            } else {
                pos
            }
        }
        _ => {
            let current = notices[target].order;
            let unique = current >= FIRST_FLOATING_POSITION
                && !notices.iter().any(|n| n.order == current && n.id != id);
            if unique {
                current
            } else {
                next_free
            }
        }
    };

    if notices[target].order != order {
        notices[target].order = order;
        notices[target].touch();
    }
    Some(order)
}

/// Sort notices for display: pinned positions first, then by order
pub fn sort_for_display(notices: &mut [Notice]) {
    notices.sort_by_key(|n| (n.order == 0, n.order));
}

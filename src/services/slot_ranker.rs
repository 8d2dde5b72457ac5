//! Filtering, sorting and pairwise comparison of candidate slots.
//!
//! Everything here is a pure function of its inputs. Slots are identified by
//! `slot_index`, never by their position in a list.

use std::cmp::Ordering;

use tracing::debug;

use crate::models::ranking::{
    SlotComparison, SlotFilter, SlotSort, SlotView, SortDirection, SortField,
};
use crate::models::suggestion::{SuggestedSlot, HIGH_CONFIDENCE_THRESHOLD};
use crate::utils::time::{is_within, minutes_between};

/// Whether `slot` passes every active predicate of `filter`.
pub fn matches_filter(slot: &SuggestedSlot, filter: &SlotFilter) -> bool {
    if let Some(min) = filter.min_confidence {
        if slot.confidence < min {
            return false;
        }
    }
    if let Some(max) = filter.max_confidence {
        if slot.confidence > max {
            return false;
        }
    }
    if let Some(range) = filter.time_range {
        if !is_within(slot.suggested_start_at, range.start, range.end) {
            return false;
        }
    }
    if let Some(range) = filter.duration_range {
        if !(range.min..=range.max).contains(&slot.planned_minutes) {
            return false;
        }
    }
    if filter.show_adjusted_only && !slot.is_adjusted() {
        return false;
    }
    if filter.show_high_confidence_only && slot.confidence < HIGH_CONFIDENCE_THRESHOLD {
        return false;
    }
    true
}

/// Keeps input order.
pub fn filter_slots(slots: &[SuggestedSlot], filter: &SlotFilter) -> Vec<SuggestedSlot> {
    slots
        .iter()
        .filter(|slot| matches_filter(slot, filter))
        .cloned()
        .collect()
}

/// Stable sort; ties keep their relative order in both directions.
pub fn sort_slots(mut slots: Vec<SuggestedSlot>, sort: SlotSort) -> Vec<SuggestedSlot> {
    slots.sort_by(|a, b| {
        let ordering = compare_by_field(a, b, sort.field);
        match sort.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
    slots
}

fn compare_by_field(a: &SuggestedSlot, b: &SuggestedSlot, field: SortField) -> Ordering {
    match field {
        SortField::Confidence => a
            .confidence
            .partial_cmp(&b.confidence)
            .unwrap_or(Ordering::Equal),
        SortField::Time => a.suggested_start_at.cmp(&b.suggested_start_at),
        SortField::Duration => a.planned_minutes.cmp(&b.planned_minutes),
        SortField::DeadlineProximity => deadline_proximity(a).cmp(&deadline_proximity(b)),
    }
}

/// Always 0 until slots carry the task deadline.
pub fn deadline_proximity(_slot: &SuggestedSlot) -> i64 {
    0
}

pub fn build_view(slots: &[SuggestedSlot], filter: &SlotFilter, sort: SlotSort) -> SlotView {
    let visible = sort_slots(filter_slots(slots, filter), sort);
    debug!(
        target: "app::ranker",
        total = slots.len(),
        visible = visible.len(),
        field = ?sort.field,
        direction = ?sort.direction,
        "slot view rebuilt"
    );
    SlotView {
        total: slots.len(),
        visible: visible.len(),
        slots: visible,
    }
}

/// 1-based position of `slot_index` in the view, `-1` when filtered out.
pub fn rank_of(view: &SlotView, slot_index: u32) -> i32 {
    view.slots
        .iter()
        .position(|slot| slot.slot_index == slot_index)
        .and_then(|position| i32::try_from(position + 1).ok())
        .unwrap_or(-1)
}

pub fn compare_slots(first: &SuggestedSlot, second: &SuggestedSlot) -> SlotComparison {
    SlotComparison {
        first_index: first.slot_index,
        second_index: second.slot_index,
        time_difference_minutes: minutes_between(
            first.suggested_start_at,
            second.suggested_start_at,
        ),
        confidence_difference: (first.confidence - second.confidence).abs(),
        duration_match: first.planned_minutes == second.planned_minutes,
        deadline_proximity: deadline_proximity(first) - deadline_proximity(second),
    }
}

/// Comparison of the chosen pair; `None` unless exactly two distinct, known
/// indices are chosen.
pub fn compare_selected(slots: &[SuggestedSlot], selected: &[u32]) -> Option<SlotComparison> {
    let [first, second] = selected else {
        return None;
    };
    if first == second {
        return None;
    }
    let find = |index: u32| slots.iter().find(|slot| slot.slot_index == index);
    Some(compare_slots(find(*first)?, find(*second)?))
}

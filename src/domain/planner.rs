use crate::domain::conflict::{detect_conflict, task_interval};
use crate::domain::interval::{
    consume, earliest_fit, free_intervals, intersect_all, largest, Interval,
};
use crate::domain::models::{hhmm, Event, PlanningPolicy, ScheduleSuggestion, TaskInstance};
use crate::domain::time_blocks::{matching_blocks_for_task, ActiveBlock};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanResult {
    pub date: NaiveDate,
    pub suggestions: Vec<ScheduleSuggestion>,
    pub warnings: Vec<String>,
}

/// A chosen start time for one task, as persisted by the apply step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedTimeAssignment {
    pub task_id: String,
    #[serde(with = "hhmm")]
    pub fixed_time: NaiveTime,
}

impl PlanResult {
    pub fn assignments(&self) -> Vec<FixedTimeAssignment> {
        self.suggestions
            .iter()
            .filter_map(|suggestion| {
                suggestion.suggested_time.map(|fixed_time| FixedTimeAssignment {
                    task_id: suggestion.task_id.clone(),
                    fixed_time,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableSlot {
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub duration_minutes: u32,
    pub time_block_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableSlots {
    pub date: NaiveDate,
    pub slots: Vec<AvailableSlot>,
    pub total_available_minutes: u32,
}

/// Time on `date` taken by events and by fixed-time tasks that are still
/// schedulable.
pub fn busy_intervals(
    tasks: &[TaskInstance],
    events: &[Event],
    date: NaiveDate,
    policy: &PlanningPolicy,
) -> Vec<Interval> {
    let event_time = events
        .iter()
        .filter(|event| event.date == date)
        .map(|event| Interval::span(event.start_time, event.end_time));
    let task_time = tasks
        .iter()
        .filter(|task| task.date == date && task.is_schedulable())
        .filter_map(|task| task_interval(task, policy));
    event_time.chain(task_time).collect()
}

pub fn day_free_intervals(
    tasks: &[TaskInstance],
    events: &[Event],
    date: NaiveDate,
    policy: &PlanningPolicy,
) -> Vec<Interval> {
    match policy.window.interval() {
        Some(window) => free_intervals(window, busy_intervals(tasks, events, date, policy)),
        None => Vec::new(),
    }
}

/// Greedy preview placement of every unfixed task on `date`.
///
/// Full-focus tasks go first, then longer tasks; equal keys keep input
/// order. Nothing is persisted here.
pub fn plan_day(
    tasks: &[TaskInstance],
    events: &[Event],
    active_blocks: &[ActiveBlock],
    date: NaiveDate,
    policy: &PlanningPolicy,
) -> PlanResult {
    let mut free = day_free_intervals(tasks, events, date, policy);

    let mut pending = tasks
        .iter()
        .filter(|task| task.date == date && task.is_schedulable() && task.fixed_time.is_none())
        .collect::<Vec<_>>();
    pending.sort_by_key(|task| {
        (
            Reverse(task.needs_full_focus),
            Reverse(task.duration_minutes(policy.default_task_minutes)),
        )
    });

    let mut same_day_events = events
        .iter()
        .filter(|event| event.date == date)
        .collect::<Vec<_>>();
    same_day_events.sort_by_key(|event| event.start_time);

    let window = policy.window.interval();
    // Fixed tasks plus every placement made in this run.
    let mut taken = tasks
        .iter()
        .filter(|task| task.date == date && task.is_schedulable())
        .filter_map(|task| task_interval(task, policy))
        .collect::<Vec<_>>();

    let mut suggestions = Vec::with_capacity(pending.len());
    let mut warnings = Vec::new();

    for task in pending {
        let duration = task.duration_minutes(policy.default_task_minutes);
        let matching = matching_blocks_for_task(task, active_blocks);

        let placement = if matching.is_empty() {
            earliest_fit(&free, duration).map(|slot| (slot, None))
        } else {
            earliest_block_fit(&free, &matching, duration)
        };

        if let Some((slot, block)) = placement {
            consume(&mut free, slot);
            taken.push(slot);
            let reasoning = match block {
                Some(active) => format!(
                    "Placed in time block '{}' at {} (shares a tag with the task)",
                    active.block.name,
                    slot.start_time().format("%H:%M")
                ),
                None => format!(
                    "Earliest free slot of {duration} minutes at {}",
                    slot.start_time().format("%H:%M")
                ),
            };
            suggestions.push(ScheduleSuggestion {
                task_id: task.id.clone(),
                title: task.title.clone(),
                suggested_time: Some(slot.start_time()),
                duration_minutes: duration,
                combined_with_event_id: None,
                time_block_id: block.map(|active| active.block.id.clone()),
                reasoning,
            });
            continue;
        }

        if let Some((event, slot)) =
            combinable_event(task, events, &same_day_events, &taken, window, policy)
        {
            taken.push(slot);
            suggestions.push(ScheduleSuggestion {
                task_id: task.id.clone(),
                title: task.title.clone(),
                suggested_time: Some(slot.start_time()),
                duration_minutes: duration,
                combined_with_event_id: Some(event.id.clone()),
                time_block_id: None,
                reasoning: format!(
                    "No free slot; combined with event '{}' at {}",
                    event.title,
                    slot.start_time().format("%H:%M")
                ),
            });
            continue;
        }

        let available = if matching.is_empty() {
            largest(&free)
        } else {
            matching
                .iter()
                .map(|active| largest(&intersect_all(&free, active.interval())))
                .max()
                .unwrap_or(0)
        };
        let scope = if matching.is_empty() {
            "free slot"
        } else {
            "slot in a matching time block"
        };
        let warning = format!(
            "Could not place '{}': needs {duration} minutes, largest {scope} is {available} minutes (short by {})",
            task.title,
            duration - available.min(duration)
        );
        suggestions.push(ScheduleSuggestion {
            task_id: task.id.clone(),
            title: task.title.clone(),
            suggested_time: None,
            duration_minutes: duration,
            combined_with_event_id: None,
            time_block_id: None,
            reasoning: "Unplaceable; see warnings".to_string(),
        });
        warnings.push(warning);
    }

    PlanResult {
        date,
        suggestions,
        warnings,
    }
}

/// Earliest fit across all matching blocks; on equal starts the earlier
/// block in `matching` wins.
fn earliest_block_fit<'a>(
    free: &[Interval],
    matching: &[&'a ActiveBlock],
    duration: u32,
) -> Option<(Interval, Option<&'a ActiveBlock>)> {
    let mut best: Option<(Interval, &'a ActiveBlock)> = None;
    for active in matching {
        let Some(slot) = earliest_fit(&intersect_all(free, active.interval()), duration) else {
            continue;
        };
        if best.is_none_or(|(current, _)| slot.start < current.start) {
            best = Some((slot, *active));
        }
    }
    best.map(|(slot, active)| (slot, Some(active)))
}

/// First event the task may run alongside, with the slot it would take.
///
/// The slot starts with the event and must stay inside it and inside the
/// window. It is rejected when the task, fixed at that time, would still
/// conflict with another event or overlap time already taken.
fn combinable_event<'a>(
    task: &TaskInstance,
    all_events: &[Event],
    same_day_events: &[&'a Event],
    taken: &[Interval],
    window: Option<Interval>,
    policy: &PlanningPolicy,
) -> Option<(&'a Event, Interval)> {
    if task.needs_full_focus {
        return None;
    }
    let duration = task.duration_minutes(policy.default_task_minutes);
    same_day_events.iter().copied().find_map(|event| {
        if !(event.allow_overlap || task.can_combine_with_events.contains(&event.id)) {
            return None;
        }
        let span = Interval::span(event.start_time, event.end_time);
        let slot = Interval::starting_at(event.start_time, duration);
        if span.len() < duration || slot.end > span.end {
            return None;
        }
        if window.is_some_and(|window| slot.start < window.start || slot.end > window.end) {
            return None;
        }
        if taken.iter().any(|other| other.overlaps(&slot)) {
            return None;
        }
        let mut fixed = task.clone();
        fixed.fixed_time = Some(slot.start_time());
        detect_conflict(&fixed, all_events, policy).is_none().then_some((event, slot))
    })
}

/// Free time on `date`, annotated with the active blocks each slot touches.
pub fn available_slots(
    tasks: &[TaskInstance],
    events: &[Event],
    active_blocks: &[ActiveBlock],
    date: NaiveDate,
    policy: &PlanningPolicy,
) -> AvailableSlots {
    let slots = day_free_intervals(tasks, events, date, policy)
        .into_iter()
        .map(|slot| AvailableSlot {
            start_time: slot.start_time(),
            end_time: slot.end_time(),
            duration_minutes: slot.len(),
            time_block_ids: active_blocks
                .iter()
                .filter(|active| active.interval().overlaps(&slot))
                .map(|active| active.block.id.clone())
                .collect(),
        })
        .collect::<Vec<_>>();
    let total_available_minutes = slots.iter().map(|slot| slot.duration_minutes).sum();
    AvailableSlots {
        date,
        slots,
        total_available_minutes,
    }
}

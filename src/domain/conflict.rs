use crate::domain::interval::Interval;
use crate::domain::models::{Event, PlanningPolicy, TaskInstance};
use crate::domain::time_blocks::ActiveBlock;

/// Occupied interval of a fixed-time task; `None` for unfixed tasks.
pub fn task_interval(task: &TaskInstance, policy: &PlanningPolicy) -> Option<Interval> {
    task.fixed_time.map(|fixed_time| {
        Interval::starting_at(fixed_time, task.duration_minutes(policy.default_task_minutes))
    })
}

/// First event on the task's date that the task collides with, in start order.
///
/// `needs_full_focus` beats the task's combine list and the event's
/// `allow_overlap` flag.
pub fn detect_conflict<'a>(
    task: &TaskInstance,
    events: &'a [Event],
    policy: &PlanningPolicy,
) -> Option<&'a Event> {
    let task_interval = task_interval(task, policy)?;

    let mut same_day = events
        .iter()
        .filter(|event| event.date == task.date)
        .collect::<Vec<_>>();
    same_day.sort_by_key(|event| event.start_time);

    same_day.into_iter().find(|event| {
        if !task_interval.overlaps(&Interval::span(event.start_time, event.end_time)) {
            return false;
        }
        if task.needs_full_focus {
            return true;
        }
        !(task.can_combine_with_events.contains(&event.id) || event.allow_overlap)
    })
}

/// First active block the task overlaps without sharing one of its tags.
///
/// Untagged blocks only reserve time against `needs_full_focus` tasks.
pub fn detect_block_conflict<'a>(
    task: &TaskInstance,
    active_blocks: &'a [ActiveBlock],
    policy: &PlanningPolicy,
) -> Option<&'a ActiveBlock> {
    let task_interval = task_interval(task, policy)?;
    active_blocks.iter().find(|active| {
        if !task_interval.overlaps(&active.interval()) || active.shares_tag_with(&task.tags) {
            return false;
        }
        task.needs_full_focus || !active.block.tags.is_empty()
    })
}

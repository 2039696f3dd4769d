use crate::domain::interval::{minute_of_day, time_from_minutes, Interval};
use crate::domain::models::{hhmm, next_id, PlanningPolicy, TaskInstance};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedPart {
    pub part_number: u32,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuggestedSlot {
    pub date: NaiveDate,
    #[serde(with = "hhmm::option")]
    pub start_time: Option<NaiveTime>,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SplitProposal {
    pub task_id: String,
    pub can_split: bool,
    pub reason: Option<String>,
    pub parts: Vec<ProposedPart>,
    pub overflow_to_next_day: bool,
    pub remaining_minutes: u32,
    pub suggested_slot: Option<SuggestedSlot>,
}

impl SplitProposal {
    fn refused(task: &TaskInstance, reason: String) -> Self {
        Self {
            task_id: task.id.clone(),
            can_split: false,
            reason: Some(reason),
            parts: Vec::new(),
            overflow_to_next_day: false,
            remaining_minutes: 0,
            suggested_slot: None,
        }
    }

    pub fn total_minutes(&self) -> u32 {
        self.parts.iter().map(|part| part.duration_minutes).sum()
    }
}

/// Minutes already covered by a split parent's parts and the number the
/// next part gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitProgress {
    pub scheduled_minutes: u32,
    pub next_part_number: u32,
}

impl SplitProgress {
    /// Progress of `task` given the stored tasks in `existing_parts`; rows
    /// that are not parts of `task` are ignored.
    pub fn of(task: &TaskInstance, existing_parts: &[TaskInstance], policy: &PlanningPolicy) -> Self {
        let parts = existing_parts
            .iter()
            .filter(|part| part.is_part && part.parent_task_id.as_deref() == Some(task.id.as_str()));
        let mut progress = Self {
            scheduled_minutes: 0,
            next_part_number: 1,
        };
        for part in parts {
            progress.scheduled_minutes += part.duration_minutes(policy.default_task_minutes);
            progress.next_part_number = progress
                .next_part_number
                .max(part.part_number.unwrap_or(0) + 1);
        }
        progress
    }

    /// Minutes of `task` not yet covered by a part.
    pub fn unscheduled(&self, task: &TaskInstance, policy: &PlanningPolicy) -> u32 {
        task.duration_minutes(policy.default_task_minutes)
            .saturating_sub(self.scheduled_minutes)
    }
}

/// Carves `task` into parts over `free` (the date's free intervals, in any
/// order), earliest first.
///
/// For a task that is already split, only the minutes its `existing_parts`
/// do not cover are carved, and numbering continues after the last part.
///
/// A part shorter than `policy.min_part_minutes` is never created on its
/// own: an interval too short for one is skipped, and a short trailing
/// remainder is folded into the previous part (see `fold_trailing`). Every
/// part lies inside one free interval.
pub fn propose_split(
    task: &TaskInstance,
    existing_parts: &[TaskInstance],
    free: &[Interval],
    date: NaiveDate,
    policy: &PlanningPolicy,
) -> SplitProposal {
    let progress = SplitProgress::of(task, existing_parts, policy);
    let estimate = progress.unscheduled(task, policy);
    if estimate == 0 {
        return SplitProposal::refused(task, format!("task {} is fully split", task.id));
    }
    if free.is_empty() {
        return SplitProposal::refused(task, format!("No free time on {date}"));
    }

    let mut intervals = free.to_vec();
    intervals.sort_unstable();

    let mut remaining = estimate;
    let mut parts: Vec<ProposedPart> = Vec::new();
    // End minute of the free interval each part was carved from.
    let mut source_ends: Vec<u32> = Vec::new();

    for interval in intervals {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(interval.len());
        if take < policy.min_part_minutes {
            if take < remaining {
                continue;
            }
            // A task shorter than the minimum is carved whole.
            if !parts.is_empty() {
                if fold_trailing(&mut parts, &source_ends, interval, take, date, policy) {
                    remaining = 0;
                    break;
                }
                continue;
            }
        }
        parts.push(ProposedPart {
            part_number: progress.next_part_number + parts.len() as u32,
            date,
            start_time: time_from_minutes(interval.start),
            duration_minutes: take,
        });
        source_ends.push(interval.end);
        remaining -= take;
    }

    if parts.is_empty() {
        return SplitProposal::refused(
            task,
            format!(
                "No free interval of at least {} minutes on {date}",
                policy.min_part_minutes
            ),
        );
    }

    let overflow_to_next_day = remaining > 0;
    let suggested_slot = if overflow_to_next_day {
        date.succ_opt().map(|next_day| SuggestedSlot {
            date: next_day,
            start_time: Some(policy.window.start),
            duration_minutes: remaining,
        })
    } else {
        None
    };

    SplitProposal {
        task_id: task.id.clone(),
        can_split: true,
        reason: overflow_to_next_day
            .then(|| format!("{remaining} minutes do not fit on {date} and overflow to the next day")),
        parts,
        overflow_to_next_day,
        remaining_minutes: remaining,
        suggested_slot,
    }
}

/// Places a trailing remainder shorter than the minimum part length.
///
/// The previous part grows when its free interval still has room behind it.
/// Otherwise the remainder gets its own part in `interval`, topped up to the
/// minimum with minutes taken from the previous part, provided that part
/// keeps the minimum too. Returns false when neither fits.
fn fold_trailing(
    parts: &mut Vec<ProposedPart>,
    source_ends: &[u32],
    interval: Interval,
    take: u32,
    date: NaiveDate,
    policy: &PlanningPolicy,
) -> bool {
    let (Some(previous), Some(&source_end)) = (parts.last_mut(), source_ends.last()) else {
        return false;
    };
    let previous_end = minute_of_day(previous.start_time) + previous.duration_minutes;
    if previous_end + take <= source_end {
        previous.duration_minutes += take;
        return true;
    }

    let shortfall = policy.min_part_minutes - take;
    if interval.len() < policy.min_part_minutes
        || previous.duration_minutes < policy.min_part_minutes + shortfall
    {
        return false;
    }
    previous.duration_minutes -= shortfall;
    let part_number = previous.part_number + 1;
    parts.push(ProposedPart {
        part_number,
        date,
        start_time: time_from_minutes(interval.start),
        duration_minutes: policy.min_part_minutes,
    });
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SplitOutcome {
    pub parent_task: TaskInstance,
    pub subtasks: Vec<TaskInstance>,
}

/// Turns accepted parts into linked subtasks and marks the task as a
/// split parent.
///
/// A task that is already split takes further parts, numbered on from its
/// `existing_parts` and limited to the minutes they leave uncovered.
pub fn apply_split(
    task: &TaskInstance,
    existing_parts: &[TaskInstance],
    parts: &[ProposedPart],
    policy: &PlanningPolicy,
) -> Result<SplitOutcome, String> {
    if task.is_part {
        return Err(format!("task {} is itself a split part", task.id));
    }
    let progress = SplitProgress::of(task, existing_parts, policy);
    if parts.is_empty() {
        return Err("split requires at least one part".to_string());
    }
    for (index, part) in parts.iter().enumerate() {
        if part.part_number != progress.next_part_number + index as u32 {
            return Err(format!(
                "part numbers must be contiguous starting at {}",
                progress.next_part_number
            ));
        }
        if part.duration_minutes == 0 {
            return Err(format!("part {} must have a positive duration", part.part_number));
        }
    }
    let available = progress.unscheduled(task, policy);
    let total = parts.iter().map(|part| part.duration_minutes).sum::<u32>();
    if total > available {
        return Err(format!(
            "parts total {total} minutes, more than the {available} unsplit minutes of task {}",
            task.id
        ));
    }

    let count = progress.next_part_number - 1 + parts.len() as u32;
    let subtasks = parts
        .iter()
        .map(|part| {
            let mut subtask = TaskInstance::new(
                next_id("tsk"),
                task.user_id.clone(),
                format!("{} (Part {}/{count})", task.title, part.part_number),
                part.date,
            );
            subtask.category = task.category.clone();
            subtask.due_date = task.due_date;
            subtask.estimated_minutes = Some(part.duration_minutes);
            subtask.fixed_time = Some(part.start_time);
            subtask.can_combine_with_events = task.can_combine_with_events.clone();
            subtask.needs_full_focus = task.needs_full_focus;
            subtask.tags = task.tags.clone();
            subtask.parent_task_id = Some(task.id.clone());
            subtask.part_number = Some(part.part_number);
            subtask.is_part = true;
            subtask
        })
        .collect();

    let mut parent_task = task.clone();
    parent_task.is_split = true;
    parent_task.fixed_time = None;

    Ok(SplitOutcome {
        parent_task,
        subtasks,
    })
}

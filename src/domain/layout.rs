use crate::domain::conflict::task_interval;
use crate::domain::interval::{duration_fraction, time_to_fraction};
use crate::domain::models::{hhmm, DayWindow, Event, PlanningPolicy, TaskInstance};
use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleItemKind {
    Event,
    Task,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleItem {
    pub id: String,
    pub title: String,
    pub kind: ScheduleItemKind,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm::option")]
    pub end_time: Option<NaiveTime>,
}

impl ScheduleItem {
    pub fn from_event(event: &Event) -> Self {
        Self {
            id: event.id.clone(),
            title: event.title.clone(),
            kind: ScheduleItemKind::Event,
            start_time: event.start_time,
            end_time: event.end_time,
        }
    }

    /// Display item for a fixed-time task; unfixed tasks have no position.
    pub fn from_task(task: &TaskInstance, policy: &PlanningPolicy) -> Option<Self> {
        let interval = task_interval(task, policy)?;
        Some(Self {
            id: task.id.clone(),
            title: task.title.clone(),
            kind: ScheduleItemKind::Task,
            start_time: interval.start_time(),
            end_time: Some(interval.end_time()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionedItem {
    #[serde(flatten)]
    pub item: ScheduleItem,
    pub top_percent: f64,
    pub height_percent: f64,
}

/// Positions items on the window's vertical axis. Overlapping items keep
/// overlapping coordinates; ties in start time keep their input order.
pub fn build_layout(mut items: Vec<ScheduleItem>, window: &DayWindow) -> Vec<PositionedItem> {
    items.sort_by_key(|item| item.start_time);
    items
        .into_iter()
        .map(|item| PositionedItem {
            top_percent: 100.0 * time_to_fraction(item.start_time, window),
            height_percent: 100.0 * duration_fraction(item.start_time, item.end_time, window),
            item,
        })
        .collect()
}

pub fn layout_for_day(
    events: &[Event],
    tasks: &[TaskInstance],
    date: NaiveDate,
    policy: &PlanningPolicy,
) -> Vec<PositionedItem> {
    let items = events
        .iter()
        .filter(|event| event.date == date)
        .map(ScheduleItem::from_event)
        .chain(
            tasks
                .iter()
                .filter(|task| task.date == date && !task.is_split)
                .filter_map(|task| ScheduleItem::from_task(task, policy)),
        )
        .collect();
    build_layout(items, &policy.window)
}

use crate::domain::interval::Interval;
use crate::domain::models::{
    hhmm, ExceptionKind, TagSet, TaskInstance, TimeBlock, TimeBlockException,
};
use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use std::collections::HashMap;

/// A time block's occurrence on one date, after exceptions are applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveBlock {
    pub block: TimeBlock,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub overridden: bool,
    #[serde(skip)]
    interval: Interval,
}

impl ActiveBlock {
    pub fn new(block: TimeBlock, start_time: NaiveTime, end_time: NaiveTime) -> Option<Self> {
        let interval = Interval::from_times(start_time, end_time)?;
        Some(Self {
            block,
            start_time,
            end_time,
            overridden: false,
            interval,
        })
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn shares_tag_with(&self, tags: &TagSet) -> bool {
        !self.block.tags.is_disjoint(tags)
    }
}

pub fn active_blocks_on(
    blocks: &[TimeBlock],
    exceptions: &[TimeBlockException],
    date: NaiveDate,
) -> Vec<ActiveBlock> {
    let exceptions_for_date = exceptions
        .iter()
        .filter(|exception| exception.exception_date == date)
        .map(|exception| (exception.time_block_id.as_str(), &exception.kind))
        .collect::<HashMap<_, _>>();

    let mut active = blocks
        .iter()
        .filter(|block| block.is_active && block.recurrence.occurs_on(date))
        .filter_map(|block| match exceptions_for_date.get(block.id.as_str()) {
            Some(ExceptionKind::Cancelled) => None,
            Some(ExceptionKind::Override {
                start_time,
                end_time,
            }) => ActiveBlock::new(block.clone(), *start_time, *end_time).map(|mut active| {
                active.overridden = true;
                active
            }),
            None => ActiveBlock::new(block.clone(), block.start_time, block.end_time),
        })
        .collect::<Vec<_>>();
    active.sort_by_key(|active| active.start_time);
    active
}

/// Active blocks sharing at least one tag with the task, earliest first.
pub fn matching_blocks_for_task<'a>(
    task: &TaskInstance,
    active_blocks: &'a [ActiveBlock],
) -> Vec<&'a ActiveBlock> {
    let mut matching = active_blocks
        .iter()
        .filter(|active| active.shares_tag_with(&task.tags))
        .collect::<Vec<_>>();
    matching.sort_by_key(|active| active.start_time);
    matching
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Recurrence, RecurrenceRule};

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date")
    }

    fn time(value: &str) -> NaiveTime {
        NaiveTime::parse_from_str(value, "%H:%M").expect("valid time")
    }

    fn block(id: &str, start: &str, end: &str, rule: RecurrenceRule, tags: &[&str]) -> TimeBlock {
        TimeBlock {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            name: format!("Block {id}"),
            color: None,
            start_time: time(start),
            end_time: time(end),
            recurrence: Recurrence {
                rule,
                start_date: date("2026-01-01"),
                end_date: None,
            },
            tags: tags.iter().map(|tag| tag.to_string()).collect(),
            is_active: true,
        }
    }

    fn exception(block_id: &str, on: &str, kind: ExceptionKind) -> TimeBlockException {
        TimeBlockException {
            id: format!("exc-{block_id}-{on}"),
            time_block_id: block_id.to_string(),
            exception_date: date(on),
            kind,
        }
    }

    #[test]
    fn blocks_follow_their_recurrence_and_sort_by_start() {
        let blocks = vec![
            block("afternoon", "14:00", "16:00", RecurrenceRule::Daily, &["focus"]),
            block("morning", "09:00", "11:00", RecurrenceRule::Weekdays, &["focus"]),
        ];

        let monday = active_blocks_on(&blocks, &[], date("2026-01-12"));
        assert_eq!(
            monday.iter().map(|active| active.block.id.as_str()).collect::<Vec<_>>(),
            vec!["morning", "afternoon"]
        );

        let saturday = active_blocks_on(&blocks, &[], date("2026-01-17"));
        assert_eq!(saturday.len(), 1);
        assert_eq!(saturday[0].block.id, "afternoon");
    }

    #[test]
    fn inactive_blocks_are_ignored() {
        let mut inactive = block("morning", "09:00", "11:00", RecurrenceRule::Daily, &[]);
        inactive.is_active = false;
        assert!(active_blocks_on(&[inactive], &[], date("2026-01-12")).is_empty());
    }

    #[test]
    fn exceptions_cancel_or_override_one_date() {
        let blocks = vec![
            block("morning", "09:00", "11:00", RecurrenceRule::Daily, &["focus"]),
            block("evening", "18:00", "19:00", RecurrenceRule::Daily, &[]),
        ];
        let exceptions = vec![
            exception("morning", "2026-01-12", ExceptionKind::Cancelled),
            exception(
                "evening",
                "2026-01-12",
                ExceptionKind::Override {
                    start_time: time("07:00"),
                    end_time: time("08:00"),
                },
            ),
        ];

        let overridden_day = active_blocks_on(&blocks, &exceptions, date("2026-01-12"));
        assert_eq!(overridden_day.len(), 1);
        assert_eq!(overridden_day[0].block.id, "evening");
        assert_eq!(overridden_day[0].start_time, time("07:00"));
        assert!(overridden_day[0].overridden);

        let next_day = active_blocks_on(&blocks, &exceptions, date("2026-01-13"));
        assert_eq!(next_day.len(), 2);
        assert!(next_day.iter().all(|active| !active.overridden));
    }

    #[test]
    fn matching_requires_a_shared_tag() {
        let blocks = vec![
            block("writing", "13:00", "15:00", RecurrenceRule::Daily, &["writing"]),
            block("deep", "09:00", "11:00", RecurrenceRule::Daily, &["focus", "writing"]),
            block("admin", "16:00", "17:00", RecurrenceRule::Daily, &["admin"]),
        ];
        let active = active_blocks_on(&blocks, &[], date("2026-01-12"));

        let mut task = TaskInstance::new("tsk-1", "user-1", "Draft chapter", date("2026-01-12"));
        task.tags = TagSet::from(["writing".to_string()]);
        let matching = matching_blocks_for_task(&task, &active);
        assert_eq!(
            matching.iter().map(|active| active.block.id.as_str()).collect::<Vec<_>>(),
            vec!["deep", "writing"]
        );

        task.tags.clear();
        assert!(matching_blocks_for_task(&task, &active).is_empty());
    }
}

use crate::domain::models::DayWindow;
use chrono::{NaiveTime, Timelike};

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Display duration used when an item has no end time.
pub const DEFAULT_DISPLAY_MINUTES: u32 = 60;
/// Shortest duration an item is drawn with.
pub const MIN_DISPLAY_MINUTES: u32 = 30;

/// Half-open `[start, end)` span in minutes since midnight; touching
/// intervals never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval {
    pub start: u32,
    pub end: u32,
}

impl Interval {
    pub fn new(start: u32, end: u32) -> Option<Self> {
        (end > start).then_some(Self { start, end })
    }

    pub fn from_times(start: NaiveTime, end: NaiveTime) -> Option<Self> {
        Self::new(minute_of_day(start), minute_of_day(end))
    }

    /// Interval of `minutes` length beginning at `start`, capped at midnight.
    pub fn starting_at(start: NaiveTime, minutes: u32) -> Self {
        let start = minute_of_day(start);
        Self {
            start,
            end: start.saturating_add(minutes.max(1)).min(MINUTES_PER_DAY),
        }
    }

    /// Interval for an item with an optional end; a missing or non-positive
    /// end collapses to a one-minute point.
    pub fn span(start: NaiveTime, end: Option<NaiveTime>) -> Self {
        end.and_then(|end| Self::from_times(start, end))
            .unwrap_or_else(|| Self::starting_at(start, 1))
    }

    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        Interval::new(self.start.max(other.start), self.end.min(other.end))
    }

    pub fn start_time(&self) -> NaiveTime {
        time_from_minutes(self.start)
    }

    pub fn end_time(&self) -> NaiveTime {
        time_from_minutes(self.end)
    }
}

impl DayWindow {
    pub fn interval(&self) -> Option<Interval> {
        Interval::from_times(self.start, self.end)
    }

    pub fn minutes(&self) -> u32 {
        self.interval().map(|interval| interval.len()).unwrap_or(0)
    }
}

pub fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// Converts minutes since midnight back to a time, saturating at 23:59.
pub fn time_from_minutes(minutes: u32) -> NaiveTime {
    let minutes = minutes.min(MINUTES_PER_DAY - 1);
    NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0).unwrap_or(NaiveTime::MIN)
}

pub fn overlaps(
    a_start: NaiveTime,
    a_end: Option<NaiveTime>,
    b_start: NaiveTime,
    b_end: Option<NaiveTime>,
) -> bool {
    Interval::span(a_start, a_end).overlaps(&Interval::span(b_start, b_end))
}

pub fn duration_minutes(start: NaiveTime, end: NaiveTime) -> u32 {
    minute_of_day(end).saturating_sub(minute_of_day(start))
}

/// Position of `time` inside `window` as a fraction in `[0, 1]`.
pub fn time_to_fraction(time: NaiveTime, window: &DayWindow) -> f64 {
    let window_minutes = window.minutes();
    if window_minutes == 0 {
        return 0.0;
    }
    let offset = minute_of_day(time).saturating_sub(minute_of_day(window.start));
    (f64::from(offset) / f64::from(window_minutes)).min(1.0)
}

pub fn duration_fraction(start: NaiveTime, end: Option<NaiveTime>, window: &DayWindow) -> f64 {
    let window_minutes = window.minutes();
    if window_minutes == 0 {
        return 0.0;
    }
    let minutes = end
        .map(|end| duration_minutes(start, end))
        .unwrap_or(DEFAULT_DISPLAY_MINUTES)
        .max(MIN_DISPLAY_MINUTES);
    f64::from(minutes) / f64::from(window_minutes)
}

pub fn clip_interval(interval: Interval, window: Interval) -> Option<Interval> {
    interval.intersect(&window)
}

pub fn merge_intervals(mut intervals: Vec<Interval>) -> Vec<Interval> {
    intervals.retain(|interval| !interval.is_empty());
    intervals.sort_unstable();

    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        match merged.last_mut() {
            Some(last) if interval.start <= last.end => {
                if interval.end > last.end {
                    last.end = interval.end;
                }
            }
            _ => merged.push(interval),
        }
    }
    merged
}

/// `window` minus every busy interval, sorted by start.
pub fn free_intervals(window: Interval, busy: Vec<Interval>) -> Vec<Interval> {
    let busy = merge_intervals(
        busy.into_iter()
            .filter_map(|interval| clip_interval(interval, window))
            .collect(),
    );

    let mut slots = Vec::new();
    let mut cursor = window.start;
    for interval in &busy {
        if interval.start > cursor {
            slots.push(Interval {
                start: cursor,
                end: interval.start,
            });
        }
        if interval.end > cursor {
            cursor = interval.end;
        }
    }
    if cursor < window.end {
        slots.push(Interval {
            start: cursor,
            end: window.end,
        });
    }
    slots
}

/// Parts of `free` that fall inside `bounds`.
pub fn intersect_all(free: &[Interval], bounds: Interval) -> Vec<Interval> {
    free.iter()
        .filter_map(|interval| interval.intersect(&bounds))
        .collect()
}

/// First interval with at least `minutes` of room, returned as the exact
/// sub-interval that would be occupied.
pub fn earliest_fit(free: &[Interval], minutes: u32) -> Option<Interval> {
    free.iter()
        .filter(|interval| interval.len() >= minutes)
        .min_by_key(|interval| interval.start)
        .map(|interval| Interval {
            start: interval.start,
            end: interval.start + minutes,
        })
}

/// Removes `taken` from the free set, splitting intervals where needed.
pub fn consume(free: &mut Vec<Interval>, taken: Interval) {
    let mut remaining = Vec::with_capacity(free.len() + 1);
    for interval in free.drain(..) {
        if !interval.overlaps(&taken) {
            remaining.push(interval);
            continue;
        }
        if let Some(before) = Interval::new(interval.start, taken.start.min(interval.end)) {
            remaining.push(before);
        }
        if let Some(after) = Interval::new(taken.end.max(interval.start), interval.end) {
            remaining.push(after);
        }
    }
    remaining.sort_unstable();
    *free = remaining;
}

pub fn largest(free: &[Interval]) -> u32 {
    free.iter().map(Interval::len).max().unwrap_or(0)
}

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

pub const DEFAULT_TASK_MINUTES: u32 = 30;
pub const MIN_PART_MINUTES: u32 = 15;

pub type TagSet = BTreeSet<String>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

/// How a recurring definition or time block repeats.
///
/// Weekday indices for `Custom` run from 0 (Sunday) to 6 (Saturday).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecurrenceRule {
    Daily,
    Weekly,
    Weekdays,
    Monthly,
    Custom { days: BTreeSet<u8> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recurrence {
    pub rule: RecurrenceRule,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl Recurrence {
    pub fn validate(&self, field_name: &str) -> Result<(), String> {
        if let RecurrenceRule::Custom { days } = &self.rule {
            if days.is_empty() {
                return Err(format!("{field_name}.rule.days must not be empty"));
            }
            if days.iter().any(|day| *day > 6) {
                return Err(format!("{field_name}.rule.days must be within 0..=6"));
            }
        }
        if let Some(end_date) = self.end_date {
            if end_date < self.start_date {
                return Err(format!("{field_name}.end_date must be >= start_date"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecurringTaskDefinition {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub recurrence: Recurrence,
    #[serde(default)]
    pub last_generated_date: Option<NaiveDate>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub estimated_minutes: Option<u32>,
    #[serde(default, with = "hhmm::option")]
    pub fixed_time: Option<NaiveTime>,
    #[serde(default)]
    pub tags: TagSet,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl RecurringTaskDefinition {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "recurring_task.id")?;
        validate_non_empty(&self.user_id, "recurring_task.user_id")?;
        validate_non_empty(&self.title, "recurring_task.title")?;
        self.recurrence.validate("recurring_task.recurrence")?;
        if let Some(watermark) = self.last_generated_date {
            if watermark < self.recurrence.start_date {
                return Err(
                    "recurring_task.last_generated_date must be >= start_date".to_string(),
                );
            }
        }
        if self.estimated_minutes == Some(0) {
            return Err("recurring_task.estimated_minutes must be > 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskInstance {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default, with = "hhmm::option")]
    pub reminder_time: Option<NaiveTime>,
    #[serde(default)]
    pub estimated_minutes: Option<u32>,
    #[serde(default, with = "hhmm::option")]
    pub fixed_time: Option<NaiveTime>,
    #[serde(default)]
    pub can_combine_with_events: BTreeSet<String>,
    #[serde(default)]
    pub needs_full_focus: bool,
    #[serde(default)]
    pub tags: TagSet,
    #[serde(default)]
    pub recurring_task_id: Option<String>,
    #[serde(default)]
    pub parent_task_id: Option<String>,
    #[serde(default)]
    pub part_number: Option<u32>,
    #[serde(default)]
    pub is_part: bool,
    #[serde(default)]
    pub is_split: bool,
}

impl TaskInstance {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        title: impl Into<String>,
        date: NaiveDate,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            title: title.into(),
            date,
            category: None,
            is_completed: false,
            completed_at: None,
            due_date: None,
            reminder_time: None,
            estimated_minutes: None,
            fixed_time: None,
            can_combine_with_events: BTreeSet::new(),
            needs_full_focus: false,
            tags: TagSet::new(),
            recurring_task_id: None,
            parent_task_id: None,
            part_number: None,
            is_part: false,
            is_split: false,
        }
    }

    /// Estimated duration, falling back to `default_minutes` when unset or zero.
    pub fn duration_minutes(&self, default_minutes: u32) -> u32 {
        self.estimated_minutes
            .filter(|minutes| *minutes > 0)
            .unwrap_or(default_minutes)
    }

    pub fn is_schedulable(&self) -> bool {
        !self.is_completed && !self.is_split
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        validate_non_empty(&self.user_id, "task.user_id")?;
        validate_non_empty(&self.title, "task.title")?;
        if self.estimated_minutes == Some(0) {
            return Err("task.estimated_minutes must be > 0".to_string());
        }
        if self.is_part {
            if self.parent_task_id.as_deref().map(str::trim).unwrap_or("").is_empty() {
                return Err("task.parent_task_id is required when task.is_part".to_string());
            }
            if self.part_number.unwrap_or(0) < 1 {
                return Err("task.part_number must be >= 1 when task.is_part".to_string());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(default, with = "hhmm::option")]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub allow_overlap: bool,
}

impl Event {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "event.id")?;
        validate_non_empty(&self.user_id, "event.user_id")?;
        validate_non_empty(&self.title, "event.title")?;
        if let Some(end_time) = self.end_time {
            if end_time <= self.start_time {
                return Err("event.end_time must be after event.start_time".to_string());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeBlock {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub recurrence: Recurrence,
    #[serde(default)]
    pub tags: TagSet,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl TimeBlock {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "time_block.id")?;
        validate_non_empty(&self.user_id, "time_block.user_id")?;
        validate_non_empty(&self.name, "time_block.name")?;
        if self.end_time <= self.start_time {
            return Err("time_block.end_time must be after time_block.start_time".to_string());
        }
        self.recurrence.validate("time_block.recurrence")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionKind {
    Cancelled,
    Override {
        #[serde(with = "hhmm")]
        start_time: NaiveTime,
        #[serde(with = "hhmm")]
        end_time: NaiveTime,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeBlockException {
    pub id: String,
    pub time_block_id: String,
    pub exception_date: NaiveDate,
    pub kind: ExceptionKind,
}

impl TimeBlockException {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "time_block_exception.id")?;
        validate_non_empty(&self.time_block_id, "time_block_exception.time_block_id")?;
        if let ExceptionKind::Override {
            start_time,
            end_time,
        } = &self.kind
        {
            if end_time <= start_time {
                return Err(
                    "time_block_exception.end_time must be after start_time".to_string(),
                );
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

impl Tag {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "tag.id")?;
        validate_non_empty(&self.user_id, "tag.user_id")?;
        validate_non_empty(&self.name, "tag.name")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleSuggestion {
    pub task_id: String,
    pub title: String,
    #[serde(with = "hhmm::option")]
    pub suggested_time: Option<NaiveTime>,
    pub duration_minutes: u32,
    pub combined_with_event_id: Option<String>,
    pub time_block_id: Option<String>,
    pub reasoning: String,
}

/// Visible part of the day the engine plans and lays out within.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayWindow {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl Default for DayWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(6, 0, 0).expect("valid fixed time"),
            end: NaiveTime::from_hms_opt(22, 0, 0).expect("valid fixed time"),
        }
    }
}

impl DayWindow {
    pub fn validate(&self) -> Result<(), String> {
        if self.end <= self.start {
            return Err("window.end must be after window.start".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanningPolicy {
    pub window: DayWindow,
    pub default_task_minutes: u32,
    pub min_part_minutes: u32,
}

impl Default for PlanningPolicy {
    fn default() -> Self {
        Self {
            window: DayWindow::default(),
            default_task_minutes: DEFAULT_TASK_MINUTES,
            min_part_minutes: MIN_PART_MINUTES,
        }
    }
}

impl PlanningPolicy {
    pub fn validate(&self) -> Result<(), String> {
        self.window.validate()?;
        if self.default_task_minutes == 0 {
            return Err("policy.default_task_minutes must be > 0".to_string());
        }
        if self.min_part_minutes == 0 {
            return Err("policy.min_part_minutes must be > 0".to_string());
        }
        Ok(())
    }
}

pub fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

pub fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

pub fn parse_time(value: &str, field_name: &str) -> Result<NaiveTime, String> {
    parse_hhmm(value).ok_or_else(|| format!("{field_name} must be HH:MM"))
}

pub fn parse_date(value: &str, field_name: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| format!("{field_name} must be YYYY-MM-DD"))
}

fn default_true() -> bool {
    true
}

/// `HH:MM` wire format for times of day.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_hhmm(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("expected HH:MM, got '{raw}'")))
    }

    pub mod option {
        use chrono::NaiveTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(time: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match time {
                Some(time) => serializer.serialize_some(&time.format(super::FORMAT).to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw = Option::<String>::deserialize(deserializer)?;
            raw.map(|raw| {
                super::super::parse_hhmm(&raw).ok_or_else(|| {
                    serde::de::Error::custom(format!("expected HH:MM, got '{raw}'"))
                })
            })
            .transpose()
        }
    }
}

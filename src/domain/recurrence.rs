use crate::domain::models::{
    next_id, Recurrence, RecurrenceRule, RecurringTaskDefinition, TaskInstance,
};
use chrono::{Datelike, NaiveDate, Weekday};

/// Weekday index as stored in custom rules: 0 = Sunday through 6 = Saturday.
pub fn weekday_index(weekday: Weekday) -> u8 {
    weekday.num_days_from_sunday() as u8
}

impl RecurrenceRule {
    /// Whether `date` matches the rule's pattern, anchored at `anchor`.
    ///
    /// Monthly rules never clamp: an anchor on the 31st skips shorter months.
    pub fn matches(&self, anchor: NaiveDate, date: NaiveDate) -> bool {
        match self {
            Self::Daily => true,
            Self::Weekly => date.weekday() == anchor.weekday(),
            Self::Weekdays => !matches!(date.weekday(), Weekday::Sat | Weekday::Sun),
            Self::Monthly => date.day() == anchor.day(),
            Self::Custom { days } => days.contains(&weekday_index(date.weekday())),
        }
    }
}

impl Recurrence {
    /// Inclusive `[start_date, end_date]` window check.
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && self.end_date.is_none_or(|end_date| end_date >= date)
    }

    pub fn occurs_on(&self, date: NaiveDate) -> bool {
        self.covers(date) && self.rule.matches(self.start_date, date)
    }
}

pub fn occurs_on(recurrence: &Recurrence, date: NaiveDate) -> bool {
    recurrence.occurs_on(date)
}

pub fn is_due(definition: &RecurringTaskDefinition, target_date: NaiveDate) -> bool {
    definition.is_active
        && definition
            .last_generated_date
            .is_none_or(|watermark| watermark < target_date)
        && definition.recurrence.occurs_on(target_date)
}

/// Definitions that need an instance on `target_date`. Anything inactive,
/// outside its window or already generated is left out.
pub fn resolve_due(
    definitions: &[RecurringTaskDefinition],
    target_date: NaiveDate,
) -> Vec<&RecurringTaskDefinition> {
    definitions
        .iter()
        .filter(|definition| is_due(definition, target_date))
        .collect()
}

/// The task instance a definition produces for `target_date`, without
/// touching the watermark.
pub fn instance_for(definition: &RecurringTaskDefinition, target_date: NaiveDate) -> TaskInstance {
    let mut task = TaskInstance::new(
        next_id("tsk"),
        definition.user_id.clone(),
        definition.title.clone(),
        target_date,
    );
    task.category = definition.category.clone();
    task.estimated_minutes = definition.estimated_minutes;
    task.fixed_time = definition.fixed_time;
    task.tags = definition.tags.clone();
    task.recurring_task_id = Some(definition.id.clone());
    task
}

/// Generates the instance for `target_date` and advances the watermark.
///
/// Returns `None` when the watermark already reaches `target_date`, so a
/// repeated call for the same date never yields a second instance.
pub fn generate(
    definition: &mut RecurringTaskDefinition,
    target_date: NaiveDate,
) -> Option<TaskInstance> {
    if definition
        .last_generated_date
        .is_some_and(|watermark| watermark >= target_date)
    {
        return None;
    }
    let task = instance_for(definition, target_date);
    definition.last_generated_date = Some(target_date);
    Some(task)
}

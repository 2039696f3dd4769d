use crate::domain::models::{
    Event, RecurrenceRule, Recurrence, RecurringTaskDefinition, Tag, TaskInstance, TimeBlock,
    TimeBlockException,
};
use crate::domain::planner::FixedTimeAssignment;
use crate::domain::splitter::SplitOutcome;
use crate::infrastructure::error::InfraError;
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const RECURRING_TASK_COLUMNS: &str = "id, user_id, title, recurrence, start_date, end_date, \
     last_generated_date, category, estimated_minutes, fixed_time, tags, is_active";
const TASK_COLUMNS: &str = "id, user_id, title, date, category, is_completed, completed_at, \
     due_date, reminder_time, estimated_minutes, fixed_time, can_combine_with_events, \
     needs_full_focus, tags, recurring_task_id, parent_task_id, part_number, is_part, is_split";
const EVENT_COLUMNS: &str = "id, user_id, title, date, start_time, end_time, allow_overlap";
const TIME_BLOCK_COLUMNS: &str = "id, user_id, name, color, start_time, end_time, recurrence, \
     start_date, end_date, tags, is_active";
const EXCEPTION_COLUMNS: &str = "id, time_block_id, exception_date, kind";

/// Everything `import` can load at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerSnapshot {
    #[serde(default)]
    pub recurring_tasks: Vec<RecurringTaskDefinition>,
    #[serde(default)]
    pub tasks: Vec<TaskInstance>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub time_blocks: Vec<TimeBlock>,
    #[serde(default)]
    pub time_block_exceptions: Vec<TimeBlockException>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl PlannerSnapshot {
    pub fn validate(&self) -> Result<(), String> {
        for definition in &self.recurring_tasks {
            definition
                .validate()
                .map_err(|error| format!("{}: {error}", definition.id))?;
        }
        for task in &self.tasks {
            task.validate().map_err(|error| format!("{}: {error}", task.id))?;
        }
        for event in &self.events {
            event.validate().map_err(|error| format!("{}: {error}", event.id))?;
        }
        for block in &self.time_blocks {
            block.validate().map_err(|error| format!("{}: {error}", block.id))?;
        }
        for exception in &self.time_block_exceptions {
            exception
                .validate()
                .map_err(|error| format!("{}: {error}", exception.id))?;
        }
        for tag in &self.tags {
            tag.validate().map_err(|error| format!("{}: {error}", tag.id))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub recurring_tasks: usize,
    pub tasks: usize,
    pub events: usize,
    pub time_blocks: usize,
    pub time_block_exceptions: usize,
    pub tags: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub definition_id: String,
    pub deleted_instances: usize,
}

pub trait PlannerRepository: Send + Sync {
    fn list_recurring_tasks(
        &self,
        user_id: Option<&str>,
    ) -> Result<Vec<RecurringTaskDefinition>, InfraError>;

    /// Stores a generated instance and advances its definition's watermark
    /// to `target_date` in one step. Returns `false`, writing nothing, when
    /// the watermark already reached `target_date`.
    fn record_generated_task(
        &self,
        task: &TaskInstance,
        target_date: NaiveDate,
    ) -> Result<bool, InfraError>;

    /// Deletes a definition. Generated instances stay unless `cascade_from`
    /// is given, in which case instances dated on or after it are removed.
    fn delete_recurring_task(
        &self,
        id: &str,
        cascade_from: Option<NaiveDate>,
    ) -> Result<DeleteOutcome, InfraError>;

    fn get_task(&self, id: &str) -> Result<Option<TaskInstance>, InfraError>;
    /// Stored parts of a split parent, by part number.
    fn list_parts(&self, parent_task_id: &str) -> Result<Vec<TaskInstance>, InfraError>;
    fn list_tasks(&self, user_id: &str, date: NaiveDate) -> Result<Vec<TaskInstance>, InfraError>;
    fn list_events(&self, user_id: &str, date: NaiveDate) -> Result<Vec<Event>, InfraError>;
    fn list_time_blocks(&self, user_id: &str) -> Result<Vec<TimeBlock>, InfraError>;
    fn list_time_block_exceptions(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<TimeBlockException>, InfraError>;

    /// All-or-nothing: an unknown task id leaves every task untouched.
    fn apply_fixed_times(
        &self,
        assignments: &[FixedTimeAssignment],
    ) -> Result<Vec<TaskInstance>, InfraError>;

    /// Marks the parent as split and stores the new parts in one step. A
    /// part number the parent already has rejects the whole outcome.
    fn apply_split(&self, outcome: &SplitOutcome) -> Result<(), InfraError>;

    fn import_snapshot(&self, snapshot: &PlannerSnapshot) -> Result<ImportSummary, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteRepository {
    db_path: PathBuf,
}

impl SqliteRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(BUSY_TIMEOUT)?;
        Ok(connection)
    }
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, index: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(index)?;
    serde_json::from_str(&raw)
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error)))
}

fn recurring_task_from_row(row: &Row<'_>) -> rusqlite::Result<RecurringTaskDefinition> {
    Ok(RecurringTaskDefinition {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        recurrence: Recurrence {
            rule: json_column::<RecurrenceRule>(row, 3)?,
            start_date: row.get(4)?,
            end_date: row.get(5)?,
        },
        last_generated_date: row.get(6)?,
        category: row.get(7)?,
        estimated_minutes: row.get(8)?,
        fixed_time: row.get(9)?,
        tags: json_column(row, 10)?,
        is_active: row.get(11)?,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskInstance> {
    Ok(TaskInstance {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        date: row.get(3)?,
        category: row.get(4)?,
        is_completed: row.get(5)?,
        completed_at: row.get(6)?,
        due_date: row.get(7)?,
        reminder_time: row.get(8)?,
        estimated_minutes: row.get(9)?,
        fixed_time: row.get(10)?,
        can_combine_with_events: json_column(row, 11)?,
        needs_full_focus: row.get(12)?,
        tags: json_column(row, 13)?,
        recurring_task_id: row.get(14)?,
        parent_task_id: row.get(15)?,
        part_number: row.get(16)?,
        is_part: row.get(17)?,
        is_split: row.get(18)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        date: row.get(3)?,
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        allow_overlap: row.get(6)?,
    })
}

fn time_block_from_row(row: &Row<'_>) -> rusqlite::Result<TimeBlock> {
    Ok(TimeBlock {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        color: row.get(3)?,
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        recurrence: Recurrence {
            rule: json_column::<RecurrenceRule>(row, 6)?,
            start_date: row.get(7)?,
            end_date: row.get(8)?,
        },
        tags: json_column(row, 9)?,
        is_active: row.get(10)?,
    })
}

fn exception_from_row(row: &Row<'_>) -> rusqlite::Result<TimeBlockException> {
    Ok(TimeBlockException {
        id: row.get(0)?,
        time_block_id: row.get(1)?,
        exception_date: row.get(2)?,
        kind: json_column(row, 3)?,
    })
}

fn insert_task(connection: &Connection, task: &TaskInstance, replace: bool) -> Result<(), InfraError> {
    let verb = if replace { "INSERT OR REPLACE" } else { "INSERT" };
    connection.execute(
        &format!(
            "{verb} INTO tasks ({TASK_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
        ),
        params![
            task.id,
            task.user_id,
            task.title,
            task.date,
            task.category,
            task.is_completed,
            task.completed_at,
            task.due_date,
            task.reminder_time,
            task.estimated_minutes,
            task.fixed_time,
            serde_json::to_string(&task.can_combine_with_events)?,
            task.needs_full_focus,
            serde_json::to_string(&task.tags)?,
            task.recurring_task_id,
            task.parent_task_id,
            task.part_number,
            task.is_part,
            task.is_split,
        ],
    )?;
    Ok(())
}

fn upsert_recurring_task(
    connection: &Connection,
    definition: &RecurringTaskDefinition,
) -> Result<(), InfraError> {
    connection.execute(
        &format!(
            "INSERT OR REPLACE INTO recurring_tasks ({RECURRING_TASK_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        ),
        params![
            definition.id,
            definition.user_id,
            definition.title,
            serde_json::to_string(&definition.recurrence.rule)?,
            definition.recurrence.start_date,
            definition.recurrence.end_date,
            definition.last_generated_date,
            definition.category,
            definition.estimated_minutes,
            definition.fixed_time,
            serde_json::to_string(&definition.tags)?,
            definition.is_active,
        ],
    )?;
    Ok(())
}

fn upsert_event(connection: &Connection, event: &Event) -> Result<(), InfraError> {
    connection.execute(
        &format!("INSERT OR REPLACE INTO events ({EVENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
        params![
            event.id,
            event.user_id,
            event.title,
            event.date,
            event.start_time,
            event.end_time,
            event.allow_overlap,
        ],
    )?;
    Ok(())
}

fn upsert_time_block(connection: &Connection, block: &TimeBlock) -> Result<(), InfraError> {
    connection.execute(
        &format!(
            "INSERT OR REPLACE INTO time_blocks ({TIME_BLOCK_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ),
        params![
            block.id,
            block.user_id,
            block.name,
            block.color,
            block.start_time,
            block.end_time,
            serde_json::to_string(&block.recurrence.rule)?,
            block.recurrence.start_date,
            block.recurrence.end_date,
            serde_json::to_string(&block.tags)?,
            block.is_active,
        ],
    )?;
    Ok(())
}

fn upsert_exception(connection: &Connection, exception: &TimeBlockException) -> Result<(), InfraError> {
    connection.execute(
        &format!("INSERT OR REPLACE INTO time_block_exceptions ({EXCEPTION_COLUMNS}) VALUES (?1, ?2, ?3, ?4)"),
        params![
            exception.id,
            exception.time_block_id,
            exception.exception_date,
            serde_json::to_string(&exception.kind)?,
        ],
    )?;
    Ok(())
}

fn upsert_tag(connection: &Connection, tag: &Tag) -> Result<(), InfraError> {
    connection.execute(
        "INSERT OR REPLACE INTO tags (id, user_id, name, color) VALUES (?1, ?2, ?3, ?4)",
        params![tag.id, tag.user_id, tag.name, tag.color],
    )?;
    Ok(())
}

impl PlannerRepository for SqliteRepository {
    fn list_recurring_tasks(
        &self,
        user_id: Option<&str>,
    ) -> Result<Vec<RecurringTaskDefinition>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {RECURRING_TASK_COLUMNS} FROM recurring_tasks
             WHERE ?1 IS NULL OR user_id = ?1
             ORDER BY rowid"
        ))?;
        let definitions = statement
            .query_map(params![user_id], recurring_task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(definitions)
    }

    fn record_generated_task(
        &self,
        task: &TaskInstance,
        target_date: NaiveDate,
    ) -> Result<bool, InfraError> {
        let definition_id = task.recurring_task_id.as_deref().ok_or_else(|| {
            InfraError::Validation(format!("task {} has no recurring_task_id", task.id))
        })?;

        let mut connection = self.connect()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let advanced = transaction.execute(
            "UPDATE recurring_tasks SET last_generated_date = ?1
             WHERE id = ?2 AND (last_generated_date IS NULL OR last_generated_date < ?1)",
            params![target_date, definition_id],
        )?;
        if advanced == 0 {
            return Ok(false);
        }
        insert_task(&transaction, task, false)?;
        transaction.commit()?;
        Ok(true)
    }

    fn delete_recurring_task(
        &self,
        id: &str,
        cascade_from: Option<NaiveDate>,
    ) -> Result<DeleteOutcome, InfraError> {
        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        let deleted = transaction.execute("DELETE FROM recurring_tasks WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(InfraError::NotFound(format!("recurring task {id}")));
        }
        let deleted_instances = match cascade_from {
            Some(from) => transaction.execute(
                "DELETE FROM tasks WHERE recurring_task_id = ?1 AND date >= ?2",
                params![id, from],
            )?,
            None => 0,
        };
        transaction.commit()?;
        Ok(DeleteOutcome {
            definition_id: id.to_string(),
            deleted_instances,
        })
    }

    fn get_task(&self, id: &str) -> Result<Option<TaskInstance>, InfraError> {
        let connection = self.connect()?;
        let task = connection
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    fn list_parts(&self, parent_task_id: &str) -> Result<Vec<TaskInstance>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE parent_task_id = ?1 AND is_part = 1 ORDER BY part_number"
        ))?;
        let parts = statement
            .query_map(params![parent_task_id], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(parts)
    }

    fn list_tasks(&self, user_id: &str, date: NaiveDate) -> Result<Vec<TaskInstance>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = ?1 AND date = ?2 ORDER BY rowid"
        ))?;
        let tasks = statement
            .query_map(params![user_id, date], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    fn list_events(&self, user_id: &str, date: NaiveDate) -> Result<Vec<Event>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE user_id = ?1 AND date = ?2 ORDER BY rowid"
        ))?;
        let events = statement
            .query_map(params![user_id, date], event_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    fn list_time_blocks(&self, user_id: &str) -> Result<Vec<TimeBlock>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {TIME_BLOCK_COLUMNS} FROM time_blocks WHERE user_id = ?1 ORDER BY rowid"
        ))?;
        let blocks = statement
            .query_map(params![user_id], time_block_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(blocks)
    }

    fn list_time_block_exceptions(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<TimeBlockException>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {EXCEPTION_COLUMNS} FROM time_block_exceptions WHERE exception_date = ?1"
        ))?;
        let exceptions = statement
            .query_map(params![date], exception_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(exceptions)
    }

    fn apply_fixed_times(
        &self,
        assignments: &[FixedTimeAssignment],
    ) -> Result<Vec<TaskInstance>, InfraError> {
        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        let mut updated = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let changed = transaction.execute(
                "UPDATE tasks SET fixed_time = ?1 WHERE id = ?2",
                params![assignment.fixed_time, assignment.task_id],
            )?;
            if changed == 0 {
                return Err(InfraError::NotFound(format!("task {}", assignment.task_id)));
            }
            updated.push(transaction.query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![assignment.task_id],
                task_from_row,
            )?);
        }
        transaction.commit()?;
        Ok(updated)
    }

    fn apply_split(&self, outcome: &SplitOutcome) -> Result<(), InfraError> {
        let parent = &outcome.parent_task;
        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        let changed = transaction.execute(
            "UPDATE tasks SET is_split = ?1, fixed_time = ?2 WHERE id = ?3 AND is_part = 0",
            params![parent.is_split, parent.fixed_time, parent.id],
        )?;
        if changed == 0 {
            return Err(InfraError::NotFound(format!("task {}", parent.id)));
        }
        for subtask in &outcome.subtasks {
            let taken = transaction.query_row(
                "SELECT COUNT(*) FROM tasks WHERE parent_task_id = ?1 AND part_number = ?2",
                params![parent.id, subtask.part_number],
                |row| row.get::<_, i64>(0),
            )?;
            if taken > 0 {
                return Err(duplicate_part(&parent.id, subtask.part_number));
            }
            insert_task(&transaction, subtask, false)?;
        }
        transaction.commit()?;
        Ok(())
    }

    fn import_snapshot(&self, snapshot: &PlannerSnapshot) -> Result<ImportSummary, InfraError> {
        snapshot.validate().map_err(InfraError::Validation)?;

        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        for tag in &snapshot.tags {
            upsert_tag(&transaction, tag)?;
        }
        for definition in &snapshot.recurring_tasks {
            upsert_recurring_task(&transaction, definition)?;
        }
        for block in &snapshot.time_blocks {
            upsert_time_block(&transaction, block)?;
        }
        for exception in &snapshot.time_block_exceptions {
            upsert_exception(&transaction, exception)?;
        }
        for event in &snapshot.events {
            upsert_event(&transaction, event)?;
        }
        for task in &snapshot.tasks {
            insert_task(&transaction, task, true)?;
        }
        transaction.commit()?;
        Ok(ImportSummary::of(snapshot))
    }
}

impl ImportSummary {
    fn of(snapshot: &PlannerSnapshot) -> Self {
        Self {
            recurring_tasks: snapshot.recurring_tasks.len(),
            tasks: snapshot.tasks.len(),
            events: snapshot.events.len(),
            time_blocks: snapshot.time_blocks.len(),
            time_block_exceptions: snapshot.time_block_exceptions.len(),
            tags: snapshot.tags.len(),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    recurring_tasks: Vec<RecurringTaskDefinition>,
    tasks: Vec<TaskInstance>,
    events: Vec<Event>,
    time_blocks: Vec<TimeBlock>,
    time_block_exceptions: Vec<TimeBlockException>,
    tags: Vec<Tag>,
}

fn duplicate_part(parent_id: &str, part_number: Option<u32>) -> InfraError {
    InfraError::Validation(format!(
        "task {parent_id} already has part {}",
        part_number.unwrap_or_default()
    ))
}

fn upsert_by<T: Clone>(items: &mut Vec<T>, item: &T, same: impl Fn(&T) -> bool) {
    match items.iter_mut().find(|existing| same(existing)) {
        Some(existing) => *existing = item.clone(),
        None => items.push(item.clone()),
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: Mutex<MemoryState>,
}

impl InMemoryRepository {
    pub fn with_snapshot(snapshot: &PlannerSnapshot) -> Result<Self, InfraError> {
        let repository = Self::default();
        repository.import_snapshot(snapshot)?;
        Ok(repository)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::lock_poisoned("planner state", error))
    }
}

impl PlannerRepository for InMemoryRepository {
    fn list_recurring_tasks(
        &self,
        user_id: Option<&str>,
    ) -> Result<Vec<RecurringTaskDefinition>, InfraError> {
        let state = self.lock()?;
        Ok(state
            .recurring_tasks
            .iter()
            .filter(|definition| user_id.is_none_or(|user_id| definition.user_id == user_id))
            .cloned()
            .collect())
    }

    fn record_generated_task(
        &self,
        task: &TaskInstance,
        target_date: NaiveDate,
    ) -> Result<bool, InfraError> {
        let definition_id = task.recurring_task_id.as_deref().ok_or_else(|| {
            InfraError::Validation(format!("task {} has no recurring_task_id", task.id))
        })?;

        let mut state = self.lock()?;
        let Some(definition) = state
            .recurring_tasks
            .iter_mut()
            .find(|definition| definition.id == definition_id)
        else {
            return Ok(false);
        };
        if definition
            .last_generated_date
            .is_some_and(|watermark| watermark >= target_date)
        {
            return Ok(false);
        }
        definition.last_generated_date = Some(target_date);
        state.tasks.push(task.clone());
        Ok(true)
    }

    fn delete_recurring_task(
        &self,
        id: &str,
        cascade_from: Option<NaiveDate>,
    ) -> Result<DeleteOutcome, InfraError> {
        let mut state = self.lock()?;
        let before = state.recurring_tasks.len();
        state.recurring_tasks.retain(|definition| definition.id != id);
        if state.recurring_tasks.len() == before {
            return Err(InfraError::NotFound(format!("recurring task {id}")));
        }

        let mut deleted_instances = 0;
        if let Some(from) = cascade_from {
            let before = state.tasks.len();
            state.tasks.retain(|task| {
                !(task.recurring_task_id.as_deref() == Some(id) && task.date >= from)
            });
            deleted_instances = before - state.tasks.len();
        }
        Ok(DeleteOutcome {
            definition_id: id.to_string(),
            deleted_instances,
        })
    }

    fn get_task(&self, id: &str) -> Result<Option<TaskInstance>, InfraError> {
        let state = self.lock()?;
        Ok(state.tasks.iter().find(|task| task.id == id).cloned())
    }

    fn list_parts(&self, parent_task_id: &str) -> Result<Vec<TaskInstance>, InfraError> {
        let state = self.lock()?;
        let mut parts = state
            .tasks
            .iter()
            .filter(|task| task.is_part && task.parent_task_id.as_deref() == Some(parent_task_id))
            .cloned()
            .collect::<Vec<_>>();
        parts.sort_by_key(|part| part.part_number);
        Ok(parts)
    }

    fn list_tasks(&self, user_id: &str, date: NaiveDate) -> Result<Vec<TaskInstance>, InfraError> {
        let state = self.lock()?;
        Ok(state
            .tasks
            .iter()
            .filter(|task| task.user_id == user_id && task.date == date)
            .cloned()
            .collect())
    }

    fn list_events(&self, user_id: &str, date: NaiveDate) -> Result<Vec<Event>, InfraError> {
        let state = self.lock()?;
        Ok(state
            .events
            .iter()
            .filter(|event| event.user_id == user_id && event.date == date)
            .cloned()
            .collect())
    }

    fn list_time_blocks(&self, user_id: &str) -> Result<Vec<TimeBlock>, InfraError> {
        let state = self.lock()?;
        Ok(state
            .time_blocks
            .iter()
            .filter(|block| block.user_id == user_id)
            .cloned()
            .collect())
    }

    fn list_time_block_exceptions(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<TimeBlockException>, InfraError> {
        let state = self.lock()?;
        Ok(state
            .time_block_exceptions
            .iter()
            .filter(|exception| exception.exception_date == date)
            .cloned()
            .collect())
    }

    fn apply_fixed_times(
        &self,
        assignments: &[FixedTimeAssignment],
    ) -> Result<Vec<TaskInstance>, InfraError> {
        let mut state = self.lock()?;
        if let Some(missing) = assignments
            .iter()
            .find(|assignment| !state.tasks.iter().any(|task| task.id == assignment.task_id))
        {
            return Err(InfraError::NotFound(format!("task {}", missing.task_id)));
        }

        let mut updated = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            if let Some(task) = state
                .tasks
                .iter_mut()
                .find(|task| task.id == assignment.task_id)
            {
                task.fixed_time = Some(assignment.fixed_time);
                updated.push(task.clone());
            }
        }
        Ok(updated)
    }

    fn apply_split(&self, outcome: &SplitOutcome) -> Result<(), InfraError> {
        let parent = &outcome.parent_task;
        let mut state = self.lock()?;
        if let Some(subtask) = outcome.subtasks.iter().find(|subtask| {
            state.tasks.iter().any(|task| {
                task.parent_task_id.as_deref() == Some(parent.id.as_str())
                    && task.part_number == subtask.part_number
            })
        }) {
            return Err(duplicate_part(&parent.id, subtask.part_number));
        }
        let Some(existing) = state
            .tasks
            .iter_mut()
            .find(|task| task.id == parent.id && !task.is_part)
        else {
            return Err(InfraError::NotFound(format!("task {}", parent.id)));
        };
        existing.is_split = parent.is_split;
        existing.fixed_time = parent.fixed_time;
        state.tasks.extend(outcome.subtasks.iter().cloned());
        Ok(())
    }

    fn import_snapshot(&self, snapshot: &PlannerSnapshot) -> Result<ImportSummary, InfraError> {
        snapshot.validate().map_err(InfraError::Validation)?;

        let mut state = self.lock()?;
        for tag in &snapshot.tags {
            upsert_by(&mut state.tags, tag, |existing| existing.id == tag.id);
        }
        for definition in &snapshot.recurring_tasks {
            upsert_by(&mut state.recurring_tasks, definition, |existing| {
                existing.id == definition.id
            });
        }
        for block in &snapshot.time_blocks {
            upsert_by(&mut state.time_blocks, block, |existing| existing.id == block.id);
        }
        for exception in &snapshot.time_block_exceptions {
            upsert_by(&mut state.time_block_exceptions, exception, |existing| {
                existing.id == exception.id
                    || (existing.time_block_id == exception.time_block_id
                        && existing.exception_date == exception.exception_date)
            });
        }
        for event in &snapshot.events {
            upsert_by(&mut state.events, event, |existing| existing.id == event.id);
        }
        for task in &snapshot.tasks {
            upsert_by(&mut state.tasks, task, |existing| existing.id == task.id);
        }
        Ok(ImportSummary::of(snapshot))
    }
}

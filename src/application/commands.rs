use crate::application::bootstrap::bootstrap_workspace;
use crate::application::generation::{run_daily_generation, GenerationReport};
use crate::domain::conflict::{detect_block_conflict, detect_conflict};
use crate::domain::layout::{layout_for_day, PositionedItem};
use crate::domain::models::{parse_date, Event, PlanningPolicy, TaskInstance};
use crate::domain::planner::{
    available_slots, day_free_intervals, plan_day, AvailableSlots, FixedTimeAssignment,
    PlanResult,
};
use crate::domain::splitter::{apply_split, propose_split, ProposedPart, SplitOutcome, SplitProposal};
use crate::domain::time_blocks::{active_blocks_on, ActiveBlock};
use crate::infrastructure::config::{
    load_planning_policy, read_default_user_id, read_generation_concurrency, read_timezone,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::repository::{
    DeleteOutcome, ImportSummary, PlannerRepository, PlannerSnapshot, SqliteRepository,
};
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    repository: Arc<dyn PlannerRepository>,
    policy: PlanningPolicy,
    timezone: Tz,
    default_user_id: String,
    generation_concurrency: usize,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let config_dir = bootstrap.config_dir;

        Ok(Self {
            policy: load_planning_policy(&config_dir)?,
            timezone: read_timezone(&config_dir)?,
            default_user_id: read_default_user_id(&config_dir)?,
            generation_concurrency: read_generation_concurrency(&config_dir)?,
            repository: Arc::new(SqliteRepository::new(&bootstrap.database_path)),
            database_path: bootstrap.database_path,
            config_dir,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn policy(&self) -> &PlanningPolicy {
        &self.policy
    }

    /// Current date in the configured timezone.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        tracing::error!(command, error = %error, "command failed");
        error.to_string()
    }

    fn resolve_date(&self, date: Option<String>, field_name: &str) -> Result<NaiveDate, InfraError> {
        match date.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
            Some(value) => parse_date(value, field_name).map_err(InfraError::Validation),
            None => Ok(self.today()),
        }
    }

    fn resolve_user(&self, user_id: Option<String>) -> String {
        user_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| self.default_user_id.clone())
    }
}

/// Everything the engine needs about one user's day, read once.
struct DayContext {
    date: NaiveDate,
    tasks: Vec<TaskInstance>,
    events: Vec<Event>,
    active_blocks: Vec<ActiveBlock>,
}

fn load_day(state: &AppState, user_id: &str, date: NaiveDate) -> Result<DayContext, InfraError> {
    let blocks = state.repository.list_time_blocks(user_id)?;
    let exceptions = state.repository.list_time_block_exceptions(date)?;
    Ok(DayContext {
        date,
        tasks: state.repository.list_tasks(user_id, date)?,
        events: state.repository.list_events(user_id, date)?,
        active_blocks: active_blocks_on(&blocks, &exceptions, date),
    })
}

fn require_task(state: &AppState, task_id: &str) -> Result<TaskInstance, InfraError> {
    let task_id = task_id.trim();
    if task_id.is_empty() {
        return Err(InfraError::Validation("task_id must not be empty".to_string()));
    }
    state
        .repository
        .get_task(task_id)?
        .ok_or_else(|| InfraError::NotFound(format!("task {task_id}")))
}

#[derive(Debug, Clone, Serialize)]
pub struct ConflictReport {
    pub task_id: String,
    pub event: Option<Event>,
    pub time_block: Option<ActiveBlock>,
}

impl ConflictReport {
    pub fn has_conflict(&self) -> bool {
        self.event.is_some() || self.time_block.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DayLayout {
    pub date: NaiveDate,
    pub items: Vec<PositionedItem>,
}

pub async fn generate_recurring_tasks_impl(
    state: &AppState,
    date: Option<String>,
    user_id: Option<String>,
) -> Result<GenerationReport, InfraError> {
    let target_date = state.resolve_date(date, "date")?;
    let user_id = user_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    run_daily_generation(
        Arc::clone(&state.repository),
        target_date,
        user_id,
        state.generation_concurrency,
    )
    .await
}

pub fn plan_day_impl(
    state: &AppState,
    date: Option<String>,
    user_id: Option<String>,
) -> Result<PlanResult, InfraError> {
    let date = state.resolve_date(date, "date")?;
    let user_id = state.resolve_user(user_id);
    let day = load_day(state, &user_id, date)?;

    let plan = plan_day(&day.tasks, &day.events, &day.active_blocks, day.date, &state.policy);
    tracing::info!(
        date = %date,
        user_id = %user_id,
        suggestions = plan.suggestions.len(),
        warnings = plan.warnings.len(),
        "planned day"
    );
    Ok(plan)
}

pub fn apply_plan_impl(
    state: &AppState,
    assignments: Vec<FixedTimeAssignment>,
) -> Result<Vec<TaskInstance>, InfraError> {
    if assignments.is_empty() {
        return Ok(Vec::new());
    }
    let updated = state.repository.apply_fixed_times(&assignments)?;
    tracing::info!(tasks = updated.len(), "applied planned fixed times");
    Ok(updated)
}

pub fn available_slots_impl(
    state: &AppState,
    date: Option<String>,
    user_id: Option<String>,
) -> Result<AvailableSlots, InfraError> {
    let date = state.resolve_date(date, "date")?;
    let user_id = state.resolve_user(user_id);
    let day = load_day(state, &user_id, date)?;
    Ok(available_slots(
        &day.tasks,
        &day.events,
        &day.active_blocks,
        day.date,
        &state.policy,
    ))
}

pub fn build_layout_impl(
    state: &AppState,
    date: Option<String>,
    user_id: Option<String>,
) -> Result<DayLayout, InfraError> {
    let date = state.resolve_date(date, "date")?;
    let user_id = state.resolve_user(user_id);
    let day = load_day(state, &user_id, date)?;
    Ok(DayLayout {
        date,
        items: layout_for_day(&day.events, &day.tasks, date, &state.policy),
    })
}

pub fn detect_conflicts_impl(state: &AppState, task_id: String) -> Result<ConflictReport, InfraError> {
    let task = require_task(state, &task_id)?;
    let day = load_day(state, &task.user_id, task.date)?;

    let report = ConflictReport {
        task_id: task.id.clone(),
        event: detect_conflict(&task, &day.events, &state.policy).cloned(),
        time_block: detect_block_conflict(&task, &day.active_blocks, &state.policy).cloned(),
    };
    if report.has_conflict() {
        tracing::warn!(task_id = %task.id, "fixed-time task has a conflict");
    }
    Ok(report)
}

pub fn propose_split_impl(
    state: &AppState,
    task_id: String,
    date: Option<String>,
) -> Result<SplitProposal, InfraError> {
    let task = require_task(state, &task_id)?;
    let date = match date.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => parse_date(value, "date").map_err(InfraError::Validation)?,
        None => task.date,
    };
    let day = load_day(state, &task.user_id, date)?;
    let others = day
        .tasks
        .into_iter()
        .filter(|other| other.id != task.id)
        .collect::<Vec<_>>();
    let free = day_free_intervals(&others, &day.events, date, &state.policy);
    let existing_parts = state.repository.list_parts(&task.id)?;

    let proposal = propose_split(&task, &existing_parts, &free, date, &state.policy);
    tracing::info!(
        task_id = %task.id,
        date = %date,
        can_split = proposal.can_split,
        parts = proposal.parts.len(),
        overflow = proposal.overflow_to_next_day,
        "proposed split"
    );
    Ok(proposal)
}

/// Persists a split. Without explicit `parts`, the current proposal for
/// `date` is accepted as-is. A split parent accepts further parts for the
/// minutes its stored parts leave uncovered.
pub fn apply_split_impl(
    state: &AppState,
    task_id: String,
    date: Option<String>,
    parts: Option<Vec<ProposedPart>>,
) -> Result<SplitOutcome, InfraError> {
    let task = require_task(state, &task_id)?;
    let parts = match parts {
        Some(parts) => parts,
        None => {
            let proposal = propose_split_impl(state, task_id, date)?;
            if !proposal.can_split {
                return Err(InfraError::Validation(
                    proposal
                        .reason
                        .unwrap_or_else(|| format!("task {} cannot be split", task.id)),
                ));
            }
            proposal.parts
        }
    };

    let existing_parts = state.repository.list_parts(&task.id)?;
    let outcome = apply_split(&task, &existing_parts, &parts, &state.policy)
        .map_err(InfraError::Validation)?;
    state.repository.apply_split(&outcome)?;
    tracing::info!(task_id = %task.id, parts = outcome.subtasks.len(), "applied split");
    Ok(outcome)
}

pub fn delete_recurring_task_impl(
    state: &AppState,
    definition_id: String,
    cascade_from: Option<String>,
) -> Result<DeleteOutcome, InfraError> {
    let definition_id = definition_id.trim();
    if definition_id.is_empty() {
        return Err(InfraError::Validation("definition_id must not be empty".to_string()));
    }
    let cascade_from = cascade_from
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| parse_date(value, "cascade_from").map_err(InfraError::Validation))
        .transpose()?;

    let outcome = state
        .repository
        .delete_recurring_task(definition_id, cascade_from)?;
    tracing::info!(
        definition_id,
        deleted_instances = outcome.deleted_instances,
        "deleted recurring task"
    );
    Ok(outcome)
}

pub fn import_snapshot_impl(state: &AppState, path: String) -> Result<ImportSummary, InfraError> {
    let raw = fs::read_to_string(path.trim())?;
    let snapshot: PlannerSnapshot = serde_json::from_str(&raw)?;
    let summary = state.repository.import_snapshot(&snapshot)?;
    tracing::info!(
        path = %path,
        tasks = summary.tasks,
        events = summary.events,
        recurring_tasks = summary.recurring_tasks,
        "imported snapshot"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        Recurrence, RecurrenceRule, RecurringTaskDefinition, TagSet, TimeBlock,
    };
    use chrono::NaiveTime;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

    struct TempWorkspace {
        path: PathBuf,
    }

    impl TempWorkspace {
        fn new() -> Self {
            let sequence = NEXT_TEMP_WORKSPACE.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "dayplan-command-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp workspace");
            Self { path }
        }

        fn app_state(&self) -> AppState {
            AppState::new(self.path.clone()).expect("initialize app state")
        }

        fn seeded_state(&self) -> AppState {
            let state = self.app_state();
            let snapshot_path = self.path.join("snapshot.json");
            fs::write(
                &snapshot_path,
                serde_json::to_string_pretty(&snapshot()).expect("serialize snapshot"),
            )
            .expect("write snapshot");
            import_snapshot_impl(&state, snapshot_path.display().to_string()).expect("import");
            state
        }
    }

    impl Drop for TempWorkspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    const DAY: &str = "2026-01-12";

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date")
    }

    fn time(value: &str) -> NaiveTime {
        NaiveTime::parse_from_str(value, "%H:%M").expect("valid time")
    }

    fn task(id: &str, title: &str, minutes: u32) -> TaskInstance {
        let mut task = TaskInstance::new(id, "user-1", title, date(DAY));
        task.estimated_minutes = Some(minutes);
        task
    }

    fn snapshot() -> PlannerSnapshot {
        let mut fixed = task("tsk-fixed", "Call bank", 30);
        fixed.fixed_time = Some(time("09:30"));
        let mut writing = task("tsk-write", "Draft chapter", 60);
        writing.tags = TagSet::from(["focus".to_string()]);
        let marathon = task("tsk-big", "Migrate archive", 1000);

        PlannerSnapshot {
            recurring_tasks: vec![RecurringTaskDefinition {
                id: "rec-1".to_string(),
                user_id: "user-1".to_string(),
                title: "Review inbox".to_string(),
                recurrence: Recurrence {
                    rule: RecurrenceRule::Daily,
                    start_date: date("2026-01-05"),
                    end_date: None,
                },
                last_generated_date: None,
                category: None,
                estimated_minutes: Some(15),
                fixed_time: None,
                tags: TagSet::new(),
                is_active: true,
            }],
            tasks: vec![fixed, writing, marathon],
            events: vec![Event {
                id: "evt-1".to_string(),
                user_id: "user-1".to_string(),
                title: "Standup".to_string(),
                date: date(DAY),
                start_time: time("09:00"),
                end_time: Some(time("10:00")),
                allow_overlap: false,
            }],
            time_blocks: vec![TimeBlock {
                id: "blk-1".to_string(),
                user_id: "user-1".to_string(),
                name: "Deep Work".to_string(),
                color: None,
                start_time: time("10:00"),
                end_time: time("12:00"),
                recurrence: Recurrence {
                    rule: RecurrenceRule::Weekdays,
                    start_date: date("2026-01-01"),
                    end_date: None,
                },
                tags: TagSet::from(["focus".to_string()]),
                is_active: true,
            }],
            ..PlannerSnapshot::default()
        }
    }

    fn some(value: &str) -> Option<String> {
        Some(value.to_string())
    }

    #[test]
    fn state_uses_default_config() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        assert_eq!(state.policy(), &PlanningPolicy::default());
        assert!(state.database_path().exists());
        assert!(state.config_dir().join("planner.json").exists());
        assert_eq!(state.resolve_user(None), "default");
    }

    #[test]
    fn invalid_date_is_a_validation_error() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let result = plan_day_impl(&state, some("12/01/2026"), some("user-1"));
        assert!(matches!(result, Err(InfraError::Validation(_))));
        assert!(state.command_error("plan_day", &result.unwrap_err()).contains("YYYY-MM-DD"));
    }

    #[test]
    fn plan_and_apply_flow() {
        let workspace = TempWorkspace::new();
        let state = workspace.seeded_state();

        let plan = plan_day_impl(&state, some(DAY), some("user-1")).expect("plan day");
        let writing = plan
            .suggestions
            .iter()
            .find(|suggestion| suggestion.task_id == "tsk-write")
            .expect("writing suggestion");
        assert_eq!(writing.suggested_time, Some(time("10:00")));
        assert_eq!(writing.time_block_id.as_deref(), Some("blk-1"));
        assert_eq!(plan.warnings.len(), 1);
        assert!(plan.warnings[0].contains("Migrate archive"));

        let applied = apply_plan_impl(&state, plan.assignments()).expect("apply plan");
        assert_eq!(applied.len(), 1);
        let stored = require_task(&state, "tsk-write").expect("stored task");
        assert_eq!(stored.fixed_time, Some(time("10:00")));

        let replanned = plan_day_impl(&state, some(DAY), some("user-1")).expect("replan");
        assert!(replanned
            .suggestions
            .iter()
            .all(|suggestion| suggestion.task_id != "tsk-write"));
    }

    #[test]
    fn slots_and_layout_reflect_the_day() {
        let workspace = TempWorkspace::new();
        let state = workspace.seeded_state();

        let slots = available_slots_impl(&state, some(DAY), some("user-1")).expect("slots");
        assert_eq!(slots.slots.len(), 2);
        assert_eq!(slots.total_available_minutes, 180 + 720);
        assert_eq!(slots.slots[1].time_block_ids, vec!["blk-1".to_string()]);

        let layout = build_layout_impl(&state, some(DAY), some("user-1")).expect("layout");
        assert_eq!(layout.items.len(), 2);
        assert_eq!(layout.items[0].item.id, "evt-1");
        assert_eq!(layout.items[1].item.id, "tsk-fixed");
        assert_eq!(layout.items[0].top_percent, 100.0 * 180.0 / 960.0);
    }

    #[test]
    fn conflicts_are_reported_for_fixed_tasks() {
        let workspace = TempWorkspace::new();
        let state = workspace.seeded_state();

        let report = detect_conflicts_impl(&state, "tsk-fixed".to_string()).expect("conflicts");
        assert_eq!(report.event.as_ref().map(|event| event.id.as_str()), Some("evt-1"));
        assert!(report.time_block.is_none());

        let unfixed = detect_conflicts_impl(&state, "tsk-write".to_string()).expect("conflicts");
        assert!(!unfixed.has_conflict());

        assert!(matches!(
            detect_conflicts_impl(&state, "missing".to_string()),
            Err(InfraError::NotFound(_))
        ));
    }

    #[test]
    fn split_propose_and_apply_flow() {
        let workspace = TempWorkspace::new();
        let state = workspace.seeded_state();

        let proposal = propose_split_impl(&state, "tsk-big".to_string(), None).expect("propose");
        assert!(proposal.can_split);
        assert!(proposal.overflow_to_next_day);
        assert_eq!(proposal.parts.len(), 2);
        assert_eq!(proposal.parts[0].start_time, time("06:00"));
        assert_eq!(proposal.parts[0].duration_minutes, 180);
        assert_eq!(proposal.parts[1].start_time, time("10:00"));
        assert_eq!(proposal.remaining_minutes, 100);

        let outcome = apply_split_impl(&state, "tsk-big".to_string(), None, None).expect("apply");
        assert_eq!(outcome.subtasks.len(), 2);
        assert!(require_task(&state, "tsk-big").expect("parent").is_split);

        let again = apply_split_impl(&state, "tsk-big".to_string(), None, None);
        assert!(again.is_err());
    }

    #[test]
    fn split_overflow_continues_on_the_next_day() {
        let workspace = TempWorkspace::new();
        let state = workspace.seeded_state();

        let first = apply_split_impl(&state, "tsk-big".to_string(), None, None).expect("first day");
        let first_minutes = first
            .subtasks
            .iter()
            .map(|part| part.estimated_minutes.unwrap_or_default())
            .sum::<u32>();
        assert_eq!(first_minutes, 900);

        let next = propose_split_impl(&state, "tsk-big".to_string(), some("2026-01-13"))
            .expect("propose next day");
        assert!(next.can_split);
        assert!(!next.overflow_to_next_day);
        assert_eq!(next.total_minutes(), 100);
        assert_eq!(next.parts[0].part_number, 3);
        assert_eq!(next.parts[0].start_time, time("06:00"));

        let second = apply_split_impl(&state, "tsk-big".to_string(), some("2026-01-13"), None)
            .expect("apply next day");
        assert_eq!(second.subtasks.len(), 1);
        assert_eq!(second.subtasks[0].date, date("2026-01-13"));
        assert_eq!(second.subtasks[0].part_number, Some(3));

        let parts = state.repository.list_parts("tsk-big").expect("list parts");
        assert_eq!(
            parts.iter().map(|part| part.part_number).collect::<Vec<_>>(),
            vec![Some(1), Some(2), Some(3)]
        );
        let total = parts
            .iter()
            .map(|part| part.estimated_minutes.unwrap_or_default())
            .sum::<u32>();
        assert_eq!(total, 1000);

        let finished = propose_split_impl(&state, "tsk-big".to_string(), some("2026-01-14"))
            .expect("propose after completion");
        assert!(!finished.can_split);
    }

    #[tokio::test]
    async fn generation_and_cascading_delete_flow() {
        let workspace = TempWorkspace::new();
        let state = workspace.seeded_state();

        let report = generate_recurring_tasks_impl(&state, some(DAY), None)
            .await
            .expect("generate");
        assert_eq!(report.generated, 1);
        let rerun = generate_recurring_tasks_impl(&state, some(DAY), some("user-1"))
            .await
            .expect("generate again");
        assert_eq!(rerun.generated, 0);

        let kept = delete_recurring_task_impl(&state, "rec-1".to_string(), some("2026-01-13"))
            .expect("delete");
        assert_eq!(kept.deleted_instances, 0);
        let generated = state
            .repository
            .list_tasks("user-1", date(DAY))
            .expect("list")
            .into_iter()
            .filter(|task| task.recurring_task_id.as_deref() == Some("rec-1"))
            .count();
        assert_eq!(generated, 1);

        assert!(matches!(
            delete_recurring_task_impl(&state, "rec-1".to_string(), None),
            Err(InfraError::NotFound(_))
        ));
    }

    #[test]
    fn import_rejects_invalid_records() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let mut invalid = snapshot();
        invalid.time_blocks[0].end_time = time("09:00");
        let path = workspace.path.join("invalid.json");
        fs::write(&path, serde_json::to_string(&invalid).expect("serialize")).expect("write");

        let result = import_snapshot_impl(&state, path.display().to_string());
        assert!(matches!(result, Err(InfraError::Validation(_))));
        let listed = state.repository.list_tasks("user-1", date(DAY)).expect("list");
        assert!(listed.is_empty());
    }
}

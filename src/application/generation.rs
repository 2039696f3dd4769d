use crate::domain::recurrence::{instance_for, resolve_due};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::repository::PlannerRepository;
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationFailure {
    pub definition_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationReport {
    pub target_date: NaiveDate,
    pub generated: usize,
    pub skipped: usize,
    pub failures: Vec<GenerationFailure>,
}

type GenerationResult = (String, Result<bool, InfraError>);

/// Materializes every due recurring task for `target_date`.
///
/// Definitions are independent: each one is recorded on its own and a
/// storage failure is collected in the report instead of stopping the
/// batch. Only failing to load the definitions is an error.
pub async fn run_daily_generation(
    repository: Arc<dyn PlannerRepository>,
    target_date: NaiveDate,
    user_id: Option<&str>,
    concurrency: usize,
) -> Result<GenerationReport, InfraError> {
    let definitions = repository.list_recurring_tasks(user_id)?;
    let due = resolve_due(&definitions, target_date);
    let mut report = GenerationReport {
        target_date,
        generated: 0,
        skipped: definitions.len() - due.len(),
        failures: Vec::new(),
    };
    tracing::info!(
        date = %target_date,
        user_id = user_id.unwrap_or("*"),
        definitions = definitions.len(),
        due = due.len(),
        "starting recurring task generation"
    );

    let concurrency = concurrency.max(1);
    let mut pending: JoinSet<GenerationResult> = JoinSet::new();
    for definition in due {
        let repository = Arc::clone(&repository);
        let task = instance_for(definition, target_date);
        let definition_id = definition.id.clone();

        pending.spawn_blocking(move || {
            let recorded = repository.record_generated_task(&task, target_date);
            (definition_id, recorded)
        });

        if pending.len() >= concurrency {
            collect_generation_result(&mut pending, &mut report).await;
        }
    }

    while !pending.is_empty() {
        collect_generation_result(&mut pending, &mut report).await;
    }

    report
        .failures
        .sort_by(|left, right| left.definition_id.cmp(&right.definition_id));
    tracing::info!(
        date = %target_date,
        generated = report.generated,
        skipped = report.skipped,
        failed = report.failures.len(),
        "recurring task generation finished"
    );
    Ok(report)
}

async fn collect_generation_result(
    pending: &mut JoinSet<GenerationResult>,
    report: &mut GenerationReport,
) {
    let Some(join_result) = pending.join_next().await else {
        return;
    };
    match join_result {
        Ok((definition_id, Ok(true))) => {
            tracing::debug!(definition_id = %definition_id, "generated task instance");
            report.generated += 1;
        }
        Ok((definition_id, Ok(false))) => {
            tracing::debug!(definition_id = %definition_id, "watermark already advanced");
            report.skipped += 1;
        }
        Ok((definition_id, Err(error))) => {
            tracing::warn!(definition_id = %definition_id, error = %error, "generation failed");
            report.failures.push(GenerationFailure {
                definition_id,
                message: error.to_string(),
            });
        }
        Err(error) => {
            tracing::error!(error = %error, "generation worker did not complete");
            report.failures.push(GenerationFailure {
                definition_id: "unknown".to_string(),
                message: format!("failed to join generation task: {error}"),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        Event, Recurrence, RecurrenceRule, RecurringTaskDefinition, TagSet, TaskInstance,
        TimeBlock, TimeBlockException,
    };
    use crate::domain::planner::FixedTimeAssignment;
    use crate::domain::splitter::SplitOutcome;
    use crate::infrastructure::repository::{
        DeleteOutcome, ImportSummary, InMemoryRepository, PlannerSnapshot,
    };

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date")
    }

    fn definition(id: &str, user_id: &str, rule: RecurrenceRule) -> RecurringTaskDefinition {
        RecurringTaskDefinition {
            id: id.to_string(),
            user_id: user_id.to_string(),
            title: format!("Routine {id}"),
            recurrence: Recurrence {
                rule,
                start_date: date("2026-01-05"),
                end_date: None,
            },
            last_generated_date: None,
            category: None,
            estimated_minutes: Some(15),
            fixed_time: None,
            tags: TagSet::new(),
            is_active: true,
        }
    }

    fn repository_with(definitions: Vec<RecurringTaskDefinition>) -> Arc<InMemoryRepository> {
        let snapshot = PlannerSnapshot {
            recurring_tasks: definitions,
            ..PlannerSnapshot::default()
        };
        Arc::new(InMemoryRepository::with_snapshot(&snapshot).expect("seed repository"))
    }

    /// Delegates to an in-memory store but refuses to record one definition.
    struct FlakyRepository {
        inner: InMemoryRepository,
        failing_definition: String,
    }

    impl PlannerRepository for FlakyRepository {
        fn list_recurring_tasks(
            &self,
            user_id: Option<&str>,
        ) -> Result<Vec<RecurringTaskDefinition>, InfraError> {
            self.inner.list_recurring_tasks(user_id)
        }

        fn record_generated_task(
            &self,
            task: &TaskInstance,
            target_date: NaiveDate,
        ) -> Result<bool, InfraError> {
            if task.recurring_task_id.as_deref() == Some(self.failing_definition.as_str()) {
                return Err(InfraError::Storage("disk full".to_string()));
            }
            self.inner.record_generated_task(task, target_date)
        }

        fn delete_recurring_task(
            &self,
            id: &str,
            cascade_from: Option<NaiveDate>,
        ) -> Result<DeleteOutcome, InfraError> {
            self.inner.delete_recurring_task(id, cascade_from)
        }

        fn get_task(&self, id: &str) -> Result<Option<TaskInstance>, InfraError> {
            self.inner.get_task(id)
        }

        fn list_parts(&self, parent_task_id: &str) -> Result<Vec<TaskInstance>, InfraError> {
            self.inner.list_parts(parent_task_id)
        }

        fn list_tasks(&self, user_id: &str, date: NaiveDate) -> Result<Vec<TaskInstance>, InfraError> {
            self.inner.list_tasks(user_id, date)
        }

        fn list_events(&self, user_id: &str, date: NaiveDate) -> Result<Vec<Event>, InfraError> {
            self.inner.list_events(user_id, date)
        }

        fn list_time_blocks(&self, user_id: &str) -> Result<Vec<TimeBlock>, InfraError> {
            self.inner.list_time_blocks(user_id)
        }

        fn list_time_block_exceptions(
            &self,
            date: NaiveDate,
        ) -> Result<Vec<TimeBlockException>, InfraError> {
            self.inner.list_time_block_exceptions(date)
        }

        fn apply_fixed_times(
            &self,
            assignments: &[FixedTimeAssignment],
        ) -> Result<Vec<TaskInstance>, InfraError> {
            self.inner.apply_fixed_times(assignments)
        }

        fn apply_split(&self, outcome: &SplitOutcome) -> Result<(), InfraError> {
            self.inner.apply_split(outcome)
        }

        fn import_snapshot(&self, snapshot: &PlannerSnapshot) -> Result<ImportSummary, InfraError> {
            self.inner.import_snapshot(snapshot)
        }
    }

    #[tokio::test]
    async fn generates_due_definitions_once() {
        let repository = repository_with(vec![
            definition("rec-daily", "user-1", RecurrenceRule::Daily),
            definition("rec-weekly", "user-1", RecurrenceRule::Weekly),
            definition("rec-weekdays", "user-2", RecurrenceRule::Weekdays),
        ]);
        let target = date("2026-01-13");

        let report = run_daily_generation(repository.clone(), target, None, 2)
            .await
            .expect("generation runs");
        assert_eq!(report.generated, 2);
        assert_eq!(report.skipped, 1);
        assert!(report.failures.is_empty());

        let rerun = run_daily_generation(repository.clone(), target, None, 2)
            .await
            .expect("generation reruns");
        assert_eq!(rerun.generated, 0);
        assert_eq!(rerun.skipped, 3);

        let user_one = repository.list_tasks("user-1", target).expect("list tasks");
        assert_eq!(user_one.len(), 1);
        assert_eq!(user_one[0].recurring_task_id.as_deref(), Some("rec-daily"));
    }

    #[tokio::test]
    async fn user_scope_limits_generation() {
        let repository = repository_with(vec![
            definition("rec-a", "user-1", RecurrenceRule::Daily),
            definition("rec-b", "user-2", RecurrenceRule::Daily),
        ]);
        let target = date("2026-01-13");

        let report = run_daily_generation(repository.clone(), target, Some("user-2"), 4)
            .await
            .expect("generation runs");
        assert_eq!(report.generated, 1);
        assert!(repository.list_tasks("user-1", target).expect("list").is_empty());
        assert_eq!(repository.list_tasks("user-2", target).expect("list").len(), 1);
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_batch() {
        let snapshot = PlannerSnapshot {
            recurring_tasks: vec![
                definition("rec-a", "user-1", RecurrenceRule::Daily),
                definition("rec-bad", "user-1", RecurrenceRule::Daily),
                definition("rec-c", "user-1", RecurrenceRule::Daily),
            ],
            ..PlannerSnapshot::default()
        };
        let repository = Arc::new(FlakyRepository {
            inner: InMemoryRepository::with_snapshot(&snapshot).expect("seed repository"),
            failing_definition: "rec-bad".to_string(),
        });
        let target = date("2026-01-13");

        let report = run_daily_generation(repository.clone(), target, None, 1)
            .await
            .expect("generation runs");
        assert_eq!(report.generated, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].definition_id, "rec-bad");
        assert!(report.failures[0].message.contains("disk full"));

        let definitions = repository.list_recurring_tasks(None).expect("list");
        let failed = definitions
            .iter()
            .find(|definition| definition.id == "rec-bad")
            .expect("definition exists");
        assert_eq!(failed.last_generated_date, None);
    }

    #[tokio::test]
    async fn nothing_due_is_a_successful_empty_run() {
        let mut inactive = definition("rec-a", "user-1", RecurrenceRule::Daily);
        inactive.is_active = false;
        let repository = repository_with(vec![inactive]);

        let report = run_daily_generation(repository, date("2026-01-13"), None, 4)
            .await
            .expect("generation runs");
        assert_eq!(report.generated, 0);
        assert_eq!(report.skipped, 1);
    }
}

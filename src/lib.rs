pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;

use application::commands::{
    apply_plan_impl, apply_split_impl, available_slots_impl, build_layout_impl,
    delete_recurring_task_impl, detect_conflicts_impl, generate_recurring_tasks_impl,
    import_snapshot_impl, plan_day_impl, propose_split_impl, AppState,
};
use cli::{Cli, Command};
use infrastructure::error::InfraError;
use serde::Serialize;
use std::path::PathBuf;

pub fn resolve_workspace(workspace: Option<PathBuf>) -> Result<PathBuf, String> {
    match workspace {
        Some(path) => Ok(path),
        None => std::env::current_dir().map_err(|error| error.to_string()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), InfraError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Debug, Serialize)]
struct AppliedPlan<P, A> {
    plan: P,
    applied: A,
}

/// Runs one CLI command against the workspace and prints its result as JSON.
pub async fn run(cli: Cli) -> Result<(), String> {
    let workspace_root = resolve_workspace(cli.workspace)?;
    let state = AppState::new(workspace_root).map_err(|error| error.to_string())?;

    match cli.command {
        Command::Generate { date, user } => {
            let report = generate_recurring_tasks_impl(&state, date, user)
                .await
                .map_err(|error| state.command_error("generate", &error))?;
            print_json(&report).map_err(|error| state.command_error("generate", &error))
        }
        Command::Plan { date, user, apply } => {
            let plan = plan_day_impl(&state, date, user)
                .map_err(|error| state.command_error("plan", &error))?;
            let printed = if apply {
                let applied = apply_plan_impl(&state, plan.assignments())
                    .map_err(|error| state.command_error("plan", &error))?;
                print_json(&AppliedPlan { plan, applied })
            } else {
                print_json(&plan)
            };
            printed.map_err(|error| state.command_error("plan", &error))
        }
        Command::Slots { date, user } => available_slots_impl(&state, date, user)
            .and_then(|slots| print_json(&slots))
            .map_err(|error| state.command_error("slots", &error)),
        Command::Layout { date, user } => build_layout_impl(&state, date, user)
            .and_then(|layout| print_json(&layout))
            .map_err(|error| state.command_error("layout", &error)),
        Command::Conflicts { task_id } => detect_conflicts_impl(&state, task_id)
            .and_then(|report| print_json(&report))
            .map_err(|error| state.command_error("conflicts", &error)),
        Command::Split {
            task_id,
            date,
            apply,
        } => {
            let printed = if apply {
                apply_split_impl(&state, task_id, date, None).and_then(|outcome| print_json(&outcome))
            } else {
                propose_split_impl(&state, task_id, date).and_then(|proposal| print_json(&proposal))
            };
            printed.map_err(|error| state.command_error("split", &error))
        }
        Command::DeleteRecurring {
            definition_id,
            cascade_from,
        } => delete_recurring_task_impl(&state, definition_id, cascade_from)
            .and_then(|outcome| print_json(&outcome))
            .map_err(|error| state.command_error("delete_recurring", &error)),
        Command::Import { path } => import_snapshot_impl(&state, path.display().to_string())
            .and_then(|summary| print_json(&summary))
            .map_err(|error| state.command_error("import", &error)),
    }
}

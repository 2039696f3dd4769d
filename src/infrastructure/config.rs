use crate::domain::models::{parse_time, DayWindow, PlanningPolicy};
use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const PLANNER_JSON: &str = "planner.json";
const DEFAULT_USER_ID: &str = "default";
const DEFAULT_GENERATION_CONCURRENCY: usize = 4;

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "DayPlan",
                "timezone": "UTC",
                "defaultUserId": DEFAULT_USER_ID
            }),
        ),
        (
            PLANNER_JSON,
            serde_json::json!({
                "schema": 1,
                "window": {
                    "start": "06:00",
                    "end": "22:00"
                },
                "defaultTaskMinutes": 30,
                "minPartMinutes": 15,
                "generationConcurrency": DEFAULT_GENERATION_CONCURRENCY
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(&path, format!("{formatted}\n"))?;
            tracing::info!(path = %path.display(), "wrote default config");
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn read_str<'a>(config: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    config
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn read_positive(config: &serde_json::Value, key: &str, path: &Path) -> Result<Option<u64>, InfraError> {
    match config.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .filter(|value| *value > 0)
            .map(Some)
            .ok_or_else(|| {
                InfraError::InvalidConfig(format!(
                    "{key} must be a positive integer in {}",
                    path.display()
                ))
            }),
    }
}

/// Validates every config file the application reads at startup.
pub fn load_configs(config_dir: &Path) -> Result<(), InfraError> {
    read_timezone(config_dir)?;
    load_planning_policy(config_dir)?;
    read_generation_concurrency(config_dir)?;
    Ok(())
}

pub fn load_planning_policy(config_dir: &Path) -> Result<PlanningPolicy, InfraError> {
    let path = config_dir.join(PLANNER_JSON);
    let planner = read_config(&path)?;
    let mut policy = PlanningPolicy::default();

    if let Some(window) = planner.get("window") {
        let mut parsed = DayWindow::default();
        if let Some(start) = read_str(window, "start") {
            parsed.start = parse_time(start, "window.start").map_err(InfraError::InvalidConfig)?;
        }
        if let Some(end) = read_str(window, "end") {
            parsed.end = parse_time(end, "window.end").map_err(InfraError::InvalidConfig)?;
        }
        policy.window = parsed;
    }
    if let Some(minutes) = read_positive(&planner, "defaultTaskMinutes", &path)? {
        policy.default_task_minutes = u32::try_from(minutes)
            .map_err(|_| InfraError::InvalidConfig("defaultTaskMinutes is too large".to_string()))?;
    }
    if let Some(minutes) = read_positive(&planner, "minPartMinutes", &path)? {
        policy.min_part_minutes = u32::try_from(minutes)
            .map_err(|_| InfraError::InvalidConfig("minPartMinutes is too large".to_string()))?;
    }

    policy.validate().map_err(InfraError::InvalidConfig)?;
    Ok(policy)
}

pub fn read_generation_concurrency(config_dir: &Path) -> Result<usize, InfraError> {
    let path = config_dir.join(PLANNER_JSON);
    let planner = read_config(&path)?;
    Ok(read_positive(&planner, "generationConcurrency", &path)?
        .map(|value| value as usize)
        .unwrap_or(DEFAULT_GENERATION_CONCURRENCY))
}

pub fn read_timezone(config_dir: &Path) -> Result<Tz, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    match read_str(&app, "timezone") {
        Some(name) => name
            .parse::<Tz>()
            .map_err(|_| InfraError::InvalidConfig(format!("unknown timezone '{name}'"))),
        None => Ok(Tz::UTC),
    }
}

pub fn read_default_user_id(config_dir: &Path) -> Result<String, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    Ok(read_str(&app, "defaultUserId")
        .unwrap_or(DEFAULT_USER_ID)
        .to_string())
}

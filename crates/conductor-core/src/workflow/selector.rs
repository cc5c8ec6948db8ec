//! `location[:tasks]` references and task-subset resolution.

use std::fmt;

use conductor_types::workflow::WorkflowDefinition;

use super::definition::WorkflowError;

// ---------------------------------------------------------------------------
// TasksFilter
// ---------------------------------------------------------------------------

/// Which tasks of a workflow to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TasksFilter {
    /// Every task, in document order.
    #[default]
    All,
    /// The named tasks, in the listed order.
    Named(Vec<String>),
}

impl TasksFilter {
    /// Parse `*`, a single name or a comma list. Blank means `*`.
    pub fn parse(text: &str) -> Self {
        let names: Vec<String> = text
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        if names.is_empty() || names.iter().any(|n| n == "*") {
            TasksFilter::All
        } else {
            TasksFilter::Named(names)
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, TasksFilter::All)
    }
}

impl fmt::Display for TasksFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TasksFilter::All => f.write_str("*"),
            TasksFilter::Named(names) => f.write_str(&names.join(",")),
        }
    }
}

/// Resolve `filter` to task names of `def`, validating that each exists.
pub fn resolve_tasks(
    def: &WorkflowDefinition,
    filter: &TasksFilter,
) -> Result<Vec<String>, WorkflowError> {
    match filter {
        TasksFilter::All => Ok(def.tasks.iter().map(|t| t.name.clone()).collect()),
        TasksFilter::Named(names) => names
            .iter()
            .map(|name| {
                if def.has_task(name) {
                    Ok(name.clone())
                } else {
                    Err(WorkflowError::TaskNotFound {
                        workflow: def.name.clone(),
                        task: name.clone(),
                    })
                }
            })
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

/// Parsed `location[:tasks]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    /// Location handed to the workflow Dao.
    pub url: String,
    /// Workflow name derived from the location's file stem.
    pub name: String,
    pub tasks: TasksFilter,
}

impl Selector {
    /// Parse a combined reference.
    ///
    /// The task list follows the last `:` unless that colon belongs to a
    /// scheme (`mem://`) or a port (`host:8080`).
    pub fn parse(reference: &str) -> Result<Self, WorkflowError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(WorkflowError::Validation(
                "workflow reference must not be empty".to_string(),
            ));
        }

        let (url, tasks) = match reference.rfind(':') {
            Some(idx) if is_task_suffix(reference, idx) => {
                (&reference[..idx], TasksFilter::parse(&reference[idx + 1..]))
            }
            _ => (reference, TasksFilter::All),
        };

        let name = workflow_name(url);
        if name.is_empty() {
            return Err(WorkflowError::Validation(format!(
                "cannot derive a workflow name from '{reference}'"
            )));
        }

        Ok(Self {
            url: url.to_string(),
            name,
            tasks,
        })
    }
}

fn is_task_suffix(reference: &str, colon: usize) -> bool {
    let suffix = &reference[colon + 1..];
    if colon == 0 || suffix.starts_with("//") || suffix.contains('/') {
        return false;
    }
    suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_digit())
}

/// File stem of the last path segment: `mem://repo/deploy.yaml` -> `deploy`.
fn workflow_name(url: &str) -> String {
    let path = url.split_once("://").map_or(url, |(_, rest)| rest);
    let last = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path);
    let stem = last.split(['.', ':']).next().unwrap_or(last);
    stem.trim().to_string()
}

use std::{collections::HashSet, future::Future};

use serde::Serialize;
use time::OffsetDateTime;

use crate::core::{Result, db::user::User};

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: i64,
    pub project_id: i64,
    pub text: String,
    pub is_done: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(skip)]
    pub(super) _guard: (),
}

pub trait TaskRepository {
    /// Flips `is_done` on a task of one of the caller's projects.
    fn toggle_task(&self, owner: &User, task_id: i64) -> impl Future<Output = Result<Task>>;
}

/// Changes needed to turn a project's task list into the desired one.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TaskDiff {
    pub delete: Vec<i64>,
    pub create: Vec<String>,
}

/// Trims every text, drops blanks and collapses exact duplicates, keeping
/// first-seen order.
pub fn normalize_task_texts<S: AsRef<str>>(texts: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    texts
        .iter()
        .map(|text| text.as_ref().trim())
        .filter(|text| !text.is_empty())
        .filter(|text| seen.insert(*text))
        .map(str::to_string)
        .collect()
}

/// Reconciles by text value: tasks whose text is not desired are deleted,
/// desired texts with no existing task are created. Matching tasks are left alone.
pub fn reconcile_tasks<S: AsRef<str>>(existing: &[Task], desired: &[S]) -> TaskDiff {
    let desired = normalize_task_texts(desired);
    let wanted: HashSet<&str> = desired.iter().map(String::as_str).collect();
    let present: HashSet<&str> = existing.iter().map(|task| task.text.as_str()).collect();

    TaskDiff {
        delete: existing
            .iter()
            .filter(|task| !wanted.contains(task.text.as_str()))
            .map(|task| task.id)
            .collect(),
        create: desired
            .iter()
            .filter(|text| !present.contains(text.as_str()))
            .cloned()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::{Task, TaskDiff, normalize_task_texts, reconcile_tasks};

    fn task(id: i64, text: &str) -> Task {
        Task {
            id,
            project_id: 1,
            text: text.to_string(),
            is_done: false,
            created_at: datetime!(2026-01-01 00:00 UTC),
            _guard: (),
        }
    }

    #[test]
    fn replaces_only_changed_texts() {
        let existing = vec![task(1, "a"), task(2, "b"), task(3, "c")];
        let diff = reconcile_tasks(&existing, &["b", "c", "d"]);
        assert_eq!(
            diff,
            TaskDiff {
                delete: vec![1],
                create: vec!["d".to_string()],
            }
        );
    }

    #[test]
    fn matches_by_exact_text_after_trimming_input() {
        let existing = vec![task(1, "Write report"), task(2, "write report")];
        let diff = reconcile_tasks(&existing, &["  Write report ", "", "Write report"]);
        assert_eq!(diff.delete, vec![2]);
        assert!(diff.create.is_empty());
    }

    #[test]
    fn empty_desired_list_deletes_everything() {
        let existing = vec![task(4, "x"), task(5, "y")];
        let diff = reconcile_tasks::<&str>(&existing, &[]);
        assert_eq!(diff.delete, vec![4, 5]);
        assert!(diff.create.is_empty());
    }

    #[test]
    fn normalizing_keeps_first_seen_order() {
        assert_eq!(
            normalize_task_texts(&["b", " a", "b ", "  ", "c"]),
            vec!["b".to_string(), "a".to_string(), "c".to_string()]
        );
    }
}

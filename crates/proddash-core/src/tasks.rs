use std::sync::Arc;

use parking_lot::Mutex;
use proddash_shared::{TaskListParams, TaskRecord, TaskWrite};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::http::ApiClient;

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_DESCRIPTION_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub completed: bool,
}

impl From<TaskRecord> for Task {
    fn from(record: TaskRecord) -> Self {
        Self {
            id: record.id,
            title: record.title,
            description: record.description,
            completed: record.completed,
        }
    }
}

/// A record in the collection: confirmed by the backend, or provisional
/// under a locally generated id while its create call is in flight. A
/// provisional record carries the collection as it stood before it was
/// inserted; a failed create restores exactly that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEntry {
    Confirmed(Task),
    Pending(Task, Arc<Snapshot>),
}

impl TaskEntry {
    pub fn task(&self) -> &Task {
        match self {
            Self::Confirmed(task) | Self::Pending(task, _) => task,
        }
    }

    pub fn is_optimistic(&self) -> bool {
        matches!(self, Self::Pending(..))
    }

    pub fn rollback_point(&self) -> Option<&Snapshot> {
        match self {
            Self::Pending(_, snapshot) => Some(snapshot),
            Self::Confirmed(_) => None,
        }
    }
}

/// Full copy of the collection taken before an optimistic mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot(Vec<TaskEntry>);

impl Snapshot {
    pub fn entries(&self) -> &[TaskEntry] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskValidationError {
    #[error("Task title cannot be empty")]
    EmptyTitle,
    #[error("Task title must be less than 200 characters")]
    TitleTooLong,
    #[error("Task description must be less than 500 characters")]
    DescriptionTooLong,
    #[error("Task already exists")]
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error(transparent)]
    Validation(#[from] TaskValidationError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskStats {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
}

impl TaskStats {
    pub fn completion_percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.completed * 100) / self.total) as u8
    }
}

#[derive(Debug, Default)]
struct BoardState {
    entries: Vec<TaskEntry>,
    error: Option<String>,
    loading: bool,
}

/// Owns the task list and applies optimistic mutations with full-snapshot
/// rollback.
#[derive(Debug)]
pub struct TaskBoard {
    api: Arc<ApiClient>,
    state: Mutex<BoardState>,
}

impl TaskBoard {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self {
            api,
            state: Mutex::new(BoardState::default()),
        }
    }

    pub fn entries(&self) -> Vec<TaskEntry> {
        self.state.lock().entries.clone()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|entry| entry.task().clone())
            .collect()
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().loading
    }

    pub fn stats(&self) -> TaskStats {
        let state = self.state.lock();
        let total = state.entries.len();
        let completed = state
            .entries
            .iter()
            .filter(|entry| entry.task().completed)
            .count();
        TaskStats {
            total,
            completed,
            pending: total - completed,
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot(self.state.lock().entries.clone())
    }

    fn restore(&self, snapshot: Snapshot) {
        self.state.lock().entries = snapshot.0;
    }

    /// Replaces the collection with the backend listing. On failure the
    /// previous collection stays and the error flag is set.
    #[instrument(skip(self))]
    pub async fn fetch(&self) -> Result<(), ApiError> {
        {
            let mut state = self.state.lock();
            state.loading = true;
            state.error = None;
        }

        let result = self.api.list_tasks(&TaskListParams::default()).await;

        let mut state = self.state.lock();
        state.loading = false;
        match result {
            Ok(records) => {
                debug!(count = records.len(), "replacing task collection");
                state.entries = records
                    .into_iter()
                    .map(|record| TaskEntry::Confirmed(record.into()))
                    .collect();
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "failed to load tasks");
                state.error = Some(err.message.clone());
                Err(err)
            }
        }
    }

    #[instrument(skip(self, description))]
    pub async fn add(&self, title: &str, description: &str) -> Result<Task, TaskError> {
        let (local_id, snapshot, write) = {
            let mut state = self.state.lock();
            let (title, description) = validate_new_task(&state.entries, title, description)?;

            let snapshot = Arc::new(Snapshot(state.entries.clone()));
            let local_id = format!("temp-{}", Uuid::new_v4());
            state.entries.push(TaskEntry::Pending(
                Task {
                    id: local_id.clone(),
                    title: title.clone(),
                    description: description.clone(),
                    completed: false,
                },
                snapshot.clone(),
            ));
            let write = TaskWrite {
                title,
                description,
                completed: false,
            };
            (local_id, snapshot, write)
        };

        match self.api.create_task(&write).await {
            Ok(record) => {
                let task = Task::from(record);
                let mut state = self.state.lock();
                match state
                    .entries
                    .iter_mut()
                    .find(|entry| entry.is_optimistic() && entry.task().id == local_id)
                {
                    Some(entry) => *entry = TaskEntry::Confirmed(task.clone()),
                    None => debug!(%local_id, "provisional task no longer present"),
                }
                info!(id = %task.id, "task created");
                Ok(task)
            }
            Err(err) => {
                warn!(error = %err, "create failed; rolling back");
                self.restore(Snapshot::clone(&snapshot));
                Err(err.into())
            }
        }
    }

    /// Flips `completed`. Unknown and provisional ids are a no-op.
    #[instrument(skip(self))]
    pub async fn toggle(&self, id: &str) -> Result<Option<Task>, TaskError> {
        let (snapshot, toggled) = {
            let mut state = self.state.lock();
            let snapshot = Snapshot(state.entries.clone());
            let Some(TaskEntry::Confirmed(task)) = state
                .entries
                .iter_mut()
                .find(|entry| entry.task().id == id)
            else {
                debug!(id, "toggle target not found");
                return Ok(None);
            };
            task.completed = !task.completed;
            (snapshot, task.clone())
        };

        let write = TaskWrite {
            title: toggled.title.clone(),
            description: toggled.description.clone(),
            completed: toggled.completed,
        };
        if let Err(err) = self.api.update_task(id, &write).await {
            warn!(error = %err, "update failed; rolling back");
            self.restore(snapshot);
            return Err(err.into());
        }
        Ok(Some(toggled))
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<(), TaskError> {
        let snapshot = self.snapshot();
        {
            let mut state = self.state.lock();
            if state
                .entries
                .iter()
                .any(|entry| entry.is_optimistic() && entry.task().id == id)
            {
                debug!(id, "cannot delete a provisional task");
                return Ok(());
            }
            state.entries.retain(|entry| entry.task().id != id);
        }

        if let Err(err) = self.api.delete_task(id).await {
            warn!(error = %err, "delete failed; rolling back");
            self.restore(snapshot);
            return Err(err.into());
        }
        info!(id, "task deleted");
        Ok(())
    }
}

/// Trims and checks a new task against the current collection.
pub fn validate_new_task(
    entries: &[TaskEntry],
    title: &str,
    description: &str,
) -> Result<(String, String), TaskValidationError> {
    let title = title.trim();
    let description = description.trim();

    if title.is_empty() {
        return Err(TaskValidationError::EmptyTitle);
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(TaskValidationError::TitleTooLong);
    }
    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(TaskValidationError::DescriptionTooLong);
    }

    let folded = title.to_lowercase();
    if entries
        .iter()
        .any(|entry| entry.task().title.to_lowercase() == folded)
    {
        return Err(TaskValidationError::Duplicate);
    }

    Ok((title.to_string(), description.to_string()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::sleep;

    use super::*;
    use crate::test_support::{StubTransport, client_with, server_error, status_error};

    fn board(transport: &StubTransport) -> TaskBoard {
        let (client, _, _) = client_with(transport, Some("tok"));
        TaskBoard::new(Arc::new(client))
    }

    async fn seeded(transport: &StubTransport, tasks: serde_json::Value) -> TaskBoard {
        transport.push_ok(tasks);
        let board = board(transport);
        board.fetch().await.expect("seed fetch");
        board
    }

    #[tokio::test(start_paused = true)]
    async fn buy_milk_replaces_provisional_record() {
        let transport = StubTransport::new();
        transport.push_ok(json!({ "id": "42", "title": "Buy milk", "description": "", "completed": false }));
        let board = board(&transport);

        let created = board.add("Buy milk", "").await.expect("created");

        assert_eq!(created.id, "42");
        assert_eq!(
            board.entries(),
            vec![TaskEntry::Confirmed(Task {
                id: "42".into(),
                title: "Buy milk".into(),
                description: String::new(),
                completed: false,
            })]
        );
        assert!(board.entries().iter().all(|entry| !entry.is_optimistic()));
        let body = transport.requests()[0].body.clone().expect("body");
        assert_eq!(body, json!({ "title": "Buy milk", "description": "", "completed": false }));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_titles_touch_neither_state_nor_network() {
        let transport = StubTransport::new();
        let board = seeded(&transport, json!([{ "id": 1, "title": "Existing" }])).await;
        let before = board.entries();
        let long_title = "x".repeat(201);
        let long_description = "d".repeat(501);

        let cases = [
            ("   ", "", TaskValidationError::EmptyTitle),
            (long_title.as_str(), "", TaskValidationError::TitleTooLong),
            ("Fine", long_description.as_str(), TaskValidationError::DescriptionTooLong),
            ("  existing ", "", TaskValidationError::Duplicate),
        ];
        for (title, description, expected) in cases {
            let err = board.add(title, description).await.expect_err("invalid");
            assert_eq!(err, TaskError::Validation(expected));
        }

        assert_eq!(board.entries(), before);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn boundary_lengths_are_accepted_after_trimming() {
        let transport = StubTransport::new();
        let title = "t".repeat(200);
        transport.push_ok(json!({ "id": 5, "title": title, "description": "" }));
        let board = board(&transport);

        board
            .add(&format!("  {title}  "), &format!(" {} ", "d".repeat(500)))
            .await
            .expect("accepted");

        let body = transport.requests()[0].body.clone().expect("body");
        assert_eq!(body["title"].as_str().map(str::len), Some(200));
        assert_eq!(body["description"].as_str().map(str::len), Some(500));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_add_restores_exact_snapshot() {
        let transport = StubTransport::new();
        let board = seeded(
            &transport,
            json!([{ "id": 1, "title": "A", "completed": true }, { "id": 2, "title": "B" }]),
        )
        .await;
        let before = board.entries();
        transport.push_err(status_error(400, json!({ "detail": "Quota exceeded" })));

        let err = board.add("C", "").await.expect_err("create fails");

        assert_eq!(err.to_string(), "Quota exceeded");
        assert_eq!(board.entries(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn provisional_record_is_visible_while_in_flight() {
        let transport = StubTransport::new();
        transport.push_delayed(
            Duration::from_millis(500),
            Ok(json!({ "id": "9", "title": "Slow", "completed": false })),
        );
        let board = board(&transport);

        let (created, observed) = tokio::join!(board.add("Slow", ""), async {
            sleep(Duration::from_millis(100)).await;
            board.entries()
        });

        assert_eq!(observed.len(), 1);
        assert!(observed[0].is_optimistic());
        assert!(observed[0].task().id.starts_with("temp-"));
        let rollback = observed[0].rollback_point().expect("provisional");
        assert!(rollback.entries().is_empty());
        assert_eq!(created.expect("created").id, "9");
        assert!(!board.entries()[0].is_optimistic());
    }

    #[tokio::test(start_paused = true)]
    async fn provisional_record_ignores_toggle_and_delete() {
        let transport = StubTransport::new();
        transport.push_delayed(
            Duration::from_millis(500),
            Ok(json!({ "id": "9", "title": "Slow", "completed": false })),
        );
        let board = board(&transport);

        let (created, sent_while_pending) = tokio::join!(board.add("Slow", ""), async {
            sleep(Duration::from_millis(100)).await;
            let temp_id = board.entries()[0].task().id.clone();
            assert_eq!(board.toggle(&temp_id).await, Ok(None));
            assert_eq!(board.delete(&temp_id).await, Ok(()));
            assert!(board.entries()[0].is_optimistic());
            transport.request_count()
        });

        assert_eq!(sent_while_pending, 1);
        assert_eq!(created.expect("created").id, "9");
        assert_eq!(board.tasks().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_twice_returns_to_original() {
        let transport = StubTransport::new();
        let board = seeded(&transport, json!([{ "id": 3, "title": "Walk", "description": "dog" }])).await;
        transport.push_ok(json!({}));
        transport.push_ok(json!({}));

        let first = board.toggle("3").await.expect("toggle").expect("present");
        assert!(first.completed);
        let second = board.toggle("3").await.expect("toggle").expect("present");
        assert!(!second.completed);

        let requests = transport.requests();
        assert_eq!(requests[1].path, "/api/v1/dashboard/tasks/3");
        assert_eq!(
            requests[1].body,
            Some(json!({ "title": "Walk", "description": "dog", "completed": true }))
        );
        assert_eq!(requests[2].body.as_ref().map(|b| b["completed"].clone()), Some(json!(false)));
        assert!(!board.tasks()[0].completed);
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_of_unknown_id_is_a_no_op() {
        let transport = StubTransport::new();
        let board = seeded(&transport, json!([])).await;
        assert_eq!(board.toggle("missing").await.expect("no-op"), None);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_toggle_and_delete_roll_back() {
        let transport = StubTransport::new();
        let board = seeded(&transport, json!([{ "id": 1, "title": "A" }, { "id": 2, "title": "B" }])).await;
        let before = board.entries();

        transport.push_err(server_error());
        assert!(board.toggle("1").await.is_err());
        assert_eq!(board.entries(), before);

        transport.push_err(status_error(404, json!({ "detail": "Task not found" })));
        let err = board.delete("1").await.expect_err("delete fails");
        assert_eq!(err.to_string(), "Task not found");
        assert_eq!(board.entries(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_removes_record() {
        let transport = StubTransport::new();
        let board = seeded(&transport, json!([{ "id": 1, "title": "A" }, { "id": 2, "title": "B" }])).await;
        transport.push_ok(serde_json::Value::Null);

        board.delete("1").await.expect("deleted");

        let ids: Vec<_> = board.tasks().into_iter().map(|task| task.id).collect();
        assert_eq!(ids, vec!["2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_keeps_previous_collection() {
        let transport = StubTransport::new();
        let board = seeded(&transport, json!([{ "id": 1, "title": "Keep me" }])).await;
        let before = board.entries();
        transport.push_err(status_error(403, json!({})));

        assert!(board.fetch().await.is_err());

        assert_eq!(board.entries(), before);
        assert_eq!(board.error().as_deref(), Some("Failed to fetch tasks"));
        assert!(!board.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn stats_summarise_collection() {
        let transport = StubTransport::new();
        let board = seeded(
            &transport,
            json!([
                { "id": 1, "title": "A", "completed": true },
                { "id": 2, "title": "B" },
                { "id": 3, "title": "C" }
            ]),
        )
        .await;
        let stats = board.stats();
        assert_eq!((stats.total, stats.completed, stats.pending), (3, 1, 2));
        assert_eq!(stats.completion_percent(), 33);
        assert_eq!(TaskStats::default().completion_percent(), 0);
    }
}

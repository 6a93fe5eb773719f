//! `whatsapp_tasks` / `whatsapp_processed_messages` repository.

use std::collections::HashSet;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_datetime, Database};
use crate::core::types::{Priority, StoredTask, TaskCandidate, TaskOrigin, TaskStatus};

const TASK_COLUMNS: &str = "id, problem_id, group_name, sender, message, task_description, \
     timestamp, status, priority, message_id, origin";

fn row_to_task(row: &Row) -> Result<StoredTask> {
    let timestamp: String = row.get("timestamp")?;
    let status: String = row.get("status")?;
    let priority: String = row.get("priority")?;
    let origin: String = row.get("origin")?;

    Ok(StoredTask {
        id: row.get("id")?,
        problem_id: row.get("problem_id")?,
        group_name: row.get("group_name")?,
        sender: row.get("sender")?,
        message: row.get("message")?,
        task_description: row.get("task_description")?,
        timestamp: parse_datetime(&timestamp, "timestamp")?,
        status: status.parse()?,
        priority: priority.parse()?,
        message_id: row.get("message_id")?,
        origin: origin.parse()?,
    })
}

/// Filters for [`Database::list_tasks`]. Empty filter lists everything,
/// newest first.
#[derive(Clone, Debug, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub group_name: Option<String>,
    pub origin: Option<TaskOrigin>,
    pub limit: Option<usize>,
}

impl Database {
    /// Check-then-insert for one candidate as a single write. `None` when the
    /// identifier is already journaled.
    pub async fn insert_if_unprocessed(&self, candidate: &TaskCandidate) -> Result<Option<i64>> {
        let candidate = candidate.clone();
        self.write("admission", move |tx| {
            let message_id = candidate.message_id();
            let message_key = candidate.source.message_key();

            let seen: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM whatsapp_processed_messages WHERE message_id = ?1)",
                    params![message_id],
                    |row| row.get(0),
                )
                .context("failed to check processed-message journal")?;
            if seen {
                return Ok(None);
            }

            // The UNIQUE message_id column backstops the journal check.
            let inserted = tx
                .execute(
                    "INSERT OR IGNORE INTO whatsapp_tasks
                        (group_name, sender, message, task_description, timestamp, status, priority, message_id, origin)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        candidate.source.group_name,
                        candidate.source.sender,
                        candidate.source.text,
                        candidate.description,
                        candidate.source.timestamp.to_rfc3339(),
                        TaskStatus::Pending.as_str(),
                        candidate.priority.as_str(),
                        message_id,
                        candidate.origin.as_str(),
                    ],
                )
                .context("failed to insert task")?;
            let task_id = if inserted == 1 {
                Some(tx.last_insert_rowid())
            } else {
                None
            };

            tx.execute(
                "INSERT OR IGNORE INTO whatsapp_processed_messages
                    (message_id, message_key, group_name, sender, processed_date)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message_id,
                    message_key,
                    candidate.source.group_name,
                    candidate.source.sender,
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("failed to journal processed message")?;

            Ok(task_id)
        })
        .await
    }

    /// The subset of `keys` already present in the journal.
    pub async fn processed_message_keys(&self, keys: Vec<String>) -> Result<HashSet<String>> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }
        self.read(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT 1 FROM whatsapp_processed_messages WHERE message_key = ?1 LIMIT 1",
            )?;
            let mut found = HashSet::new();
            for key in keys {
                if stmt.exists(params![key])? {
                    found.insert(key);
                }
            }
            Ok(found)
        })
        .await
    }

    pub async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<StoredTask>> {
        self.read(move |conn| {
            let mut sql = format!("SELECT {TASK_COLUMNS} FROM whatsapp_tasks WHERE 1 = 1");
            let mut args: Vec<String> = Vec::new();
            if let Some(status) = filter.status {
                args.push(status.as_str().to_string());
                sql.push_str(&format!(" AND status = ?{}", args.len()));
            }
            if let Some(group) = &filter.group_name {
                args.push(group.clone());
                sql.push_str(&format!(" AND group_name = ?{}", args.len()));
            }
            if let Some(origin) = filter.origin {
                args.push(origin.as_str().to_string());
                sql.push_str(&format!(" AND origin = ?{}", args.len()));
            }
            sql.push_str(" ORDER BY timestamp DESC, id DESC");
            if let Some(limit) = filter.limit {
                sql.push_str(&format!(" LIMIT {limit}"));
            }

            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(rusqlite::params_from_iter(args.iter()))?;
            let mut tasks = Vec::new();
            while let Some(row) = rows.next()? {
                tasks.push(row_to_task(row)?);
            }
            Ok(tasks)
        })
        .await
    }

    pub async fn get_task(&self, task_id: i64) -> Result<Option<StoredTask>> {
        self.read(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM whatsapp_tasks WHERE id = ?1"
            ))?;
            let mut rows = stmt.query(params![task_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_task(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Link a task to a problem. The problems table belongs to another
    /// component, so the id is stored as given.
    pub async fn assign_task(&self, task_id: i64, problem_id: i64) -> Result<bool> {
        self.write("assign", move |tx| {
            let changed = tx
                .execute(
                    "UPDATE whatsapp_tasks SET problem_id = ?1 WHERE id = ?2",
                    params![problem_id, task_id],
                )
                .context("failed to assign task")?;
            Ok(changed == 1)
        })
        .await
    }

    /// Mark a task converted into an action step of its problem. Fails when
    /// the task is missing, has no problem, or was already converted.
    pub async fn convert_task(&self, task_id: i64) -> Result<StoredTask> {
        self.write("convert", move |tx| {
            let current: Option<(Option<i64>, String)> = tx
                .query_row(
                    "SELECT problem_id, status FROM whatsapp_tasks WHERE id = ?1",
                    params![task_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((problem_id, status)) = current else {
                bail!("task {task_id} not found");
            };
            if problem_id.is_none() {
                bail!("task {task_id} is not assigned to a problem; assign it first");
            }
            if status == TaskStatus::Converted.as_str() {
                bail!("task {task_id} was already converted");
            }

            tx.execute(
                "UPDATE whatsapp_tasks SET status = ?1 WHERE id = ?2",
                params![TaskStatus::Converted.as_str(), task_id],
            )
            .context("failed to convert task")?;

            let mut stmt = tx.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM whatsapp_tasks WHERE id = ?1"
            ))?;
            let mut rows = stmt.query(params![task_id])?;
            match rows.next()? {
                Some(row) => row_to_task(row),
                None => Err(anyhow!("task {task_id} vanished during conversion")),
            }
        })
        .await
    }

    pub async fn complete_task(&self, task_id: i64) -> Result<bool> {
        self.set_status(task_id, TaskStatus::Completed).await
    }

    async fn set_status(&self, task_id: i64, status: TaskStatus) -> Result<bool> {
        self.write("set status", move |tx| {
            let changed = tx
                .execute(
                    "UPDATE whatsapp_tasks SET status = ?1 WHERE id = ?2",
                    params![status.as_str(), task_id],
                )
                .context("failed to update task status")?;
            Ok(changed == 1)
        })
        .await
    }

    pub async fn set_task_priority(&self, task_id: i64, priority: Priority) -> Result<bool> {
        self.write("set priority", move |tx| {
            let changed = tx
                .execute(
                    "UPDATE whatsapp_tasks SET priority = ?1 WHERE id = ?2",
                    params![priority.as_str(), task_id],
                )
                .context("failed to update task priority")?;
            Ok(changed == 1)
        })
        .await
    }

    /// Delete the task row. Its journal entry stays, so a later scan of the
    /// same message does not resurrect it.
    pub async fn delete_task(&self, task_id: i64) -> Result<bool> {
        self.write("delete", move |tx| {
            let changed = tx
                .execute("DELETE FROM whatsapp_tasks WHERE id = ?1", params![task_id])
                .context("failed to delete task")?;
            Ok(changed == 1)
        })
        .await
    }

    pub async fn count_tasks(&self) -> Result<i64> {
        self.read(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM whatsapp_tasks", [], |row| row.get(0))?)
        })
        .await
    }

    pub async fn count_processed(&self) -> Result<i64> {
        self.read(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM whatsapp_processed_messages",
                [],
                |row| row.get(0),
            )?)
        })
        .await
    }
}

// Task list operations over the `tasks` bucket
//
// Every operation takes the bucket and store handles explicitly and runs in
// exactly one transaction. Errors go straight back to the caller.

use crate::codec::{self, TaskFields};
use crate::config::{Options, UpdatePolicy};
use crate::error::{Result, StoreError};
use crate::store::Store;
use serde::Serialize;
use std::path::Path;
use tracing::debug;

pub const TASK_BUCKET: &str = "tasks";

/// Handle naming the bucket tasks live in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    name: String,
}

impl Bucket {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A task as listed: its id and the raw stored value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: u64,
    pub value: String,
}

impl Task {
    /// Split the raw value into text, timestamp and done flag
    pub fn fields(&self) -> TaskFields {
        TaskFields::parse(&self.value)
    }
}

/// Open the database at `path` and make sure the `tasks` bucket exists
pub fn init<P: AsRef<Path>>(path: P) -> Result<(Bucket, Store)> {
    init_with(path, &Options::default())
}

pub fn init_with<P: AsRef<Path>>(path: P, options: &Options) -> Result<(Bucket, Store)> {
    let store = Store::open_with(path, options)?;

    store
        .update(|tx| tx.create_bucket_if_not_exists(TASK_BUCKET).map(|_| ()))
        .map_err(|e| StoreError::Bucket {
            name: TASK_BUCKET.to_string(),
            source: Box::new(e),
        })?;

    let bucket = Bucket {
        name: TASK_BUCKET.to_string(),
    };
    Ok((bucket, store))
}

/// Store a new task and return its id
///
/// Ids come from the bucket's sequence: strictly increasing and never reused.
/// The value is `text\n<timestamp>\nfalse`.
pub fn create_task(text: &str, bucket: &Bucket, store: &Store) -> Result<u64> {
    let created_at = codec::timestamp_now();

    let id = store.update(|tx| {
        let b = tx.bucket(bucket.name())?;
        let id = b.next_sequence()?;
        b.put(&codec::encode_key(id), codec::encode_created(text, &created_at).as_bytes())?;
        Ok(id)
    })?;

    debug!(id, "Created task");
    Ok(id)
}

/// Overwrite the task at `id` with `text\n<timestamp>` and echo the id back
///
/// The stored `done` field is not carried over. A missing id is written as a
/// new record; use `update_task_with` and `UpdatePolicy::RequireExisting` to
/// reject it instead.
pub fn update_task(text: &str, id: u64, bucket: &Bucket, store: &Store) -> Result<u64> {
    update_task_with(text, id, bucket, store, UpdatePolicy::Upsert)
}

pub fn update_task_with(
    text: &str,
    id: u64,
    bucket: &Bucket,
    store: &Store,
    policy: UpdatePolicy,
) -> Result<u64> {
    let created_at = codec::timestamp_now();
    let key = codec::encode_key(id);

    store.update(|tx| {
        let b = tx.bucket(bucket.name())?;
        if policy == UpdatePolicy::RequireExisting && b.get(&key)?.is_none() {
            return Err(StoreError::NotFound(id));
        }
        b.put(&key, codec::encode_updated(text, &created_at).as_bytes())
    })?;

    debug!(id, ?policy, "Updated task");
    Ok(id)
}

/// All tasks in ascending id order
pub fn all_tasks(bucket: &Bucket, store: &Store) -> Result<Vec<Task>> {
    store.view(|tx| {
        let mut tasks = Vec::new();
        for entry in tx.bucket(bucket.name())?.cursor() {
            let (key, value) = entry?;
            tasks.push(Task {
                id: codec::decode_key(&key)?,
                value: String::from_utf8_lossy(&value).into_owned(),
            });
        }
        Ok(tasks)
    })
}

/// Remove the task at `id`; a missing id is not an error
pub fn delete_task(id: u64, bucket: &Bucket, store: &Store) -> Result<()> {
    store.update(|tx| tx.bucket(bucket.name())?.delete(&codec::encode_key(id)))?;
    debug!(id, "Deleted task");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init_temp() -> (TempDir, Bucket, Store) {
        let temp = TempDir::new().unwrap();
        let (bucket, store) = init(temp.path().join("tasks.db")).unwrap();
        (temp, bucket, store)
    }

    fn ids(tasks: &[Task]) -> Vec<u64> {
        tasks.iter().map(|t| t.id).collect()
    }

    #[test]
    fn test_init_names_tasks_bucket() {
        let (_temp, bucket, store) = init_temp();
        assert_eq!(bucket.name(), "tasks");
        assert_eq!(store.view(|tx| tx.bucket_names()).unwrap(), vec!["tasks"]);
    }

    #[test]
    fn test_init_twice_keeps_contents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tasks.db");

        let (bucket, store) = init(&path).unwrap();
        let id = create_task("buy milk", &bucket, &store).unwrap();
        store.close().unwrap();

        let (bucket, store) = init(&path).unwrap();
        let tasks = all_tasks(&bucket, &store).unwrap();
        assert_eq!(ids(&tasks), vec![id]);
        assert_eq!(store.view(|tx| tx.bucket_names()).unwrap(), vec!["tasks"]);
    }

    #[test]
    fn test_create_ids_strictly_increase() {
        let (_temp, bucket, store) = init_temp();

        let created: Vec<u64> = (0..10)
            .map(|i| create_task(&format!("task {}", i), &bucket, &store).unwrap())
            .collect();

        assert!(created.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(created.first(), Some(&1));
    }

    #[test]
    fn test_create_then_list() {
        let (_temp, bucket, store) = init_temp();

        let id = create_task("buy milk", &bucket, &store).unwrap();
        let tasks = all_tasks(&bucket, &store).unwrap();

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, id);
        assert!(tasks[0].value.starts_with("buy milk\n"));
        assert!(tasks[0].value.ends_with("\nfalse"));

        let fields = tasks[0].fields();
        assert_eq!(fields.text, "buy milk");
        assert!(fields.created_at.ends_with(" GMT"));
        assert_eq!(fields.done, Some(false));
    }

    #[test]
    fn test_update_overwrites_and_drops_done() {
        let (_temp, bucket, store) = init_temp();

        let id = create_task("x", &bucket, &store).unwrap();
        assert_eq!(id, 1);
        assert_eq!(update_task("y", 1, &bucket, &store).unwrap(), 1);

        let tasks = all_tasks(&bucket, &store).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, 1);
        assert!(tasks[0].value.starts_with("y\n"));
        assert_eq!(tasks[0].value.split('\n').count(), 2);
        assert_eq!(tasks[0].fields().done, None);
    }

    #[test]
    fn test_update_missing_id_upserts() {
        let (_temp, bucket, store) = init_temp();

        assert_eq!(update_task("ghost", 42, &bucket, &store).unwrap(), 42);

        let tasks = all_tasks(&bucket, &store).unwrap();
        assert_eq!(ids(&tasks), vec![42]);
        assert_eq!(tasks[0].fields().text, "ghost");
    }

    #[test]
    fn test_update_missing_id_rejected_when_required() {
        let (_temp, bucket, store) = init_temp();

        let err = update_task_with("ghost", 42, &bucket, &store, UpdatePolicy::RequireExisting).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(42)));
        assert!(all_tasks(&bucket, &store).unwrap().is_empty());

        let id = create_task("real", &bucket, &store).unwrap();
        update_task_with("renamed", id, &bucket, &store, UpdatePolicy::RequireExisting).unwrap();
        assert_eq!(all_tasks(&bucket, &store).unwrap()[0].fields().text, "renamed");
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_temp, bucket, store) = init_temp();

        let id = create_task("done soon", &bucket, &store).unwrap();
        delete_task(id, &bucket, &store).unwrap();
        assert!(all_tasks(&bucket, &store).unwrap().is_empty());

        delete_task(id, &bucket, &store).unwrap();
        delete_task(999, &bucket, &store).unwrap();
    }

    #[test]
    fn test_list_skips_deleted_in_order() {
        let (_temp, bucket, store) = init_temp();

        for text in ["one", "two", "three"] {
            create_task(text, &bucket, &store).unwrap();
        }
        delete_task(2, &bucket, &store).unwrap();

        let tasks = all_tasks(&bucket, &store).unwrap();
        assert_eq!(ids(&tasks), vec![1, 3]);
    }

    #[test]
    fn test_empty_store_lists_nothing() {
        let (_temp, bucket, store) = init_temp();
        assert!(all_tasks(&bucket, &store).unwrap().is_empty());
    }

    #[test]
    fn test_ids_not_reused_after_delete_and_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tasks.db");

        let (bucket, store) = init(&path).unwrap();
        let first = create_task("a", &bucket, &store).unwrap();
        let second = create_task("b", &bucket, &store).unwrap();
        delete_task(second, &bucket, &store).unwrap();
        drop(store);

        let (bucket, store) = init(&path).unwrap();
        let third = create_task("c", &bucket, &store).unwrap();
        assert!(third > second);
        assert_eq!(ids(&all_tasks(&bucket, &store).unwrap()), vec![first, third]);
    }

    #[test]
    fn test_list_orders_numerically_past_one_byte() {
        let (_temp, bucket, store) = init_temp();

        update_task("late", 256, &bucket, &store).unwrap();
        update_task("early", 255, &bucket, &store).unwrap();
        create_task("first", &bucket, &store).unwrap();

        let tasks = all_tasks(&bucket, &store).unwrap();
        assert_eq!(ids(&tasks), vec![1, 255, 256]);
    }

    #[test]
    fn test_text_with_newlines_round_trips_through_fields() {
        let (_temp, bucket, store) = init_temp();

        create_task("line one\nline two", &bucket, &store).unwrap();
        let fields = all_tasks(&bucket, &store).unwrap()[0].fields();
        assert_eq!(fields.text, "line one\nline two");
        assert_eq!(fields.done, Some(false));
    }

    #[test]
    fn test_init_wraps_bucket_creation_failure() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tasks.db");
        Store::open(&path).unwrap().close().unwrap();

        let raw = rusqlite::Connection::open(&path).unwrap();
        raw.execute_batch(
            "CREATE TRIGGER refuse_buckets BEFORE INSERT ON buckets
             BEGIN SELECT RAISE(ABORT, 'buckets are read-only'); END;",
        )
        .unwrap();
        drop(raw);

        let err = init(&path).err().unwrap();
        match &err {
            StoreError::Bucket { name, source } => {
                assert_eq!(name, "tasks");
                assert!(matches!(**source, StoreError::Transaction(_)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_list_reads_a_snapshot() {
        let (temp, bucket, store) = init_temp();
        create_task("one", &bucket, &store).unwrap();
        create_task("two", &bucket, &store).unwrap();

        let other = rusqlite::Connection::open(temp.path().join("tasks.db")).unwrap();
        let late_key = codec::encode_key(3);

        let seen = store
            .view(|tx| {
                let mut seen = Vec::new();
                for entry in tx.bucket(bucket.name())?.cursor() {
                    let (key, _) = entry?;
                    if seen.is_empty() {
                        other
                            .execute(
                                "INSERT INTO entries (bucket, key, value) VALUES ('tasks', ?1, 'late')",
                                rusqlite::params![&late_key[..]],
                            )
                            .unwrap();
                    }
                    seen.push(codec::decode_key(&key)?);
                }
                Ok(seen)
            })
            .unwrap();

        assert_eq!(seen, vec![1, 2]);
        assert_eq!(ids(&all_tasks(&bucket, &store).unwrap()), vec![1, 2, 3]);
    }

    #[test]
    fn test_wrong_bucket_handle_fails() {
        let (_temp, _bucket, store) = init_temp();
        let other = Bucket {
            name: "missing".to_string(),
        };

        let err = create_task("x", &other, &store).unwrap_err();
        assert!(matches!(err, StoreError::BucketNotFound(_)));
    }
}

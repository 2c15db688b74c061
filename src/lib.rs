// tasksdb - Task list persistence on an embedded single-file key/value store

pub mod codec;
pub mod config;
pub mod error;
pub mod store;
pub mod tasks;

// Re-export main types for convenience
pub use codec::TaskFields;
pub use config::{Options, UpdatePolicy};
pub use error::{Result, StoreError};
pub use store::{BucketTx, Cursor, Entry, Store, Tx};
pub use tasks::{
    Bucket, TASK_BUCKET, Task, all_tasks, create_task, delete_task, init, init_with, update_task, update_task_with,
};

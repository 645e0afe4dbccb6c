mod library_store;
mod task_status_store;

pub use library_store::SqliteLibraryStore;
pub use task_status_store::SqliteTaskStatusStore;

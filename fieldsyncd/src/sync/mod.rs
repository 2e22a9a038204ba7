pub mod context;
pub mod engine;
pub mod executor;
pub mod partition;
pub mod progress;
pub mod reconcile;
pub mod record;
pub mod state;
pub mod store;
pub mod summary;

pub mod store;
pub mod task;

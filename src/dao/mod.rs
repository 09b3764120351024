/// Record models shared by every backend.
pub mod models;
/// Room repository with compare-and-swap updates.
pub mod room;
/// Room store abstraction and its backends.
pub mod room_store;
/// Storage error types.
pub mod storage;

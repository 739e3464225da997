// Library root for the dashboard synchronization engine.
//
// The engine observes a remote training process over a WebSocket, an SSE
// stream, or HTTP polling, normalizes every payload into canonical records,
// and publishes immutable `AppState` snapshots to subscribers.

pub mod actions;
pub mod admin;
pub mod db;
pub mod engine;
pub mod health;
pub mod logs;
pub mod normalize;
pub mod persist;
pub mod protocol;
pub mod records;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod transport;

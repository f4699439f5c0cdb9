pub mod store;

pub use store::{
    spawn_cleanup_task, CleanupRequest, CleanupStats, Session, SessionStore, SessionView,
    StoreSettings, CLEANUP_INTERVAL_MS, MAX_SESSIONS, SESSION_TTL_MS,
};

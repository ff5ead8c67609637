pub mod builds;
pub mod cluster_load;
pub mod config;
pub mod error;
pub mod events;
pub mod launcher;
pub mod lifecycle;
pub mod log_store;
pub mod poller;
pub mod scheduler;
pub mod session;
pub mod settings;
pub mod shutdown;
pub mod ssh;
pub mod state;
pub mod stats;
pub mod status_flash;
pub mod view;

// Concrete adapters for the ports in `app::ports`

pub mod file_source;
pub mod http_source;
pub mod notifier;
pub mod quarantine_store;
pub mod region_source;
pub mod sqlite_sink;

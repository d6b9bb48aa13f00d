// Adapters behind the app ports: HTTP transport, stores and clocks

pub mod clock;
pub mod http_client;
pub mod in_memory_store;
pub mod sqlite_store;

pub use clock::{ManualClock, SystemClock};
pub use http_client::ReqwestHttp;
pub use in_memory_store::InMemoryStore;
pub use sqlite_store::SqliteStore;

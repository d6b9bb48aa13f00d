// Provider adapters: turn gateway payloads into raw record sets

pub mod json_records;

pub use json_records::{JsonRecordsAdapter, RecordsLayout};

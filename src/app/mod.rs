// Application layer: collaborator ports and the ingest use case

pub mod ingest_use_case;
pub mod ports;

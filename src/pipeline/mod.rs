// Data processing pipeline: ingestion, processing (standardize, quality gate) and load

pub mod ingestion;
pub mod load;
pub mod processing;

// Pipeline processing: standardization, optional cleaning and quality gating of record sets

pub mod clean;
pub mod quality_gate;
pub mod standardize;
pub mod stats;

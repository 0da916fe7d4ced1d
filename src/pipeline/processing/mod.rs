// Pipeline processing: parsing, enrichment, and validation

pub mod enrich;
pub mod mappings;
pub mod parser;
pub mod quality_gate;
pub mod regions;

pub mod embed;
pub mod enrich;
pub mod ingest;
pub mod pipeline;
pub mod search;
pub mod status;

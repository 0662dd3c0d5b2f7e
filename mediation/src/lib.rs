pub mod api;
pub mod cache;
pub mod config;
pub mod ingestion;
pub mod ingress;
pub mod pipeline;
pub mod prometheus;
pub mod record;
pub mod router;
pub mod server;
pub mod sinks;
pub mod stages;
pub mod time;

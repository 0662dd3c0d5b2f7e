//! The four per-record stages, in the order the pipeline runs them.

pub mod enrichment;
pub mod export;
pub mod filtering;
pub mod transformation;

pub use enrichment::Enricher;
pub use export::Exporter;
pub use filtering::{Filter, FilterAction, FilterRule, Operator};
pub use transformation::{Operation, TransformationRule, Transformer};

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use tracing::trace;

use crate::cache::LookupCache;
use crate::record::{Record, RecordError};

/// Copies cached lookup values into records.
///
/// `fields` maps a target field name to the cache key holding its value. A
/// cache miss leaves the target untouched, nothing is fetched on demand.
pub struct Enricher {
    enabled: bool,
    fields: BTreeMap<String, String>,
    cache: Arc<LookupCache>,
}

impl Enricher {
    pub fn new(enabled: bool, fields: BTreeMap<String, String>, cache: Arc<LookupCache>) -> Self {
        Self {
            enabled,
            fields,
            cache,
        }
    }

    pub fn disabled(cache: Arc<LookupCache>) -> Self {
        Self::new(false, BTreeMap::new(), cache)
    }

    pub fn enrich(&self, payload: Bytes) -> Result<Bytes, RecordError> {
        if !self.enabled {
            return Ok(payload);
        }

        let mut record = Record::from_slice(&payload)?;
        for (target, key) in &self.fields {
            match self.cache.lookup(key) {
                Some(value) => {
                    drop(record.insert(target.clone(), value));
                    counter!("mediation_enriched_fields_total").increment(1);
                }
                None => trace!(field = %target, key = %key, "no cached value for field"),
            }
        }
        record.to_bytes()
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use crate::sinks::Sink;
use crate::sources::{Extractor, Source};
use crate::utils::error::{AppError, Result};

/// A storefront plugged into the pipeline: its fetcher plus the matching
/// field extractor.
#[derive(Clone)]
pub struct SourcePlugin {
    pub source: Arc<dyn Source>,
    pub extractor: Arc<dyn Extractor>,
}

impl std::fmt::Debug for SourcePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourcePlugin").finish_non_exhaustive()
    }
}

/// String-keyed registry of source and sink implementations.
///
/// Tasks select implementations by name, so a new storefront or delivery
/// channel plugs in here without touching the runner. Built once at startup
/// and immutable afterwards; task specs are loaded once too.
#[derive(Default)]
pub struct Registry {
    sources: HashMap<String, SourcePlugin>,
    sinks: HashMap<String, Arc<dyn Sink>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_source(
        &mut self,
        name: impl Into<String>,
        source: Arc<dyn Source>,
        extractor: Arc<dyn Extractor>,
    ) {
        self.sources
            .insert(name.into(), SourcePlugin { source, extractor });
    }

    pub fn register_sink(&mut self, name: impl Into<String>, sink: Arc<dyn Sink>) {
        self.sinks.insert(name.into(), sink);
    }

    /// Unknown names are a configuration error, fatal to the requesting
    /// task's run only.
    pub fn source(&self, name: &str) -> Result<&SourcePlugin> {
        self.sources.get(name).ok_or_else(|| AppError::UnknownPlugin {
            kind: "source",
            name: name.to_string(),
        })
    }

    pub fn sink(&self, name: &str) -> Result<&Arc<dyn Sink>> {
        self.sinks.get(name).ok_or_else(|| AppError::UnknownPlugin {
            kind: "sink",
            name: name.to_string(),
        })
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.keys().cloned().collect()
    }
}

//! Extractor registry keyed by MIME type.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use docrag_core::{ExtractError, Extractor, PageSegment};

/// Registry of extractor adapters.
///
/// Registration is static at startup; dispatch is by declared MIME type.
pub struct ExtractorRegistry {
    /// Named extractors
    extractors: HashMap<String, Arc<dyn Extractor>>,
    /// MIME type to extractor name mapping
    mime_mapping: HashMap<String, String>,
}

impl ExtractorRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            extractors: HashMap::new(),
            mime_mapping: HashMap::new(),
        }
    }

    /// Register an extractor under a name, claiming its supported MIME types.
    pub fn register<E: Extractor + 'static>(&mut self, name: &str, extractor: E) {
        let extractor = Arc::new(extractor);
        for mime in extractor.supported_types() {
            self.mime_mapping
                .insert((*mime).to_string(), name.to_string());
        }
        self.extractors.insert(name.to_string(), extractor);
    }

    /// Get the extractor registered for a MIME type.
    #[must_use]
    pub fn get_for_mime(&self, mime_type: &str) -> Option<Arc<dyn Extractor>> {
        self.mime_mapping
            .get(mime_type)
            .and_then(|name| self.extractors.get(name))
            .cloned()
    }

    /// MIME types with a registered extractor.
    #[must_use]
    pub fn supported_types(&self) -> Vec<&str> {
        self.mime_mapping.keys().map(String::as_str).collect()
    }

    /// Extract page-tagged segments from a file.
    ///
    /// An unregistered MIME type is an input error
    /// ([`ExtractError::UnsupportedType`]), not an extraction failure.
    pub async fn extract(
        &self,
        path: &Path,
        mime_type: &str,
    ) -> Result<Vec<PageSegment>, ExtractError> {
        let extractor = self
            .get_for_mime(mime_type)
            .ok_or_else(|| ExtractError::UnsupportedType(mime_type.to_string()))?;

        extractor.extract(path).await
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

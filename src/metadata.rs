//! Session metadata structures and handling.
//!
//! `SessionMetadata` captures the hardware and software context of one scan
//! session: which instruments were used and how they were configured, plus
//! free-form operator parameters and annotations. It is persisted inside the
//! end-of-run report so a session can be re-analyzed long after the
//! instrument state has changed.
//!
//! A `SessionMetadataBuilder` is provided for ergonomic construction.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hardware/software context for one scan session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMetadata {
    /// Short name of the scanned sample.
    pub sample_name: String,
    /// Free-text description of the session.
    pub description: String,
    /// Instrument configuration snapshot (detector id, exposure, rotator
    /// id, steps per revolution, ...).
    pub instrument_config: HashMap<String, String>,
    /// User-defined session parameters.
    pub parameters: HashMap<String, serde_json::Value>,
    /// Operator notes.
    pub annotations: String,
    /// Version of the acquisition software.
    pub software_version: String,
}

impl Default for SessionMetadata {
    fn default() -> Self {
        Self {
            sample_name: "unnamed sample".to_string(),
            description: String::new(),
            instrument_config: HashMap::new(),
            parameters: HashMap::new(),
            annotations: String::new(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl SessionMetadata {
    /// Validates the metadata.
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_name.is_empty() {
            return Err("Sample name cannot be empty.".to_string());
        }
        Ok(())
    }
}

/// A builder for constructing `SessionMetadata` instances.
#[derive(Default)]
pub struct SessionMetadataBuilder {
    inner: SessionMetadata,
}

impl SessionMetadataBuilder {
    /// Creates a builder holding defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sample name.
    pub fn sample_name(mut self, name: &str) -> Self {
        self.inner.sample_name = name.to_string();
        self
    }

    /// Sets the session description.
    pub fn description(mut self, description: &str) -> Self {
        self.inner.description = description.to_string();
        self
    }

    /// Adds one instrument configuration entry.
    pub fn instrument_config(mut self, key: &str, value: &str) -> Self {
        self.inner
            .instrument_config
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Adds one user-defined parameter.
    pub fn parameter(mut self, key: &str, value: serde_json::Value) -> Self {
        self.inner.parameters.insert(key.to_string(), value);
        self
    }

    /// Sets operator annotations.
    pub fn annotations(mut self, annotations: &str) -> Self {
        self.inner.annotations = annotations.to_string();
        self
    }

    /// Finishes building.
    pub fn build(self) -> SessionMetadata {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let metadata = SessionMetadataBuilder::new()
            .sample_name("zebrafish 3dpf")
            .instrument_config("detector", "mock_cam")
            .instrument_config("steps_per_revolution", "3200")
            .parameter("step_count", serde_json::json!(400))
            .build();
        assert_eq!(metadata.sample_name, "zebrafish 3dpf");
        assert_eq!(metadata.instrument_config.len(), 2);
        assert!(metadata.validate().is_ok());
        assert_eq!(metadata.software_version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_empty_sample_name_fails_validation() {
        let metadata = SessionMetadataBuilder::new().sample_name("").build();
        assert!(metadata.validate().is_err());
    }
}

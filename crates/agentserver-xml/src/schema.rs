// SPDX-License-Identifier: MIT OR Apache-2.0
//! Envelope & Schema Store (§2 item 1, §6 persisted state).
//!
//! Each listener's payload schema is compiled once at registration and
//! retained for the listener's lifetime. Compiled schemas are also
//! persisted to `schemas/<name>/v1.xsd` so a restarted process can recover
//! them without requiring every listener to be re-registered with a full
//! schema body.

use agentserver_error::ErrorCode;
use jsonschema::Validator;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by [`SchemaStore`] operations.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The schema document itself does not compile.
    #[error("schema for '{name}' does not compile: {reason}")]
    InvalidSchema {
        /// Listener name the schema was registered under.
        name: String,
        /// Compiler error detail.
        reason: String,
    },

    /// No schema has been compiled for this listener.
    #[error("no schema registered for '{name}'")]
    NotFound {
        /// Listener name queried.
        name: String,
    },

    /// A value failed validation against its compiled schema.
    #[error("payload for '{name}' failed schema validation: {reason}")]
    ValidationFailed {
        /// Listener name the payload was validated against.
        name: String,
        /// Validator error detail.
        reason: String,
    },

    /// The schema cache file could not be written or read.
    #[error("schema cache I/O failed for '{name}': {reason}")]
    Io {
        /// Listener name involved.
        name: String,
        /// I/O error detail.
        reason: String,
    },
}

impl SchemaError {
    /// Map to the shared error taxonomy.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::ValidationFailed { .. } => ErrorCode::PayloadInvalid,
            Self::InvalidSchema { .. } | Self::NotFound { .. } | Self::Io { .. } => {
                ErrorCode::ConfigInvalid
            }
        }
    }
}

/// A compiled, cached schema for one listener's payload type.
pub struct CompiledSchema {
    validator: Validator,
    source: Value,
}

impl CompiledSchema {
    /// Compile `schema_json` into a reusable validator.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidSchema`] if the document does not
    /// compile as a JSON Schema.
    pub fn compile(name: &str, schema_json: Value) -> Result<Self, SchemaError> {
        let validator =
            jsonschema::validator_for(&schema_json).map_err(|e| SchemaError::InvalidSchema {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            validator,
            source: schema_json,
        })
    }

    /// Validate `value` against this schema.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::ValidationFailed`] with the first validation
    /// error encountered.
    pub fn validate(&self, name: &str, value: &Value) -> Result<(), SchemaError> {
        if let Some(first) = self.validator.iter_errors(value).next() {
            return Err(SchemaError::ValidationFailed {
                name: name.to_string(),
                reason: first.to_string(),
            });
        }
        Ok(())
    }

    /// The raw JSON Schema document this was compiled from, surfaced
    /// read-only for introspection callers (the meta handler's schema
    /// and example-payload queries).
    #[must_use]
    pub fn source(&self) -> &Value {
        &self.source
    }
}

/// Cache of compiled payload schemas, keyed by listener name, with an
/// on-disk backing store at `schemas/<name>/v1.xsd`.
pub struct SchemaStore {
    cache_root: PathBuf,
    schemas: HashMap<String, Arc<CompiledSchema>>,
}

impl SchemaStore {
    /// Create an empty store backed by `cache_root`.
    #[must_use]
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            schemas: HashMap::new(),
        }
    }

    /// Returns the persisted path for a listener's schema, per §6.
    #[must_use]
    pub fn persisted_path(&self, name: &str) -> PathBuf {
        self.cache_root.join(name).join("v1.xsd")
    }

    /// Compile and register `schema_json` for `name`, persisting it to
    /// disk, and cache the compiled [`Validator`] in memory.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidSchema`] or [`SchemaError::Io`].
    pub fn register(&mut self, name: &str, schema_json: Value) -> Result<(), SchemaError> {
        let compiled = CompiledSchema::compile(name, schema_json)?;
        let path = self.persisted_path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SchemaError::Io {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        }
        std::fs::write(&path, serde_json::to_vec_pretty(&compiled.source).unwrap_or_default())
            .map_err(|e| SchemaError::Io {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        self.schemas.insert(name.to_string(), Arc::new(compiled));
        Ok(())
    }

    /// Look up the compiled schema for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::NotFound`] if nothing is registered.
    pub fn get(&self, name: &str) -> Result<Arc<CompiledSchema>, SchemaError> {
        self.schemas
            .get(name)
            .cloned()
            .ok_or_else(|| SchemaError::NotFound {
                name: name.to_string(),
            })
    }

    /// Validate `value` against the schema registered for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::NotFound`] or [`SchemaError::ValidationFailed`].
    pub fn validate(&self, name: &str, value: &Value) -> Result<(), SchemaError> {
        self.get(name)?.validate(name, value)
    }

    /// Rehydrate every `v1.xsd` schema cache file found under `cache_root`
    /// into the in-memory store (used on restart, since schemas are the
    /// only thing persisted across process lifetimes per §6).
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Io`] if the cache root cannot be read.
    pub fn rehydrate(&mut self) -> Result<(), SchemaError> {
        let root = self.cache_root.clone();
        if !root.is_dir() {
            return Ok(());
        }
        let entries = std::fs::read_dir(&root).map_err(|e| SchemaError::Io {
            name: "*".to_string(),
            reason: e.to_string(),
        })?;
        for entry in entries.flatten() {
            let name = match entry.file_name().into_string() {
                Ok(n) => n,
                Err(_) => continue,
            };
            let candidate = entry.path().join("v1.xsd");
            if !candidate.is_file() {
                continue;
            }
            let text = std::fs::read_to_string(&candidate).map_err(|e| SchemaError::Io {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            if let Ok(schema_json) = serde_json::from_str::<Value>(&text) {
                let _ = self.register(&name, schema_json);
            }
        }
        Ok(())
    }
}

/// Helper used by `register` for tests and bootstrap code that already
/// have a directory handle rather than a path.
#[must_use]
pub fn cache_root_exists(path: &Path) -> bool {
    path.is_dir()
}

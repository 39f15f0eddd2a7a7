//! Named XML Schema validation backed by a compile-once cache.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::debug;

use crate::cache::ParsedSchemaCache;
use crate::document::Document;
use crate::error::{LibXml2Error, SchemaError, SchemaResult};
use crate::libxml2::{LibXml2Wrapper, ValidationResult, XmlSchemaPtr};

static SCHEMA_NAME_REGEX: OnceLock<Regex> = OnceLock::new();

fn schema_name_regex() -> &'static Regex {
    SCHEMA_NAME_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9_-]{0,63}$").expect("Failed to compile schema name regex")
    })
}

/// Outcome of validating one document: `ok`, or the ordered violations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub ok: bool,
    pub errors: Vec<String>,
}

impl From<ValidationResult> for ValidationReport {
    fn from(result: ValidationResult) -> Self {
        match result {
            ValidationResult::Valid => Self {
                ok: true,
                errors: Vec::new(),
            },
            ValidationResult::Invalid { errors, error_count } => {
                let errors = if errors.is_empty() {
                    vec![format!("{error_count} schema violation(s)")]
                } else {
                    errors
                };
                Self { ok: false, errors }
            }
            ValidationResult::InternalError { code } => Self {
                ok: false,
                errors: vec![format!("validation aborted with code {code}")],
            },
        }
    }
}

/// A compiled schema, shared with the cache
#[derive(Clone, Debug)]
pub struct CompiledSchema {
    name: String,
    schema: Arc<XmlSchemaPtr>,
}

impl CompiledSchema {
    /// Validate `document` without modifying it
    pub fn validate(&self, document: &Document) -> SchemaResult<ValidationReport> {
        let result = LibXml2Wrapper::new().validate_document(&self.schema, document.tree())?;
        let report = ValidationReport::from(result);
        debug!(schema = %self.name, ok = report.ok, "document validated");
        Ok(report)
    }
}

/// Resolves schema names to `<schema_dir>/<name>.xsd` and validates documents
/// against them.
pub struct SchemaValidator {
    schema_dir: PathBuf,
    cache: ParsedSchemaCache,
    libxml2: Arc<LibXml2Wrapper>,
}

impl SchemaValidator {
    pub fn new(schema_dir: impl Into<PathBuf>) -> Self {
        Self {
            schema_dir: schema_dir.into(),
            cache: ParsedSchemaCache::new(),
            libxml2: Arc::new(LibXml2Wrapper::new()),
        }
    }

    /// Absolute path of the schema called `name`
    pub fn schema_path(&self, name: &str) -> SchemaResult<PathBuf> {
        if !schema_name_regex().is_match(name) {
            return Err(SchemaError::UnknownName {
                name: name.to_string(),
            });
        }
        let path = self.schema_dir.join(format!("{name}.xsd"));
        std::path::absolute(&path).map_err(|e| SchemaError::Unreadable {
            name: name.to_string(),
            path,
            details: e.to_string(),
        })
    }

    /// Compiled schema for `name`, compiling it on first use.
    ///
    /// Concurrent first uses share one compilation. Read and compile failures
    /// are reported but not cached.
    pub async fn schema(&self, name: &str) -> SchemaResult<CompiledSchema> {
        let path = self.schema_path(name)?;

        if let Some(schema) = self.cache.get(&path).await {
            debug!(schema = name, "schema cache hit");
            return Ok(CompiledSchema {
                name: name.to_string(),
                schema,
            });
        }

        let wrapper = Arc::clone(&self.libxml2);
        let load_path = path.clone();
        let schema_name = name.to_string();
        let schema = self
            .cache
            .get_or_load(path, || async move {
                let data = tokio::fs::read(&load_path)
                    .await
                    .map_err(|e| SchemaError::Unreadable {
                        name: schema_name.clone(),
                        path: load_path.clone(),
                        details: e.to_string(),
                    })?;

                debug!(schema = %schema_name, path = %load_path.display(), "compiling schema");
                let compiled =
                    tokio::task::spawn_blocking(move || wrapper.parse_schema_from_memory(&data))
                        .await
                        .map_err(|e| SchemaError::Concurrency {
                            details: e.to_string(),
                        })?;

                match compiled {
                    Ok(ptr) => Ok(Arc::new(ptr)),
                    Err(LibXml2Error::SchemaParseFailed { errors }) => Err(SchemaError::Compile {
                        name: schema_name,
                        path: load_path,
                        details: if errors.is_empty() {
                            "schema could not be compiled".to_string()
                        } else {
                            errors.join("; ")
                        },
                    }),
                    Err(other) => Err(SchemaError::Internal(other)),
                }
            })
            .await?;

        Ok(CompiledSchema {
            name: name.to_string(),
            schema,
        })
    }

    /// Validate `document` against the schema called `name`
    pub async fn validate(
        &self,
        document: &Document,
        name: &str,
    ) -> SchemaResult<ValidationReport> {
        let schema = self.schema(name).await?;
        schema.validate(document)
    }

    /// Drop the compiled schema for `name`; the next use recompiles it from disk
    pub async fn invalidate(&self, name: &str) -> SchemaResult<()> {
        let path = self.schema_path(name)?;
        self.cache.invalidate(&path).await;
        debug!(schema = name, "schema invalidated");
        Ok(())
    }

    /// Number of compiled schemas currently cached
    pub async fn cached_count(&self) -> u64 {
        self.cache.entry_count().await
    }
}

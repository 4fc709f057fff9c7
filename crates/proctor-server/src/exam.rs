//! Exam read collaborator.
//!
//! The server never authors exams; it only looks them up by id. The
//! [`ExamCatalog`] trait is the seam, [`StaticCatalog`] the JSON-file backed
//! implementation used by the binary and the tests.

use std::collections::HashMap;
use std::path::Path;

use proctor_model::ExamDefinition;
use tracing::info;

use crate::error::{ProctorError, Result};

/// Read access to exam definitions.
pub trait ExamCatalog: Send + Sync + std::fmt::Debug {
    /// Returns the exam with this id, if any.
    fn exam(&self, exam_id: &str) -> Option<ExamDefinition>;
}

/// An in-memory catalog loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    exams: HashMap<String, ExamDefinition>,
}

impl StaticCatalog {
    /// Builds a catalog from exam definitions, validating each one.
    ///
    /// # Errors
    ///
    /// Returns `ProctorError::ConfigValidationError` for the first malformed
    /// exam or duplicate id.
    pub fn from_exams(exams: impl IntoIterator<Item = ExamDefinition>) -> Result<Self> {
        let mut map = HashMap::new();
        for exam in exams {
            exam.validate().map_err(|e| {
                ProctorError::config_validation(
                    e.to_string(),
                    "Fix the exam definition in the exams file",
                )
            })?;
            if map.contains_key(&exam.exam_id) {
                return Err(ProctorError::config_validation(
                    format!("duplicate exam id '{}'", exam.exam_id),
                    "Give every exam in the exams file a unique examId",
                ));
            }
            map.insert(exam.exam_id.clone(), exam);
        }
        Ok(Self { exams: map })
    }

    /// Loads a JSON array of exam definitions from `path`.
    ///
    /// # Errors
    ///
    /// Returns `ProctorError::CatalogLoadError` if the file cannot be read,
    /// parsed or validated.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProctorError::catalog_load(path, format!("failed to read file: {e}")))?;
        let exams: Vec<ExamDefinition> = serde_json::from_str(&contents)
            .map_err(|e| ProctorError::catalog_load(path, e.to_string()))?;
        let catalog =
            Self::from_exams(exams).map_err(|e| ProctorError::catalog_load(path, e.to_string()))?;

        info!(path = %path.display(), exams = catalog.len(), "Loaded exam catalog");
        Ok(catalog)
    }

    /// Number of exams in the catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exams.len()
    }

    /// Returns `true` if the catalog holds no exams.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exams.is_empty()
    }
}

impl ExamCatalog for StaticCatalog {
    fn exam(&self, exam_id: &str) -> Option<ExamDefinition> {
        self.exams.get(exam_id).cloned()
    }
}

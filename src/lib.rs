//! Shared types for the work manager.
//!
//! Defines the job records read from a job file and the canonical text
//! encoding used for message bodies placed on the work queue.

pub mod encoding;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use encoding::to_canonical_string;

/// One unit of work destined for the work queue.
///
/// A job is any JSON value. Its content is opaque to the work manager and
/// objects keep the field order in which they appeared in the job file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Job(Value);

impl Job {
    /// Look up a field by name. Returns `None` for jobs that are not objects.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Borrow the job's JSON value.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Encode the job as a message body.
    ///
    /// # Errors
    ///
    /// Returns an error if the job cannot be serialised.
    pub fn to_canonical_string(&self) -> Result<String, serde_json::Error> {
        to_canonical_string(self)
    }
}

/// Ordered jobs loaded from a single job file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobBatch(Vec<Job>);

/// On-disk layout of a job file.
#[derive(Deserialize)]
struct JobDocument {
    jobs: Vec<Job>,
}

impl JobBatch {
    /// Parse a job document of the form `{"jobs": [ ... ]}`.
    ///
    /// Unknown top-level fields are ignored. Entries in `jobs` may be any JSON
    /// value. The input must be UTF-8.
    ///
    /// # Errors
    ///
    /// Returns an error when the input is not valid JSON or when the `jobs`
    /// field is missing or not an array.
    ///
    /// # Examples
    ///
    /// ```
    /// use workmgr_lib::JobBatch;
    ///
    /// let batch = JobBatch::from_document(br#"{"jobs":[{"id":1},{"id":2}]}"#)
    ///     .expect("valid job document");
    /// assert_eq!(batch.len(), 2);
    /// ```
    pub fn from_document(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let doc: JobDocument = serde_json::from_slice(bytes)?;
        Ok(Self(doc.jobs))
    }

    /// Number of jobs in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the batch holds no jobs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the jobs in file order.
    pub fn iter(&self) -> std::slice::Iter<'_, Job> {
        self.0.iter()
    }
}

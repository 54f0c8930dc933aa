//! Job specs and recorded job errors.

use crate::{JobId, SpecErrorId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of job, used to pick the delegate that builds its services.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobType(String);

impl JobType {
    /// Jobs whose pipeline runs on a fixed interval.
    pub const INTERVAL: &'static str = "interval";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn interval() -> Self {
        Self::new(Self::INTERVAL)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobType {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A job as submitted, before the store assigns it an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    /// Optional human-readable name.
    #[serde(default)]
    pub name: Option<String>,

    /// Job type; selects the delegate.
    #[serde(rename = "type")]
    pub job_type: JobType,

    /// Task graph source text.
    pub pipeline_spec: String,

    /// Job-type-specific configuration.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl NewJob {
    /// Create a new job of the given type running the given graph source.
    pub fn new(job_type: JobType, pipeline_spec: impl Into<String>) -> Self {
        Self {
            name: None,
            job_type,
            pipeline_spec: pipeline_spec.into(),
            config: serde_json::Value::Null,
        }
    }

    /// Builder method to set the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder method to set the job-type configuration.
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

/// A durable job record: task graph source plus job-type configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: JobId,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub pipeline_spec: String,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl JobSpec {
    /// Materialize a submitted job with its store-assigned id.
    pub fn from_new(id: JobId, job: NewJob) -> Self {
        Self {
            id,
            name: job.name,
            job_type: job.job_type,
            pipeline_spec: job.pipeline_spec,
            config: job.config,
            created_at: Utc::now(),
        }
    }

    /// Name for logs: the configured name, or the id.
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| format!("job-{}", self.id))
    }
}

/// A recurring job failure, deduplicated by description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecError {
    pub id: SpecErrorId,
    pub job_id: JobId,
    pub description: String,
    pub occurrences: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SpecError {
    /// First occurrence of an error.
    pub fn new(id: SpecErrorId, job_id: JobId, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            job_id,
            description: description.into(),
            occurrences: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a repeat occurrence.
    pub fn bump(&mut self) {
        self.occurrences = self.occurrences.saturating_add(1);
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_deserialize() {
        let json = r#"{"type": "interval", "pipeline_spec": "a [type=http url=\"https://x\"];", "config": {"interval_secs": 5}}"#;
        let job: NewJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.job_type, JobType::interval());
        assert_eq!(job.config["interval_secs"], 5);
        assert!(job.name.is_none());
    }

    #[test]
    fn test_spec_error_bump() {
        let mut err = SpecError::new(SpecErrorId::new(1), JobId::new(2), "boom");
        err.bump();
        err.bump();
        assert_eq!(err.occurrences, 3);
        assert!(err.updated_at >= err.created_at);
    }
}

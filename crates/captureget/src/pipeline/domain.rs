use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

identifier!(
    /// Identifier of a hiring company; also the subject of company bearer tokens.
    CompanyId
);
identifier!(
    /// Identifier of a candidate; also the subject of user bearer tokens.
    CandidateId
);
identifier!(JobId);
identifier!(ApplicationId);
identifier!(
    /// Stable identifier of one interview step within an application.
    StepId
);
identifier!(
    /// Join key between a definition and the values stored on applications.
    CustomFieldId
);
identifier!(ArchiveId);

/// Hiring company profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Candidate profile. The profile CV is the fallback for applications without an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub id: CandidateId,
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    pub last_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cv_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const DEFAULT_SALARY_RANGE: &str = "Negotiable";

/// Job posting owned by exactly one company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub company_id: CompanyId,
    pub title: String,
    pub description: String,
    pub requirements: String,
    pub location: String,
    pub salary_range: String,
    pub how_to_apply: String,
    /// Anonymized display: the job board blurs company details when set.
    pub blurry: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Pipeline status of an application. Any status may follow any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    InProgress,
    Qualified,
    NotQualified,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 4] = [
        ApplicationStatus::Pending,
        ApplicationStatus::InProgress,
        ApplicationStatus::Qualified,
        ApplicationStatus::NotQualified,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::InProgress => "in_progress",
            ApplicationStatus::Qualified => "qualified",
            ApplicationStatus::NotQualified => "not_qualified",
        }
    }
}

impl Default for ApplicationStatus {
    fn default() -> Self {
        ApplicationStatus::Pending
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown application status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for ApplicationStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ApplicationStatus::ALL
            .into_iter()
            .find(|status| status.label() == value)
            .ok_or_else(|| UnknownStatus(value.to_string()))
    }
}

/// Outcome recorded for one interview step. `Unset` serializes as the empty string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepResult {
    #[default]
    #[serde(rename = "")]
    Unset,
    #[serde(rename = "GO")]
    Go,
    #[serde(rename = "NO_GO")]
    NoGo,
    #[serde(rename = "STILL")]
    Still,
}

impl StepResult {
    pub const fn label(self) -> &'static str {
        match self {
            StepResult::Unset => "",
            StepResult::Go => "GO",
            StepResult::NoGo => "NO_GO",
            StepResult::Still => "STILL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterviewStep {
    pub id: StepId,
    pub name: String,
    pub result: StepResult,
    pub comment: String,
}

impl InterviewStep {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: StepId::generate(),
            name: name.into(),
            result: StepResult::Unset,
            comment: String::new(),
        }
    }

    /// Step names are compared trimmed and case-insensitively.
    pub fn has_name(&self, name: &str) -> bool {
        self.name.trim().to_lowercase() == name.trim().to_lowercase()
    }
}

/// Declared type of a company-defined attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Date,
    Select,
}

impl FieldType {
    pub const fn label(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Date => "date",
            FieldType::Select => "select",
        }
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "text" => Ok(FieldType::Text),
            "number" => Ok(FieldType::Number),
            "date" => Ok(FieldType::Date),
            "select" => Ok(FieldType::Select),
            other => Err(format!("unknown custom field type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomFieldDefinition {
    pub id: CustomFieldId,
    pub company_id: CompanyId,
    pub name: String,
    pub field_type: FieldType,
    /// Allowed values, in display order. Empty unless the type is `select`.
    #[serde(default)]
    pub options: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Typed value stored under a custom field id on an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CustomFieldValue {
    Text(String),
    Number(f64),
    Date(NaiveDate),
    Selection(String),
}

pub type CustomFieldValues = BTreeMap<CustomFieldId, CustomFieldValue>;

/// A candidate's application to one job, tracked through the company pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: ApplicationId,
    pub candidate_id: CandidateId,
    pub job_id: JobId,
    pub message: String,
    pub cv_url: Option<String>,
    /// Set when the CV was uploaded with this application rather than taken from the profile.
    pub cv_uploaded: bool,
    pub status: ApplicationStatus,
    pub steps: Vec<InterviewStep>,
    pub custom_fields: CustomFieldValues,
    /// Incremented on every write; stores reject updates carrying a stale revision.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    pub fn step_mut(&mut self, step_id: &StepId) -> Option<&mut InterviewStep> {
        self.steps.iter_mut().find(|step| &step.id == step_id)
    }

    /// Blob URL that belongs to this application alone and must go when it does.
    pub fn owned_upload(&self) -> Option<&str> {
        if self.cv_uploaded {
            self.cv_url.as_deref()
        } else {
            None
        }
    }
}

/// Per-status application counts for one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub in_progress: u64,
    pub qualified: u64,
    pub not_qualified: u64,
}

impl StatusCounts {
    pub fn tally<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = ApplicationStatus>,
    {
        let mut counts = Self::default();
        for status in statuses {
            counts.add(status, 1);
        }
        counts
    }

    pub fn add(&mut self, status: ApplicationStatus, count: u64) {
        match status {
            ApplicationStatus::Pending => self.pending += count,
            ApplicationStatus::InProgress => self.in_progress += count,
            ApplicationStatus::Qualified => self.qualified += count,
            ApplicationStatus::NotQualified => self.not_qualified += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.in_progress + self.qualified + self.not_qualified
    }
}

/// Snapshot of a deleted job's pipeline. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatsArchive {
    pub id: ArchiveId,
    pub job_title: String,
    pub company_id: CompanyId,
    pub location: String,
    pub salary_range: String,
    pub total_applications: u64,
    pub pending: u64,
    #[serde(rename = "in_progress")]
    pub in_progress: u64,
    pub qualified: u64,
    #[serde(rename = "not_qualified")]
    pub not_qualified: u64,
    pub deleted_at: DateTime<Utc>,
}

impl JobStatsArchive {
    pub fn capture(job: &Job, counts: StatusCounts, deleted_at: DateTime<Utc>) -> Self {
        Self {
            id: ArchiveId::generate(),
            job_title: job.title.clone(),
            company_id: job.company_id.clone(),
            location: job.location.clone(),
            salary_range: job.salary_range.clone(),
            total_applications: counts.total(),
            pending: counts.pending,
            in_progress: counts.in_progress,
            qualified: counts.qualified,
            not_qualified: counts.not_qualified,
            deleted_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_round_trip_through_from_str() {
        for status in ApplicationStatus::ALL {
            assert_eq!(status.label().parse::<ApplicationStatus>(), Ok(status));
        }
        assert!("hired".parse::<ApplicationStatus>().is_err());
    }

    #[test]
    fn step_results_serialize_to_wire_labels() {
        let encoded = serde_json::to_string(&[
            StepResult::Unset,
            StepResult::Go,
            StepResult::NoGo,
            StepResult::Still,
        ])
        .expect("serializes");
        assert_eq!(encoded, r#"["","GO","NO_GO","STILL"]"#);

        let parsed: Result<StepResult, _> = serde_json::from_str(r#""MAYBE""#);
        assert!(parsed.is_err());
    }

    #[test]
    fn tally_defaults_missing_statuses_to_zero() {
        let counts = StatusCounts::tally([
            ApplicationStatus::Pending,
            ApplicationStatus::Pending,
            ApplicationStatus::Qualified,
        ]);
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.in_progress, 0);
        assert_eq!(counts.qualified, 1);
        assert_eq!(counts.not_qualified, 0);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn step_names_match_ignoring_case_and_padding() {
        let step = InterviewStep::named("Phone Screen");
        assert!(step.has_name("  phone screen "));
        assert!(!step.has_name("Onsite"));
    }
}

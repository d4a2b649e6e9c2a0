//! Request payloads accepted by the pipeline, with their shape validation.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::blob::BlobUpload;
use super::domain::{
    ApplicationStatus, CompanyId, FieldType, JobId, StepResult, DEFAULT_SALARY_RANGE,
};

pub const MAX_MESSAGE_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct InvalidInput(pub String);

fn require(condition: bool, message: &str) -> Result<(), InvalidInput> {
    if condition {
        Ok(())
    } else {
        Err(InvalidInput(message.to_string()))
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyProfileInput {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub logo: Option<String>,
}

impl CompanyProfileInput {
    pub fn validate(&self) -> Result<(), InvalidInput> {
        let name = self.name.trim().chars().count();
        require((2..=100).contains(&name), "name must be 2 to 100 characters")?;
        require(self.email.contains('@'), "email must be a valid address")
    }

    pub fn logo(&self) -> Option<String> {
        non_blank(&self.logo)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateProfileInput {
    pub first_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub cv_url: Option<String>,
}

impl CandidateProfileInput {
    pub fn validate(&self) -> Result<(), InvalidInput> {
        require(!self.first_name.trim().is_empty(), "firstName is required")?;
        require(!self.last_name.trim().is_empty(), "lastName is required")?;
        require(self.email.contains('@'), "email must be a valid address")
    }

    pub fn middle_name(&self) -> Option<String> {
        non_blank(&self.middle_name)
    }

    pub fn cv_url(&self) -> Option<String> {
        non_blank(&self.cv_url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDraft {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub requirements: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub salary_range: Option<String>,
    #[serde(default)]
    pub how_to_apply: String,
    #[serde(default)]
    pub blurry: Option<bool>,
}

impl JobDraft {
    pub fn validate(&self) -> Result<(), InvalidInput> {
        validate_job_text(&self.title, &self.description)
    }

    pub fn salary_range(&self) -> String {
        non_blank(&self.salary_range).unwrap_or_else(|| DEFAULT_SALARY_RANGE.to_string())
    }
}

fn validate_job_text(title: &str, description: &str) -> Result<(), InvalidInput> {
    let title = title.trim().chars().count();
    require((2..=200).contains(&title), "title must be 2 to 200 characters")?;
    require(
        description.trim().chars().count() >= 10,
        "description must be at least 10 characters",
    )
}

/// Partial job update; absent fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub requirements: Option<String>,
    pub location: Option<String>,
    pub salary_range: Option<String>,
    pub how_to_apply: Option<String>,
    pub blurry: Option<bool>,
}

impl JobPatch {
    pub fn apply(self, job: &mut super::domain::Job) -> Result<(), InvalidInput> {
        if let Some(title) = self.title {
            job.title = title.trim().to_string();
        }
        if let Some(description) = self.description {
            job.description = description;
        }
        if let Some(requirements) = self.requirements {
            job.requirements = requirements;
        }
        if let Some(location) = self.location {
            job.location = location;
        }
        if let Some(salary_range) = self.salary_range {
            job.salary_range = non_blank(&Some(salary_range))
                .unwrap_or_else(|| DEFAULT_SALARY_RANGE.to_string());
        }
        if let Some(how_to_apply) = self.how_to_apply {
            job.how_to_apply = how_to_apply;
        }
        if let Some(blurry) = self.blurry {
            job.blurry = blurry;
        }
        validate_job_text(&job.title, &job.description)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomFieldDraft {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub options: Vec<String>,
}

impl CustomFieldDraft {
    /// Validate and normalise: options are trimmed, blanks dropped, and only kept for
    /// `select` fields, which need at least one.
    pub fn normalized(self) -> Result<Self, InvalidInput> {
        let name = self.name.trim().to_string();
        require(!name.is_empty(), "custom field name is required")?;

        let options = match self.field_type {
            FieldType::Select => {
                let mut options: Vec<String> = Vec::new();
                for option in self.options {
                    let option = option.trim().to_string();
                    if !option.is_empty() && !options.contains(&option) {
                        options.push(option);
                    }
                }
                require(!options.is_empty(), "select fields need at least one option")?;
                options
            }
            FieldType::Text | FieldType::Number | FieldType::Date => Vec::new(),
        };

        Ok(Self {
            name,
            field_type: self.field_type,
            options,
        })
    }
}

/// A candidate's application as received, CV file included when one was attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationSubmission {
    pub job_id: JobId,
    pub message: String,
    pub cv: Option<BlobUpload>,
}

impl ApplicationSubmission {
    pub fn validate(&self) -> Result<(), InvalidInput> {
        require(!self.job_id.as_str().trim().is_empty(), "jobId is required")?;
        require(
            self.message.chars().count() <= MAX_MESSAGE_CHARS,
            "message must be at most 500 characters",
        )
    }
}

/// JSON form of a submission (no CV file).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionBody {
    pub job_id: JobId,
    #[serde(default)]
    pub message: String,
}

impl From<SubmissionBody> for ApplicationSubmission {
    fn from(body: SubmissionBody) -> Self {
        Self {
            job_id: body.job_id,
            message: body.message,
            cv: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct StatusChange {
    pub status: ApplicationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StepDraft {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StepUpdate {
    pub result: StepResult,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomFieldValuesInput {
    pub custom_fields: BTreeMap<String, Value>,
}

/// Optional narrowing of the company application listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyApplicationQuery {
    pub job_id: Option<JobId>,
    pub status: Option<ApplicationStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveQuery {
    pub company_id: Option<CompanyId>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Bound {
    Start,
    End,
}

/// Parse a `YYYY-MM-DD` or RFC 3339 bound. `Start` is inclusive. `End` is returned as an
/// exclusive limit: midnight after a plain date, or just past an explicit instant.
pub(crate) fn parse_bound(raw: &str, bound: Bound) -> Result<DateTime<Utc>, InvalidInput> {
    let raw = raw.trim();
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        let timestamp = timestamp.with_timezone(&Utc);
        return Ok(match bound {
            Bound::Start => timestamp,
            Bound::End => timestamp + Duration::nanoseconds(1),
        });
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| InvalidInput(format!("'{raw}' is not a valid date")))?;
    let day = match bound {
        Bound::Start => date,
        Bound::End => date
            .succ_opt()
            .ok_or_else(|| InvalidInput(format!("'{raw}' is out of range")))?,
    };
    Ok(day.and_time(NaiveTime::MIN).and_utc())
}

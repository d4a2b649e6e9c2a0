use chrono::{DateTime, Utc};
use serde::Serialize;

use super::custom_fields::{project, ProjectedField};
use super::domain::{
    Application, ApplicationId, ApplicationStatus, Candidate, CandidateId, CompanyId,
    CustomFieldDefinition, InterviewStep, Job, JobId,
};
use crate::pagination::Page;

/// Job display data joined onto application listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: JobId,
    pub company_id: CompanyId,
    pub title: String,
    pub location: String,
    pub salary_range: String,
    pub blurry: bool,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            company_id: job.company_id.clone(),
            title: job.title.clone(),
            location: job.location.clone(),
            salary_range: job.salary_range.clone(),
            blurry: job.blurry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSummary {
    pub id: CandidateId,
    pub first_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    pub last_name: String,
    pub email: String,
}

impl From<&Candidate> for CandidateSummary {
    fn from(candidate: &Candidate) -> Self {
        Self {
            id: candidate.id.clone(),
            first_name: candidate.first_name.clone(),
            middle_name: candidate.middle_name.clone(),
            last_name: candidate.last_name.clone(),
            email: candidate.email.clone(),
        }
    }
}

/// What a candidate sees of their own application. Steps and custom values stay with the
/// company.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateApplicationView {
    pub id: ApplicationId,
    pub job_id: JobId,
    pub job: Option<JobSummary>,
    pub message: String,
    pub cv_url: Option<String>,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CandidateApplicationView {
    pub fn new(application: Application, job: Option<&Job>) -> Self {
        Self {
            id: application.id,
            job_id: application.job_id,
            job: job.map(JobSummary::from),
            message: application.message,
            cv_url: application.cv_url,
            status: application.status,
            created_at: application.created_at,
            updated_at: application.updated_at,
        }
    }
}

/// Company pipeline view: candidate data plus every custom field definition joined with
/// this application's value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyApplicationView {
    pub id: ApplicationId,
    pub job_id: JobId,
    pub job: Option<JobSummary>,
    pub candidate: Option<CandidateSummary>,
    pub message: String,
    pub cv_url: Option<String>,
    pub status: ApplicationStatus,
    pub steps: Vec<InterviewStep>,
    pub custom_fields: Vec<ProjectedField>,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CompanyApplicationView {
    pub fn new(
        application: Application,
        job: Option<&Job>,
        candidate: Option<&Candidate>,
        definitions: &[CustomFieldDefinition],
    ) -> Self {
        let custom_fields = project(definitions, &application.custom_fields);
        Self {
            id: application.id,
            job_id: application.job_id,
            job: job.map(JobSummary::from),
            candidate: candidate.map(CandidateSummary::from),
            message: application.message,
            cv_url: application.cv_url,
            status: application.status,
            steps: application.steps,
            custom_fields,
            revision: application.revision,
            created_at: application.created_at,
            updated_at: application.updated_at,
        }
    }
}

/// Company listing: the page plus the definitions used for the projection, so clients can
/// render columns even when the page is empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyApplicationsPage {
    #[serde(flatten)]
    pub page: Page<CompanyApplicationView>,
    pub custom_fields: Vec<CustomFieldDefinition>,
}

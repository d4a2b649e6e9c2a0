//! Recruitment pipeline: jobs, candidate applications, interview steps, company-defined
//! custom fields, and the statistics archived when a job is deleted.

pub mod blob;
pub mod custom_fields;
pub mod domain;
pub mod repository;
pub mod requests;
mod router;
mod service;
pub mod views;

pub use blob::{
    BlobError, BlobStore, BlobUpload, DiskBlobStore, MemoryBlobStore, StoredBlob, CV_FOLDER,
};
pub use custom_fields::{CustomFieldError, CustomFieldPatch, ProjectedField};
pub use domain::{
    Application, ApplicationId, ApplicationStatus, Candidate, CandidateId, Company, CompanyId,
    CustomFieldDefinition, CustomFieldId, CustomFieldValue, FieldType, InterviewStep, Job, JobId,
    JobStatsArchive, StatusCounts, StepId, StepResult,
};
pub use repository::{PipelineStore, RepositoryError};
pub use requests::InvalidInput;
pub use router::{pipeline_router, PipelineState};
pub use service::{PipelineError, PipelineService, PipelineSettings, DEFAULT_MAX_UPLOAD_BYTES};
pub use views::{CandidateApplicationView, CompanyApplicationView, CompanyApplicationsPage};

#[cfg(test)]
mod tests;

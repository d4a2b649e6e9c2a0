use chrono::{DateTime, Utc};

use super::domain::{
    Application, ApplicationId, ApplicationStatus, Candidate, CandidateId, Company, CompanyId,
    CustomFieldDefinition, CustomFieldId, Job, JobId, JobStatsArchive,
};
use crate::pagination::PageRequest;

/// One page worth of records plus the unpaginated total.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice<T> {
    pub items: Vec<T>,
    pub total: u64,
}

impl<T> Slice<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
        }
    }

    /// Cut a page out of an already filtered, ordered collection.
    pub fn paginate(records: Vec<T>, page: &PageRequest) -> Self {
        let total = records.len() as u64;
        let items = records
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect();
        Self { items, total }
    }
}

/// Filter for the company-facing application listing. `job_ids` is always the caller's
/// owned set, narrowed further by the optional job filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplicationFilter {
    pub job_ids: Vec<JobId>,
    pub status: Option<ApplicationStatus>,
}

impl ApplicationFilter {
    pub fn matches(&self, application: &Application) -> bool {
        self.job_ids.contains(&application.job_id)
            && self
                .status
                .map_or(true, |status| application.status == status)
    }
}

/// Filter for archived job statistics: `deleted_from <= deleted_at < deleted_before`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveFilter {
    pub company_id: CompanyId,
    pub deleted_from: Option<DateTime<Utc>>,
    pub deleted_before: Option<DateTime<Utc>>,
}

impl ArchiveFilter {
    pub fn matches(&self, archive: &JobStatsArchive) -> bool {
        archive.company_id == self.company_id
            && self
                .deleted_from
                .map_or(true, |from| archive.deleted_at >= from)
            && self
                .deleted_before
                .map_or(true, |before| archive.deleted_at < before)
    }
}

/// Result of the atomic archive-then-cascade job removal.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRemoval {
    pub archive: JobStatsArchive,
    /// CV blobs uploaded with the cascaded applications; cleaned up after commit.
    pub orphaned_uploads: Vec<UploadRef>,
}

/// A blob URL together with the candidate whose application carried it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRef {
    pub candidate_id: CandidateId,
    pub url: String,
}

pub trait CompanyRepository: Send + Sync {
    fn upsert_company(&self, company: Company) -> Result<Company, RepositoryError>;
    fn fetch_company(&self, id: &CompanyId) -> Result<Option<Company>, RepositoryError>;
}

pub trait CandidateRepository: Send + Sync {
    fn upsert_candidate(&self, candidate: Candidate) -> Result<Candidate, RepositoryError>;
    fn fetch_candidate(&self, id: &CandidateId) -> Result<Option<Candidate>, RepositoryError>;
}

pub trait JobRepository: Send + Sync {
    fn insert_job(&self, job: Job) -> Result<Job, RepositoryError>;
    fn update_job(&self, job: Job) -> Result<(), RepositoryError>;
    fn fetch_job(&self, id: &JobId) -> Result<Option<Job>, RepositoryError>;
    fn list_jobs(&self, page: &PageRequest) -> Result<Slice<Job>, RepositoryError>;
    fn job_ids_for_company(&self, company_id: &CompanyId) -> Result<Vec<JobId>, RepositoryError>;

    /// Archive and delete a job with all of its applications as one atomic unit.
    ///
    /// Returns `Ok(None)` when the job does not exist or belongs to another company. On any
    /// error nothing has been written or removed.
    fn remove_job_with_archive(
        &self,
        job_id: &JobId,
        company_id: &CompanyId,
        deleted_at: DateTime<Utc>,
    ) -> Result<Option<JobRemoval>, RepositoryError>;
}

pub trait CustomFieldRepository: Send + Sync {
    fn insert_custom_field(
        &self,
        definition: CustomFieldDefinition,
    ) -> Result<CustomFieldDefinition, RepositoryError>;
    fn custom_fields_for_company(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<CustomFieldDefinition>, RepositoryError>;

    /// Delete a definition and clear its values from the company's applications.
    /// Returns `false` when no definition with that id is owned by `company_id`.
    fn remove_custom_field(
        &self,
        company_id: &CompanyId,
        id: &CustomFieldId,
    ) -> Result<bool, RepositoryError>;
}

/// Storage abstraction for applications.
pub trait ApplicationRepository: Send + Sync {
    fn insert_application(&self, application: Application)
        -> Result<Application, RepositoryError>;

    /// Persist `application` if the stored revision still equals `application.revision`,
    /// bumping the revision. Custom values without a definition owned by the job's company
    /// are dropped. Returns the stored record.
    fn update_application(&self, application: Application)
        -> Result<Application, RepositoryError>;
    fn fetch_application(&self, id: &ApplicationId)
        -> Result<Option<Application>, RepositoryError>;
    fn remove_application(&self, id: &ApplicationId) -> Result<bool, RepositoryError>;
    fn applications_for_candidate(
        &self,
        candidate_id: &CandidateId,
        page: &PageRequest,
    ) -> Result<Slice<Application>, RepositoryError>;
    fn applications_matching(
        &self,
        filter: &ApplicationFilter,
        page: &PageRequest,
    ) -> Result<Slice<Application>, RepositoryError>;
}

/// Read access to job archives. There is deliberately no update or delete.
pub trait ArchiveRepository: Send + Sync {
    fn archives_matching(
        &self,
        filter: &ArchiveFilter,
        page: &PageRequest,
    ) -> Result<Slice<JobStatsArchive>, RepositoryError>;
}

/// Everything the pipeline service needs from a storage backend.
pub trait PipelineStore:
    CompanyRepository
    + CandidateRepository
    + JobRepository
    + CustomFieldRepository
    + ApplicationRepository
    + ArchiveRepository
{
}

impl<T> PipelineStore for T where
    T: CompanyRepository
        + CandidateRepository
        + JobRepository
        + CustomFieldRepository
        + ApplicationRepository
        + ArchiveRepository
{
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("record was modified concurrently")]
    StaleRevision,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
}

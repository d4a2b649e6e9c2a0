use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::identity::{Role, TokenKeys};
use crate::pagination::PageRequest;
use crate::pipeline::blob::{BlobError, BlobStore, BlobUpload, MemoryBlobStore, StoredBlob};
use crate::pipeline::domain::{
    Application, ApplicationId, Candidate, CandidateId, Company, CompanyId, CustomFieldDefinition,
    CustomFieldId, Job, JobId, JobStatsArchive,
};
use crate::pipeline::repository::{
    ApplicationFilter, ApplicationRepository, ArchiveFilter, ArchiveRepository,
    CandidateRepository, CompanyRepository, CustomFieldRepository, JobRemoval, JobRepository,
    RepositoryError, Slice,
};
use crate::pipeline::requests::{
    ApplicationSubmission, CandidateProfileInput, CompanyProfileInput, JobDraft,
};
use crate::pipeline::{pipeline_router, PipelineService, PipelineSettings, PipelineState};
use crate::storage::MemoryStore;

pub(super) const TOKEN_SECRET: &str = "pipeline-test-secret";

pub(super) type MemoryService = PipelineService<MemoryStore, MemoryBlobStore>;

pub(super) struct Harness {
    pub service: Arc<MemoryService>,
    pub store: MemoryStore,
    pub blobs: MemoryBlobStore,
}

pub(super) fn build_service() -> Harness {
    let store = MemoryStore::new();
    let blobs = MemoryBlobStore::default();
    let service = Arc::new(PipelineService::new(
        Arc::new(store.clone()),
        Arc::new(blobs.clone()),
        PipelineSettings::default(),
    ));
    Harness {
        service,
        store,
        blobs,
    }
}

pub(super) fn company_profile(name: &str) -> CompanyProfileInput {
    CompanyProfileInput {
        name: name.to_string(),
        email: format!("talent@{}.example", name.to_lowercase()),
        logo: None,
    }
}

pub(super) fn candidate_profile(cv_url: Option<&str>) -> CandidateProfileInput {
    CandidateProfileInput {
        first_name: "Grace".to_string(),
        middle_name: Some("Brewster".to_string()),
        last_name: "Hopper".to_string(),
        email: "grace@mail.example".to_string(),
        cv_url: cv_url.map(str::to_string),
    }
}

pub(super) fn job_draft(title: &str) -> JobDraft {
    JobDraft {
        title: title.to_string(),
        description: "Own the hiring pipeline end to end".to_string(),
        requirements: "Rust, SQL".to_string(),
        location: "Lagos".to_string(),
        salary_range: None,
        how_to_apply: "Send a CV".to_string(),
        blurry: Some(false),
    }
}

/// Registers a company profile and posts one job for it.
pub(super) fn seed_company_with_job<S, B>(
    service: &PipelineService<S, B>,
    company: &str,
    title: &str,
) -> (CompanyId, Job)
where
    S: crate::pipeline::PipelineStore + 'static,
    B: BlobStore + 'static,
{
    let company_id = CompanyId::from(company);
    service
        .upsert_company_profile(&company_id, company_profile(company))
        .expect("company profile saved");
    let job = service
        .create_job(&company_id, job_draft(title))
        .expect("job created");
    (company_id, job)
}

pub(super) fn seed_candidate<S, B>(
    service: &PipelineService<S, B>,
    candidate: &str,
    cv_url: Option<&str>,
) -> CandidateId
where
    S: crate::pipeline::PipelineStore + 'static,
    B: BlobStore + 'static,
{
    let candidate_id = CandidateId::from(candidate);
    service
        .upsert_candidate_profile(&candidate_id, candidate_profile(cv_url))
        .expect("candidate profile saved");
    candidate_id
}

pub(super) fn plain_submission(job_id: &JobId) -> ApplicationSubmission {
    ApplicationSubmission {
        job_id: job_id.clone(),
        message: "I would love to join the team".to_string(),
        cv: None,
    }
}

pub(super) fn cv_submission(job_id: &JobId, file_name: &str) -> ApplicationSubmission {
    ApplicationSubmission {
        cv: Some(BlobUpload {
            file_name: file_name.to_string(),
            bytes: b"%PDF-1.7 resume".to_vec(),
        }),
        ..plain_submission(job_id)
    }
}

pub(super) fn tokens() -> TokenKeys {
    TokenKeys::new(TOKEN_SECRET)
}

pub(super) fn bearer(subject: &str, role: Role) -> String {
    let token = tokens()
        .issue(subject, role, Duration::hours(1))
        .expect("token issued");
    format!("Bearer {token}")
}

pub(super) fn router_for(service: Arc<MemoryService>) -> Router {
    pipeline_router(PipelineState {
        service,
        tokens: tokens(),
    })
}

pub(super) fn json_request(
    method: &str,
    uri: &str,
    auth: Option<&str>,
    body: Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json");
    if let Some(auth) = auth {
        builder = builder.header(AUTHORIZATION, auth);
    }
    builder
        .body(Body::from(serde_json::to_vec(&body).expect("body serializes")))
        .expect("request builds")
}

pub(super) fn empty_request(method: &str, uri: &str, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(AUTHORIZATION, auth);
    }
    builder.body(Body::empty()).expect("request builds")
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    serde_json::from_slice(&bytes).expect("valid json")
}

/// Blob store whose uploads always fail.
#[derive(Default)]
pub(super) struct OfflineBlobStore;

impl BlobStore for OfflineBlobStore {
    fn upload(&self, _folder: &str, _upload: BlobUpload) -> Result<StoredBlob, BlobError> {
        Err(BlobError::Unavailable("bucket unreachable".to_string()))
    }

    fn delete(&self, url: &str) -> Result<(), BlobError> {
        Err(BlobError::NotFound(url.to_string()))
    }
}

/// Memory store where another writer sneaks in ahead of the next `interference` writes.
#[derive(Default)]
pub(super) struct ContendedStore {
    pub inner: MemoryStore,
    interference: AtomicUsize,
    doomed_field: Mutex<Option<(CompanyId, CustomFieldId)>>,
}

impl ContendedStore {
    pub fn interfere(&self, writes: usize) {
        self.interference.store(writes, Ordering::SeqCst);
    }

    /// Delete a definition between the caller's read and its next application write.
    pub fn remove_field_before_next_write(&self, company_id: &CompanyId, id: &CustomFieldId) {
        *self.doomed_field.lock().expect("field slot") = Some((company_id.clone(), id.clone()));
    }
}

impl CompanyRepository for ContendedStore {
    fn upsert_company(&self, company: Company) -> Result<Company, RepositoryError> {
        self.inner.upsert_company(company)
    }

    fn fetch_company(&self, id: &CompanyId) -> Result<Option<Company>, RepositoryError> {
        self.inner.fetch_company(id)
    }
}

impl CandidateRepository for ContendedStore {
    fn upsert_candidate(&self, candidate: Candidate) -> Result<Candidate, RepositoryError> {
        self.inner.upsert_candidate(candidate)
    }

    fn fetch_candidate(&self, id: &CandidateId) -> Result<Option<Candidate>, RepositoryError> {
        self.inner.fetch_candidate(id)
    }
}

impl JobRepository for ContendedStore {
    fn insert_job(&self, job: Job) -> Result<Job, RepositoryError> {
        self.inner.insert_job(job)
    }

    fn update_job(&self, job: Job) -> Result<(), RepositoryError> {
        self.inner.update_job(job)
    }

    fn fetch_job(&self, id: &JobId) -> Result<Option<Job>, RepositoryError> {
        self.inner.fetch_job(id)
    }

    fn list_jobs(&self, page: &PageRequest) -> Result<Slice<Job>, RepositoryError> {
        self.inner.list_jobs(page)
    }

    fn job_ids_for_company(&self, company_id: &CompanyId) -> Result<Vec<JobId>, RepositoryError> {
        self.inner.job_ids_for_company(company_id)
    }

    fn remove_job_with_archive(
        &self,
        job_id: &JobId,
        company_id: &CompanyId,
        deleted_at: DateTime<Utc>,
    ) -> Result<Option<JobRemoval>, RepositoryError> {
        self.inner
            .remove_job_with_archive(job_id, company_id, deleted_at)
    }
}

impl CustomFieldRepository for ContendedStore {
    fn insert_custom_field(
        &self,
        definition: CustomFieldDefinition,
    ) -> Result<CustomFieldDefinition, RepositoryError> {
        self.inner.insert_custom_field(definition)
    }

    fn custom_fields_for_company(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<CustomFieldDefinition>, RepositoryError> {
        self.inner.custom_fields_for_company(company_id)
    }

    fn remove_custom_field(
        &self,
        company_id: &CompanyId,
        id: &CustomFieldId,
    ) -> Result<bool, RepositoryError> {
        self.inner.remove_custom_field(company_id, id)
    }
}

impl ApplicationRepository for ContendedStore {
    fn insert_application(
        &self,
        application: Application,
    ) -> Result<Application, RepositoryError> {
        self.inner.insert_application(application)
    }

    fn update_application(
        &self,
        application: Application,
    ) -> Result<Application, RepositoryError> {
        let doomed = self.doomed_field.lock().expect("field slot").take();
        if let Some((company_id, id)) = doomed {
            self.inner.remove_custom_field(&company_id, &id)?;
        }
        let pending = self.interference.load(Ordering::SeqCst);
        if pending > 0 {
            self.interference.store(pending - 1, Ordering::SeqCst);
            if let Some(current) = self.inner.fetch_application(&application.id)? {
                self.inner.update_application(current)?;
            }
        }
        self.inner.update_application(application)
    }

    fn fetch_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Option<Application>, RepositoryError> {
        self.inner.fetch_application(id)
    }

    fn remove_application(&self, id: &ApplicationId) -> Result<bool, RepositoryError> {
        self.inner.remove_application(id)
    }

    fn applications_for_candidate(
        &self,
        candidate_id: &CandidateId,
        page: &PageRequest,
    ) -> Result<Slice<Application>, RepositoryError> {
        self.inner.applications_for_candidate(candidate_id, page)
    }

    fn applications_matching(
        &self,
        filter: &ApplicationFilter,
        page: &PageRequest,
    ) -> Result<Slice<Application>, RepositoryError> {
        self.inner.applications_matching(filter, page)
    }
}

impl ArchiveRepository for ContendedStore {
    fn archives_matching(
        &self,
        filter: &ArchiveFilter,
        page: &PageRequest,
    ) -> Result<Slice<JobStatsArchive>, RepositoryError> {
        self.inner.archives_matching(filter, page)
    }
}

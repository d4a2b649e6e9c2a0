use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::blob::{BlobError, BlobStore, CV_FOLDER};
use super::custom_fields::{CustomFieldError, CustomFieldPatch};
use super::domain::{
    Application, ApplicationId, ApplicationStatus, Candidate, CandidateId, Company, CompanyId,
    CustomFieldDefinition, CustomFieldId, InterviewStep, Job, JobId, JobStatsArchive, StepId,
};
use super::repository::{
    ApplicationFilter, ArchiveFilter, PipelineStore, RepositoryError, Slice, UploadRef,
};
use super::requests::{
    parse_bound, ApplicationSubmission, ArchiveQuery, Bound, CandidateProfileInput,
    CompanyApplicationQuery, CompanyProfileInput, CustomFieldDraft, InvalidInput, JobDraft,
    JobPatch, StepUpdate,
};
use super::views::{CandidateApplicationView, CompanyApplicationView, CompanyApplicationsPage};
use crate::pagination::{Page, PageRequest};

/// Read-modify-write attempts before a concurrent update is reported to the caller.
const MAX_WRITE_ATTEMPTS: usize = 3;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub max_upload_bytes: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Service composing the store and blob storage behind every pipeline operation.
///
/// Every operation takes the caller's identity explicitly; ownership failures surface as
/// the matching not-found error so other tenants' records are never confirmed to exist.
pub struct PipelineService<S, B> {
    store: Arc<S>,
    blobs: Arc<B>,
    settings: PipelineSettings,
}

impl<S, B> PipelineService<S, B>
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    pub fn new(store: Arc<S>, blobs: Arc<B>, settings: PipelineSettings) -> Self {
        Self {
            store,
            blobs,
            settings,
        }
    }

    pub fn settings(&self) -> PipelineSettings {
        self.settings
    }

    pub fn upsert_company_profile(
        &self,
        company_id: &CompanyId,
        input: CompanyProfileInput,
    ) -> Result<Company, PipelineError> {
        input.validate()?;
        let now = Utc::now();
        let created_at = self
            .store
            .fetch_company(company_id)?
            .map_or(now, |existing| existing.created_at);

        let company = self.store.upsert_company(Company {
            id: company_id.clone(),
            name: input.name.trim().to_string(),
            email: input.email.trim().to_lowercase(),
            logo: input.logo(),
            created_at,
            updated_at: now,
        })?;
        info!(company_id = %company.id, "company profile saved");
        Ok(company)
    }

    pub fn company_profile(&self, company_id: &CompanyId) -> Result<Company, PipelineError> {
        self.store
            .fetch_company(company_id)?
            .ok_or(PipelineError::CompanyNotFound)
    }

    pub fn upsert_candidate_profile(
        &self,
        candidate_id: &CandidateId,
        input: CandidateProfileInput,
    ) -> Result<Candidate, PipelineError> {
        input.validate()?;
        let now = Utc::now();
        let created_at = self
            .store
            .fetch_candidate(candidate_id)?
            .map_or(now, |existing| existing.created_at);

        let candidate = self.store.upsert_candidate(Candidate {
            id: candidate_id.clone(),
            first_name: input.first_name.trim().to_string(),
            middle_name: input.middle_name(),
            last_name: input.last_name.trim().to_string(),
            email: input.email.trim().to_lowercase(),
            cv_url: input.cv_url(),
            created_at,
            updated_at: now,
        })?;
        info!(candidate_id = %candidate.id, "candidate profile saved");
        Ok(candidate)
    }

    pub fn candidate_profile(
        &self,
        candidate_id: &CandidateId,
    ) -> Result<Candidate, PipelineError> {
        self.store
            .fetch_candidate(candidate_id)?
            .ok_or(PipelineError::CandidateNotFound)
    }

    pub fn create_job(
        &self,
        company_id: &CompanyId,
        draft: JobDraft,
    ) -> Result<Job, PipelineError> {
        draft.validate()?;
        self.company_profile(company_id)?;

        let now = Utc::now();
        let salary_range = draft.salary_range();
        let job = self.store.insert_job(Job {
            id: JobId::generate(),
            company_id: company_id.clone(),
            title: draft.title.trim().to_string(),
            description: draft.description,
            requirements: draft.requirements,
            location: draft.location,
            salary_range,
            how_to_apply: draft.how_to_apply,
            blurry: draft.blurry.unwrap_or(true),
            created_at: now,
            updated_at: now,
        })?;
        info!(job_id = %job.id, company_id = %company_id, "job created");
        Ok(job)
    }

    pub fn jobs(&self, page: &PageRequest) -> Result<Page<Job>, PipelineError> {
        let slice = self.store.list_jobs(page)?;
        Ok(Page::new(slice.items, slice.total, page))
    }

    pub fn job(&self, job_id: &JobId) -> Result<Job, PipelineError> {
        self.store.fetch_job(job_id)?.ok_or(PipelineError::JobNotFound)
    }

    pub fn update_job(
        &self,
        company_id: &CompanyId,
        job_id: &JobId,
        patch: JobPatch,
    ) -> Result<Job, PipelineError> {
        let mut job = self.owned_job(company_id, job_id)?;
        patch.apply(&mut job)?;
        job.updated_at = Utc::now();
        match self.store.update_job(job.clone()) {
            Ok(()) => {}
            Err(RepositoryError::NotFound) => return Err(PipelineError::JobNotFound),
            Err(err) => return Err(err.into()),
        }
        info!(job_id = %job.id, "job updated");
        Ok(job)
    }

    /// Archive the job's pipeline counts, then delete its applications and the job itself.
    ///
    /// The store performs aggregation, archive write and cascade as one atomic unit; when it
    /// fails nothing is removed. CV uploads of the removed applications are cleaned up
    /// afterwards on a best-effort basis.
    pub fn delete_job(
        &self,
        company_id: &CompanyId,
        job_id: &JobId,
    ) -> Result<JobStatsArchive, PipelineError> {
        let removal = self
            .store
            .remove_job_with_archive(job_id, company_id, Utc::now())?
            .ok_or(PipelineError::JobNotFound)?;

        for upload in &removal.orphaned_uploads {
            self.discard_upload(upload);
        }

        let archive = removal.archive;
        info!(
            job_id = %job_id,
            company_id = %company_id,
            total = archive.total_applications,
            "job archived and deleted"
        );
        Ok(archive)
    }

    pub fn create_custom_field(
        &self,
        company_id: &CompanyId,
        draft: CustomFieldDraft,
    ) -> Result<CustomFieldDefinition, PipelineError> {
        let draft = draft.normalized()?;
        let definition = self.store.insert_custom_field(CustomFieldDefinition {
            id: CustomFieldId::generate(),
            company_id: company_id.clone(),
            name: draft.name,
            field_type: draft.field_type,
            options: draft.options,
            created_at: Utc::now(),
        })?;
        info!(field_id = %definition.id, company_id = %company_id, "custom field created");
        Ok(definition)
    }

    pub fn custom_fields(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<CustomFieldDefinition>, PipelineError> {
        Ok(self.store.custom_fields_for_company(company_id)?)
    }

    /// Remove a definition together with every value stored under it.
    pub fn delete_custom_field(
        &self,
        company_id: &CompanyId,
        field_id: &CustomFieldId,
    ) -> Result<(), PipelineError> {
        if !self.store.remove_custom_field(company_id, field_id)? {
            return Err(PipelineError::CustomFieldNotFound);
        }
        info!(field_id = %field_id, company_id = %company_id, "custom field deleted");
        Ok(())
    }

    /// Submit a new application, returning the stored record.
    pub fn submit(
        &self,
        candidate_id: &CandidateId,
        submission: ApplicationSubmission,
    ) -> Result<Application, PipelineError> {
        submission.validate()?;
        let job = self.job(&submission.job_id)?;
        let candidate = self.candidate_profile(candidate_id)?;

        let (cv_url, cv_uploaded) = match submission.cv {
            Some(upload) => {
                upload.validate(self.settings.max_upload_bytes)?;
                let stored = self.blobs.upload(CV_FOLDER, upload)?;
                debug!(url = %stored.url, content_type = %stored.content_type, "cv uploaded");
                (Some(stored.url), true)
            }
            None => (candidate.cv_url.clone(), false),
        };

        let now = Utc::now();
        let application = Application {
            id: ApplicationId::generate(),
            candidate_id: candidate_id.clone(),
            job_id: job.id.clone(),
            message: submission.message,
            cv_url,
            cv_uploaded,
            status: ApplicationStatus::Pending,
            steps: Vec::new(),
            custom_fields: BTreeMap::new(),
            revision: 0,
            created_at: now,
            updated_at: now,
        };
        let upload = application.owned_upload().map(str::to_string);

        match self.store.insert_application(application) {
            Ok(stored) => {
                info!(application_id = %stored.id, job_id = %job.id, "application submitted");
                Ok(stored)
            }
            Err(err) => {
                if let Some(url) = upload {
                    self.discard_upload(&UploadRef {
                        candidate_id: candidate_id.clone(),
                        url,
                    });
                }
                Err(err.into())
            }
        }
    }

    pub fn applications_for_candidate(
        &self,
        candidate_id: &CandidateId,
        page: &PageRequest,
    ) -> Result<Page<CandidateApplicationView>, PipelineError> {
        let Slice { items, total } = self.store.applications_for_candidate(candidate_id, page)?;
        let mut jobs = JobCache::default();
        let mut views = Vec::with_capacity(items.len());
        for application in items {
            let job = jobs.get(self.store.as_ref(), &application.job_id)?;
            views.push(CandidateApplicationView::new(application, job.as_ref()));
        }
        Ok(Page::new(views, total, page))
    }

    /// Applications for the caller's jobs, each projected against the caller's custom
    /// field definitions.
    pub fn applications_for_company(
        &self,
        company_id: &CompanyId,
        query: CompanyApplicationQuery,
        page: &PageRequest,
    ) -> Result<CompanyApplicationsPage, PipelineError> {
        let definitions = self.store.custom_fields_for_company(company_id)?;
        let mut job_ids = self.store.job_ids_for_company(company_id)?;
        if let Some(job_id) = &query.job_id {
            job_ids.retain(|owned| owned == job_id);
        }

        let Slice { items, total } = if job_ids.is_empty() {
            Slice::empty()
        } else {
            let filter = ApplicationFilter {
                job_ids,
                status: query.status,
            };
            self.store.applications_matching(&filter, page)?
        };

        let mut jobs = JobCache::default();
        let mut candidates: HashMap<CandidateId, Option<Candidate>> = HashMap::new();
        let mut views = Vec::with_capacity(items.len());
        for application in items {
            let job = jobs.get(self.store.as_ref(), &application.job_id)?;
            let candidate = match candidates.get(&application.candidate_id) {
                Some(cached) => cached.clone(),
                None => {
                    let fetched = self.store.fetch_candidate(&application.candidate_id)?;
                    candidates.insert(application.candidate_id.clone(), fetched.clone());
                    fetched
                }
            };
            views.push(CompanyApplicationView::new(
                application,
                job.as_ref(),
                candidate.as_ref(),
                &definitions,
            ));
        }

        Ok(CompanyApplicationsPage {
            page: Page::new(views, total, page),
            custom_fields: definitions,
        })
    }

    pub fn application_for_company(
        &self,
        company_id: &CompanyId,
        application_id: &ApplicationId,
    ) -> Result<CompanyApplicationView, PipelineError> {
        let (application, job) = self.owned_application(company_id, application_id)?;
        self.company_view(application, &job)
    }

    /// Delete the caller's own application and any CV uploaded with it.
    pub fn delete_application(
        &self,
        candidate_id: &CandidateId,
        application_id: &ApplicationId,
    ) -> Result<(), PipelineError> {
        let application = self
            .store
            .fetch_application(application_id)?
            .filter(|application| &application.candidate_id == candidate_id)
            .ok_or(PipelineError::ApplicationNotFound)?;

        if !self.store.remove_application(application_id)? {
            return Err(PipelineError::ApplicationNotFound);
        }
        info!(application_id = %application_id, "application deleted");

        if let Some(url) = application.owned_upload() {
            self.discard_upload(&UploadRef {
                candidate_id: candidate_id.clone(),
                url: url.to_string(),
            });
        }
        Ok(())
    }

    /// Any status may be set from any other.
    pub fn set_status(
        &self,
        company_id: &CompanyId,
        application_id: &ApplicationId,
        status: ApplicationStatus,
    ) -> Result<CompanyApplicationView, PipelineError> {
        let (application, job) = self.mutate_owned(company_id, application_id, |application| {
            application.status = status;
            Ok(())
        })?;
        info!(application_id = %application_id, status = %status, "application status changed");
        self.company_view(application, &job)
    }

    pub fn add_step(
        &self,
        company_id: &CompanyId,
        application_id: &ApplicationId,
        name: &str,
    ) -> Result<CompanyApplicationView, PipelineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(InvalidInput("step name is required".to_string()).into());
        }

        let (application, job) = self.mutate_owned(company_id, application_id, |application| {
            if application.steps.iter().any(|step| step.has_name(name)) {
                return Err(PipelineError::DuplicateStep(name.to_string()));
            }
            application.steps.push(InterviewStep::named(name));
            Ok(())
        })?;
        info!(application_id = %application_id, step = name, "interview step added");
        self.company_view(application, &job)
    }

    pub fn update_step(
        &self,
        company_id: &CompanyId,
        application_id: &ApplicationId,
        step_id: &StepId,
        update: StepUpdate,
    ) -> Result<CompanyApplicationView, PipelineError> {
        let (application, job) = self.mutate_owned(company_id, application_id, |application| {
            let step = application
                .step_mut(step_id)
                .ok_or(PipelineError::StepNotFound)?;
            step.result = update.result;
            step.comment = update.comment.clone();
            Ok(())
        })?;
        info!(
            application_id = %application_id,
            step_id = %step_id,
            result = update.result.label(),
            "interview step updated"
        );
        self.company_view(application, &job)
    }

    /// Merge values into the application's custom fields. Keys not mentioned are kept;
    /// `null` removes a value. Definitions are re-read on every attempt.
    pub fn set_custom_values(
        &self,
        company_id: &CompanyId,
        application_id: &ApplicationId,
        values: &BTreeMap<String, Value>,
    ) -> Result<CompanyApplicationView, PipelineError> {
        let (application, job) = self.mutate_owned(company_id, application_id, |application| {
            let definitions = self.store.custom_fields_for_company(company_id)?;
            CustomFieldPatch::resolve(&definitions, values)?.apply(&mut application.custom_fields);
            Ok(())
        })?;
        info!(
            application_id = %application_id,
            fields = values.len(),
            "custom field values saved"
        );
        self.company_view(application, &job)
    }

    /// Archived statistics of the caller's deleted jobs.
    pub fn job_stats(
        &self,
        company_id: &CompanyId,
        query: ArchiveQuery,
        page: &PageRequest,
    ) -> Result<Page<JobStatsArchive>, PipelineError> {
        let filter = ArchiveFilter {
            company_id: company_id.clone(),
            deleted_from: query
                .start_date
                .as_deref()
                .map(|raw| parse_bound(raw, Bound::Start))
                .transpose()?,
            deleted_before: query
                .end_date
                .as_deref()
                .map(|raw| parse_bound(raw, Bound::End))
                .transpose()?,
        };

        if query
            .company_id
            .as_ref()
            .is_some_and(|requested| requested != company_id)
        {
            return Ok(Page::new(Vec::new(), 0, page));
        }

        let slice = self.store.archives_matching(&filter, page)?;
        Ok(Page::new(slice.items, slice.total, page))
    }

    fn owned_job(&self, company_id: &CompanyId, job_id: &JobId) -> Result<Job, PipelineError> {
        self.store
            .fetch_job(job_id)?
            .filter(|job| &job.company_id == company_id)
            .ok_or(PipelineError::JobNotFound)
    }

    fn owned_application(
        &self,
        company_id: &CompanyId,
        application_id: &ApplicationId,
    ) -> Result<(Application, Job), PipelineError> {
        let application = self
            .store
            .fetch_application(application_id)?
            .ok_or(PipelineError::ApplicationNotFound)?;
        let job = self
            .store
            .fetch_job(&application.job_id)?
            .filter(|job| &job.company_id == company_id)
            .ok_or(PipelineError::ApplicationNotFound)?;
        Ok((application, job))
    }

    /// Fetch, change and conditionally store an application the caller's company owns,
    /// retrying when another writer got there first.
    fn mutate_owned<F>(
        &self,
        company_id: &CompanyId,
        application_id: &ApplicationId,
        mut change: F,
    ) -> Result<(Application, Job), PipelineError>
    where
        F: FnMut(&mut Application) -> Result<(), PipelineError>,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let (mut application, job) = self.owned_application(company_id, application_id)?;
            change(&mut application)?;
            application.updated_at = Utc::now();

            match self.store.update_application(application) {
                Ok(stored) => return Ok((stored, job)),
                Err(RepositoryError::StaleRevision) => {
                    debug!(application_id = %application_id, attempt, "stale revision, retrying");
                }
                Err(RepositoryError::NotFound) => return Err(PipelineError::ApplicationNotFound),
                Err(err) => return Err(err.into()),
            }
        }
        Err(PipelineError::ConcurrentUpdate)
    }

    fn company_view(
        &self,
        application: Application,
        job: &Job,
    ) -> Result<CompanyApplicationView, PipelineError> {
        let definitions = self.store.custom_fields_for_company(&job.company_id)?;
        let candidate = self.store.fetch_candidate(&application.candidate_id)?;
        Ok(CompanyApplicationView::new(
            application,
            Some(job),
            candidate.as_ref(),
            &definitions,
        ))
    }

    /// Remove a CV blob unless the candidate's profile points at it. Failures are logged
    /// and swallowed: the owning record is already gone.
    fn discard_upload(&self, upload: &UploadRef) {
        let profile_cv = match self.store.fetch_candidate(&upload.candidate_id) {
            Ok(candidate) => candidate.and_then(|candidate| candidate.cv_url),
            Err(err) => {
                warn!(
                    url = %upload.url,
                    error = %err,
                    "skipping cv cleanup, profile lookup failed"
                );
                return;
            }
        };
        if profile_cv.as_deref() == Some(upload.url.as_str()) {
            return;
        }
        if let Err(err) = self.blobs.delete(&upload.url) {
            warn!(url = %upload.url, error = %err, "cv cleanup failed");
        }
    }
}

#[derive(Default)]
struct JobCache {
    jobs: HashMap<JobId, Option<Job>>,
}

impl JobCache {
    fn get<S: PipelineStore>(
        &mut self,
        store: &S,
        job_id: &JobId,
    ) -> Result<Option<Job>, RepositoryError> {
        if let Some(cached) = self.jobs.get(job_id) {
            return Ok(cached.clone());
        }
        let fetched = store.fetch_job(job_id)?;
        self.jobs.insert(job_id.clone(), fetched.clone());
        Ok(fetched)
    }
}

/// Error raised by the pipeline service.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("application not found")]
    ApplicationNotFound,
    #[error("interview step not found")]
    StepNotFound,
    #[error("job not found")]
    JobNotFound,
    #[error("custom field not found")]
    CustomFieldNotFound,
    #[error("candidate profile not found")]
    CandidateNotFound,
    #[error("company profile not found")]
    CompanyNotFound,
    #[error(transparent)]
    Invalid(#[from] InvalidInput),
    #[error(transparent)]
    CustomField(#[from] CustomFieldError),
    #[error("a step named '{0}' already exists on this application")]
    DuplicateStep(String),
    #[error("application was modified concurrently, retry the request")]
    ConcurrentUpdate,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Blob(#[from] BlobError),
}

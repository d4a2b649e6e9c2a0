use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::pagination::PageRequest;
use crate::pipeline::domain::{
    Application, ApplicationId, Candidate, CandidateId, Company, CompanyId, CustomFieldDefinition,
    CustomFieldId, Job, JobId, JobStatsArchive, StatusCounts,
};
use crate::pipeline::repository::{
    ApplicationFilter, ApplicationRepository, ArchiveFilter, ArchiveRepository,
    CandidateRepository, CompanyRepository, CustomFieldRepository, JobRemoval, JobRepository,
    RepositoryError, Slice, UploadRef,
};

#[derive(Debug, Default)]
struct State {
    companies: HashMap<CompanyId, Company>,
    candidates: HashMap<CandidateId, Candidate>,
    jobs: Vec<Job>,
    custom_fields: Vec<CustomFieldDefinition>,
    applications: Vec<Application>,
    archives: Vec<JobStatsArchive>,
}

/// Process-local store. A single lock guards every collection, so multi-record operations
/// such as job removal are atomic. Collections keep insertion order.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("memory store mutex poisoned".to_string()))
    }
}

impl CompanyRepository for MemoryStore {
    fn upsert_company(&self, company: Company) -> Result<Company, RepositoryError> {
        self.lock()?
            .companies
            .insert(company.id.clone(), company.clone());
        Ok(company)
    }

    fn fetch_company(&self, id: &CompanyId) -> Result<Option<Company>, RepositoryError> {
        Ok(self.lock()?.companies.get(id).cloned())
    }
}

impl CandidateRepository for MemoryStore {
    fn upsert_candidate(&self, candidate: Candidate) -> Result<Candidate, RepositoryError> {
        self.lock()?
            .candidates
            .insert(candidate.id.clone(), candidate.clone());
        Ok(candidate)
    }

    fn fetch_candidate(&self, id: &CandidateId) -> Result<Option<Candidate>, RepositoryError> {
        Ok(self.lock()?.candidates.get(id).cloned())
    }
}

impl JobRepository for MemoryStore {
    fn insert_job(&self, job: Job) -> Result<Job, RepositoryError> {
        let mut state = self.lock()?;
        if state.jobs.iter().any(|existing| existing.id == job.id) {
            return Err(RepositoryError::Conflict);
        }
        state.jobs.push(job.clone());
        Ok(job)
    }

    fn update_job(&self, job: Job) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        let slot = state
            .jobs
            .iter_mut()
            .find(|existing| existing.id == job.id)
            .ok_or(RepositoryError::NotFound)?;
        *slot = job;
        Ok(())
    }

    fn fetch_job(&self, id: &JobId) -> Result<Option<Job>, RepositoryError> {
        Ok(self.lock()?.jobs.iter().find(|job| &job.id == id).cloned())
    }

    fn list_jobs(&self, page: &PageRequest) -> Result<Slice<Job>, RepositoryError> {
        Ok(Slice::paginate(self.lock()?.jobs.clone(), page))
    }

    fn job_ids_for_company(&self, company_id: &CompanyId) -> Result<Vec<JobId>, RepositoryError> {
        Ok(self
            .lock()?
            .jobs
            .iter()
            .filter(|job| &job.company_id == company_id)
            .map(|job| job.id.clone())
            .collect())
    }

    fn remove_job_with_archive(
        &self,
        job_id: &JobId,
        company_id: &CompanyId,
        deleted_at: DateTime<Utc>,
    ) -> Result<Option<JobRemoval>, RepositoryError> {
        let mut state = self.lock()?;
        let Some(job) = state
            .jobs
            .iter()
            .find(|job| &job.id == job_id && &job.company_id == company_id)
            .cloned()
        else {
            return Ok(None);
        };

        let counts = StatusCounts::tally(
            state
                .applications
                .iter()
                .filter(|application| &application.job_id == job_id)
                .map(|application| application.status),
        );
        let archive = JobStatsArchive::capture(&job, counts, deleted_at);
        let orphaned_uploads = state
            .applications
            .iter()
            .filter(|application| &application.job_id == job_id)
            .filter_map(|application| {
                application.owned_upload().map(|url| UploadRef {
                    candidate_id: application.candidate_id.clone(),
                    url: url.to_string(),
                })
            })
            .collect();

        state.archives.push(archive.clone());
        state
            .applications
            .retain(|application| &application.job_id != job_id);
        state.jobs.retain(|job| &job.id != job_id);

        Ok(Some(JobRemoval {
            archive,
            orphaned_uploads,
        }))
    }
}

impl CustomFieldRepository for MemoryStore {
    fn insert_custom_field(
        &self,
        definition: CustomFieldDefinition,
    ) -> Result<CustomFieldDefinition, RepositoryError> {
        let mut state = self.lock()?;
        if state
            .custom_fields
            .iter()
            .any(|existing| existing.id == definition.id)
        {
            return Err(RepositoryError::Conflict);
        }
        state.custom_fields.push(definition.clone());
        Ok(definition)
    }

    fn custom_fields_for_company(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<CustomFieldDefinition>, RepositoryError> {
        Ok(self
            .lock()?
            .custom_fields
            .iter()
            .filter(|definition| &definition.company_id == company_id)
            .cloned()
            .collect())
    }

    fn remove_custom_field(
        &self,
        company_id: &CompanyId,
        id: &CustomFieldId,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.lock()?;
        let before = state.custom_fields.len();
        state
            .custom_fields
            .retain(|definition| !(&definition.id == id && &definition.company_id == company_id));
        if state.custom_fields.len() == before {
            return Ok(false);
        }

        let State {
            jobs, applications, ..
        } = &mut *state;
        let owned: Vec<&JobId> = jobs
            .iter()
            .filter(|job| &job.company_id == company_id)
            .map(|job| &job.id)
            .collect();
        for application in applications
            .iter_mut()
            .filter(|application| owned.contains(&&application.job_id))
        {
            if application.custom_fields.remove(id).is_some() {
                application.revision += 1;
            }
        }
        Ok(true)
    }
}

impl ApplicationRepository for MemoryStore {
    fn insert_application(
        &self,
        application: Application,
    ) -> Result<Application, RepositoryError> {
        let mut state = self.lock()?;
        if state
            .applications
            .iter()
            .any(|existing| existing.id == application.id)
        {
            return Err(RepositoryError::Conflict);
        }
        state.applications.push(application.clone());
        Ok(application)
    }

    fn update_application(
        &self,
        mut application: Application,
    ) -> Result<Application, RepositoryError> {
        let mut state = self.lock()?;
        let State {
            jobs,
            custom_fields,
            applications,
            ..
        } = &mut *state;
        let slot = applications
            .iter_mut()
            .find(|existing| existing.id == application.id)
            .ok_or(RepositoryError::NotFound)?;
        if slot.revision != application.revision {
            return Err(RepositoryError::StaleRevision);
        }

        // A definition removed since the caller read the record takes its value along.
        let owner = jobs
            .iter()
            .find(|job| job.id == application.job_id)
            .map(|job| &job.company_id);
        application.custom_fields.retain(|id, _| {
            custom_fields
                .iter()
                .any(|definition| &definition.id == id && Some(&definition.company_id) == owner)
        });
        application.revision += 1;
        *slot = application.clone();
        Ok(application)
    }

    fn fetch_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Option<Application>, RepositoryError> {
        Ok(self
            .lock()?
            .applications
            .iter()
            .find(|application| &application.id == id)
            .cloned())
    }

    fn remove_application(&self, id: &ApplicationId) -> Result<bool, RepositoryError> {
        let mut state = self.lock()?;
        let before = state.applications.len();
        state.applications.retain(|application| &application.id != id);
        Ok(state.applications.len() != before)
    }

    fn applications_for_candidate(
        &self,
        candidate_id: &CandidateId,
        page: &PageRequest,
    ) -> Result<Slice<Application>, RepositoryError> {
        let matching = self
            .lock()?
            .applications
            .iter()
            .filter(|application| &application.candidate_id == candidate_id)
            .cloned()
            .collect();
        Ok(Slice::paginate(matching, page))
    }

    fn applications_matching(
        &self,
        filter: &ApplicationFilter,
        page: &PageRequest,
    ) -> Result<Slice<Application>, RepositoryError> {
        let matching = self
            .lock()?
            .applications
            .iter()
            .filter(|application| filter.matches(application))
            .cloned()
            .collect();
        Ok(Slice::paginate(matching, page))
    }
}

impl ArchiveRepository for MemoryStore {
    fn archives_matching(
        &self,
        filter: &ArchiveFilter,
        page: &PageRequest,
    ) -> Result<Slice<JobStatsArchive>, RepositoryError> {
        let matching = self
            .lock()?
            .archives
            .iter()
            .filter(|archive| filter.matches(archive))
            .cloned()
            .collect();
        Ok(Slice::paginate(matching, page))
    }
}

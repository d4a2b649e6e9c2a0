use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::ffi::{SQLITE_CONSTRAINT_PRIMARYKEY, SQLITE_CONSTRAINT_UNIQUE};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::pagination::PageRequest;
use crate::pipeline::domain::{
    Application, ApplicationId, ApplicationStatus, ArchiveId, Candidate, CandidateId, Company,
    CompanyId, CustomFieldDefinition, CustomFieldId, CustomFieldValues, FieldType, InterviewStep,
    Job, JobId, JobStatsArchive, StatusCounts,
};
use crate::pipeline::repository::{
    ApplicationFilter, ApplicationRepository, ArchiveFilter, ArchiveRepository,
    CandidateRepository, CompanyRepository, CustomFieldRepository, JobRemoval, JobRepository,
    RepositoryError, Slice, UploadRef,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS companies (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL,
    logo TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS candidates (
    id TEXT PRIMARY KEY,
    first_name TEXT NOT NULL,
    middle_name TEXT,
    last_name TEXT NOT NULL,
    email TEXT NOT NULL,
    cv_url TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS jobs (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    company_id TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    requirements TEXT NOT NULL,
    location TEXT NOT NULL,
    salary_range TEXT NOT NULL,
    how_to_apply TEXT NOT NULL,
    blurry INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS custom_fields (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    company_id TEXT NOT NULL,
    name TEXT NOT NULL,
    field_type TEXT NOT NULL CHECK (field_type IN ('text', 'number', 'date', 'select')),
    options TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS applications (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    candidate_id TEXT NOT NULL,
    job_id TEXT NOT NULL,
    message TEXT NOT NULL,
    cv_url TEXT,
    cv_uploaded INTEGER NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('pending', 'in_progress', 'qualified', 'not_qualified')),
    steps TEXT NOT NULL,
    custom_fields TEXT NOT NULL,
    revision INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS job_stats (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    job_title TEXT NOT NULL,
    company_id TEXT NOT NULL,
    location TEXT NOT NULL,
    salary_range TEXT NOT NULL,
    total_applications INTEGER NOT NULL,
    pending INTEGER NOT NULL,
    in_progress INTEGER NOT NULL,
    qualified INTEGER NOT NULL,
    not_qualified INTEGER NOT NULL,
    deleted_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_company ON jobs(company_id);
CREATE INDEX IF NOT EXISTS idx_custom_fields_company ON custom_fields(company_id);
CREATE INDEX IF NOT EXISTS idx_applications_job ON applications(job_id);
CREATE INDEX IF NOT EXISTS idx_applications_candidate ON applications(candidate_id);
CREATE INDEX IF NOT EXISTS idx_job_stats_company ON job_stats(company_id);
"#;

const JOB_COLUMNS: &str = "id, company_id, title, description, requirements, location, \
    salary_range, how_to_apply, blurry, created_at, updated_at";
const FIELD_COLUMNS: &str = "id, company_id, name, field_type, options, created_at";
const APPLICATION_COLUMNS: &str = "id, candidate_id, job_id, message, cv_url, cv_uploaded, \
    status, steps, custom_fields, revision, created_at, updated_at";
const ARCHIVE_COLUMNS: &str = "id, job_title, company_id, location, salary_range, \
    total_applications, pending, in_progress, qualified, not_qualified, deleted_at";

/// SQLite-backed store. One connection is shared behind a mutex; job removal and custom
/// field removal each run in a single transaction.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|err| RepositoryError::Unavailable(err.to_string()))?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::initialize(conn)
    }

    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self, RepositoryError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, RepositoryError> {
        self.conn.lock().map_err(|_| {
            RepositoryError::Unavailable("sqlite connection mutex poisoned".to_string())
        })
    }
}

/// Only duplicate keys are conflicts. Aborted triggers and CHECK failures stay internal.
impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(failure, _)
                if matches!(
                    failure.extended_code,
                    SQLITE_CONSTRAINT_PRIMARYKEY | SQLITE_CONSTRAINT_UNIQUE
                ) =>
            {
                RepositoryError::Conflict
            }
            other => RepositoryError::Unavailable(other.to_string()),
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|err| RepositoryError::Corrupt(err.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(raw).map_err(|err| RepositoryError::Corrupt(err.to_string()))
}

fn count(value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| RepositoryError::Corrupt(format!("negative count {value}")))
}

fn page_bounds(page: &PageRequest) -> (i64, i64) {
    (i64::from(page.limit()), page.offset() as i64)
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn company_from_row(row: &Row<'_>) -> rusqlite::Result<Company> {
    Ok(Company {
        id: CompanyId(row.get(0)?),
        name: row.get(1)?,
        email: row.get(2)?,
        logo: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn candidate_from_row(row: &Row<'_>) -> rusqlite::Result<Candidate> {
    Ok(Candidate {
        id: CandidateId(row.get(0)?),
        first_name: row.get(1)?,
        middle_name: row.get(2)?,
        last_name: row.get(3)?,
        email: row.get(4)?,
        cv_url: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: JobId(row.get(0)?),
        company_id: CompanyId(row.get(1)?),
        title: row.get(2)?,
        description: row.get(3)?,
        requirements: row.get(4)?,
        location: row.get(5)?,
        salary_range: row.get(6)?,
        how_to_apply: row.get(7)?,
        blurry: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn archive_from_row(row: &Row<'_>) -> rusqlite::Result<ArchiveRow> {
    Ok(ArchiveRow {
        id: row.get(0)?,
        job_title: row.get(1)?,
        company_id: row.get(2)?,
        location: row.get(3)?,
        salary_range: row.get(4)?,
        counts: [row.get(5)?, row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?],
        deleted_at: row.get(10)?,
    })
}

/// Raw column values; decoding JSON and enum labels happens outside the row closure so
/// failures surface as `RepositoryError::Corrupt`.
struct FieldRow {
    id: String,
    company_id: String,
    name: String,
    field_type: String,
    options: String,
    created_at: DateTime<Utc>,
}

impl FieldRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            company_id: row.get(1)?,
            name: row.get(2)?,
            field_type: row.get(3)?,
            options: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn decode(self) -> Result<CustomFieldDefinition, RepositoryError> {
        Ok(CustomFieldDefinition {
            id: CustomFieldId(self.id),
            company_id: CompanyId(self.company_id),
            name: self.name,
            field_type: self
                .field_type
                .parse::<FieldType>()
                .map_err(RepositoryError::Corrupt)?,
            options: from_json(&self.options)?,
            created_at: self.created_at,
        })
    }
}

struct ApplicationRow {
    id: String,
    candidate_id: String,
    job_id: String,
    message: String,
    cv_url: Option<String>,
    cv_uploaded: bool,
    status: String,
    steps: String,
    custom_fields: String,
    revision: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ApplicationRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            candidate_id: row.get(1)?,
            job_id: row.get(2)?,
            message: row.get(3)?,
            cv_url: row.get(4)?,
            cv_uploaded: row.get(5)?,
            status: row.get(6)?,
            steps: row.get(7)?,
            custom_fields: row.get(8)?,
            revision: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn decode(self) -> Result<Application, RepositoryError> {
        let status = self
            .status
            .parse::<ApplicationStatus>()
            .map_err(|err| RepositoryError::Corrupt(err.to_string()))?;
        let steps: Vec<InterviewStep> = from_json(&self.steps)?;
        let custom_fields: CustomFieldValues = from_json(&self.custom_fields)?;
        Ok(Application {
            id: ApplicationId(self.id),
            candidate_id: CandidateId(self.candidate_id),
            job_id: JobId(self.job_id),
            message: self.message,
            cv_url: self.cv_url,
            cv_uploaded: self.cv_uploaded,
            status,
            steps,
            custom_fields,
            revision: count(self.revision)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct ArchiveRow {
    id: String,
    job_title: String,
    company_id: String,
    location: String,
    salary_range: String,
    counts: [i64; 5],
    deleted_at: DateTime<Utc>,
}

impl ArchiveRow {
    fn decode(self) -> Result<JobStatsArchive, RepositoryError> {
        let [total, pending, in_progress, qualified, not_qualified] = self.counts;
        Ok(JobStatsArchive {
            id: ArchiveId(self.id),
            job_title: self.job_title,
            company_id: CompanyId(self.company_id),
            location: self.location,
            salary_range: self.salary_range,
            total_applications: count(total)?,
            pending: count(pending)?,
            in_progress: count(in_progress)?,
            qualified: count(qualified)?,
            not_qualified: count(not_qualified)?,
            deleted_at: self.deleted_at,
        })
    }
}

fn decode_applications(rows: Vec<ApplicationRow>) -> Result<Vec<Application>, RepositoryError> {
    rows.into_iter().map(ApplicationRow::decode).collect()
}

impl CompanyRepository for SqliteStore {
    fn upsert_company(&self, company: Company) -> Result<Company, RepositoryError> {
        self.lock()?.execute(
            "INSERT INTO companies (id, name, email, logo, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                logo = excluded.logo,
                updated_at = excluded.updated_at",
            params![
                company.id.as_str(),
                company.name,
                company.email,
                company.logo,
                company.created_at,
                company.updated_at
            ],
        )?;
        Ok(company)
    }

    fn fetch_company(&self, id: &CompanyId) -> Result<Option<Company>, RepositoryError> {
        Ok(self
            .lock()?
            .query_row(
                "SELECT id, name, email, logo, created_at, updated_at FROM companies WHERE id = ?1",
                [id.as_str()],
                company_from_row,
            )
            .optional()?)
    }
}

impl CandidateRepository for SqliteStore {
    fn upsert_candidate(&self, candidate: Candidate) -> Result<Candidate, RepositoryError> {
        self.lock()?.execute(
            "INSERT INTO candidates
                (id, first_name, middle_name, last_name, email, cv_url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                first_name = excluded.first_name,
                middle_name = excluded.middle_name,
                last_name = excluded.last_name,
                email = excluded.email,
                cv_url = excluded.cv_url,
                updated_at = excluded.updated_at",
            params![
                candidate.id.as_str(),
                candidate.first_name,
                candidate.middle_name,
                candidate.last_name,
                candidate.email,
                candidate.cv_url,
                candidate.created_at,
                candidate.updated_at
            ],
        )?;
        Ok(candidate)
    }

    fn fetch_candidate(&self, id: &CandidateId) -> Result<Option<Candidate>, RepositoryError> {
        Ok(self
            .lock()?
            .query_row(
                "SELECT id, first_name, middle_name, last_name, email, cv_url,
                        created_at, updated_at
                 FROM candidates WHERE id = ?1",
                [id.as_str()],
                candidate_from_row,
            )
            .optional()?)
    }
}

impl JobRepository for SqliteStore {
    fn insert_job(&self, job: Job) -> Result<Job, RepositoryError> {
        self.lock()?.execute(
            &format!(
                "INSERT INTO jobs ({JOB_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                job.id.as_str(),
                job.company_id.as_str(),
                job.title,
                job.description,
                job.requirements,
                job.location,
                job.salary_range,
                job.how_to_apply,
                job.blurry,
                job.created_at,
                job.updated_at
            ],
        )?;
        Ok(job)
    }

    fn update_job(&self, job: Job) -> Result<(), RepositoryError> {
        let changed = self.lock()?.execute(
            "UPDATE jobs SET title = ?2, description = ?3, requirements = ?4, location = ?5,
                salary_range = ?6, how_to_apply = ?7, blurry = ?8, updated_at = ?9
             WHERE id = ?1",
            params![
                job.id.as_str(),
                job.title,
                job.description,
                job.requirements,
                job.location,
                job.salary_range,
                job.how_to_apply,
                job.blurry,
                job.updated_at
            ],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    fn fetch_job(&self, id: &JobId) -> Result<Option<Job>, RepositoryError> {
        Ok(self
            .lock()?
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                [id.as_str()],
                job_from_row,
            )
            .optional()?)
    }

    fn list_jobs(&self, page: &PageRequest) -> Result<Slice<Job>, RepositoryError> {
        let conn = self.lock()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?;
        let (limit, offset) = page_bounds(page);
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY seq LIMIT ?1 OFFSET ?2"
        ))?;
        let items = stmt
            .query_map(params![limit, offset], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Slice {
            items,
            total: count(total)?,
        })
    }

    fn job_ids_for_company(&self, company_id: &CompanyId) -> Result<Vec<JobId>, RepositoryError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM jobs WHERE company_id = ?1 ORDER BY seq")?;
        let ids = stmt
            .query_map([company_id.as_str()], |row| row.get::<_, String>(0).map(JobId))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn remove_job_with_archive(
        &self,
        job_id: &JobId,
        company_id: &CompanyId,
        deleted_at: DateTime<Utc>,
    ) -> Result<Option<JobRemoval>, RepositoryError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let Some(job) = tx
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1 AND company_id = ?2"),
                params![job_id.as_str(), company_id.as_str()],
                job_from_row,
            )
            .optional()?
        else {
            return Ok(None);
        };

        let mut counts = StatusCounts::default();
        {
            let mut stmt = tx.prepare(
                "SELECT status, COUNT(*) FROM applications WHERE job_id = ?1 GROUP BY status",
            )?;
            let grouped = stmt
                .query_map([job_id.as_str()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            for (status, total) in grouped {
                let status = status
                    .parse::<ApplicationStatus>()
                    .map_err(|err| RepositoryError::Corrupt(err.to_string()))?;
                counts.add(status, count(total)?);
            }
        }

        let orphaned_uploads = {
            let mut stmt = tx.prepare(
                "SELECT candidate_id, cv_url FROM applications
                 WHERE job_id = ?1 AND cv_uploaded = 1 AND cv_url IS NOT NULL
                 ORDER BY seq",
            )?;
            let uploads = stmt
                .query_map([job_id.as_str()], |row| {
                    Ok(UploadRef {
                        candidate_id: CandidateId(row.get(0)?),
                        url: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            uploads
        };

        let archive = JobStatsArchive::capture(&job, counts, deleted_at);
        tx.execute(
            &format!(
                "INSERT INTO job_stats ({ARCHIVE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                archive.id.as_str(),
                archive.job_title,
                archive.company_id.as_str(),
                archive.location,
                archive.salary_range,
                archive.total_applications as i64,
                archive.pending as i64,
                archive.in_progress as i64,
                archive.qualified as i64,
                archive.not_qualified as i64,
                archive.deleted_at
            ],
        )?;
        tx.execute("DELETE FROM applications WHERE job_id = ?1", [job_id.as_str()])?;
        tx.execute("DELETE FROM jobs WHERE id = ?1", [job_id.as_str()])?;
        tx.commit()?;

        Ok(Some(JobRemoval {
            archive,
            orphaned_uploads,
        }))
    }
}

impl CustomFieldRepository for SqliteStore {
    fn insert_custom_field(
        &self,
        definition: CustomFieldDefinition,
    ) -> Result<CustomFieldDefinition, RepositoryError> {
        let options = to_json(&definition.options)?;
        self.lock()?.execute(
            &format!("INSERT INTO custom_fields ({FIELD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
            params![
                definition.id.as_str(),
                definition.company_id.as_str(),
                definition.name,
                definition.field_type.label(),
                options,
                definition.created_at
            ],
        )?;
        Ok(definition)
    }

    fn custom_fields_for_company(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<CustomFieldDefinition>, RepositoryError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FIELD_COLUMNS} FROM custom_fields WHERE company_id = ?1 ORDER BY seq"
        ))?;
        let rows = stmt
            .query_map([company_id.as_str()], FieldRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(FieldRow::decode).collect()
    }

    fn remove_custom_field(
        &self,
        company_id: &CompanyId,
        id: &CustomFieldId,
    ) -> Result<bool, RepositoryError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let removed = tx.execute(
            "DELETE FROM custom_fields WHERE id = ?1 AND company_id = ?2",
            params![id.as_str(), company_id.as_str()],
        )?;
        if removed == 0 {
            return Ok(false);
        }

        let holders = {
            let mut stmt = tx.prepare(
                "SELECT a.id, a.custom_fields FROM applications a
                 JOIN jobs j ON j.id = a.job_id
                 WHERE j.company_id = ?1",
            )?;
            let rows = stmt
                .query_map([company_id.as_str()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        for (application_id, raw) in holders {
            let mut values: CustomFieldValues = from_json(&raw)?;
            if values.remove(id).is_none() {
                continue;
            }
            tx.execute(
                "UPDATE applications SET custom_fields = ?2, revision = revision + 1 WHERE id = ?1",
                params![application_id, to_json(&values)?],
            )?;
        }

        tx.commit()?;
        Ok(true)
    }
}

impl ApplicationRepository for SqliteStore {
    fn insert_application(
        &self,
        application: Application,
    ) -> Result<Application, RepositoryError> {
        let steps = to_json(&application.steps)?;
        let custom_fields = to_json(&application.custom_fields)?;
        self.lock()?.execute(
            &format!(
                "INSERT INTO applications ({APPLICATION_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                application.id.as_str(),
                application.candidate_id.as_str(),
                application.job_id.as_str(),
                application.message,
                application.cv_url,
                application.cv_uploaded,
                application.status.label(),
                steps,
                custom_fields,
                application.revision as i64,
                application.created_at,
                application.updated_at
            ],
        )?;
        Ok(application)
    }

    fn update_application(
        &self,
        mut application: Application,
    ) -> Result<Application, RepositoryError> {
        let conn = self.lock()?;
        let defined = {
            let mut stmt = conn.prepare(
                "SELECT f.id FROM custom_fields f
                 JOIN jobs j ON j.company_id = f.company_id
                 WHERE j.id = ?1",
            )?;
            let ids = stmt
                .query_map([application.job_id.as_str()], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };
        application
            .custom_fields
            .retain(|id, _| defined.iter().any(|known| known == id.as_str()));

        let steps = to_json(&application.steps)?;
        let custom_fields = to_json(&application.custom_fields)?;
        let changed = conn.execute(
            "UPDATE applications SET
                message = ?3, cv_url = ?4, cv_uploaded = ?5, status = ?6, steps = ?7,
                custom_fields = ?8, updated_at = ?9, revision = revision + 1
             WHERE id = ?1 AND revision = ?2",
            params![
                application.id.as_str(),
                application.revision as i64,
                application.message,
                application.cv_url,
                application.cv_uploaded,
                application.status.label(),
                steps,
                custom_fields,
                application.updated_at
            ],
        )?;

        if changed == 0 {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM applications WHERE id = ?1",
                    [application.id.as_str()],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            return Err(if exists {
                RepositoryError::StaleRevision
            } else {
                RepositoryError::NotFound
            });
        }

        application.revision += 1;
        Ok(application)
    }

    fn fetch_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Option<Application>, RepositoryError> {
        let row = self
            .lock()?
            .query_row(
                &format!("SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = ?1"),
                [id.as_str()],
                ApplicationRow::read,
            )
            .optional()?;
        row.map(ApplicationRow::decode).transpose()
    }

    fn remove_application(&self, id: &ApplicationId) -> Result<bool, RepositoryError> {
        let removed = self
            .lock()?
            .execute("DELETE FROM applications WHERE id = ?1", [id.as_str()])?;
        Ok(removed > 0)
    }

    fn applications_for_candidate(
        &self,
        candidate_id: &CandidateId,
        page: &PageRequest,
    ) -> Result<Slice<Application>, RepositoryError> {
        let conn = self.lock()?;
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM applications WHERE candidate_id = ?1",
            [candidate_id.as_str()],
            |row| row.get(0),
        )?;
        let (limit, offset) = page_bounds(page);
        let mut stmt = conn.prepare(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications
             WHERE candidate_id = ?1 ORDER BY seq LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt
            .query_map(
                params![candidate_id.as_str(), limit, offset],
                ApplicationRow::read,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Slice {
            items: decode_applications(rows)?,
            total: count(total)?,
        })
    }

    fn applications_matching(
        &self,
        filter: &ApplicationFilter,
        page: &PageRequest,
    ) -> Result<Slice<Application>, RepositoryError> {
        if filter.job_ids.is_empty() {
            return Ok(Slice::empty());
        }

        let mut clause = format!("job_id IN ({})", placeholders(filter.job_ids.len()));
        let mut values: Vec<SqlValue> = filter
            .job_ids
            .iter()
            .map(|id| SqlValue::Text(id.as_str().to_string()))
            .collect();
        if let Some(status) = filter.status {
            clause.push_str(" AND status = ?");
            values.push(SqlValue::Text(status.label().to_string()));
        }

        let conn = self.lock()?;
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM applications WHERE {clause}"),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        let (limit, offset) = page_bounds(page);
        values.push(SqlValue::Integer(limit));
        values.push(SqlValue::Integer(offset));
        let mut stmt = conn.prepare(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications
             WHERE {clause} ORDER BY seq LIMIT ? OFFSET ?"
        ))?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), ApplicationRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Slice {
            items: decode_applications(rows)?,
            total: count(total)?,
        })
    }
}

impl ArchiveRepository for SqliteStore {
    fn archives_matching(
        &self,
        filter: &ArchiveFilter,
        page: &PageRequest,
    ) -> Result<Slice<JobStatsArchive>, RepositoryError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ARCHIVE_COLUMNS} FROM job_stats WHERE company_id = ?1 ORDER BY seq"
        ))?;
        let rows = stmt
            .query_map([filter.company_id.as_str()], archive_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        // Date bounds are compared on decoded timestamps rather than stored text.
        let matching = rows
            .into_iter()
            .map(ArchiveRow::decode)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|archive| filter.matches(archive))
            .collect();
        Ok(Slice::paginate(matching, page))
    }
}

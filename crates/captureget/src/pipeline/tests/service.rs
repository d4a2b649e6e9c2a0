use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use super::common::*;
use crate::pagination::PageRequest;
use crate::pipeline::blob::MemoryBlobStore;
use crate::pipeline::domain::{
    ApplicationId, ApplicationStatus, CompanyId, FieldType, JobId, StepId, StepResult,
};
use crate::pipeline::repository::ApplicationRepository;
use crate::pipeline::requests::{
    CompanyApplicationQuery, CustomFieldDraft, JobPatch, StepUpdate,
};
use crate::pipeline::{BlobError, PipelineError, PipelineService, PipelineSettings};

fn values(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

#[test]
fn submission_without_file_uses_profile_cv() {
    let harness = build_service();
    let (_, job) = seed_company_with_job(&harness.service, "Acme", "Backend Engineer");
    let candidate = seed_candidate(&harness.service, "cand-1", Some("https://x/cv.pdf"));

    let application = harness
        .service
        .submit(&candidate, plain_submission(&job.id))
        .expect("application stored");

    assert_eq!(application.cv_url.as_deref(), Some("https://x/cv.pdf"));
    assert!(!application.cv_uploaded);
    assert_eq!(application.status, ApplicationStatus::Pending);
    assert!(application.steps.is_empty());
    assert!(application.custom_fields.is_empty());
    assert_eq!(application.revision, 0);
    assert!(harness.blobs.is_empty());
}

#[test]
fn attached_cv_is_uploaded_and_owned_by_the_application() {
    let harness = build_service();
    let (_, job) = seed_company_with_job(&harness.service, "Acme", "Backend Engineer");
    let candidate = seed_candidate(&harness.service, "cand-1", Some("https://x/cv.pdf"));

    let application = harness
        .service
        .submit(&candidate, cv_submission(&job.id, "resume.PDF"))
        .expect("application stored");

    let url = application.cv_url.clone().expect("cv url set");
    assert!(url.starts_with("memory://user_cvs/"));
    assert!(url.ends_with(".pdf"));
    assert!(application.cv_uploaded);
    assert!(harness.blobs.contains(&url));
}

#[test]
fn rejected_files_create_nothing() {
    let harness = build_service();
    let (_, job) = seed_company_with_job(&harness.service, "Acme", "Backend Engineer");
    let candidate = seed_candidate(&harness.service, "cand-1", None);

    let err = harness
        .service
        .submit(&candidate, cv_submission(&job.id, "resume.exe"))
        .expect_err("executables are rejected");
    assert!(matches!(err, PipelineError::Blob(BlobError::Rejected(_))));

    let listing = harness
        .service
        .applications_for_candidate(&candidate, &PageRequest::default())
        .expect("listing");
    assert_eq!(listing.total, 0);
    assert!(harness.blobs.is_empty());
}

#[test]
fn oversize_files_are_rejected() {
    let store = crate::storage::MemoryStore::new();
    let service = PipelineService::new(
        Arc::new(store),
        Arc::new(MemoryBlobStore::default()),
        PipelineSettings {
            max_upload_bytes: 4,
        },
    );
    let (_, job) = seed_company_with_job(&service, "Acme", "Backend Engineer");
    let candidate = seed_candidate(&service, "cand-1", None);

    let err = service
        .submit(&candidate, cv_submission(&job.id, "resume.pdf"))
        .expect_err("file is larger than the limit");
    assert!(matches!(err, PipelineError::Blob(BlobError::Rejected(_))));
}

#[test]
fn failed_upload_aborts_the_submission() {
    let store = crate::storage::MemoryStore::new();
    let service = PipelineService::new(
        Arc::new(store.clone()),
        Arc::new(OfflineBlobStore),
        PipelineSettings::default(),
    );
    let (_, job) = seed_company_with_job(&service, "Acme", "Backend Engineer");
    let candidate = seed_candidate(&service, "cand-1", None);

    let err = service
        .submit(&candidate, cv_submission(&job.id, "resume.pdf"))
        .expect_err("upload fails");
    assert!(matches!(err, PipelineError::Blob(BlobError::Unavailable(_))));

    let stored = store
        .applications_for_candidate(&candidate, &PageRequest::default())
        .expect("listing");
    assert_eq!(stored.total, 0);
}

#[test]
fn submission_requires_existing_job_and_profile() {
    let harness = build_service();
    let (_, job) = seed_company_with_job(&harness.service, "Acme", "Backend Engineer");
    let candidate = seed_candidate(&harness.service, "cand-1", None);

    let err = harness
        .service
        .submit(&candidate, plain_submission(&JobId::from("missing")))
        .expect_err("job is unknown");
    assert!(matches!(err, PipelineError::JobNotFound));

    let stranger = crate::pipeline::CandidateId::from("no-profile");
    let err = harness
        .service
        .submit(&stranger, plain_submission(&job.id))
        .expect_err("profile is missing");
    assert!(matches!(err, PipelineError::CandidateNotFound));
}

#[test]
fn any_status_may_follow_any_other() {
    let harness = build_service();
    let (company, job) = seed_company_with_job(&harness.service, "Acme", "Backend Engineer");
    let candidate = seed_candidate(&harness.service, "cand-1", None);
    let application = harness
        .service
        .submit(&candidate, plain_submission(&job.id))
        .expect("application stored");

    for from in ApplicationStatus::ALL {
        for to in ApplicationStatus::ALL {
            harness
                .service
                .set_status(&company, &application.id, from)
                .expect("first transition");
            let view = harness
                .service
                .set_status(&company, &application.id, to)
                .expect("second transition");
            assert_eq!(view.status, to);
        }
    }
}

#[test]
fn steps_are_added_and_updated_by_id() {
    let harness = build_service();
    let (company, job) = seed_company_with_job(&harness.service, "Acme", "Backend Engineer");
    let candidate = seed_candidate(&harness.service, "cand-1", None);
    let application = harness
        .service
        .submit(&candidate, plain_submission(&job.id))
        .expect("application stored");

    let view = harness
        .service
        .add_step(&company, &application.id, "Phone Screen")
        .expect("step added");
    assert_eq!(view.steps.len(), 1);
    let step = view.steps[0].clone();
    assert_eq!(step.result, StepResult::Unset);
    assert_eq!(step.comment, "");

    for result in [
        StepResult::Go,
        StepResult::NoGo,
        StepResult::Still,
        StepResult::Unset,
        StepResult::Go,
    ] {
        harness
            .service
            .update_step(
                &company,
                &application.id,
                &step.id,
                StepUpdate {
                    result,
                    comment: "Strong candidate".to_string(),
                },
            )
            .expect("step updated");
    }

    let fetched = harness
        .service
        .application_for_company(&company, &application.id)
        .expect("application visible");
    assert_eq!(fetched.steps.len(), 1);
    assert_eq!(fetched.steps[0].name, "Phone Screen");
    assert_eq!(fetched.steps[0].result, StepResult::Go);
    assert_eq!(fetched.steps[0].comment, "Strong candidate");
}

#[test]
fn duplicate_and_blank_step_names_are_refused() {
    let harness = build_service();
    let (company, job) = seed_company_with_job(&harness.service, "Acme", "Backend Engineer");
    let candidate = seed_candidate(&harness.service, "cand-1", None);
    let application = harness
        .service
        .submit(&candidate, plain_submission(&job.id))
        .expect("application stored");

    harness
        .service
        .add_step(&company, &application.id, "Phone Screen")
        .expect("step added");
    let err = harness
        .service
        .add_step(&company, &application.id, "  phone screen ")
        .expect_err("duplicate name");
    assert!(matches!(err, PipelineError::DuplicateStep(_)));

    let err = harness
        .service
        .add_step(&company, &application.id, "   ")
        .expect_err("blank name");
    assert!(matches!(err, PipelineError::Invalid(_)));
}

#[test]
fn missing_step_and_missing_application_are_distinct() {
    let harness = build_service();
    let (company, job) = seed_company_with_job(&harness.service, "Acme", "Backend Engineer");
    let candidate = seed_candidate(&harness.service, "cand-1", None);
    let application = harness
        .service
        .submit(&candidate, plain_submission(&job.id))
        .expect("application stored");

    let update = || StepUpdate {
        result: StepResult::Go,
        comment: String::new(),
    };
    let err = harness
        .service
        .update_step(&company, &application.id, &StepId::from("nope"), update())
        .expect_err("unknown step");
    assert!(matches!(err, PipelineError::StepNotFound));

    let err = harness
        .service
        .update_step(
            &company,
            &ApplicationId::from("nope"),
            &StepId::from("nope"),
            update(),
        )
        .expect_err("unknown application");
    assert!(matches!(err, PipelineError::ApplicationNotFound));
}

#[test]
fn companies_only_see_applications_for_their_own_jobs() {
    let harness = build_service();
    let (acme, acme_job) = seed_company_with_job(&harness.service, "Acme", "Backend Engineer");
    let (globex, globex_job) = seed_company_with_job(&harness.service, "Globex", "Data Analyst");
    let first = seed_candidate(&harness.service, "cand-1", None);
    let second = seed_candidate(&harness.service, "cand-2", None);

    let acme_application = harness
        .service
        .submit(&first, plain_submission(&acme_job.id))
        .expect("stored");
    harness
        .service
        .submit(&second, plain_submission(&acme_job.id))
        .expect("stored");
    let globex_application = harness
        .service
        .submit(&first, plain_submission(&globex_job.id))
        .expect("stored");

    let acme_view = harness
        .service
        .applications_for_company(
            &acme,
            CompanyApplicationQuery::default(),
            &PageRequest::default(),
        )
        .expect("listing");
    assert_eq!(acme_view.page.total, 2);
    assert!(acme_view
        .page
        .items
        .iter()
        .all(|item| item.job_id == acme_job.id));

    let foreign_filter = harness
        .service
        .applications_for_company(
            &acme,
            CompanyApplicationQuery {
                job_id: Some(globex_job.id.clone()),
                status: None,
            },
            &PageRequest::default(),
        )
        .expect("listing");
    assert_eq!(foreign_filter.page.total, 0);
    assert!(foreign_filter.page.items.is_empty());

    let err = harness
        .service
        .set_status(&acme, &globex_application.id, ApplicationStatus::Qualified)
        .expect_err("not owned");
    assert!(matches!(err, PipelineError::ApplicationNotFound));
    let err = harness
        .service
        .application_for_company(&globex, &acme_application.id)
        .expect_err("not owned");
    assert!(matches!(err, PipelineError::ApplicationNotFound));
}

#[test]
fn company_listing_filters_by_status_and_paginates() {
    let harness = build_service();
    let (company, job) = seed_company_with_job(&harness.service, "Acme", "Backend Engineer");
    let mut ids = Vec::new();
    for index in 0..5 {
        let candidate = seed_candidate(&harness.service, &format!("cand-{index}"), None);
        let application = harness
            .service
            .submit(&candidate, plain_submission(&job.id))
            .expect("stored");
        ids.push(application.id);
    }
    harness
        .service
        .set_status(&company, &ids[1], ApplicationStatus::Qualified)
        .expect("status set");

    let pending = harness
        .service
        .applications_for_company(
            &company,
            CompanyApplicationQuery {
                job_id: None,
                status: Some(ApplicationStatus::Pending),
            },
            &PageRequest::new(2, 3).expect("valid page"),
        )
        .expect("listing");
    assert_eq!(pending.page.total, 4);
    assert_eq!(pending.page.total_pages, 2);
    assert_eq!(pending.page.items.len(), 1);
    assert_eq!(pending.page.items[0].id, ids[4]);
    let candidate = pending.page.items[0]
        .candidate
        .as_ref()
        .expect("candidate joined");
    assert_eq!(candidate.last_name, "Hopper");
}

#[test]
fn custom_values_merge_without_dropping_other_keys() {
    let harness = build_service();
    let (company, job) = seed_company_with_job(&harness.service, "Acme", "Backend Engineer");
    let candidate = seed_candidate(&harness.service, "cand-1", None);
    let application = harness
        .service
        .submit(&candidate, plain_submission(&job.id))
        .expect("stored");

    let years = harness
        .service
        .create_custom_field(
            &company,
            CustomFieldDraft {
                name: "Years of Experience".to_string(),
                field_type: FieldType::Number,
                options: Vec::new(),
            },
        )
        .expect("field created");
    let level = harness
        .service
        .create_custom_field(
            &company,
            CustomFieldDraft {
                name: "Level".to_string(),
                field_type: FieldType::Select,
                options: vec!["junior".to_string(), "senior".to_string()],
            },
        )
        .expect("field created");

    harness
        .service
        .set_custom_values(
            &company,
            &application.id,
            &values(&[(level.id.as_str(), json!("senior"))]),
        )
        .expect("level saved");
    let view = harness
        .service
        .set_custom_values(
            &company,
            &application.id,
            &values(&[(years.id.as_str(), json!("7"))]),
        )
        .expect("years saved");

    let projected: BTreeMap<_, _> = view
        .custom_fields
        .iter()
        .map(|field| (field.name.clone(), field.value.clone()))
        .collect();
    assert_eq!(projected["Years of Experience"], json!(7.0));
    assert_eq!(projected["Level"], json!("senior"));

    let view = harness
        .service
        .set_custom_values(
            &company,
            &application.id,
            &values(&[(level.id.as_str(), Value::Null)]),
        )
        .expect("level cleared");
    let level_value = view
        .custom_fields
        .iter()
        .find(|field| field.id == level.id)
        .map(|field| field.value.clone());
    assert_eq!(level_value, Some(Value::Null));
    assert_eq!(view.custom_fields.len(), 2);

    let err = harness
        .service
        .set_custom_values(
            &company,
            &application.id,
            &values(&[(level.id.as_str(), json!("principal"))]),
        )
        .expect_err("not an option");
    assert!(matches!(err, PipelineError::CustomField(_)));
}

#[test]
fn custom_fields_are_company_scoped() {
    let harness = build_service();
    let (acme, acme_job) = seed_company_with_job(&harness.service, "Acme", "Backend Engineer");
    let (globex, _) = seed_company_with_job(&harness.service, "Globex", "Data Analyst");
    let candidate = seed_candidate(&harness.service, "cand-1", None);
    let application = harness
        .service
        .submit(&candidate, plain_submission(&acme_job.id))
        .expect("stored");

    let years = harness
        .service
        .create_custom_field(
            &acme,
            CustomFieldDraft {
                name: "Years of Experience".to_string(),
                field_type: FieldType::Number,
                options: Vec::new(),
            },
        )
        .expect("field created");

    let globex_listing = harness
        .service
        .applications_for_company(
            &globex,
            CompanyApplicationQuery::default(),
            &PageRequest::default(),
        )
        .expect("listing");
    assert!(globex_listing
        .custom_fields
        .iter()
        .all(|definition| definition.id != years.id));
    assert!(harness
        .service
        .custom_fields(&globex)
        .expect("definitions")
        .is_empty());

    let err = harness
        .service
        .delete_custom_field(&globex, &years.id)
        .expect_err("not owned");
    assert!(matches!(err, PipelineError::CustomFieldNotFound));

    // A company cannot write values under another company's definition.
    let globex_field = harness
        .service
        .create_custom_field(
            &globex,
            CustomFieldDraft {
                name: "Notes".to_string(),
                field_type: FieldType::Text,
                options: Vec::new(),
            },
        )
        .expect("field created");
    let err = harness
        .service
        .set_custom_values(
            &acme,
            &application.id,
            &values(&[(globex_field.id.as_str(), json!("nope"))]),
        )
        .expect_err("foreign definition");
    assert!(matches!(err, PipelineError::CustomField(_)));
}

#[test]
fn values_for_a_definition_deleted_mid_write_are_not_stored() {
    let store = Arc::new(ContendedStore::default());
    let service = PipelineService::new(
        Arc::clone(&store),
        Arc::new(MemoryBlobStore::default()),
        PipelineSettings::default(),
    );
    let (company, job) = seed_company_with_job(&service, "Acme", "Backend Engineer");
    let candidate = seed_candidate(&service, "cand-1", None);
    let application = service
        .submit(&candidate, plain_submission(&job.id))
        .expect("stored");
    let field = service
        .create_custom_field(
            &company,
            CustomFieldDraft {
                name: "Seniority".to_string(),
                field_type: FieldType::Text,
                options: Vec::new(),
            },
        )
        .expect("field created");

    store.remove_field_before_next_write(&company, &field.id);
    let view = service
        .set_custom_values(
            &company,
            &application.id,
            &values(&[(field.id.as_str(), json!("senior"))]),
        )
        .expect("write lands");
    assert!(view.custom_fields.is_empty());

    let stored = store
        .fetch_application(&application.id)
        .expect("fetch")
        .expect("application kept");
    assert!(stored.custom_fields.is_empty());
    assert!(service
        .custom_fields(&company)
        .expect("definitions")
        .is_empty());
}

#[test]
fn deleting_a_definition_clears_stored_values() {
    let harness = build_service();
    let (company, job) = seed_company_with_job(&harness.service, "Acme", "Backend Engineer");
    let candidate = seed_candidate(&harness.service, "cand-1", None);
    let application = harness
        .service
        .submit(&candidate, plain_submission(&job.id))
        .expect("stored");
    let notes = harness
        .service
        .create_custom_field(
            &company,
            CustomFieldDraft {
                name: "Notes".to_string(),
                field_type: FieldType::Text,
                options: Vec::new(),
            },
        )
        .expect("field created");
    harness
        .service
        .set_custom_values(
            &company,
            &application.id,
            &values(&[(notes.id.as_str(), json!("great call"))]),
        )
        .expect("saved");

    harness
        .service
        .delete_custom_field(&company, &notes.id)
        .expect("deleted");

    let stored = harness
        .store
        .fetch_application(&application.id)
        .expect("fetch")
        .expect("application kept");
    assert!(stored.custom_fields.is_empty());
}

#[test]
fn candidates_delete_only_their_own_applications() {
    let harness = build_service();
    let (_, job) = seed_company_with_job(&harness.service, "Acme", "Backend Engineer");
    let owner = seed_candidate(&harness.service, "cand-1", None);
    let other = seed_candidate(&harness.service, "cand-2", None);

    let application = harness
        .service
        .submit(&owner, cv_submission(&job.id, "resume.pdf"))
        .expect("stored");
    let url = application.cv_url.clone().expect("uploaded");

    let err = harness
        .service
        .delete_application(&other, &application.id)
        .expect_err("not the author");
    assert!(matches!(err, PipelineError::ApplicationNotFound));
    assert!(harness.blobs.contains(&url));

    harness
        .service
        .delete_application(&owner, &application.id)
        .expect("deleted");
    assert!(!harness.blobs.contains(&url));
    assert!(harness
        .store
        .fetch_application(&application.id)
        .expect("fetch")
        .is_none());
}

#[test]
fn profile_cv_survives_application_deletion() {
    let harness = build_service();
    let (_, job) = seed_company_with_job(&harness.service, "Acme", "Backend Engineer");
    let candidate = seed_candidate(&harness.service, "cand-1", None);
    let first = harness
        .service
        .submit(&candidate, cv_submission(&job.id, "resume.pdf"))
        .expect("stored");
    let url = first.cv_url.clone().expect("uploaded");

    // The candidate adopts the uploaded file as their profile CV.
    harness
        .service
        .upsert_candidate_profile(&candidate, candidate_profile(Some(&url)))
        .expect("profile updated");

    harness
        .service
        .delete_application(&candidate, &first.id)
        .expect("deleted");
    assert!(harness.blobs.contains(&url));
}

#[test]
fn concurrent_writers_are_retried_then_reported() {
    let store = Arc::new(ContendedStore::default());
    let service = PipelineService::new(
        Arc::clone(&store),
        Arc::new(MemoryBlobStore::default()),
        PipelineSettings::default(),
    );
    let (company, job) = seed_company_with_job(&service, "Acme", "Backend Engineer");
    let candidate = seed_candidate(&service, "cand-1", None);
    let application = service
        .submit(&candidate, plain_submission(&job.id))
        .expect("stored");

    store.interfere(2);
    let view = service
        .set_status(&company, &application.id, ApplicationStatus::InProgress)
        .expect("third attempt wins");
    assert_eq!(view.status, ApplicationStatus::InProgress);
    assert_eq!(view.revision, 3);

    store.interfere(10);
    let err = service
        .add_step(&company, &application.id, "Onsite")
        .expect_err("retries exhausted");
    assert!(matches!(err, PipelineError::ConcurrentUpdate));
}

#[test]
fn jobs_are_updated_only_by_their_owner() {
    let harness = build_service();
    let (acme, job) = seed_company_with_job(&harness.service, "Acme", "Backend Engineer");
    let (globex, _) = seed_company_with_job(&harness.service, "Globex", "Data Analyst");

    let err = harness
        .service
        .update_job(
            &globex,
            &job.id,
            JobPatch {
                title: Some("Hijacked".to_string()),
                ..JobPatch::default()
            },
        )
        .expect_err("not owned");
    assert!(matches!(err, PipelineError::JobNotFound));

    let updated = harness
        .service
        .update_job(
            &acme,
            &job.id,
            JobPatch {
                salary_range: Some("  ".to_string()),
                location: Some("Remote".to_string()),
                ..JobPatch::default()
            },
        )
        .expect("owner updates");
    assert_eq!(updated.title, "Backend Engineer");
    assert_eq!(updated.location, "Remote");
    assert_eq!(updated.salary_range, "Negotiable");

    let err = harness
        .service
        .update_job(
            &acme,
            &job.id,
            JobPatch {
                description: Some("short".to_string()),
                ..JobPatch::default()
            },
        )
        .expect_err("description too short");
    assert!(matches!(err, PipelineError::Invalid(_)));
}

#[test]
fn jobs_require_a_company_profile() {
    let harness = build_service();
    let err = harness
        .service
        .create_job(&CompanyId::from("ghost"), job_draft("Backend Engineer"))
        .expect_err("no profile");
    assert!(matches!(err, PipelineError::CompanyNotFound));
}

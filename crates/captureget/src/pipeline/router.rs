use std::sync::Arc;

use axum::async_trait;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{
    DefaultBodyLimit, FromRef, FromRequest, FromRequestParts, Multipart, Path, Request, State,
};
use axum::http::header::CONTENT_TYPE;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;

use super::blob::{BlobStore, BlobUpload};
use super::domain::{ApplicationId, CustomFieldId, JobId, StepId};
use super::repository::PipelineStore;
use super::requests::{
    ApplicationSubmission, ArchiveQuery, CandidateProfileInput, CompanyApplicationQuery,
    CompanyProfileInput, CustomFieldDraft, CustomFieldValuesInput, JobDraft, JobPatch,
    StatusChange, StepDraft, StepUpdate, SubmissionBody,
};
use super::service::PipelineService;
use super::views::CandidateApplicationView;
use crate::error::ApiError;
use crate::identity::{CandidateIdentity, CompanyIdentity, TokenKeys};
use crate::pagination::{PageQuery, PageRequest};

/// Headroom for multipart boundaries and text fields on top of the file size limit.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Shared handler state: the pipeline service plus the keys that authenticate callers.
pub struct PipelineState<S, B> {
    pub service: Arc<PipelineService<S, B>>,
    pub tokens: TokenKeys,
}

impl<S, B> Clone for PipelineState<S, B> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            tokens: self.tokens.clone(),
        }
    }
}

impl<S, B> FromRef<PipelineState<S, B>> for TokenKeys {
    fn from_ref(state: &PipelineState<S, B>) -> Self {
        state.tokens.clone()
    }
}

/// Router exposing jobs, applications, interview steps, custom fields, profiles and job
/// statistics.
pub fn pipeline_router<S, B>(state: PipelineState<S, B>) -> Router
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    let body_limit = state.service.settings().max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        .route("/applications", post(submit_handler::<S, B>))
        .route("/applications/user", get(candidate_applications_handler::<S, B>))
        .route("/applications/company", get(company_applications_handler::<S, B>))
        .route(
            "/applications/:application_id",
            get(company_application_handler::<S, B>)
                .patch(status_handler::<S, B>)
                .delete(delete_application_handler::<S, B>),
        )
        .route(
            "/applications/:application_id/steps",
            post(add_step_handler::<S, B>),
        )
        .route(
            "/applications/:application_id/steps/:step_id",
            patch(update_step_handler::<S, B>),
        )
        .route(
            "/applications/:application_id/custom-fields",
            patch(custom_values_handler::<S, B>),
        )
        .route(
            "/custom-fields",
            post(create_custom_field_handler::<S, B>).get(custom_fields_handler::<S, B>),
        )
        .route(
            "/custom-fields/:field_id",
            axum::routing::delete(delete_custom_field_handler::<S, B>),
        )
        .route(
            "/jobs",
            post(create_job_handler::<S, B>).get(jobs_handler::<S, B>),
        )
        .route(
            "/jobs/:job_id",
            get(job_handler::<S, B>)
                .patch(update_job_handler::<S, B>)
                .delete(delete_job_handler::<S, B>),
        )
        .route("/job-stats", get(job_stats_handler::<S, B>))
        .route(
            "/company/profile",
            get(company_profile_handler::<S, B>).put(save_company_profile_handler::<S, B>),
        )
        .route(
            "/user/profile",
            get(candidate_profile_handler::<S, B>).put(save_candidate_profile_handler::<S, B>),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// JSON body whose rejections render as validation errors.
pub(crate) struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(request, state)
            .await
            .map_err(|rejection: JsonRejection| ApiError::from(rejection))?;
        Ok(Self(value))
    }
}

/// Query string whose rejections render as validation errors.
pub(crate) struct ApiQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let axum::extract::Query(value) =
            axum::extract::Query::<T>::from_request_parts(parts, state)
                .await
                .map_err(|rejection: QueryRejection| ApiError::from(rejection))?;
        Ok(Self(value))
    }
}

fn page_request(query: PageQuery) -> Result<PageRequest, ApiError> {
    Ok(PageRequest::try_from(query)?)
}

fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"))
}

async fn read_multipart_submission(
    mut multipart: Multipart,
) -> Result<ApplicationSubmission, ApiError> {
    let mut job_id = None;
    let mut message = String::new();
    let mut cv = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("jobId") => job_id = Some(JobId(field.text().await?.trim().to_string())),
            Some("message") => message = field.text().await?,
            Some("cv") => {
                let file_name = field.file_name().map(str::to_string);
                let bytes = field.bytes().await?;
                // An untouched file input arrives as an unnamed, empty part.
                if bytes.is_empty() && file_name.as_deref().map_or(true, str::is_empty) {
                    cv = None;
                    continue;
                }
                let file_name = file_name
                    .ok_or_else(|| ApiError::Validation("cv must be sent as a file".into()))?;
                cv = Some(BlobUpload {
                    file_name,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }

    let job_id = job_id.ok_or_else(|| ApiError::Validation("jobId is required".into()))?;
    Ok(ApplicationSubmission {
        job_id,
        message,
        cv,
    })
}

pub(crate) async fn submit_handler<S, B>(
    State(state): State<PipelineState<S, B>>,
    CandidateIdentity(candidate_id): CandidateIdentity,
    request: Request,
) -> Result<Response, ApiError>
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    let submission = if is_multipart(&request) {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
        read_multipart_submission(multipart).await?
    } else {
        let ApiJson(body) = ApiJson::<SubmissionBody>::from_request(request, &state).await?;
        ApplicationSubmission::from(body)
    };

    let application = state.service.submit(&candidate_id, submission)?;
    let job = state.service.job(&application.job_id).ok();
    let view = CandidateApplicationView::new(application, job.as_ref());
    Ok((StatusCode::CREATED, Json(view)).into_response())
}

pub(crate) async fn candidate_applications_handler<S, B>(
    State(state): State<PipelineState<S, B>>,
    CandidateIdentity(candidate_id): CandidateIdentity,
    ApiQuery(page): ApiQuery<PageQuery>,
) -> Result<Response, ApiError>
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    let page = page_request(page)?;
    let listing = state.service.applications_for_candidate(&candidate_id, &page)?;
    Ok(Json(listing).into_response())
}

pub(crate) async fn company_applications_handler<S, B>(
    State(state): State<PipelineState<S, B>>,
    CompanyIdentity(company_id): CompanyIdentity,
    ApiQuery(page): ApiQuery<PageQuery>,
    ApiQuery(filter): ApiQuery<CompanyApplicationQuery>,
) -> Result<Response, ApiError>
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    let page = page_request(page)?;
    let listing = state
        .service
        .applications_for_company(&company_id, filter, &page)?;
    Ok(Json(listing).into_response())
}

pub(crate) async fn company_application_handler<S, B>(
    State(state): State<PipelineState<S, B>>,
    CompanyIdentity(company_id): CompanyIdentity,
    Path(application_id): Path<String>,
) -> Result<Response, ApiError>
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    let view = state
        .service
        .application_for_company(&company_id, &ApplicationId(application_id))?;
    Ok(Json(view).into_response())
}

pub(crate) async fn status_handler<S, B>(
    State(state): State<PipelineState<S, B>>,
    CompanyIdentity(company_id): CompanyIdentity,
    Path(application_id): Path<String>,
    ApiJson(change): ApiJson<StatusChange>,
) -> Result<Response, ApiError>
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    let view = state.service.set_status(
        &company_id,
        &ApplicationId(application_id),
        change.status,
    )?;
    Ok(Json(view).into_response())
}

pub(crate) async fn delete_application_handler<S, B>(
    State(state): State<PipelineState<S, B>>,
    CandidateIdentity(candidate_id): CandidateIdentity,
    Path(application_id): Path<String>,
) -> Result<Response, ApiError>
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    state
        .service
        .delete_application(&candidate_id, &ApplicationId(application_id))?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub(crate) async fn add_step_handler<S, B>(
    State(state): State<PipelineState<S, B>>,
    CompanyIdentity(company_id): CompanyIdentity,
    Path(application_id): Path<String>,
    ApiJson(draft): ApiJson<StepDraft>,
) -> Result<Response, ApiError>
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    let view = state
        .service
        .add_step(&company_id, &ApplicationId(application_id), &draft.name)?;
    Ok((StatusCode::CREATED, Json(view)).into_response())
}

pub(crate) async fn update_step_handler<S, B>(
    State(state): State<PipelineState<S, B>>,
    CompanyIdentity(company_id): CompanyIdentity,
    Path((application_id, step_id)): Path<(String, String)>,
    ApiJson(update): ApiJson<StepUpdate>,
) -> Result<Response, ApiError>
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    let view = state.service.update_step(
        &company_id,
        &ApplicationId(application_id),
        &StepId(step_id),
        update,
    )?;
    Ok(Json(view).into_response())
}

pub(crate) async fn custom_values_handler<S, B>(
    State(state): State<PipelineState<S, B>>,
    CompanyIdentity(company_id): CompanyIdentity,
    Path(application_id): Path<String>,
    ApiJson(input): ApiJson<CustomFieldValuesInput>,
) -> Result<Response, ApiError>
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    let view = state.service.set_custom_values(
        &company_id,
        &ApplicationId(application_id),
        &input.custom_fields,
    )?;
    Ok(Json(view).into_response())
}

pub(crate) async fn create_custom_field_handler<S, B>(
    State(state): State<PipelineState<S, B>>,
    CompanyIdentity(company_id): CompanyIdentity,
    ApiJson(draft): ApiJson<CustomFieldDraft>,
) -> Result<Response, ApiError>
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    let definition = state.service.create_custom_field(&company_id, draft)?;
    Ok((StatusCode::CREATED, Json(definition)).into_response())
}

pub(crate) async fn custom_fields_handler<S, B>(
    State(state): State<PipelineState<S, B>>,
    CompanyIdentity(company_id): CompanyIdentity,
) -> Result<Response, ApiError>
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    let definitions = state.service.custom_fields(&company_id)?;
    Ok(Json(definitions).into_response())
}

pub(crate) async fn delete_custom_field_handler<S, B>(
    State(state): State<PipelineState<S, B>>,
    CompanyIdentity(company_id): CompanyIdentity,
    Path(field_id): Path<String>,
) -> Result<Response, ApiError>
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    state
        .service
        .delete_custom_field(&company_id, &CustomFieldId(field_id))?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub(crate) async fn create_job_handler<S, B>(
    State(state): State<PipelineState<S, B>>,
    CompanyIdentity(company_id): CompanyIdentity,
    ApiJson(draft): ApiJson<JobDraft>,
) -> Result<Response, ApiError>
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    let job = state.service.create_job(&company_id, draft)?;
    Ok((StatusCode::CREATED, Json(job)).into_response())
}

pub(crate) async fn jobs_handler<S, B>(
    State(state): State<PipelineState<S, B>>,
    ApiQuery(page): ApiQuery<PageQuery>,
) -> Result<Response, ApiError>
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    let page = page_request(page)?;
    Ok(Json(state.service.jobs(&page)?).into_response())
}

pub(crate) async fn job_handler<S, B>(
    State(state): State<PipelineState<S, B>>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError>
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    Ok(Json(state.service.job(&JobId(job_id))?).into_response())
}

pub(crate) async fn update_job_handler<S, B>(
    State(state): State<PipelineState<S, B>>,
    CompanyIdentity(company_id): CompanyIdentity,
    Path(job_id): Path<String>,
    ApiJson(patch): ApiJson<JobPatch>,
) -> Result<Response, ApiError>
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    let job = state.service.update_job(&company_id, &JobId(job_id), patch)?;
    Ok(Json(job).into_response())
}

pub(crate) async fn delete_job_handler<S, B>(
    State(state): State<PipelineState<S, B>>,
    CompanyIdentity(company_id): CompanyIdentity,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError>
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    let archive = state.service.delete_job(&company_id, &JobId(job_id))?;
    Ok(Json(archive).into_response())
}

pub(crate) async fn job_stats_handler<S, B>(
    State(state): State<PipelineState<S, B>>,
    CompanyIdentity(company_id): CompanyIdentity,
    ApiQuery(page): ApiQuery<PageQuery>,
    ApiQuery(query): ApiQuery<ArchiveQuery>,
) -> Result<Response, ApiError>
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    let page = page_request(page)?;
    let stats = state.service.job_stats(&company_id, query, &page)?;
    Ok(Json(stats).into_response())
}

pub(crate) async fn company_profile_handler<S, B>(
    State(state): State<PipelineState<S, B>>,
    CompanyIdentity(company_id): CompanyIdentity,
) -> Result<Response, ApiError>
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    Ok(Json(state.service.company_profile(&company_id)?).into_response())
}

pub(crate) async fn save_company_profile_handler<S, B>(
    State(state): State<PipelineState<S, B>>,
    CompanyIdentity(company_id): CompanyIdentity,
    ApiJson(input): ApiJson<CompanyProfileInput>,
) -> Result<Response, ApiError>
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    let company = state.service.upsert_company_profile(&company_id, input)?;
    Ok(Json(company).into_response())
}

pub(crate) async fn candidate_profile_handler<S, B>(
    State(state): State<PipelineState<S, B>>,
    CandidateIdentity(candidate_id): CandidateIdentity,
) -> Result<Response, ApiError>
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    Ok(Json(state.service.candidate_profile(&candidate_id)?).into_response())
}

pub(crate) async fn save_candidate_profile_handler<S, B>(
    State(state): State<PipelineState<S, B>>,
    CandidateIdentity(candidate_id): CandidateIdentity,
    ApiJson(input): ApiJson<CandidateProfileInput>,
) -> Result<Response, ApiError>
where
    S: PipelineStore + 'static,
    B: BlobStore + 'static,
{
    let candidate = state.service.upsert_candidate_profile(&candidate_id, input)?;
    Ok(Json(candidate).into_response())
}

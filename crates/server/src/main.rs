use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use shared::{
    domain::{ArtifactKind, Identity, MilestoneId, ProjectId},
    error::{ApiError, ErrorCode},
    protocol::{
        GradeSet, MemberAdd, MemberOut, MilestoneCreate, MilestoneOut, ProfileOut, ProfilePatch,
        ProjectCreate, ProjectOut, ProjectPatch, RatingRow, SubmissionOut, WipeRequest,
        WipeSummary,
    },
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};

mod config;
mod files;
mod identity;

use config::{load_settings, prepare_database_url};
use files::ArtifactStore;
use identity::Caller;
use server_api::{
    add_member, compute_rating, create_project, get_profile, get_project, list_members,
    list_milestones, list_projects, milestones_with_state, publish_milestone, record_artifact,
    set_grade, update_profile, update_project, wipe_all, ApiContext,
};

#[derive(Clone)]
struct AppState {
    api: ApiContext,
    files: ArtifactStore,
}

const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let state = AppState {
        api: ApiContext::new(storage),
        files: ArtifactStore::new(&settings.upload_dir),
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/me", get(http_me))
        .route("/api/profile", get(http_get_profile).post(http_update_profile))
        .route("/api/projects", get(http_list_projects).post(http_create_project))
        .route(
            "/api/projects/:project_id",
            get(http_get_project).put(http_update_project),
        )
        .route(
            "/api/projects/:project_id/members",
            get(http_list_members).post(http_add_member),
        )
        .route(
            "/api/milestones",
            get(http_list_milestones).post(http_publish_milestone),
        )
        .route(
            "/api/projects/:project_id/milestones/with-state",
            get(http_milestones_with_state),
        )
        .route(
            "/api/projects/:project_id/milestones/:milestone_id/files",
            post(upload_artifacts),
        )
        .route(
            "/api/projects/:project_id/milestones/:milestone_id/grade",
            post(http_set_grade),
        )
        .route(
            "/api/files/:project_id/:milestone_id/:kind",
            get(download_artifact),
        )
        .route("/api/rating", get(http_rating))
        .route("/api/admin/wipe", post(http_wipe))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_UPLOAD_BYTES))
        .with_state(state)
}

type ApiResponse<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

fn reject(error: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match error.code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Conflict | ErrorCode::InvalidTransition | ErrorCode::CapacityExceeded => {
            StatusCode::CONFLICT
        }
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(error))
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    state
        .api
        .storage
        .health_check()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok("ok")
}

async fn http_me(Caller(identity): Caller) -> Json<Identity> {
    Json(identity)
}

async fn http_get_profile(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
) -> ApiResponse<ProfileOut> {
    let profile = get_profile(&state.api, &identity).await.map_err(reject)?;
    Ok(Json(profile))
}

async fn http_update_profile(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Json(patch): Json<ProfilePatch>,
) -> ApiResponse<ProfileOut> {
    let profile = update_profile(&state.api, &identity, &patch)
        .await
        .map_err(reject)?;
    Ok(Json(profile))
}

async fn http_list_projects(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
) -> ApiResponse<Vec<ProjectOut>> {
    let projects = list_projects(&state.api, &identity).await.map_err(reject)?;
    Ok(Json(projects))
}

async fn http_create_project(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Json(payload): Json<ProjectCreate>,
) -> Result<(StatusCode, Json<ProjectOut>), (StatusCode, Json<ApiError>)> {
    let project = create_project(&state.api, &identity, &payload)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn http_get_project(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Path(project_id): Path<i64>,
) -> ApiResponse<ProjectOut> {
    let project = get_project(&state.api, &identity, ProjectId(project_id))
        .await
        .map_err(reject)?;
    Ok(Json(project))
}

async fn http_update_project(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Path(project_id): Path<i64>,
    Json(patch): Json<ProjectPatch>,
) -> ApiResponse<ProjectOut> {
    let project = update_project(&state.api, &identity, ProjectId(project_id), &patch)
        .await
        .map_err(reject)?;
    Ok(Json(project))
}

async fn http_list_members(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Path(project_id): Path<i64>,
) -> ApiResponse<Vec<MemberOut>> {
    let members = list_members(&state.api, &identity, ProjectId(project_id))
        .await
        .map_err(reject)?;
    Ok(Json(members))
}

async fn http_add_member(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Path(project_id): Path<i64>,
    Json(payload): Json<MemberAdd>,
) -> Result<(StatusCode, Json<MemberOut>), (StatusCode, Json<ApiError>)> {
    let member = add_member(&state.api, &identity, ProjectId(project_id), &payload)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(member)))
}

async fn http_list_milestones(
    State(state): State<Arc<AppState>>,
    Caller(_identity): Caller,
) -> ApiResponse<Vec<MilestoneOut>> {
    let milestones = list_milestones(&state.api).await.map_err(reject)?;
    Ok(Json(milestones))
}

async fn http_publish_milestone(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Json(payload): Json<MilestoneCreate>,
) -> Result<(StatusCode, Json<MilestoneOut>), (StatusCode, Json<ApiError>)> {
    let milestone = publish_milestone(&state.api, &identity, &payload)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(milestone)))
}

async fn http_milestones_with_state(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Path(project_id): Path<i64>,
) -> ApiResponse<Vec<SubmissionOut>> {
    let rows = milestones_with_state(&state.api, &identity, ProjectId(project_id))
        .await
        .map_err(reject)?;
    Ok(Json(rows))
}

/// Multipart upload of milestone artifacts. Accepts `presentation` and
/// `report` file fields; unknown fields are skipped.
async fn upload_artifacts(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Path((project_id, milestone_id)): Path<(i64, i64)>,
    mut multipart: Multipart,
) -> ApiResponse<SubmissionOut> {
    let project_id = ProjectId(project_id);
    let milestone_id = MilestoneId(milestone_id);

    // authorize before touching the disk
    get_project(&state.api, &identity, project_id)
        .await
        .map_err(reject)?;

    let mut submission = None;
    loop {
        let field = multipart.next_field().await.map_err(|error| {
            reject(ApiError::new(ErrorCode::Validation, error.to_string()))
        })?;
        let Some(field) = field else {
            break;
        };
        let Some(kind) = field.name().and_then(ArtifactKind::parse) else {
            continue;
        };
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(|error| {
            reject(ApiError::new(ErrorCode::Validation, error.to_string()))
        })?;
        if bytes.is_empty() {
            return Err(reject(ApiError::new(
                ErrorCode::Validation,
                format!("{} file is empty", kind.as_str()),
            )));
        }

        let reference = state
            .files
            .save(project_id, milestone_id, kind, &filename, &bytes)
            .await
            .map_err(|error| {
                reject(ApiError::new(ErrorCode::Internal, error.to_string()))
            })?;
        let updated = record_artifact(
            &state.api,
            &identity,
            project_id,
            milestone_id,
            kind,
            &reference,
        )
        .await
        .map_err(reject)?;
        submission = Some(updated);
    }

    submission.map(Json).ok_or_else(|| {
        reject(ApiError::new(
            ErrorCode::Validation,
            "expected a 'presentation' or 'report' file field",
        ))
    })
}

async fn http_set_grade(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Path((project_id, milestone_id)): Path<(i64, i64)>,
    Json(payload): Json<GradeSet>,
) -> ApiResponse<SubmissionOut> {
    let submission = set_grade(
        &state.api,
        &identity,
        ProjectId(project_id),
        MilestoneId(milestone_id),
        &payload,
    )
    .await
    .map_err(reject)?;
    Ok(Json(submission))
}

async fn download_artifact(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Path((project_id, milestone_id, kind)): Path<(i64, i64, String)>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiError>)> {
    let kind = ArtifactKind::parse(&kind).ok_or_else(|| {
        reject(ApiError::new(
            ErrorCode::Validation,
            "kind must be 'presentation' or 'report'",
        ))
    })?;
    let reference = server_api::artifact_ref(
        &state.api,
        &identity,
        ProjectId(project_id),
        MilestoneId(milestone_id),
        kind,
    )
    .await
    .map_err(reject)?;

    let bytes = tokio::fs::read(state.files.resolve(&reference))
        .await
        .map_err(|_| reject(ApiError::new(ErrorCode::NotFound, "artifact file is missing")))?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    let filename = reference.rsplit('/').next().unwrap_or("file.bin");
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\"")) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok((StatusCode::OK, headers, bytes))
}

async fn http_rating(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
) -> ApiResponse<Vec<RatingRow>> {
    let rows = compute_rating(&state.api, &identity).await.map_err(reject)?;
    Ok(Json(rows))
}

async fn http_wipe(
    State(state): State<Arc<AppState>>,
    Caller(identity): Caller,
    Json(payload): Json<WipeRequest>,
) -> ApiResponse<WipeSummary> {
    let summary = wipe_all(&state.api, &identity, &payload.confirmation)
        .await
        .map_err(reject)?;
    if let Err(error) = state.files.clear().await {
        error!(%error, "failed to clear the upload directory after wipe");
    }
    Ok(Json(summary))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;

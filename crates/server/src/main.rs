use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use planning::CommitmentWindow;
use serde::Deserialize;
use server_api::{ApiContext, AuthConfig, Session};
use shared::{
    domain::{RequestId, RequestStatus, TipoLocalId, TipologiaId, WorkRequest},
    error::{ApiError, ErrorCode},
    protocol::{
        ApprovalBody, ApproveResponse, CommitmentScheduleResponse, CreateProfileRequest,
        CreateTipoLocalRequest, CreateTipologiaRequest, CreateUserRequest, LoginRequest,
        ProfileSummary, ReclassifyBody, RequestListResponse, SessionResponse,
        SetRecordStatusRequest, TipoLocalSummary, TipologiaSummary, UnitSummary,
        UpdateRequestBody, UpdateTipoLocalRequest, UpdateTipologiaRequest, UpdateUserRequest,
        UserSummary,
    },
};
use storage::Storage;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer};
use tracing::{error, info};

mod config;

use config::{load_settings, prepare_database_url};

#[derive(Clone)]
struct AppState {
    api: ApiContext,
}

#[derive(Debug, Deserialize)]
struct ReferenceQuery {
    #[serde(default)]
    only_active: bool,
}

#[derive(Debug, Deserialize)]
struct ListRequestsQuery {
    status: Option<RequestStatus>,
    limit: Option<u32>,
    before: Option<i64>,
}

const MAX_BODY_BYTES: usize = 256 * 1024;
const DEFAULT_PAGE_SIZE: u32 = 50;

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
    let api = ApiContext {
        storage,
        auth: AuthConfig {
            token_secret: settings.token_secret,
            token_ttl_seconds: settings.token_ttl_seconds,
        },
        window: CommitmentWindow::new(settings.window_first_year, settings.window_last_year),
    };

    let state = AppState { api };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "portal API listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/login", post(http_login))
        .route(
            "/api/users",
            get(http_list_users)
                .post(http_create_user)
                .put(http_update_user),
        )
        .route(
            "/api/profiles",
            get(http_list_profiles).post(http_create_profile),
        )
        .route(
            "/api/tipologias",
            get(http_list_tipologias)
                .post(http_create_tipologia)
                .put(http_rename_tipologia),
        )
        .route(
            "/api/tipologias/:tipologia_id/status",
            post(http_set_tipologia_status),
        )
        .route(
            "/api/tipo-locais",
            get(http_list_tipo_locais)
                .post(http_create_tipo_local)
                .put(http_rename_tipo_local),
        )
        .route(
            "/api/tipo-locais/:tipo_local_id/status",
            post(http_set_tipo_local_status),
        )
        .route("/api/units", get(http_list_units))
        .route(
            "/api/requests",
            get(http_list_requests)
                .post(http_open_request)
                .put(http_update_request),
        )
        .route("/api/requests/:request_id/approve", post(http_approve))
        .route(
            "/api/requests/:request_id/reclassify",
            post(http_reclassify),
        )
        .route("/api/requests/:request_id/empenhos", get(http_empenhos))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    match state.api.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "database unavailable"),
    }
}

async fn http_login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, (StatusCode, Json<ApiError>)> {
    let session = server_api::login(&state.api, &req.login)
        .await
        .map_err(reject)?;
    Ok(Json(session))
}

// ---- users & profiles ------------------------------------------------------

async fn http_list_users(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<UserSummary>>, (StatusCode, Json<ApiError>)> {
    let session = authenticate(&state, &headers)?;
    let users = server_api::list_users(&state.api, &session)
        .await
        .map_err(reject)?;
    Ok(Json(users))
}

async fn http_create_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<UserSummary>, (StatusCode, Json<ApiError>)> {
    let session = authenticate(&state, &headers)?;
    let user = server_api::create_user(&state.api, &session, req)
        .await
        .map_err(reject)?;
    Ok(Json(user))
}

async fn http_update_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<UserSummary>, (StatusCode, Json<ApiError>)> {
    let session = authenticate(&state, &headers)?;
    let user = server_api::update_user(&state.api, &session, req)
        .await
        .map_err(reject)?;
    Ok(Json(user))
}

async fn http_list_profiles(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ProfileSummary>>, (StatusCode, Json<ApiError>)> {
    let session = authenticate(&state, &headers)?;
    let profiles = server_api::list_profiles(&state.api, &session)
        .await
        .map_err(reject)?;
    Ok(Json(profiles))
}

async fn http_create_profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateProfileRequest>,
) -> Result<Json<ProfileSummary>, (StatusCode, Json<ApiError>)> {
    let session = authenticate(&state, &headers)?;
    let profile = server_api::create_profile(&state.api, &session, req)
        .await
        .map_err(reject)?;
    Ok(Json(profile))
}

// ---- reference tables ------------------------------------------------------

async fn http_list_tipologias(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<ReferenceQuery>,
) -> Result<Json<Vec<TipologiaSummary>>, (StatusCode, Json<ApiError>)> {
    let session = authenticate(&state, &headers)?;
    let tipologias = server_api::list_tipologias(&state.api, &session, q.only_active)
        .await
        .map_err(reject)?;
    Ok(Json(tipologias))
}

async fn http_create_tipologia(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateTipologiaRequest>,
) -> Result<Json<TipologiaSummary>, (StatusCode, Json<ApiError>)> {
    let session = authenticate(&state, &headers)?;
    let tipologia = server_api::create_tipologia(&state.api, &session, &req.nome)
        .await
        .map_err(reject)?;
    Ok(Json(tipologia))
}

async fn http_rename_tipologia(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<UpdateTipologiaRequest>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    let session = authenticate(&state, &headers)?;
    server_api::rename_tipologia(&state.api, &session, req.tipologia_id, &req.nome)
        .await
        .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_set_tipologia_status(
    State(state): State<Arc<AppState>>,
    Path(tipologia_id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<SetRecordStatusRequest>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    let session = authenticate(&state, &headers)?;
    server_api::set_tipologia_status(&state.api, &session, TipologiaId(tipologia_id), req.status)
        .await
        .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_list_tipo_locais(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<ReferenceQuery>,
) -> Result<Json<Vec<TipoLocalSummary>>, (StatusCode, Json<ApiError>)> {
    let session = authenticate(&state, &headers)?;
    let tipo_locais = server_api::list_tipo_locais(&state.api, &session, q.only_active)
        .await
        .map_err(reject)?;
    Ok(Json(tipo_locais))
}

async fn http_create_tipo_local(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateTipoLocalRequest>,
) -> Result<Json<TipoLocalSummary>, (StatusCode, Json<ApiError>)> {
    let session = authenticate(&state, &headers)?;
    let tipo_local = server_api::create_tipo_local(&state.api, &session, &req.nome)
        .await
        .map_err(reject)?;
    Ok(Json(tipo_local))
}

async fn http_rename_tipo_local(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<UpdateTipoLocalRequest>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    let session = authenticate(&state, &headers)?;
    server_api::rename_tipo_local(&state.api, &session, req.tipo_local_id, &req.nome)
        .await
        .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_set_tipo_local_status(
    State(state): State<Arc<AppState>>,
    Path(tipo_local_id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<SetRecordStatusRequest>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    let session = authenticate(&state, &headers)?;
    server_api::set_tipo_local_status(&state.api, &session, TipoLocalId(tipo_local_id), req.status)
        .await
        .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_list_units(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<UnitSummary>>, (StatusCode, Json<ApiError>)> {
    let session = authenticate(&state, &headers)?;
    let units = server_api::list_units(&state.api, &session)
        .await
        .map_err(reject)?;
    Ok(Json(units))
}

// ---- work requests ---------------------------------------------------------

async fn http_open_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<shared::protocol::OpenRequestRequest>,
) -> Result<Json<WorkRequest>, (StatusCode, Json<ApiError>)> {
    let session = authenticate(&state, &headers)?;
    let request = server_api::open_request(&state.api, &session, req)
        .await
        .map_err(reject)?;
    Ok(Json(request))
}

async fn http_list_requests(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<ListRequestsQuery>,
) -> Result<Json<RequestListResponse>, (StatusCode, Json<ApiError>)> {
    let session = authenticate(&state, &headers)?;
    let limit = q.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 200);
    let requests = server_api::list_requests(&state.api, &session, q.status, limit, q.before)
        .await
        .map_err(reject)?;
    // A full page means there may be older rows; the cursor is the oldest id
    // we just returned.
    let next_before = if requests.len() as u32 == limit {
        requests.last().map(|r| r.request_id.0)
    } else {
        None
    };
    Ok(Json(RequestListResponse {
        requests,
        next_before,
    }))
}

async fn http_update_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<UpdateRequestBody>,
) -> Result<Json<WorkRequest>, (StatusCode, Json<ApiError>)> {
    let session = authenticate(&state, &headers)?;
    let request = server_api::update_observacao(
        &state.api,
        &session,
        req.request_id,
        req.observacao.as_deref(),
    )
    .await
    .map_err(reject)?;
    Ok(Json(request))
}

async fn http_approve(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<ApprovalBody>,
) -> Result<Json<ApproveResponse>, (StatusCode, Json<ApiError>)> {
    let session = authenticate(&state, &headers)?;
    let decided =
        server_api::approve_request(&state.api, &session, RequestId(request_id), req.approved)
            .await
            .map_err(reject)?;
    Ok(Json(decided))
}

async fn http_reclassify(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<ReclassifyBody>,
) -> Result<Json<planning::ReclassifiedPlan>, (StatusCode, Json<ApiError>)> {
    let session = authenticate(&state, &headers)?;
    let plan =
        server_api::reclassify_request(&state.api, &session, RequestId(request_id), req.category)
            .await
            .map_err(reject)?;
    Ok(Json(plan))
}

async fn http_empenhos(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<CommitmentScheduleResponse>, (StatusCode, Json<ApiError>)> {
    let session = authenticate(&state, &headers)?;
    let schedule = server_api::commitment_schedule(&state.api, &session, RequestId(request_id))
        .await
        .map_err(reject)?;
    Ok(Json(schedule))
}

// ---- auth & error mapping --------------------------------------------------

fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Session, (StatusCode, Json<ApiError>)> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| {
            reject(ApiError::new(
                ErrorCode::Unauthorized,
                "missing bearer token",
            ))
        })?;
    server_api::verify_token(&state.api, token).map_err(reject)
}

fn reject(error: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match error.code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(error))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;

//! Asset request and approval routes.
//!
//! HTML Endpoints:
//! - `GET  /requests`                          - request board for the acting user
//!
//! JSON API Endpoints:
//! - `GET  /api/v1/requests`                   - requests in the actor's scope (`?status=`)
//! - `POST /api/v1/requests`                   - submit a new request
//! - `GET  /api/v1/requests/{id}`              - request detail with eligibility and history
//! - `GET  /api/v1/requests/{id}/approvals`    - approval history
//! - `POST /api/v1/requests/{id}/approve`      - approve at the current stage
//! - `POST /api/v1/requests/{id}/reject`       - reject at the current stage
//! - `POST /api/v1/requests/{id}/escalate`     - hand the request to the MD
//! - `GET  /api/v1/approvals/queue`            - requests the actor can act on now
//! - `GET  /api/v1/activity`                   - recent activity (Admin and MD only)
//! - `POST /api/v1/users/{id}/toggle`          - activate or deactivate a user (Admin and MD only)
//!
//! Every route identifies the acting user through the `x-actor-id` header.
//! Activity rows record the first `x-forwarded-for` hop, or the socket peer
//! when the server runs with connect info.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::Html,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};
use tracing::{info, warn};
use uuid::Uuid;

use assetdesk_core::approvals::{DecisionOutcome, Eligibility};
use assetdesk_core::audit::ActivityEntry;
use assetdesk_core::domain::approval::{ApprovalRecord, Decision};
use assetdesk_core::domain::request::{AssetRequest, NewAssetRequest, RequestId, RequestStatus};
use assetdesk_core::domain::user::{User, UserId};
use assetdesk_core::errors::{ApplicationError, InterfaceError};
use assetdesk_db::{ApprovalService, CallContext};

pub const ACTOR_HEADER: &str = "x-actor-id";
pub const CORRELATION_HEADER: &str = "x-correlation-id";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

const BOARD_TEMPLATE: &str = "requests/index.html";
const DEFAULT_PAGE_SIZE: u32 = 100;
const MAX_PAGE_SIZE: u32 = 500;
const DEFAULT_ACTIVITY_LIMIT: u32 = 50;

#[derive(Clone)]
pub struct AppState {
    service: ApprovalService,
    templates: Arc<Tera>,
}

impl AppState {
    pub fn new(service: ApprovalService, templates: Arc<Tera>) -> Self {
        Self { service, templates }
    }
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ActivityQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DecisionBody {
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EscalateBody {
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct RequestSummary {
    #[serde(flatten)]
    pub request: AssetRequest,
    pub stage_label: String,
    /// Numeric level as older reports show it; 999 once escalated to MD.
    pub legacy_level: u16,
    pub awaiting: Option<String>,
    pub can_approve: bool,
}

#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub record: ApprovalRecord,
    pub legacy_level: u16,
}

impl From<ApprovalRecord> for HistoryEntry {
    fn from(record: ApprovalRecord) -> Self {
        Self { legacy_level: record.stage.legacy_level(), record }
    }
}

#[derive(Debug, Serialize)]
pub struct RequestDetail {
    pub request: AssetRequest,
    pub stage_label: String,
    pub legacy_level: u16,
    pub awaiting: Option<String>,
    pub eligibility: Eligibility,
    pub approvals: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: &'static str,
    pub message: String,
    pub user_message: String,
    pub retryable: bool,
    pub correlation_id: String,
}

type ApiFailure = (StatusCode, Json<ApiError>);
type ApiResult<T> = Result<Json<T>, ApiFailure>;

/// Address of the calling client, when one is known.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientAddress(pub Option<String>);

impl<S> FromRequestParts<S> for ClientAddress
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get(FORWARDED_FOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string);
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(address)| address.ip().to_string());

        Ok(Self(forwarded.or(peer)))
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Loads board templates from `templates_dir` when given, falling back to the
/// embedded copy for anything the directory does not provide.
pub fn init_templates(templates_dir: Option<&FsPath>) -> Arc<Tera> {
    let mut tera = match templates_dir {
        Some(dir) => {
            let pattern = format!("{}/**/*.html", dir.display());
            match Tera::new(&pattern) {
                Ok(tera) => tera,
                Err(error) => {
                    warn!(
                        event_name = "system.templates.load_failed",
                        correlation_id = "bootstrap",
                        templates_dir = %dir.display(),
                        error = %error,
                        "failed to load templates from filesystem, using embedded templates"
                    );
                    Tera::default()
                }
            }
        }
        None => Tera::default(),
    };

    if !tera.get_template_names().any(|name| name == BOARD_TEMPLATE) {
        if let Err(error) = tera.add_raw_template(
            BOARD_TEMPLATE,
            include_str!("../../../templates/requests/index.html"),
        ) {
            warn!(
                event_name = "system.templates.embedded_failed",
                correlation_id = "bootstrap",
                error = %error,
                "embedded request board template failed to parse"
            );
        }
    }

    Arc::new(tera)
}

pub fn router(service: ApprovalService, templates: Arc<Tera>) -> Router {
    Router::new()
        // HTML routes
        .route("/requests", get(request_board))
        // JSON API routes
        .route("/api/v1/requests", get(list_requests).post(submit_request))
        .route("/api/v1/requests/{id}", get(request_detail))
        .route("/api/v1/requests/{id}/approvals", get(request_approvals))
        .route("/api/v1/requests/{id}/approve", post(approve_request))
        .route("/api/v1/requests/{id}/reject", post(reject_request))
        .route("/api/v1/requests/{id}/escalate", post(escalate_request))
        .route("/api/v1/approvals/queue", get(approval_queue))
        .route("/api/v1/activity", get(recent_activity))
        .route("/api/v1/users/{id}/toggle", post(toggle_user))
        .with_state(AppState::new(service, templates))
}

// ---------------------------------------------------------------------------
// Actor and error plumbing
// ---------------------------------------------------------------------------

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(|| format!("req-{}", Uuid::new_v4().simple()))
}

fn api_error(
    status: StatusCode,
    error: &'static str,
    message: String,
    correlation_id: &str,
) -> ApiFailure {
    (
        status,
        Json(ApiError {
            error,
            user_message: message.clone(),
            message,
            retryable: false,
            correlation_id: correlation_id.to_string(),
        }),
    )
}

fn interface_failure(error: ApplicationError, correlation_id: &str) -> ApiFailure {
    let mapped = error.into_interface(correlation_id);
    let (status, kind, retryable) = match &mapped {
        InterfaceError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request", false),
        InterfaceError::Forbidden { .. } => (StatusCode::FORBIDDEN, "forbidden", false),
        InterfaceError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found", false),
        InterfaceError::Conflict { retryable, .. } => {
            (StatusCode::CONFLICT, "conflict", *retryable)
        }
        InterfaceError::ServiceUnavailable { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", true)
        }
        InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal", false),
    };

    if status.is_server_error() {
        warn!(
            event_name = "http.request.failed",
            correlation_id,
            status = status.as_u16(),
            error = %mapped,
            "request failed"
        );
    }

    (
        status,
        Json(ApiError {
            error: kind,
            message: mapped.message().to_string(),
            user_message: mapped.user_message().to_string(),
            retryable,
            correlation_id: mapped.correlation_id().to_string(),
        }),
    )
}

async fn resolve_actor(
    state: &AppState,
    headers: &HeaderMap,
    correlation_id: &str,
) -> Result<User, ApiFailure> {
    let actor_id = headers
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    let Some(actor_id) = actor_id else {
        return Err(api_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            format!("missing `{ACTOR_HEADER}` header"),
            correlation_id,
        ));
    };

    match state.service.active_user(&UserId(actor_id.to_string())).await {
        Ok(Some(actor)) => Ok(actor),
        Ok(None) => Err(api_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            format!("actor `{actor_id}` is unknown or inactive"),
            correlation_id,
        )),
        Err(error) => Err(interface_failure(error, correlation_id)),
    }
}

fn parse_status_filter(
    raw: Option<&str>,
    correlation_id: &str,
) -> Result<Option<RequestStatus>, ApiFailure> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) if value.eq_ignore_ascii_case("all") => Ok(None),
        Some(value) => RequestStatus::parse(value).map(Some).ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                "bad_request",
                format!("unknown status filter `{value}`"),
                correlation_id,
            )
        }),
    }
}

fn call_context<'a>(correlation_id: &'a str, client: &'a ClientAddress) -> CallContext<'a> {
    CallContext::new(correlation_id).with_ip_address(client.0.as_deref())
}

/// Decision comments are optional, so an empty body is the same as `{}`.
fn decision_body(raw: &Bytes, correlation_id: &str) -> Result<DecisionBody, ApiFailure> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(DecisionBody::default());
    }
    serde_json::from_slice(raw).map_err(|error| {
        api_error(
            StatusCode::BAD_REQUEST,
            "bad_request",
            format!("invalid decision body: {error}"),
            correlation_id,
        )
    })
}

fn page_size(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

fn summarize(state: &AppState, actor: &User, request: AssetRequest) -> RequestSummary {
    let engine = state.service.engine();
    RequestSummary {
        can_approve: engine.can_approve(actor, &request),
        awaiting: engine.awaiting_label(&request),
        legacy_level: request.stage.legacy_level(),
        stage_label: request.stage.to_string(),
        request,
    }
}

// ---------------------------------------------------------------------------
// HTML Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct BoardRow {
    id: String,
    item_name: String,
    quantity: u32,
    request_type: String,
    urgency: &'static str,
    floor: String,
    status: &'static str,
    stage_label: String,
    awaiting: String,
    can_approve: bool,
    created_at: String,
}

#[derive(Debug, Default, Serialize)]
struct BoardCounts {
    total: usize,
    pending: usize,
    approved: usize,
    rejected: usize,
    awaiting_me: usize,
}

/// Render the request board for the acting user.
async fn request_board(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Html<String>, (StatusCode, Html<String>)> {
    let correlation_id = correlation_id(&headers);
    let html_error = |(status, Json(error)): ApiFailure| {
        (status, Html(format!("<h1>Error</h1><p>{}</p>", error.user_message)))
    };

    let actor = resolve_actor(&state, &headers, &correlation_id).await.map_err(html_error)?;
    let status =
        parse_status_filter(query.status.as_deref(), &correlation_id).map_err(html_error)?;
    let requests = state
        .service
        .list_visible(&actor, status, page_size(query.limit))
        .await
        .map_err(|error| html_error(interface_failure(error, &correlation_id)))?;

    let mut counts = BoardCounts { total: requests.len(), ..BoardCounts::default() };
    let rows: Vec<BoardRow> = requests
        .into_iter()
        .map(|request| {
            let summary = summarize(&state, &actor, request);
            match summary.request.status {
                RequestStatus::Pending => counts.pending += 1,
                RequestStatus::Approved | RequestStatus::Fulfilled => counts.approved += 1,
                RequestStatus::Rejected => counts.rejected += 1,
            }
            if summary.can_approve {
                counts.awaiting_me += 1;
            }
            BoardRow {
                id: summary.request.id.0,
                item_name: summary.request.item_name,
                quantity: summary.request.quantity,
                request_type: summary.request.request_type,
                urgency: summary.request.urgency.as_str(),
                floor: summary.request.floor.unwrap_or_default(),
                status: summary.request.status.as_str(),
                stage_label: summary.stage_label,
                awaiting: summary.awaiting.unwrap_or_default(),
                can_approve: summary.can_approve,
                created_at: summary.request.created_at.format("%Y-%m-%d %H:%M").to_string(),
            }
        })
        .collect();

    let mut context = Context::new();
    context.insert("actor_name", &actor.full_name);
    context.insert("actor_role", actor.role.as_str());
    context.insert("requests", &rows);
    context.insert("counts", &counts);
    context.insert("selected_status", status.map(RequestStatus::as_str).unwrap_or("all"));

    state.templates.render(BOARD_TEMPLATE, &context).map(Html).map_err(|error| {
        warn!(
            event_name = "http.board.render_failed",
            correlation_id = %correlation_id,
            error = %error,
            "request board template failed to render"
        );
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html("<h1>Error</h1><p>The request board could not be rendered.</p>".to_string()),
        )
    })
}

// ---------------------------------------------------------------------------
// JSON Handlers
// ---------------------------------------------------------------------------

pub async fn list_requests(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<RequestSummary>> {
    let correlation_id = correlation_id(&headers);
    let actor = resolve_actor(&state, &headers, &correlation_id).await?;
    let status = parse_status_filter(query.status.as_deref(), &correlation_id)?;

    let requests = state
        .service
        .list_visible(&actor, status, page_size(query.limit))
        .await
        .map_err(|error| interface_failure(error, &correlation_id))?;

    Ok(Json(requests.into_iter().map(|request| summarize(&state, &actor, request)).collect()))
}

pub async fn submit_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    client: ClientAddress,
    Json(body): Json<NewAssetRequest>,
) -> Result<(StatusCode, Json<RequestSummary>), ApiFailure> {
    let correlation_id = correlation_id(&headers);
    let actor = resolve_actor(&state, &headers, &correlation_id).await?;

    let request = state
        .service
        .submit_request(&actor, body, call_context(&correlation_id, &client))
        .await
        .map_err(|error| interface_failure(error, &correlation_id))?;

    Ok((StatusCode::CREATED, Json(summarize(&state, &actor, request))))
}

pub async fn request_detail(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<RequestDetail> {
    let correlation_id = correlation_id(&headers);
    let actor = resolve_actor(&state, &headers, &correlation_id).await?;
    let id = RequestId(id);

    let request = state
        .service
        .visible_request(&actor, &id)
        .await
        .map_err(|error| interface_failure(error, &correlation_id))?;
    let approvals = state
        .service
        .history(&actor, &id)
        .await
        .map_err(|error| interface_failure(error, &correlation_id))?;

    let engine = state.service.engine();
    Ok(Json(RequestDetail {
        eligibility: engine.eligibility(&actor, &request),
        awaiting: engine.awaiting_label(&request),
        legacy_level: request.stage.legacy_level(),
        stage_label: request.stage.to_string(),
        request,
        approvals: approvals.into_iter().map(HistoryEntry::from).collect(),
    }))
}

pub async fn request_approvals(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Vec<HistoryEntry>> {
    let correlation_id = correlation_id(&headers);
    let actor = resolve_actor(&state, &headers, &correlation_id).await?;

    state
        .service
        .history(&actor, &RequestId(id))
        .await
        .map(|records| Json(records.into_iter().map(HistoryEntry::from).collect()))
        .map_err(|error| interface_failure(error, &correlation_id))
}

async fn decide(
    state: AppState,
    headers: HeaderMap,
    client: ClientAddress,
    id: String,
    decision: Decision,
    raw_body: Bytes,
) -> ApiResult<DecisionOutcome> {
    let correlation_id = correlation_id(&headers);
    let actor = resolve_actor(&state, &headers, &correlation_id).await?;
    let comments = decision_body(&raw_body, &correlation_id)?.comments.unwrap_or_default();

    let outcome = state
        .service
        .decide(
            &actor,
            &RequestId(id),
            decision,
            &comments,
            call_context(&correlation_id, &client),
        )
        .await
        .map_err(|error| interface_failure(error, &correlation_id))?;

    info!(
        event_name = "http.request.decided",
        correlation_id = %correlation_id,
        request_id = %outcome.request.id,
        action = outcome.record.action.as_str(),
        advanced = outcome.advanced(),
        "decision accepted"
    );
    Ok(Json(outcome))
}

pub async fn approve_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    client: ClientAddress,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<DecisionOutcome> {
    decide(state, headers, client, id, Decision::Approve, body).await
}

pub async fn reject_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    client: ClientAddress,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<DecisionOutcome> {
    decide(state, headers, client, id, Decision::Reject, body).await
}

pub async fn escalate_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    client: ClientAddress,
    Path(id): Path<String>,
    Json(body): Json<EscalateBody>,
) -> ApiResult<DecisionOutcome> {
    let correlation_id = correlation_id(&headers);
    let actor = resolve_actor(&state, &headers, &correlation_id).await?;

    state
        .service
        .escalate(&actor, &RequestId(id), &body.reason, call_context(&correlation_id, &client))
        .await
        .map(Json)
        .map_err(|error| interface_failure(error, &correlation_id))
}

pub async fn approval_queue(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Vec<RequestSummary>> {
    let correlation_id = correlation_id(&headers);
    let actor = resolve_actor(&state, &headers, &correlation_id).await?;

    let queue = state
        .service
        .approval_queue(&actor)
        .await
        .map_err(|error| interface_failure(error, &correlation_id))?;

    Ok(Json(queue.into_iter().map(|request| summarize(&state, &actor, request)).collect()))
}

pub async fn recent_activity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ActivityQuery>,
) -> ApiResult<Vec<ActivityEntry>> {
    let correlation_id = correlation_id(&headers);
    let actor = resolve_actor(&state, &headers, &correlation_id).await?;

    if !actor.role.manages_users() {
        return Err(api_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "only Admin and MD users may view the activity log".to_string(),
            &correlation_id,
        ));
    }

    let limit = query.limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT).clamp(1, MAX_PAGE_SIZE);
    state
        .service
        .recent_activity(limit)
        .await
        .map(Json)
        .map_err(|error| interface_failure(error, &correlation_id))
}

pub async fn toggle_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    client: ClientAddress,
    Path(id): Path<String>,
) -> ApiResult<User> {
    let correlation_id = correlation_id(&headers);
    let actor = resolve_actor(&state, &headers, &correlation_id).await?;

    state
        .service
        .toggle_user(&actor, &UserId(id), call_context(&correlation_id, &client))
        .await
        .map(Json)
        .map_err(|error| interface_failure(error, &correlation_id))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        extract::{Path, Query, State},
        http::{HeaderMap, HeaderValue, Request, StatusCode},
        Json,
    };
    use rust_decimal::Decimal;
    use serde_json::Value;
    use tower::ServiceExt;

    use assetdesk_core::domain::request::{ApprovalStage, NewAssetRequest, RequestStatus, Urgency};
    use assetdesk_db::{connect_with_settings, migrations, ApprovalService, DemoSeedDataset};

    use super::*;

    async fn setup() -> ApprovalService {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        DemoSeedDataset::load(&pool).await.expect("seed");
        ApprovalService::new(pool)
    }

    fn templates() -> Arc<Tera> {
        let mut tera = Tera::default();
        tera.add_raw_template(
            BOARD_TEMPLATE,
            "{{ actor_role | safe }}|{{ counts.total }}|{% for r in requests %}{{ r.id }}:{{ r.can_approve }}:{{ r.awaiting | safe }};{% endfor %}",
        )
        .expect("template");
        Arc::new(tera)
    }

    fn state(service: ApprovalService) -> State<AppState> {
        State(AppState::new(service, templates()))
    }

    fn actor(id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACTOR_HEADER, HeaderValue::from_str(id).expect("header"));
        headers
    }

    fn post(uri: &str, actor_id: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(ACTOR_HEADER, actor_id)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn missing_or_unknown_actor_is_unauthorized() {
        let service = setup().await;

        let (status, Json(error)) =
            list_requests(state(service.clone()), HeaderMap::new(), Query(ListQuery::default()))
                .await
                .expect_err("no actor");
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error.error, "unauthorized");

        let (status, _) =
            list_requests(state(service), actor("u-nobody"), Query(ListQuery::default()))
                .await
                .expect_err("unknown actor");
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn concern_manager_lists_only_their_floor_with_approve_flags() {
        let service = setup().await;

        let Json(rows) = list_requests(
            state(service),
            actor(DemoSeedDataset::CONCERN_MANAGER_SECOND),
            Query(ListQuery::default()),
        )
        .await
        .expect("list");

        let ids: Vec<&str> = rows.iter().map(|row| row.request.id.0.as_str()).collect();
        assert_eq!(
            ids,
            vec![DemoSeedDataset::CONCERN_MANAGER_REQUEST, DemoSeedDataset::EMPLOYEE_REQUEST]
        );
        let flags: Vec<bool> = rows.iter().map(|row| row.can_approve).collect();
        assert_eq!(flags, vec![false, true], "own request is never approvable");
    }

    #[tokio::test]
    async fn unknown_status_filter_is_bad_request() {
        let service = setup().await;

        let (status, Json(error)) = list_requests(
            state(service),
            actor(DemoSeedDataset::MD),
            Query(ListQuery { status: Some("archived".to_string()), limit: None }),
        )
        .await
        .expect_err("bad filter");

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(error.message.contains("archived"));
    }

    #[tokio::test]
    async fn submit_creates_pending_level_one_request() {
        let service = setup().await;

        let (status, Json(created)) = submit_request(
            state(service.clone()),
            actor(DemoSeedDataset::EMPLOYEE_THIRD),
            ClientAddress::default(),
            Json(NewAssetRequest {
                item_name: "Monitor".to_string(),
                quantity: 2,
                purpose: "Dual screen setup".to_string(),
                request_type: "Fixed Asset".to_string(),
                estimated_cost: Some(Decimal::new(32_000, 2)),
                urgency: Urgency::Normal,
            }),
        )
        .await
        .expect("submit");

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.request.status, RequestStatus::Pending);
        assert_eq!(created.request.stage, ApprovalStage::INITIAL);
        assert_eq!(created.request.floor.as_deref(), Some("3rd"));
        assert!(!created.can_approve);

        let (status, _) = submit_request(
            state(service),
            actor(DemoSeedDataset::EMPLOYEE_THIRD),
            ClientAddress::default(),
            Json(NewAssetRequest {
                item_name: "  ".to_string(),
                quantity: 1,
                purpose: "Nothing".to_string(),
                request_type: "Fixed Asset".to_string(),
                estimated_cost: None,
                urgency: Urgency::Low,
            }),
        )
        .await
        .expect_err("blank item");
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn detail_outside_scope_is_not_found() {
        let service = setup().await;

        let (status, _) = request_detail(
            state(service.clone()),
            actor(DemoSeedDataset::EMPLOYEE_SECOND),
            Path(DemoSeedDataset::EMPLOYEE_THIRD_REQUEST.to_string()),
        )
        .await
        .expect_err("other floor");
        assert_eq!(status, StatusCode::NOT_FOUND);

        let Json(detail) = request_detail(
            state(service),
            actor(DemoSeedDataset::CONCERN_MANAGER_SECOND),
            Path(DemoSeedDataset::EMPLOYEE_REQUEST.to_string()),
        )
        .await
        .expect("detail");
        assert!(detail.eligibility.allowed);
        assert_eq!(detail.stage_label, "level 1");
        assert!(detail.approvals.is_empty());
    }

    #[tokio::test]
    async fn approve_advances_through_router() {
        let service = setup().await;
        let app = router(service.clone(), templates());

        let response = app
            .oneshot(post(
                "/api/v1/requests/REQ-DEMO-001/approve",
                DemoSeedDataset::CONCERN_MANAGER_SECOND,
                serde_json::json!({ "comments": "needed for the new hire" }),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["request"]["status"], "Pending");
        assert_eq!(body["request"]["stage"]["level"], 2);
        assert_eq!(body["record"]["action"], "Approved");

        let Json(history) = request_approvals(
            state(service),
            actor(DemoSeedDataset::MD),
            Path(DemoSeedDataset::EMPLOYEE_REQUEST.to_string()),
        )
        .await
        .expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].record.comments, "needed for the new hire");
        assert_eq!(history[0].legacy_level, 1);
    }

    #[tokio::test]
    async fn wrong_floor_manager_is_forbidden() {
        let service = setup().await;
        let app = router(service, templates());

        let response = app
            .oneshot(post(
                "/api/v1/requests/REQ-DEMO-001/approve",
                DemoSeedDataset::CONCERN_MANAGER_THIRD,
                serde_json::json!({}),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = json_body(response).await;
        assert_eq!(body["error"], "forbidden");
        assert_eq!(body["retryable"], false);
    }

    #[tokio::test]
    async fn acting_on_a_closed_request_is_a_non_retryable_conflict() {
        let service = setup().await;

        let Json(rejected) = reject_request(
            state(service.clone()),
            actor(DemoSeedDataset::ACCOUNTS_SCM),
            ClientAddress::default(),
            Path(DemoSeedDataset::ADMIN_REQUEST.to_string()),
            Bytes::from_static(br#"{"comments":"over budget"}"#),
        )
        .await
        .expect("reject");
        assert_eq!(rejected.request.status, RequestStatus::Rejected);
        assert_eq!(rejected.request.stage, ApprovalStage::level(1));

        let (status, Json(error)) = approve_request(
            state(service),
            actor(DemoSeedDataset::ACCOUNTS_SCM),
            ClientAddress::default(),
            Path(DemoSeedDataset::ADMIN_REQUEST.to_string()),
            Bytes::new(),
        )
        .await
        .expect_err("closed");
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(!error.retryable);
    }

    #[tokio::test]
    async fn escalation_hands_request_to_md_only() {
        let service = setup().await;

        let (status, _) = escalate_request(
            state(service.clone()),
            actor(DemoSeedDataset::EMPLOYEE_THIRD),
            ClientAddress::default(),
            Path(DemoSeedDataset::EMPLOYEE_REQUEST.to_string()),
            Json(EscalateBody { reason: "urgent".to_string() }),
        )
        .await
        .expect_err("employees cannot escalate");
        assert_eq!(status, StatusCode::FORBIDDEN);

        let Json(outcome) = escalate_request(
            state(service.clone()),
            actor(DemoSeedDataset::ADMIN),
            ClientAddress::default(),
            Path(DemoSeedDataset::EMPLOYEE_REQUEST.to_string()),
            Json(EscalateBody { reason: "Board visit tomorrow".to_string() }),
        )
        .await
        .expect("admin escalates");
        assert!(outcome.request.stage.is_escalated());

        let Json(cm_queue) =
            approval_queue(state(service.clone()), actor(DemoSeedDataset::CONCERN_MANAGER_SECOND))
                .await
                .expect("cm queue");
        assert!(cm_queue.iter().all(|row| row.request.id.0 != DemoSeedDataset::EMPLOYEE_REQUEST));

        let Json(md_queue) =
            approval_queue(state(service.clone()), actor(DemoSeedDataset::MD)).await.expect("md queue");
        assert!(md_queue.iter().any(|row| row.request.id.0 == DemoSeedDataset::EMPLOYEE_REQUEST));

        let Json(detail) = request_detail(
            state(service),
            actor(DemoSeedDataset::MD),
            Path(DemoSeedDataset::EMPLOYEE_REQUEST.to_string()),
        )
        .await
        .expect("detail");
        assert_eq!(detail.legacy_level, 999);
        assert_eq!(detail.awaiting.as_deref(), Some("MD"));
        assert_eq!(detail.approvals[0].legacy_level, 1, "history keeps the level it left from");
    }

    #[tokio::test]
    async fn activity_log_is_limited_to_admin_and_md() {
        let service = setup().await;

        let (status, _) = recent_activity(
            state(service.clone()),
            actor(DemoSeedDataset::EMPLOYEE_SECOND),
            Query(ActivityQuery::default()),
        )
        .await
        .expect_err("employee");
        assert_eq!(status, StatusCode::FORBIDDEN);

        let Json(entries) = recent_activity(
            state(service),
            actor(DemoSeedDataset::ADMIN),
            Query(ActivityQuery { limit: Some(2) }),
        )
        .await
        .expect("admin");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].description, "Created asset request #REQ-DEMO-004 - Printer toner");
    }

    #[tokio::test]
    async fn board_renders_rows_for_actor_scope() {
        let service = setup().await;
        let app = router(service, templates());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/requests?status=pending")
                    .header(ACTOR_HEADER, DemoSeedDataset::ACCOUNTS_SCM)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let html = String::from_utf8(bytes.to_vec()).expect("utf8");
        assert!(html.starts_with("Accounts/SCM|4|"), "unexpected board: {html}");
        assert!(html.contains("REQ-DEMO-004:true:Accounts/SCM;"), "unexpected board: {html}");
        assert!(html.contains("REQ-DEMO-001:false:Concern Manager (2nd floor);"));
    }

    #[tokio::test]
    async fn approve_accepts_an_empty_body() {
        let service = setup().await;
        let app = router(service.clone(), templates());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/requests/REQ-DEMO-001/approve")
                    .header(ACTOR_HEADER, DemoSeedDataset::CONCERN_MANAGER_SECOND)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["request"]["stage"]["level"], 2);
        assert_eq!(body["record"]["comments"], "");

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/requests/REQ-DEMO-001/reject")
                    .header(ACTOR_HEADER, DemoSeedDataset::ADMIN)
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "bad_request");
    }

    #[tokio::test]
    async fn activity_rows_record_the_client_address() {
        let service = setup().await;
        let app = router(service.clone(), templates());

        let mut forwarded = post(
            "/api/v1/requests/REQ-DEMO-001/approve",
            DemoSeedDataset::CONCERN_MANAGER_SECOND,
            serde_json::json!({}),
        );
        forwarded
            .headers_mut()
            .insert(FORWARDED_FOR_HEADER, HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        let response = app.clone().oneshot(forwarded).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let mut direct = post(
            "/api/v1/requests/REQ-DEMO-004/approve",
            DemoSeedDataset::ACCOUNTS_SCM,
            serde_json::json!({}),
        );
        direct
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 10], 52_000))));
        let response = app.oneshot(direct).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let Json(entries) = recent_activity(
            state(service),
            actor(DemoSeedDataset::MD),
            Query(ActivityQuery { limit: Some(2) }),
        )
        .await
        .expect("activity");
        assert_eq!(entries[0].request_id.as_ref().map(|id| id.0.as_str()), Some("REQ-DEMO-004"));
        assert_eq!(entries[0].ip_address.as_deref(), Some("192.0.2.10"));
        assert_eq!(entries[1].request_id.as_ref().map(|id| id.0.as_str()), Some("REQ-DEMO-001"));
        assert_eq!(entries[1].ip_address.as_deref(), Some("203.0.113.7"));
    }

    #[tokio::test]
    async fn admin_toggles_a_user_through_router() {
        let service = setup().await;
        let app = router(service.clone(), templates());

        let response = app
            .clone()
            .oneshot(post(
                "/api/v1/users/u-emp-3rd/toggle",
                DemoSeedDataset::EMPLOYEE_SECOND,
                serde_json::json!({}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(post("/api/v1/users/u-ghost/toggle", DemoSeedDataset::ADMIN, serde_json::json!({})))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(post(
                "/api/v1/users/u-emp-3rd/toggle",
                DemoSeedDataset::ADMIN,
                serde_json::json!({}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["id"], DemoSeedDataset::EMPLOYEE_THIRD);
        assert_eq!(body["is_active"], false);

        let (status, _) = list_requests(
            state(service.clone()),
            actor(DemoSeedDataset::EMPLOYEE_THIRD),
            Query(ListQuery::default()),
        )
        .await
        .expect_err("deactivated actor");
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let Json(entries) = recent_activity(
            state(service),
            actor(DemoSeedDataset::ADMIN),
            Query(ActivityQuery { limit: Some(1) }),
        )
        .await
        .expect("activity");
        assert_eq!(entries[0].action, "User Status Changed");
        assert!(entries[0].request_id.is_none());
    }

    #[test]
    fn embedded_board_template_is_registered() {
        let tera = init_templates(None);
        assert!(tera.get_template_names().any(|name| name == BOARD_TEMPLATE));
    }
}

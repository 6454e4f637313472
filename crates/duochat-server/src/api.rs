use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request, State},
    http::{Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use duochat_shared::api::{
    DeleteMessageRequest, HealthResponse, KeysResponse, LoginRequest, LoginResponse,
    MessageView, QrCreateRequest, QrCreateResponse, QrLoginRequest, QrLoginResponse,
    RefreshRequest, RegisterRequest, RegisterResponse, SuccessResponse, TokenPair,
};
use duochat_shared::constants::SOCKET_PATH;
use duochat_shared::DeviceKind;
use duochat_store::{StoreError, StoredMessage, Stores};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::AuthUser;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::pairing::QrBroker;
use crate::password;
use crate::relay;
use crate::rooms::RelayHub;
use crate::tokens::TokenService;

#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub tokens: Arc<TokenService>,
    pub pairing: Arc<QrBroker>,
    pub hub: RelayHub,
}

impl AppState {
    pub fn new(config: &ServerConfig, stores: Stores) -> Self {
        let tokens = Arc::new(TokenService::new(config));
        let pairing = Arc::new(QrBroker::new(
            stores.kv.clone(),
            stores.users.clone(),
            tokens.clone(),
            config.qr_token_ttl,
        ));
        Self {
            stores,
            tokens,
            pairing,
            hub: RelayHub::new(),
        }
    }
}

/// `Json` whose rejections render as a `{message}` body like every other
/// handler error.
pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/keys", get(keys))
        .route("/api/qr/create", post(qr_create))
        .route("/api/mobile/qr-login", post(qr_login))
        .route("/api/messages", get(list_messages))
        .route("/api/messages/delete", post(delete_message))
        .route(SOCKET_PATH, get(relay::socket_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Trimmed, non-empty field or the given 400.
fn required(field: Option<String>, message: &str) -> Result<String, ServerError> {
    field
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ServerError::bad_request(message))
}

fn non_empty(field: Option<String>) -> Option<String> {
    field.filter(|v| !v.is_empty())
}

/// Argon2 is CPU-bound; keep it off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, ServerError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))
}

// ─── Auth ───

async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ServerError> {
    const MISSING: &str = "Email and password are required";
    let email = required(req.email, MISSING)?;
    let plain = req
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ServerError::bad_request(MISSING))?;

    let hash = blocking(move || password::hash(&plain))
        .await?
        .map_err(|e| ServerError::Internal(e.to_string()))?;

    let user = match state.stores.users.insert_user(&email, &hash).await {
        Ok(user) => user,
        Err(StoreError::Conflict(_)) => {
            return Err(ServerError::Conflict("User already exists".to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    info!(user = %user.id.short(), "User registered");
    Ok((StatusCode::CREATED, Json(user.summary())))
}

async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<LoginResponse>, ServerError> {
    const MISSING: &str = "Email and password are required";
    const INVALID: &str = "Invalid credentials";
    let email = required(req.email, MISSING)?;
    let plain = req
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ServerError::bad_request(MISSING))?;

    let user = state
        .stores
        .users
        .find_user_by_email(&email)
        .await?
        .ok_or_else(|| ServerError::unauthorized(INVALID))?;

    let stored_hash = user.password_hash.clone();
    let matches = blocking(move || password::verify(&plain, &stored_hash))
        .await?
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    if !matches {
        return Err(ServerError::unauthorized(INVALID));
    }

    let supplied_key = non_empty(req.public_key);
    if let Some(key) = &supplied_key {
        state
            .stores
            .users
            .set_public_key(user.id, DeviceKind::Web, key)
            .await?;
    }

    let tokens = state.tokens.issue(&user)?;
    info!(user = %user.id.short(), "User logged in");

    // The key on record before this login wins over the one just supplied.
    let public_key = user.web_public_key.clone().or(supplied_key);
    Ok(Json(LoginResponse {
        user: user.summary(),
        tokens,
        public_key,
    }))
}

async fn refresh(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RefreshRequest>,
) -> Result<Json<TokenPair>, ServerError> {
    let token = required(req.refresh_token, "Refresh token is required")?;

    let claims = state
        .tokens
        .verify_refresh(&token)
        .map_err(|_| ServerError::unauthorized("Invalid or expired refresh token"))?;

    let user = state
        .stores
        .users
        .find_user(claims.sub)
        .await?
        .ok_or_else(|| ServerError::not_found("User not found"))?;

    Ok(Json(state.tokens.issue(&user)?))
}

async fn keys(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<KeysResponse>, ServerError> {
    let user = state
        .stores
        .users
        .find_user(claims.sub)
        .await?
        .ok_or_else(|| ServerError::not_found("User not found"))?;

    Ok(Json(KeysResponse {
        web_public_key: user.web_public_key,
        mobile_public_key: user.mobile_public_key,
    }))
}

// ─── QR pairing ───

async fn qr_create(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    body: Option<Json<QrCreateRequest>>,
) -> Result<Json<QrCreateResponse>, ServerError> {
    let web_public_key = body.and_then(|Json(req)| req.web_public_key);

    let qr_token = state
        .pairing
        .create_pairing(claims.sub, web_public_key.as_deref())
        .await?;

    Ok(Json(QrCreateResponse { qr_token }))
}

async fn qr_login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<QrLoginRequest>,
) -> Result<Json<QrLoginResponse>, ServerError> {
    let qr_token = required(req.qr_token, "qrToken is required")?;

    let session = state
        .pairing
        .redeem_pairing(&qr_token, req.mobile_public_key.as_deref())
        .await?;

    Ok(Json(QrLoginResponse {
        user: session.user.summary(),
        tokens: session.tokens,
        other_public_key: session.other_public_key,
    }))
}

// ─── Messages ───

fn to_view(record: &StoredMessage) -> MessageView {
    let field = |name: &str| record.field(name).cloned();
    MessageView {
        id: record
            .message_id()
            .map(str::to_string)
            .unwrap_or_else(|| record.record_id.to_string()),
        content: field("content"),
        sender_id: field("senderId"),
        created_at: field("createdAt"),
        ciphertext: field("ciphertext"),
        iv: field("iv"),
        auth_tag: field("authTag"),
    }
}

async fn list_messages(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<Vec<MessageView>>, ServerError> {
    let history = state.stores.chats.messages(claims.sub).await?;
    Ok(Json(history.iter().map(to_view).collect()))
}

async fn delete_message(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ApiJson(req): ApiJson<DeleteMessageRequest>,
) -> Result<Json<SuccessResponse>, ServerError> {
    let id = required(req.id, "Message ID required")?;

    if !state.stores.chats.pull_message(claims.sub, &id).await? {
        tracing::debug!(user = %claims.sub.short(), id = %id, "Delete matched nothing");
        return Err(ServerError::not_found("Message not found"));
    }

    info!(user = %claims.sub.short(), id = %id, "Message deleted");
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

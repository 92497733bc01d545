use crate::assets::{content_type, AssetKind, AssetStore};
use crate::chat::{CompletionClient, ConversationForwarder, OpenAiClient};
use crate::config::Config;
use crate::credentials::{CredentialStore, Registration};
use crate::error::{ApiError, ApiResult};
use crate::groups::GroupMessaging;
use crate::models::{ChatMessage, Identity, ProfileUpdate, ProfileView};
use crate::profile::ProfileManager;
use crate::session::SessionIssuer;
use crate::storage::Storage;
use anyhow::{anyhow, Result};
use axum::extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

pub type SharedState = Arc<AppState>;

/// Everything a request handler may touch. Built once at startup.
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: SessionIssuer,
    pub credentials: CredentialStore,
    pub profiles: ProfileManager,
    pub assets: AssetStore,
    pub forwarder: ConversationForwarder,
    pub groups: GroupMessaging,
}

impl AppState {
    pub fn new(config: Config, completion: Arc<dyn CompletionClient>) -> Result<Self> {
        let storage = Storage::new(&config.database_url, config.db_pool_size)?;
        std::fs::create_dir_all(&config.upload_folder)?;

        Ok(AppState {
            sessions: SessionIssuer::new(&config.token_secret, config.token_ttl),
            credentials: CredentialStore::new(storage.clone()),
            profiles: ProfileManager::new(storage.clone()),
            assets: AssetStore::new(storage.clone(), config.upload_folder.clone()),
            forwarder: ConversationForwarder::new(completion),
            groups: GroupMessaging::new(storage),
            config: Arc::new(config),
        })
    }
}

pub struct Server {
    state: SharedState,
}

impl Server {
    pub async fn new(config: Config) -> Result<Self> {
        let completion = Arc::new(OpenAiClient::new(&config.chat)?);
        if !completion.is_configured() {
            log::warn!("OPENAI_API_KEY is not set, /chatgpt will reject requests");
        }
        let state = AppState::new(config, completion)?;
        Ok(Server {
            state: Arc::new(state),
        })
    }

    pub async fn run(&self, addr: &str) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        log::info!("Server running on {}", addr);
        axum::serve(listener, create_router(Arc::clone(&self.state))).await?;
        Ok(())
    }
}

pub fn create_router(state: SharedState) -> Router {
    let body_limit = state.config.max_upload_bytes;
    Router::new()
        .route("/", get(home))
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/profile", get(get_profile).put(update_profile))
        .route("/upload_profile_image", post(upload_profile_image))
        .route("/upload_document", post(upload_document))
        .route("/documents", get(list_documents))
        .route("/uploads/{filename}", get(fetch_upload))
        .route("/chatgpt", post(chatgpt))
        .route("/create_group", post(create_group))
        .route("/send_message", post(send_message))
        .route("/get_messages/{group_id}", get(get_messages))
        .route("/groups", get(list_groups))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// The caller's identity, taken from an `Authorization: Bearer` header.
pub struct AuthUser(pub Identity);

impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError::auth("Missing token"))?;
        state.sessions.validate(token).map(AuthUser)
    }
}

/// Runs storage, hashing and file work off the async workers.
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| anyhow!("blocking task failed: {}", e))?
}

async fn home() -> &'static str {
    "Hello from the study helper backend!"
}

async fn register(
    State(state): State<SharedState>,
    Json(registration): Json<Registration>,
) -> ApiResult<impl IntoResponse> {
    let credentials = state.credentials.clone();
    blocking(move || credentials.register(&registration)).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"message": "User registered successfully"})),
    ))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

async fn login(
    State(state): State<SharedState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<Value>> {
    let (email, password) = match (req.email, req.password) {
        (Some(email), Some(password)) if !email.trim().is_empty() => (email, password),
        _ => return Err(ApiError::validation("Email and password are required")),
    };

    let credentials = state.credentials.clone();
    let lookup_email = email.clone();
    let account = blocking(move || credentials.verify(&lookup_email, &password)).await?;

    match account {
        Some(account) => {
            let token = state.sessions.issue(&account)?;
            log::info!("login for {}", account.username);
            Ok(Json(json!({
                "access_token": token,
                "username": account.username,
            })))
        }
        None => {
            log::warn!("rejected login for {}", email);
            Err(ApiError::auth("Invalid credentials"))
        }
    }
}

async fn get_profile(
    State(state): State<SharedState>,
    AuthUser(identity): AuthUser,
) -> ApiResult<Json<ProfileView>> {
    let profiles = state.profiles.clone();
    let profile = blocking(move || profiles.get(&identity)).await?;
    Ok(Json(profile))
}

async fn update_profile(
    State(state): State<SharedState>,
    AuthUser(identity): AuthUser,
    Json(fields): Json<ProfileUpdate>,
) -> ApiResult<Json<Value>> {
    let profiles = state.profiles.clone();
    blocking(move || profiles.update(&identity, &fields)).await?;
    Ok(Json(json!({"message": "Profile updated successfully"})))
}

async fn upload_profile_image(
    State(state): State<SharedState>,
    AuthUser(identity): AuthUser,
    multipart: Multipart,
) -> ApiResult<Json<Value>> {
    store_upload(&state, identity, AssetKind::ProfileImage, multipart).await?;
    Ok(Json(json!({"message": "Profile image uploaded successfully"})))
}

async fn upload_document(
    State(state): State<SharedState>,
    AuthUser(identity): AuthUser,
    multipart: Multipart,
) -> ApiResult<Json<Value>> {
    store_upload(&state, identity, AssetKind::Document, multipart).await?;
    Ok(Json(json!({"message": "Document uploaded successfully"})))
}

async fn store_upload(
    state: &SharedState,
    identity: Identity,
    kind: AssetKind,
    mut multipart: Multipart,
) -> ApiResult<String> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some(kind.field_name()) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::validation(format!("Invalid multipart body: {}", e)))?;
        upload = Some((filename, bytes));
        break;
    }

    let (filename, bytes) = upload.ok_or_else(|| ApiError::validation("No file part"))?;
    let assets = state.assets.clone();
    blocking(move || assets.upload(&identity, kind, &filename, &bytes)).await
}

async fn list_documents(
    State(state): State<SharedState>,
    AuthUser(identity): AuthUser,
) -> ApiResult<Json<Value>> {
    let assets = state.assets.clone();
    let documents = blocking(move || assets.list_documents(&identity)).await?;
    Ok(Json(json!({ "documents": documents })))
}

async fn fetch_upload(
    State(state): State<SharedState>,
    AuthUser(identity): AuthUser,
    Path(filename): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let assets = state.assets.clone();
    let name = filename.clone();
    let bytes = blocking(move || assets.fetch(&identity, &name)).await?;
    Ok(([(header::CONTENT_TYPE, content_type(&filename))], bytes))
}

#[derive(Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub specialty: String,
}

async fn chatgpt(
    State(state): State<SharedState>,
    AuthUser(identity): AuthUser,
    Json(req): Json<ChatRequest>,
) -> ApiResult<Json<Value>> {
    let reply = state
        .forwarder
        .chat(&identity, &req.specialty, req.messages)
        .await?;
    Ok(Json(json!({ "assistant_message": reply })))
}

#[derive(Deserialize)]
pub struct CreateGroupRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

async fn create_group(
    State(state): State<SharedState>,
    AuthUser(identity): AuthUser,
    Json(req): Json<CreateGroupRequest>,
) -> ApiResult<impl IntoResponse> {
    let groups = state.groups.clone();
    let group_id = blocking(move || groups.create_group(&req.name, &req.description)).await?;
    log::debug!("group {} created by {}", group_id, identity.username);
    Ok((
        StatusCode::CREATED,
        Json(json!({"message": "Group created successfully", "group_id": group_id})),
    ))
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub group_id: Option<Uuid>,
    #[serde(default, alias = "message", alias = "text")]
    pub content: String,
}

async fn send_message(
    State(state): State<SharedState>,
    AuthUser(identity): AuthUser,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let group_id = req
        .group_id
        .ok_or_else(|| ApiError::validation("group_id is required"))?;
    let groups = state.groups.clone();
    blocking(move || groups.send_message(&identity, group_id, &req.content)).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"message": "Message sent successfully"})),
    ))
}

async fn get_messages(
    State(state): State<SharedState>,
    AuthUser(_identity): AuthUser,
    Path(group_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let groups = state.groups.clone();
    let messages = blocking(move || groups.list_messages(group_id)).await?;
    Ok(Json(json!({ "messages": messages })))
}

async fn list_groups(
    State(state): State<SharedState>,
    AuthUser(_identity): AuthUser,
) -> ApiResult<Json<Value>> {
    let groups = state.groups.clone();
    let listed = blocking(move || groups.list_groups()).await?;
    Ok(Json(json!({ "groups": listed })))
}

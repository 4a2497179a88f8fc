use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, FromRequest, Multipart, Path, Request, State,
        rejection::JsonRejection,
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::time::{Duration, SystemTime};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::config::{Backend, Config};
use crate::controller::StepController;
use crate::drive::{FileStore, MemoryDrive, TemplateProvisioner};
use crate::error::{Result, WizardError};
use crate::google::{GoogleApi, GoogleDrive, GoogleSheets};
use crate::sheets::{MemorySheets, RowWriteRequest, SheetWriter};
use crate::state::{WizardSnapshot, WizardState};
use crate::steps::{Options, StepDescriptor, catalogue, template_tabs};
use crate::value::{Entry, FieldValue, Fields};

// Constants
pub const SESSION_COOKIE: &str = "wizard_session";
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
const IMAGES_LIST: &str = "images";

/// One browser's wizard
struct Session {
    state: WizardState,
    /// Set while a remote call for this session is in flight
    pending: bool,
    expires_at: SystemTime,
}

pub struct AppState {
    controller: StepController,
    sheets: Arc<dyn SheetWriter>,
    provisioner: Arc<dyn TemplateProvisioner>,
    files: Arc<dyn FileStore>,
    options: Options,
    sessions: RwLock<HashMap<String, Session>>,
    session_ttl: Duration,
}

/// Snapshot of a session plus the step the client should render
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardView {
    #[serde(flatten)]
    pub state: WizardSnapshot,
    pub step: Option<StepDescriptor>,
}

#[derive(Debug, Default, Deserialize)]
struct StepInput {
    #[serde(default)]
    fields: Fields,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveRequest {
    action: Option<String>,
    file_id: Option<String>,
    output_name: Option<String>,
    folder_id: Option<String>,
}

/// An uploaded file part
struct Upload {
    name: String,
    mime_type: String,
    bytes: Vec<u8>,
}

/// Clears a session's pending flag when the remote call finishes or the
/// request is dropped.
struct PendingGuard<'a> {
    sessions: &'a RwLock<HashMap<String, Session>>,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = sessions.get_mut(self.id) {
            session.pending = false;
        }
    }
}

impl AppState {
    pub fn new(
        options: Options,
        sheets: Arc<dyn SheetWriter>,
        provisioner: Arc<dyn TemplateProvisioner>,
        files: Arc<dyn FileStore>,
        session_ttl: Duration,
    ) -> Self {
        let controller = StepController::new(catalogue(&options), sheets.clone(), provisioner.clone());
        Self {
            controller,
            sheets,
            provisioner,
            files,
            options,
            sessions: RwLock::new(HashMap::new()),
            session_ttl,
        }
    }

    /// In-process backends; provisioning creates workbooks in memory.
    pub fn memory(options: Options, session_ttl: Duration) -> Self {
        let sheets = Arc::new(MemorySheets::new());
        let drive = Arc::new(MemoryDrive::new(
            sheets.clone(),
            template_tabs(&catalogue(&options)),
        ));
        Self::new(options, sheets, drive.clone(), drive, session_ttl)
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        match config.backend {
            Backend::Memory => {
                warn!("using in-memory backend; nothing is written to Google");
                Ok(Self::memory(config.options.clone(), config.session_ttl))
            }
            Backend::Google => {
                let token = config.access_token.clone().ok_or_else(|| {
                    WizardError::Config("GOOGLE_ACCESS_TOKEN is required".to_string())
                })?;
                let api = GoogleApi::new(token, config.timeout)?;
                let sheets = Arc::new(GoogleSheets::from_config(config, api.clone()));
                let drive = Arc::new(GoogleDrive::from_config(config, api));
                Ok(Self::new(
                    config.options.clone(),
                    sheets,
                    drive.clone(),
                    drive,
                    config.session_ttl,
                ))
            }
        }
    }

    fn write_sessions(&self) -> RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the session named by the cookie, or starts a new one and sets
    /// the cookie. Expired sessions are dropped on the way.
    fn open_session(&self, jar: CookieJar) -> (CookieJar, String) {
        let now = SystemTime::now();
        let mut sessions = self.write_sessions();
        sessions.retain(|_, s| s.expires_at > now || s.pending);

        if let Some(id) = jar.get(SESSION_COOKIE).map(|c| c.value().to_string()) {
            if let Some(session) = sessions.get_mut(&id) {
                session.expires_at = now + self.session_ttl;
                return (jar, id);
            }
        }

        let id = Uuid::new_v4().to_string();
        sessions.insert(
            id.clone(),
            Session {
                state: self.controller.new_state(),
                pending: false,
                expires_at: now + self.session_ttl,
            },
        );
        info!("started wizard session {}", id);

        let mut cookie = Cookie::new(SESSION_COOKIE, id.clone());
        cookie.set_path("/");
        cookie.set_http_only(true);
        (jar.add(cookie), id)
    }

    fn view(&self, state: &WizardState) -> WizardView {
        WizardView {
            state: state.get(),
            step: self.controller.current(state).cloned(),
        }
    }

    /// Runs `f` on an idle session; a session with a call in flight is `Busy`.
    fn with_idle_session<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut WizardState) -> Result<T>,
    ) -> Result<T> {
        let mut sessions = self.write_sessions();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| WizardError::BadRequest("session expired".to_string()))?;
        if session.pending {
            return Err(WizardError::Busy);
        }
        f(&mut session.state)
    }

    /// Runs `f` on an idle session and marks it pending until the returned
    /// guard is dropped. Nothing is marked when `f` fails.
    fn begin<'a, T>(
        &'a self,
        id: &'a str,
        f: impl FnOnce(&mut WizardState) -> Result<T>,
    ) -> Result<(PendingGuard<'a>, T)> {
        let mut sessions = self.write_sessions();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| WizardError::BadRequest("session expired".to_string()))?;
        if session.pending {
            return Err(WizardError::Busy);
        }
        let value = f(&mut session.state)?;
        session.pending = true;
        let guard = PendingGuard {
            sessions: &self.sessions,
            id,
        };
        Ok((guard, value))
    }

    /// Applies `f` to the session after its remote call, while still pending.
    fn finish<T>(&self, id: &str, f: impl FnOnce(&mut WizardState) -> T) -> Result<T> {
        let mut sessions = self.write_sessions();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| WizardError::BadRequest("session expired".to_string()))?;
        Ok(f(&mut session.state))
    }

    /// Current view of the session; readable while a submission is in flight.
    pub fn snapshot(&self, id: &str) -> Result<WizardView> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(id)
            .map(|session| self.view(&session.state))
            .ok_or_else(|| WizardError::BadRequest("session expired".to_string()))
    }

    /// Validate, write, then advance the session's wizard.
    pub async fn next(&self, id: &str, input: Fields) -> Result<WizardView> {
        let (_guard, pending) = self.begin(id, |state| self.controller.prepare(state, &input))?;
        let effect = self.controller.execute(&pending).await?;
        self.finish(id, |state| {
            self.controller.commit(state, pending, effect);
            self.view(state)
        })
    }

    pub fn back(&self, id: &str, input: Fields) -> Result<WizardView> {
        self.with_idle_session(id, |state| {
            self.controller.back(state, input);
            Ok(self.view(state))
        })
    }

    pub fn reset(&self, id: &str) -> Result<WizardView> {
        self.with_idle_session(id, |state| {
            self.controller.restart(state);
            Ok(self.view(state))
        })
    }

    /// Uploads into the session's folder and appends an `images` entry.
    async fn add_image(&self, id: &str, upload: Upload) -> Result<WizardView> {
        let (_guard, folder_id) = self.begin(id, |state| {
            state
                .field("folderId")
                .map(FieldValue::to_text)
                .filter(|f| !f.is_empty())
                .ok_or_else(|| {
                    WizardError::BadRequest("no Drive folder has been chosen yet".to_string())
                })
        })?;
        let file = self
            .files
            .upload(&folder_id, &upload.name, &upload.mime_type, upload.bytes)
            .await?;
        info!("uploaded {} as {}", file.name, file.id);

        let mut entry = Entry::new();
        entry.insert("name".to_string(), FieldValue::text(file.name));
        entry.insert("fileId".to_string(), FieldValue::text(file.id));
        entry.insert(
            "webViewLink".to_string(),
            FieldValue::text(file.web_view_link.unwrap_or_default()),
        );
        entry.insert(
            "thumbnailLink".to_string(),
            FieldValue::text(file.thumbnail_link.unwrap_or_default()),
        );
        self.finish(id, |state| {
            state.add_entry(IMAGES_LIST, entry);
            self.view(state)
        })
    }

    /// Deletes the Drive file behind `images[index]`, then the entry.
    async fn remove_image(&self, id: &str, index: usize) -> Result<WizardView> {
        let (_guard, file_id) = self.begin(id, |state| {
            state
                .entries(IMAGES_LIST)
                .get(index)
                .and_then(|entry| entry.get("fileId"))
                .map(FieldValue::to_text)
                .ok_or_else(|| WizardError::BadRequest(format!("no image at index {}", index)))
        })?;
        if !file_id.is_empty() {
            self.files.delete(&file_id).await?;
        }
        self.finish(id, |state| {
            state.remove_entry(IMAGES_LIST, index);
            self.view(state)
        })
    }
}

impl IntoResponse for WizardError {
    fn into_response(self) -> Response {
        let status = match &self {
            WizardError::Validation(_) | WizardError::BadRequest(_) | WizardError::NoSpreadsheet => {
                StatusCode::BAD_REQUEST
            }
            WizardError::DuplicateName { .. } | WizardError::Busy => StatusCode::CONFLICT,
            WizardError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            WizardError::Network(_) => StatusCode::BAD_GATEWAY,
            WizardError::SheetWrite(_) | WizardError::Drive(_) | WizardError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            warn!("request failed: {}", self);
        }

        let body = match &self {
            WizardError::Validation(errors) => json!({ "error": self.to_string(), "fields": errors }),
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

/// Builds the HTTP router over `app_state`.
pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/sheets", post(write_rows))
        .route("/drive", post(drive))
        .route("/api/options", get(options))
        .route("/api/wizard", get(wizard))
        .route("/api/wizard/next", post(wizard_next))
        .route("/api/wizard/back", post(wizard_back))
        .route("/api/wizard/reset", post(wizard_reset))
        .route("/api/wizard/images", post(upload_image))
        .route("/api/wizard/images/:index", delete(delete_image))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .with_state(app_state)
}

#[cfg(not(tarpaulin_include))]
pub async fn run(config: Config) -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Setup app state
    let app_state = Arc::new(AppState::from_config(&config)?);

    // Build router
    let app = router(app_state);

    // Start server
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!("Listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| WizardError::BadRequest(e.body_text()))
}

async fn write_rows(
    State(app): State<Arc<AppState>>,
    payload: std::result::Result<Json<RowWriteRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let (sheet_id, tab, request) = json_body(payload)?.into_request()?;
    info!("{} into {} of {}", request.mode(), tab, sheet_id);
    let outcome = app.sheets.write(&sheet_id, &tab, request).await?;

    let mut response = json!({ "success": true, "result": outcome.result });
    if let Some(index) = outcome.row_index {
        response["rowIndex"] = json!(index);
    }
    Ok(Json(response))
}

/// JSON bodies provision or delete; multipart bodies upload.
async fn drive(State(app): State<Arc<AppState>>, request: Request) -> Result<Json<Value>> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    if is_multipart {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| WizardError::BadRequest(e.body_text()))?;
        let (folder_id, upload) = read_upload(multipart).await?;
        let folder_id = folder_id
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| WizardError::BadRequest("Missing folderId or file".to_string()))?;
        let upload =
            upload.ok_or_else(|| WizardError::BadRequest("Missing folderId or file".to_string()))?;
        let file = app
            .files
            .upload(&folder_id, &upload.name, &upload.mime_type, upload.bytes)
            .await?;
        return Ok(Json(json!(file)));
    }

    let payload = Json::<DriveRequest>::from_request(request, &()).await;
    let body = json_body(payload)?;

    if body.action.as_deref() == Some("delete") {
        let file_id = body
            .file_id
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| WizardError::BadRequest("Missing fileId".to_string()))?;
        app.files.delete(&file_id).await?;
        info!("deleted drive file {}", file_id);
        return Ok(Json(json!({ "success": true })));
    }

    match (body.output_name, body.folder_id) {
        (Some(output_name), Some(folder_id))
            if !output_name.trim().is_empty() && !folder_id.trim().is_empty() =>
        {
            let sheet_id = app.provisioner.provision(output_name.trim(), folder_id.trim()).await?;
            Ok(Json(json!({ "sheetId": sheet_id })))
        }
        _ => Err(WizardError::BadRequest(
            "Missing required fields: outputName, folderId".to_string(),
        )),
    }
}

/// Pulls the optional `folderId` text part and the `file` part.
async fn read_upload(mut multipart: Multipart) -> Result<(Option<String>, Option<Upload>)> {
    let mut folder_id = None;
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| WizardError::BadRequest(e.body_text()))?
    {
        let part = field.name().unwrap_or_default().to_string();
        match part.as_str() {
            "folderId" => {
                folder_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| WizardError::BadRequest(e.body_text()))?,
                );
            }
            "file" => {
                let name = field.file_name().unwrap_or("image").to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| WizardError::BadRequest(e.body_text()))?;
                upload = Some(Upload {
                    name,
                    mime_type,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }

    Ok((folder_id, upload))
}

async fn options(State(app): State<Arc<AppState>>) -> impl IntoResponse {
    Json(app.options.clone())
}

async fn wizard(State(app): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    let (jar, id) = app.open_session(jar);
    (jar, app.snapshot(&id).map(Json))
}

async fn wizard_next(
    State(app): State<Arc<AppState>>,
    jar: CookieJar,
    payload: std::result::Result<Json<StepInput>, JsonRejection>,
) -> impl IntoResponse {
    let (jar, id) = app.open_session(jar);
    let result = match json_body(payload) {
        Ok(input) => app.next(&id, input.fields).await.map(Json),
        Err(e) => Err(e),
    };
    (jar, result)
}

async fn wizard_back(
    State(app): State<Arc<AppState>>,
    jar: CookieJar,
    payload: std::result::Result<Json<StepInput>, JsonRejection>,
) -> impl IntoResponse {
    let (jar, id) = app.open_session(jar);
    let result = json_body(payload).and_then(|input| app.back(&id, input.fields).map(Json));
    (jar, result)
}

async fn wizard_reset(State(app): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    let (jar, id) = app.open_session(jar);
    (jar, app.reset(&id).map(Json))
}

async fn upload_image(
    State(app): State<Arc<AppState>>,
    jar: CookieJar,
    multipart: Multipart,
) -> impl IntoResponse {
    let (jar, id) = app.open_session(jar);
    let result = match read_upload(multipart).await {
        Ok((_, Some(upload))) => app.add_image(&id, upload).await.map(Json),
        Ok((_, None)) => Err(WizardError::BadRequest("Missing file".to_string())),
        Err(e) => Err(e),
    };
    (jar, result)
}

async fn delete_image(
    State(app): State<Arc<AppState>>,
    jar: CookieJar,
    Path(index): Path<usize>,
) -> impl IntoResponse {
    let (jar, id) = app.open_session(jar);
    (jar, app.remove_image(&id, index).await.map(Json))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> AppState {
        AppState::memory(Options::default(), Duration::from_secs(60))
    }

    #[test]
    fn sessions_are_reused_by_cookie() {
        let app = app();
        let (jar, id) = app.open_session(CookieJar::new());
        assert_eq!(jar.get(SESSION_COOKIE).map(|c| c.value()), Some(id.as_str()));

        let (_, again) = app.open_session(jar);
        assert_eq!(again, id);

        let (_, other) = app.open_session(CookieJar::new());
        assert_ne!(other, id);
    }

    #[test]
    fn pending_session_is_busy_until_guard_drops() {
        let app = app();
        let (_, id) = app.open_session(CookieJar::new());

        let (guard, ()) = app.begin(&id, |_| Ok(())).unwrap();
        assert!(matches!(app.back(&id, Fields::new()), Err(WizardError::Busy)));
        assert!(matches!(app.reset(&id), Err(WizardError::Busy)));
        assert!(matches!(app.begin(&id, |_| Ok(())), Err(WizardError::Busy)));

        drop(guard);
        assert!(app.back(&id, Fields::new()).is_ok());
    }

    #[test]
    fn snapshot_is_readable_while_pending() {
        let app = app();
        let (_, id) = app.open_session(CookieJar::new());

        let (_guard, ()) = app.begin(&id, |_| Ok(())).unwrap();
        let view = app.snapshot(&id).unwrap();
        assert_eq!(view.state.active_step_index, 0);
        assert!(matches!(app.snapshot("unknown"), Err(WizardError::BadRequest(_))));
    }

    #[test]
    fn activity_extends_the_session() {
        let app = AppState::memory(Options::default(), Duration::from_millis(300));
        let (jar, id) = app.open_session(CookieJar::new());
        let expiry = |app: &AppState| app.write_sessions()[&id].expires_at;
        let first = expiry(&app);

        std::thread::sleep(Duration::from_millis(200));
        let (jar, again) = app.open_session(jar);
        assert_eq!(again, id);
        assert!(expiry(&app) > first);

        // past the original deadline but within the refreshed one
        std::thread::sleep(Duration::from_millis(200));
        let (_, still) = app.open_session(jar);
        assert_eq!(still, id);
    }

    #[test]
    fn error_statuses() {
        let status = |e: WizardError| e.into_response().status();
        assert_eq!(status(WizardError::NoSpreadsheet), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(WizardError::DuplicateName { name: "x".into() }),
            StatusCode::CONFLICT
        );
        assert_eq!(status(WizardError::Busy), StatusCode::CONFLICT);
        assert_eq!(
            status(WizardError::Timeout(Duration::from_secs(1))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(status(WizardError::Network("down".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status(WizardError::SheetWrite("nope".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn image_upload_needs_a_folder() {
        let app = app();
        let (_, id) = app.open_session(CookieJar::new());
        let upload = Upload {
            name: "banner.png".into(),
            mime_type: "image/png".into(),
            bytes: vec![1, 2, 3],
        };
        let err = app.add_image(&id, upload).await.unwrap_err();
        assert!(matches!(err, WizardError::BadRequest(_)));
    }
}

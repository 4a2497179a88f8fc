//! Google Sheets v4 and Drive v3 clients.
//!
//! Both talk plain REST through `reqwest` with a bearer token and a
//! client-wide timeout.

use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::{Value, json};
use std::time::Duration;

use crate::config::Config;
use crate::drive::{FileStore, TemplateProvisioner, UploadedFile};
use crate::error::{Result, WizardError};
use crate::sheets::{
    Row, SheetWriter, WriteOutcome, WriteRequest, a1_row, quote_tab, row_index_from_range,
};

/// Why a call failed, before it is mapped onto the service's error kind
#[derive(Debug)]
enum Failure {
    Transport(WizardError),
    Status { status: StatusCode, message: String },
}

impl Failure {
    fn into_sheet_error(self) -> WizardError {
        match self {
            Failure::Transport(e) => e,
            Failure::Status { status, message } => {
                WizardError::SheetWrite(format!("{} ({})", message, status.as_u16()))
            }
        }
    }

    fn into_drive_error(self) -> WizardError {
        match self {
            Failure::Transport(e) => e,
            Failure::Status { status, message } => {
                WizardError::Drive(format!("{} ({})", message, status.as_u16()))
            }
        }
    }
}

/// Authenticated HTTP access shared by the Sheets and Drive clients
#[derive(Clone)]
pub struct GoogleApi {
    http: Client,
    token: String,
    timeout: Duration,
}

impl GoogleApi {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WizardError::Network(e.to_string()))?;
        Ok(Self {
            http,
            token: token.into(),
            timeout,
        })
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http.request(method, url).bearer_auth(&self.token)
    }

    /// Sends the request and decodes the JSON body; an empty body is `null`.
    async fn send(&self, builder: RequestBuilder) -> std::result::Result<Value, Failure> {
        let response = builder.send().await.map_err(|e| self.transport(e))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.transport(e))?;

        if !status.is_success() {
            return Err(Failure::Status {
                status,
                message: error_message(&body)
                    .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string()),
            });
        }
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body)
            .map_err(|e| Failure::Transport(WizardError::Network(format!("invalid response: {}", e))))
    }

    fn transport(&self, e: reqwest::Error) -> Failure {
        if e.is_timeout() {
            Failure::Transport(WizardError::Timeout(self.timeout))
        } else {
            Failure::Transport(WizardError::Network(e.to_string()))
        }
    }
}

/// `error.message` from a Google API error body
fn error_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value["error"]["message"]
        .as_str()
        .or_else(|| value["error"].as_str())
        .map(str::to_string)
}

/// Row writer backed by the Sheets values API
pub struct GoogleSheets {
    api: GoogleApi,
    base_url: String,
}

impl GoogleSheets {
    pub fn new(api: GoogleApi, base_url: impl Into<String>) -> Self {
        Self {
            api,
            base_url: base_url.into(),
        }
    }

    pub fn from_config(config: &Config, api: GoogleApi) -> Self {
        Self::new(api, config.sheets_url.clone())
    }

    fn values_url(&self, sheet_id: &str, range: &str) -> String {
        format!(
            "{}/spreadsheets/{}/values/{}",
            self.base_url,
            urlencoding::encode(sheet_id),
            urlencoding::encode(range)
        )
    }

    async fn call(&self, builder: RequestBuilder) -> Result<Value> {
        self.api.send(builder).await.map_err(Failure::into_sheet_error)
    }

    async fn append(&self, sheet_id: &str, tab: &str, row: Row) -> Result<WriteOutcome> {
        let url = format!("{}:append", self.values_url(sheet_id, &format!("{}!A:Z", quote_tab(tab))));
        let result = self
            .call(
                self.api
                    .request(Method::POST, &url)
                    .query(&[
                        ("valueInputOption", "USER_ENTERED"),
                        ("insertDataOption", "INSERT_ROWS"),
                    ])
                    .json(&json!({ "values": [row] })),
            )
            .await?;
        let row_index = result["updates"]["updatedRange"]
            .as_str()
            .and_then(row_index_from_range);
        debug!("appended to {}: {:?}", tab, result["updates"]["updatedRange"]);
        Ok(WriteOutcome { row_index, result })
    }

    async fn update(&self, sheet_id: &str, tab: &str, index: u32, row: Row) -> Result<WriteOutcome> {
        let range = format!("{}!A{}", quote_tab(tab), a1_row(index)?);
        let result = self
            .call(
                self.api
                    .request(Method::PUT, &self.values_url(sheet_id, &range))
                    .query(&[("valueInputOption", "USER_ENTERED")])
                    .json(&json!({ "values": [row] })),
            )
            .await?;
        Ok(WriteOutcome {
            row_index: Some(index),
            result,
        })
    }

    async fn replace_all(&self, sheet_id: &str, tab: &str, rows: Vec<Row>) -> Result<WriteOutcome> {
        let tab_ref = quote_tab(tab);
        let existing = self
            .call(
                self.api
                    .request(Method::GET, &self.values_url(sheet_id, &format!("{}!A:Z", tab_ref))),
            )
            .await?;
        let occupied = existing["values"].as_array().map_or(0, Vec::len);

        if occupied > 1 {
            let clear_range = format!("{}!A2:Z{}", tab_ref, occupied);
            let url = format!("{}:clear", self.values_url(sheet_id, &clear_range));
            self.call(self.api.request(Method::POST, &url).json(&json!({})))
                .await?;
            debug!("cleared {} rows of {}", occupied - 1, tab);
        }

        if rows.is_empty() {
            return Ok(WriteOutcome {
                row_index: None,
                result: json!({ "clearedRows": occupied.saturating_sub(1) }),
            });
        }
        let result = self
            .call(
                self.api
                    .request(
                        Method::PUT,
                        &self.values_url(sheet_id, &format!("{}!A2", tab_ref)),
                    )
                    .query(&[("valueInputOption", "USER_ENTERED")])
                    .json(&json!({ "values": rows })),
            )
            .await?;
        Ok(WriteOutcome {
            row_index: None,
            result,
        })
    }
}

#[async_trait]
impl SheetWriter for GoogleSheets {
    async fn write(
        &self,
        sheet_id: &str,
        tab: &str,
        request: WriteRequest,
    ) -> Result<WriteOutcome> {
        match request {
            WriteRequest::Append(row) => self.append(sheet_id, tab, row).await,
            WriteRequest::UpdateAt { index, row } => self.update(sheet_id, tab, index, row).await,
            WriteRequest::ReplaceAll(rows) => self.replace_all(sheet_id, tab, rows).await,
        }
    }
}

/// Template copies and image uploads through the Drive files API
pub struct GoogleDrive {
    api: GoogleApi,
    template_id: String,
    base_url: String,
    upload_url: String,
}

impl GoogleDrive {
    pub fn from_config(config: &Config, api: GoogleApi) -> Self {
        Self {
            api,
            template_id: config.template_id.clone(),
            base_url: config.drive_url.clone(),
            upload_url: config.upload_url.clone(),
        }
    }

    async fn call(&self, builder: RequestBuilder) -> Result<Value> {
        self.api.send(builder).await.map_err(Failure::into_drive_error)
    }

    async fn name_taken(&self, output_name: &str, folder_id: &str) -> Result<bool> {
        let q = format!(
            "name = '{}' and '{}' in parents and trashed = false",
            escape_query(output_name),
            escape_query(folder_id)
        );
        let listing = self
            .call(
                self.api
                    .request(Method::GET, &format!("{}/files", self.base_url))
                    .query(&[
                        ("q", q.as_str()),
                        ("fields", "files(id,name)"),
                        ("pageSize", "1"),
                        ("supportsAllDrives", "true"),
                        ("includeItemsFromAllDrives", "true"),
                    ]),
            )
            .await?;
        Ok(listing["files"].as_array().is_some_and(|files| !files.is_empty()))
    }

    async fn copy_template(&self, output_name: &str, folder_id: &str) -> Result<String> {
        if self.name_taken(output_name, folder_id).await? {
            return Err(WizardError::DuplicateName {
                name: output_name.to_string(),
            });
        }
        let url = format!(
            "{}/files/{}/copy",
            self.base_url,
            urlencoding::encode(&self.template_id)
        );
        let copied = self
            .call(
                self.api
                    .request(Method::POST, &url)
                    .query(&[("supportsAllDrives", "true"), ("fields", "id")])
                    .json(&json!({ "name": output_name, "parents": [folder_id] })),
            )
            .await?;
        copied["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| WizardError::Drive("copy response did not include a file id".to_string()))
    }
}

/// Escapes a literal for a Drive `q` expression
fn escape_query(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "\\'")
}

#[async_trait]
impl TemplateProvisioner for GoogleDrive {
    async fn provision(&self, output_name: &str, folder_id: &str) -> Result<String> {
        let sheet_id = tokio::time::timeout(self.api.timeout, self.copy_template(output_name, folder_id))
            .await
            .map_err(|_| WizardError::Timeout(self.api.timeout))??;
        info!("copied template to '{}' ({})", output_name, sheet_id);
        Ok(sheet_id)
    }
}

#[async_trait]
impl FileStore for GoogleDrive {
    async fn upload(
        &self,
        folder_id: &str,
        name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadedFile> {
        // metadata first, then the media upload against the new id
        let created = self
            .call(
                self.api
                    .request(Method::POST, &format!("{}/files", self.base_url))
                    .query(&[("supportsAllDrives", "true"), ("fields", "id")])
                    .json(&json!({ "name": name, "mimeType": mime_type, "parents": [folder_id] })),
            )
            .await?;
        let id = created["id"]
            .as_str()
            .ok_or_else(|| WizardError::Drive("create response did not include a file id".to_string()))?;

        let uploaded = self
            .call(
                self.api
                    .request(
                        Method::PATCH,
                        &format!("{}/files/{}", self.upload_url, urlencoding::encode(id)),
                    )
                    .query(&[
                        ("uploadType", "media"),
                        ("supportsAllDrives", "true"),
                        ("fields", "id,name,webViewLink,thumbnailLink"),
                    ])
                    .header(reqwest::header::CONTENT_TYPE, mime_type)
                    .body(bytes),
            )
            .await?;
        serde_json::from_value(uploaded)
            .map_err(|e| WizardError::Drive(format!("unexpected upload response: {}", e)))
    }

    async fn delete(&self, file_id: &str) -> Result<()> {
        self.call(
            self.api
                .request(
                    Method::DELETE,
                    &format!("{}/files/{}", self.base_url, urlencoding::encode(file_id)),
                )
                .query(&[("supportsAllDrives", "true")]),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::{Request, State};
    use axum::response::{IntoResponse, Response};
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<(String, String)>>>;
    type Reply = Arc<dyn Fn(&str, &str) -> (StatusCode, Value) + Send + Sync>;

    #[derive(Clone)]
    struct Stub {
        seen: Seen,
        reply: Reply,
        delay: Duration,
    }

    async fn answer(State(stub): State<Stub>, request: Request) -> Response {
        let method = request.method().to_string();
        let target = request
            .uri()
            .path_and_query()
            .map(|pq| pq.to_string())
            .unwrap_or_default();
        stub.seen.lock().unwrap().push((method.clone(), target.clone()));
        tokio::time::sleep(stub.delay).await;
        let (status, body) = (stub.reply)(&method, &target);
        (status, axum::Json(body)).into_response()
    }

    /// Serves canned Google responses on a loopback port, recording
    /// `(method, path?query)` of every request.
    async fn google_stub(
        delay: Duration,
        reply: impl Fn(&str, &str) -> (StatusCode, Value) + Send + Sync + 'static,
    ) -> (String, Seen) {
        let seen = Seen::default();
        let stub = Stub {
            seen: seen.clone(),
            reply: Arc::new(reply),
            delay,
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().fallback(answer).with_state(stub);
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{}", addr), seen)
    }

    fn sheets_at(base: &str, timeout: Duration) -> GoogleSheets {
        GoogleSheets::new(GoogleApi::new("token", timeout).unwrap(), base)
    }

    fn drive_at(base: &str) -> GoogleDrive {
        let config = Config {
            drive_url: base.to_string(),
            upload_url: base.to_string(),
            template_id: "template-1".to_string(),
            ..Config::default()
        };
        GoogleDrive::from_config(&config, GoogleApi::new("token", Duration::from_secs(5)).unwrap())
    }

    fn methods(seen: &Seen) -> Vec<String> {
        seen.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }

    #[test]
    fn reads_google_error_bodies() {
        let body = br#"{"error":{"code":400,"message":"Unable to parse range: Nope!A:Z","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(
            error_message(body).as_deref(),
            Some("Unable to parse range: Nope!A:Z")
        );
        assert_eq!(error_message(br#"{"error":"invalid_grant"}"#).as_deref(), Some("invalid_grant"));
        assert_eq!(error_message(b"<html>"), None);
    }

    #[test]
    fn escapes_drive_queries() {
        assert_eq!(escape_query("Bob's App"), "Bob\\'s App");
        assert_eq!(escape_query(r"a\b"), r"a\\b");
    }

    #[test]
    fn status_failures_map_per_service() {
        let failure = || Failure::Status {
            status: StatusCode::NOT_FOUND,
            message: "Requested entity was not found.".to_string(),
        };
        assert!(matches!(failure().into_sheet_error(), WizardError::SheetWrite(m) if m.contains("404")));
        assert!(matches!(failure().into_drive_error(), WizardError::Drive(_)));
    }

    #[test]
    fn ranges_are_encoded_into_the_path() {
        let api = GoogleApi::new("token", Duration::from_secs(5)).unwrap();
        let sheets = GoogleSheets::new(api, "https://sheets.example/v4");
        assert_eq!(
            sheets.values_url("abc", "'Client Basics'!A:Z"),
            "https://sheets.example/v4/spreadsheets/abc/values/%27Client%20Basics%27%21A%3AZ"
        );
    }

    #[tokio::test]
    async fn replace_clears_the_previous_block_then_writes() {
        let (base, seen) = google_stub(Duration::ZERO, |method, _| match method {
            "GET" => (
                StatusCode::OK,
                json!({ "values": [["eventName"], ["install"], ["purchase"]] }),
            ),
            _ => (StatusCode::OK, json!({})),
        })
        .await;

        sheets_at(&base, Duration::from_secs(5))
            .write("sheet-1", "Events", WriteRequest::ReplaceAll(vec![vec![json!("signup")]]))
            .await
            .unwrap();

        assert_eq!(methods(&seen), vec!["GET", "POST", "PUT"]);
        let seen = seen.lock().unwrap();
        assert!(seen[0].1.ends_with("/spreadsheets/sheet-1/values/Events%21A%3AZ"));
        assert!(seen[1].1.ends_with("/values/Events%21A2%3AZ3:clear"));
        assert!(seen[2].1.contains("/values/Events%21A2?valueInputOption=USER_ENTERED"));
    }

    #[tokio::test]
    async fn replace_with_no_rows_only_clears() {
        let (base, seen) = google_stub(Duration::ZERO, |method, _| match method {
            "GET" => (StatusCode::OK, json!({ "values": [["eventName"], ["install"]] })),
            _ => (StatusCode::OK, json!({})),
        })
        .await;

        let outcome = sheets_at(&base, Duration::from_secs(5))
            .write("sheet-1", "Events", WriteRequest::ReplaceAll(Vec::new()))
            .await
            .unwrap();

        assert_eq!(methods(&seen), vec!["GET", "POST"]);
        assert_eq!(outcome.result["clearedRows"], json!(1));
        assert_eq!(outcome.row_index, None);
    }

    #[tokio::test]
    async fn append_reads_the_row_from_the_updated_range() {
        let (base, seen) = google_stub(Duration::ZERO, |_, _| {
            (
                StatusCode::OK,
                json!({ "updates": { "updatedRange": "ClientInfo!A5:D5", "updatedRows": 1 } }),
            )
        })
        .await;

        let outcome = sheets_at(&base, Duration::from_secs(5))
            .write("sheet-1", "ClientInfo", WriteRequest::Append(vec![json!("Acme")]))
            .await
            .unwrap();

        assert_eq!(outcome.row_index, Some(3));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "POST");
        assert!(seen[0].1.contains("/values/ClientInfo%21A%3AZ:append?"));
    }

    #[tokio::test]
    async fn google_errors_become_sheet_write_failures() {
        let (base, _) = google_stub(Duration::ZERO, |_, _| {
            (
                StatusCode::NOT_FOUND,
                json!({ "error": { "code": 404, "message": "Requested entity was not found.", "status": "NOT_FOUND" } }),
            )
        })
        .await;

        let err = sheets_at(&base, Duration::from_secs(5))
            .write(
                "missing",
                "ClientInfo",
                WriteRequest::UpdateAt { index: 0, row: vec![json!("Acme")] },
            )
            .await
            .unwrap_err();
        assert!(
            matches!(err, WizardError::SheetWrite(ref m) if m.contains("Requested entity was not found.") && m.contains("404"))
        );
    }

    #[tokio::test]
    async fn slow_responses_time_out() {
        let (base, _) = google_stub(Duration::from_secs(2), |_, _| (StatusCode::OK, json!({}))).await;

        let err = sheets_at(&base, Duration::from_secs(1))
            .write("sheet-1", "ClientInfo", WriteRequest::Append(vec![json!("Acme")]))
            .await
            .unwrap_err();
        assert!(matches!(err, WizardError::Timeout(d) if d == Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn taken_name_is_not_copied() {
        let (base, seen) = google_stub(Duration::ZERO, |_, _| {
            (StatusCode::OK, json!({ "files": [{ "id": "x", "name": "Acme_2024" }] }))
        })
        .await;

        let err = drive_at(&base)
            .provision("Acme_2024", "folder-1")
            .await
            .unwrap_err();
        assert!(matches!(err, WizardError::DuplicateName { ref name } if name == "Acme_2024"));
        assert_eq!(methods(&seen), vec!["GET"]);
    }

    #[tokio::test]
    async fn free_name_copies_the_template() {
        let (base, seen) = google_stub(Duration::ZERO, |method, _| match method {
            "GET" => (StatusCode::OK, json!({ "files": [] })),
            _ => (StatusCode::OK, json!({ "id": "copy-1" })),
        })
        .await;

        let sheet_id = drive_at(&base).provision("Acme_2024", "folder-1").await.unwrap();
        assert_eq!(sheet_id, "copy-1");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[1].1.starts_with("/files/template-1/copy?"));
    }
}

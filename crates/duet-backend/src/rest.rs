use std::sync::Arc;

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{CONTENT_RANGE, HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde_json::Value;
use tracing::{debug, info};

use duet_types::api::{
    Account, CreateAccountRequest, CreateDocumentRequest, DocumentList, EmailSessionRequest,
    Query, StoredFile, UpdateDocumentRequest,
};

use crate::config::BackendConfig;
use crate::error::{BackendError, Result};
use crate::realtime::{self, Subscription};
use crate::{Backend, Collection, FileUpload};

/// Uploads above this size are sent in ranged chunks of this size.
const UPLOAD_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Response schema version the document types are written against.
const RESPONSE_FORMAT: &str = "1.5.0";

/// Backend reached over HTTPS. Account sessions live in a cookie jar shared
/// by every request and by realtime sockets.
pub struct RestBackend {
    http: Client,
    jar: Arc<Jar>,
    endpoint: Url,
    config: BackendConfig,
}

impl RestBackend {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| BackendError::InvalidRequest(format!("endpoint '{}': {}", config.endpoint, e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Appwrite-Project",
            HeaderValue::from_str(&config.project_id)
                .map_err(|e| BackendError::InvalidRequest(format!("project id: {}", e)))?,
        );
        headers.insert("X-Appwrite-Response-Format", HeaderValue::from_static(RESPONSE_FORMAT));

        let jar = Arc::new(Jar::default());
        let http = Client::builder()
            .cookie_provider(jar.clone())
            .default_headers(headers)
            .user_agent(format!("duet/{} ({})", env!("CARGO_PKG_VERSION"), config.platform))
            .build()?;

        Ok(Self { http, jar, endpoint, config })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Session cookies for the endpoint, in `Cookie` header form.
    pub fn session_cookies(&self) -> Option<String> {
        self.jar
            .cookies(&self.endpoint)
            .and_then(|v| v.to_str().ok().map(str::to_owned))
            .filter(|s| !s.is_empty())
    }

    /// Reload cookies saved by [`session_cookies`](Self::session_cookies).
    pub fn restore_session_cookies(&self, cookies: &str) {
        for cookie in cookies.split(';').map(str::trim).filter(|c| !c.is_empty()) {
            self.jar.add_cookie_str(cookie, &self.endpoint);
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint, path)
    }

    fn documents_url(&self, collection: Collection) -> String {
        self.url(&format!(
            "/databases/{}/collections/{}/documents",
            self.config.database_id,
            self.config.collection_id(collection)
        ))
    }

    fn files_url(&self) -> String {
        self.url(&format!("/storage/buckets/{}/files", self.config.media_bucket_id))
    }

    async fn send(request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::from_response(status.as_u16(), &body))
    }

    async fn send_json<T: serde::de::DeserializeOwned>(request: RequestBuilder) -> Result<T> {
        let response = Self::send(request).await?;
        Ok(response.json::<T>().await?)
    }

    fn file_form(file_id: &str, upload: &FileUpload, chunk: &[u8]) -> Result<Form> {
        let part = Part::bytes(chunk.to_vec())
            .file_name(upload.file_name.clone())
            .mime_str(&upload.mime_type)?;
        Ok(Form::new().text("fileId", file_id.to_string()).part("file", part))
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn list_documents(&self, collection: Collection, queries: &[Query]) -> Result<Vec<Value>> {
        let params: Vec<(&str, String)> = queries.iter().map(|q| ("queries[]", q.to_json())).collect();
        let list: DocumentList<Value> =
            Self::send_json(self.http.get(self.documents_url(collection)).query(&params)).await?;
        debug!("Listed {} of {} documents from {:?}", list.documents.len(), list.total, collection);
        Ok(list.documents)
    }

    async fn create_document(&self, collection: Collection, document_id: &str, data: Value) -> Result<Value> {
        let body = CreateDocumentRequest { document_id, data: &data };
        Self::send_json(self.http.post(self.documents_url(collection)).json(&body)).await
    }

    async fn update_document(&self, collection: Collection, document_id: &str, data: Value) -> Result<Value> {
        let url = format!("{}/{}", self.documents_url(collection), document_id);
        let body = UpdateDocumentRequest { data: &data };
        Self::send_json(self.http.patch(url).json(&body)).await
    }

    async fn delete_document(&self, collection: Collection, document_id: &str) -> Result<()> {
        let url = format!("{}/{}", self.documents_url(collection), document_id);
        Self::send(self.http.delete(url)).await?;
        Ok(())
    }

    async fn create_file(&self, file_id: &str, upload: FileUpload) -> Result<StoredFile> {
        if upload.bytes.is_empty() {
            return Err(BackendError::InvalidRequest("empty upload".into()));
        }

        let total = upload.bytes.len();
        if total <= UPLOAD_CHUNK_SIZE {
            let form = Self::file_form(file_id, &upload, &upload.bytes)?;
            return Self::send_json(self.http.post(self.files_url()).multipart(form)).await;
        }

        // Large files go up in ranged chunks; the server assembles them
        // under the id given by the first chunk.
        let mut stored = None;
        for (index, chunk) in upload.bytes.chunks(UPLOAD_CHUNK_SIZE).enumerate() {
            let start = index * UPLOAD_CHUNK_SIZE;
            let end = start + chunk.len() - 1;
            let form = Self::file_form(file_id, &upload, chunk)?;
            let mut request = self
                .http
                .post(self.files_url())
                .header(CONTENT_RANGE, format!("bytes {}-{}/{}", start, end, total))
                .multipart(form);
            if index > 0 {
                request = request.header("X-Appwrite-ID", file_id);
            }
            let file: StoredFile = Self::send_json(request).await?;
            debug!("Uploaded bytes {}-{} of {} for {}", start, end, total, file_id);
            stored = Some(file);
        }

        stored.ok_or_else(|| BackendError::InvalidRequest("empty upload".into()))
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        Self::send(self.http.delete(format!("{}/{}", self.files_url(), file_id))).await?;
        Ok(())
    }

    fn file_view_url(&self, file_id: &str) -> String {
        self.config.file_view_url(file_id)
    }

    async fn subscribe(&self, collection: Collection) -> Result<Subscription> {
        realtime::connect(&self.config, self.config.channel(collection), self.session_cookies()).await
    }

    async fn create_account(&self, user_id: &str, email: &str, password: &str, name: &str) -> Result<Account> {
        let body = CreateAccountRequest { user_id, email, password, name };
        let account: Account = Self::send_json(self.http.post(self.url("/account")).json(&body)).await?;
        info!("Created account {}", account.id);
        Ok(account)
    }

    async fn create_email_session(&self, email: &str, password: &str) -> Result<()> {
        let body = EmailSessionRequest { email, password };
        Self::send(self.http.post(self.url("/account/sessions/email")).json(&body)).await?;
        Ok(())
    }

    async fn current_account(&self) -> Result<Option<Account>> {
        match Self::send_json::<Account>(self.http.get(self.url("/account"))).await {
            Ok(account) => Ok(Some(account)),
            Err(e) if e.is_unauthorized() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn delete_current_session(&self) -> Result<()> {
        Self::send(self.http.delete(self.url("/account/sessions/current"))).await?;
        Ok(())
    }

    fn initials_avatar_url(&self, name: &str) -> String {
        let mut url = self.endpoint.clone();
        url.set_path(&format!("{}/avatars/initials", self.endpoint.path().trim_end_matches('/')));
        url.query_pairs_mut()
            .append_pair("name", name)
            .append_pair("project", &self.config.project_id);
        url.to_string()
    }
}

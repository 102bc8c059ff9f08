//! openEO REST client

use async_trait::async_trait;
use pvsite_core::config::Credentials;
use pvsite_core::error::{PvsiteError, Result};
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;

use crate::graph::{ProcessGraph, UserDefinedProcess};
use crate::ports::{Backend, JobAsset, JobRequest, JobStatus};

/// Client for one openEO backend
pub struct OpenEoClient {
    /// Versioned API root, e.g. "https://openeo.cloud/openeo/1.2"
    base_url: String,

    /// Bearer token in openEO form: `basic//<token>` or `oidc/<provider>/<token>`
    token: Option<String>,

    /// HTTP client
    client: reqwest::Client,
}

impl OpenEoClient {
    /// Create a client for an API root without any discovery or authentication
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Resolve the API root of `url` and authenticate with `credentials`
    pub async fn connect(url: &str, credentials: Option<&Credentials>) -> Result<Self> {
        let mut client = Self::new(url);
        if let Some(api_root) = client.discover_api_root().await {
            client.base_url = api_root;
        }
        tracing::info!("Connected to openEO backend {}", client.base_url);

        match credentials {
            Some(Credentials::Bearer(token)) => Ok(client.with_token(token.clone())),
            Some(Credentials::Basic { username, password }) => {
                client.authenticate_basic(username, password).await?;
                Ok(client)
            }
            None => {
                tracing::warn!("No openEO credentials configured, requests are anonymous");
                Ok(client)
            }
        }
    }

    /// Pick the newest production API version from `/.well-known/openeo`
    async fn discover_api_root(&self) -> Option<String> {
        let response = self
            .client
            .get(format!("{}/.well-known/openeo", self.base_url))
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }

        let discovery: WellKnown = response.json().await.ok()?;
        discovery
            .versions
            .into_iter()
            .filter(|v| v.production.unwrap_or(true) && v.api_version.starts_with('1'))
            .max_by(|a, b| version_key(&a.api_version).cmp(&version_key(&b.api_version)))
            .map(|v| v.url.trim_end_matches('/').to_string())
    }

    /// Exchange HTTP basic credentials for an access token
    pub async fn authenticate_basic(&mut self, username: &str, password: &str) -> Result<()> {
        let response = self
            .client
            .get(self.url("/credentials/basic"))
            .basic_auth(username, Some(password))
            .send()
            .await
            .map_err(|e| PvsiteError::Http(format!("Failed to connect to {}: {}", self.base_url, e)))?;

        let response = check(response).await?;
        let token: AccessToken = response
            .json()
            .await
            .map_err(|e| PvsiteError::Http(format!("Failed to parse token response: {}", e)))?;

        self.token = Some(format!("basic//{}", token.access_token));
        tracing::info!("Authenticated as {}", username);
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.authorize(self.client.request(method, self.url(path)))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await.map_err(|e| {
            PvsiteError::Http(format!("Request to {} failed: {}", self.base_url, e))
        })?;
        check(response).await
    }
}

/// Turn non-success responses into backend errors, using the openEO error message when the
/// body carries one
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiError>(&body)
        .map(|e| match e.code {
            Some(code) => format!("[{}] {}", code, e.message),
            None => e.message,
        })
        .unwrap_or(body);

    Err(PvsiteError::Backend { status: status.as_u16(), message })
}

fn version_key(version: &str) -> Vec<u32> {
    version.split('.').filter_map(|part| part.parse().ok()).collect()
}

#[async_trait]
impl Backend for OpenEoClient {
    async fn compute_result(&self, graph: &ProcessGraph) -> Result<Vec<u8>> {
        let body = serde_json::json!({ "process": { "process_graph": graph } });
        tracing::debug!("POST /result {}", body);

        let response = self.send(self.request(Method::POST, "/result").json(&body)).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PvsiteError::Http(format!("Failed to read result: {}", e)))?;
        Ok(bytes.to_vec())
    }

    async fn store_process(&self, process: &UserDefinedProcess) -> Result<()> {
        let path = format!("/process_graphs/{}", process.id);
        tracing::debug!("PUT {}", path);

        self.send(self.request(Method::PUT, &path).json(process)).await?;
        tracing::info!("Stored process '{}' on {}", process.id, self.base_url);
        Ok(())
    }

    async fn create_job(&self, job: &JobRequest) -> Result<String> {
        tracing::debug!("POST /jobs {}", serde_json::to_string(job)?);
        let response = self.send(self.request(Method::POST, "/jobs").json(job)).await?;

        let header = |name: &str| {
            response.headers().get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
        };

        header("OpenEO-Identifier")
            .or_else(|| {
                header("Location")
                    .and_then(|l| l.trim_end_matches('/').rsplit('/').next().map(str::to_string))
            })
            .filter(|id| !id.is_empty())
            .ok_or_else(|| PvsiteError::Http("Job created without an identifier".to_string()))
    }

    async fn start_job(&self, job_id: &str) -> Result<()> {
        self.send(self.request(Method::POST, &format!("/jobs/{}/results", job_id))).await?;
        Ok(())
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatus> {
        let response = self.send(self.request(Method::GET, &format!("/jobs/{}", job_id))).await?;
        let info: JobInfo = response
            .json()
            .await
            .map_err(|e| PvsiteError::Http(format!("Failed to parse job {}: {}", job_id, e)))?;
        Ok(info.status)
    }

    async fn job_assets(&self, job_id: &str) -> Result<Vec<JobAsset>> {
        let response =
            self.send(self.request(Method::GET, &format!("/jobs/{}/results", job_id))).await?;
        let results: Value = response
            .json()
            .await
            .map_err(|e| PvsiteError::Http(format!("Failed to parse results of {}: {}", job_id, e)))?;

        Ok(assets_from_results(&results))
    }

    async fn download(&self, href: &str) -> Result<Vec<u8>> {
        // Signed asset URLs on other hosts must not receive our token
        let builder = if href.starts_with(&self.base_url) {
            self.authorize(self.client.get(href))
        } else {
            self.client.get(href)
        };

        let response = self.send(builder).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PvsiteError::Http(format!("Failed to download {}: {}", href, e)))?;
        Ok(bytes.to_vec())
    }
}

/// Read the `assets` map of a STAC job results document
pub fn assets_from_results(results: &Value) -> Vec<JobAsset> {
    let Some(assets) = results.get("assets").and_then(Value::as_object) else {
        return Vec::new();
    };

    assets
        .iter()
        .filter_map(|(name, asset)| {
            let href = asset.get("href")?.as_str()?.to_string();
            Some(JobAsset {
                name: name.clone(),
                href,
                media_type: asset.get("type").and_then(Value::as_str).map(str::to_string),
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct WellKnown {
    versions: Vec<ApiVersion>,
}

#[derive(Debug, Deserialize)]
struct ApiVersion {
    url: String,
    api_version: String,
    production: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct JobInfo {
    status: JobStatus,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<String>,
    message: String,
}

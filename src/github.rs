use crate::error::DispatchError;
use crate::settings::CredentialSources;
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_REF: &str = "main";
const API_VERSION: &str = "2022-11-28";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub type Inputs = BTreeMap<String, String>;

#[derive(Debug, Deserialize)]
pub struct Repository {
    pub full_name: String,
    #[serde(default)]
    pub default_branch: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Workflow {
    pub id: u64,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Serialize)]
struct DispatchBody<'a> {
    #[serde(rename = "ref")]
    git_ref: &'a str,
    inputs: &'a Inputs,
}

/// The GitHub calls a workflow dispatch needs.
pub trait WorkflowApi {
    fn get_repository(&self, token: &str, repo: &str) -> Result<Repository, DispatchError>;

    fn get_workflow(
        &self,
        token: &str,
        repo: &str,
        workflow_id: &str,
    ) -> Result<Workflow, DispatchError>;

    /// Returns `Ok(false)` when GitHub answers without acknowledging the dispatch.
    fn create_dispatch(
        &self,
        token: &str,
        repo: &str,
        workflow_id: u64,
        git_ref: &str,
        inputs: &Inputs,
    ) -> Result<bool, DispatchError>;
}

#[derive(Clone)]
pub struct GitHubApi {
    client: Client,
    base_url: String,
}

impl GitHubApi {
    pub fn new(base_url: &str) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("ob/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn get_headers(&self, token: &str) -> Result<HeaderMap, DispatchError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| DispatchError::InvalidCredential)?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static(API_VERSION),
        );
        Ok(headers)
    }

    fn repo_url(&self, repo: &str) -> Result<String, DispatchError> {
        let (owner, name) = split_repo(repo)?;
        Ok(format!(
            "{}/repos/{}/{}",
            self.base_url,
            urlencoding::encode(owner),
            urlencoding::encode(name)
        ))
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        token: &str,
        url: &str,
    ) -> Result<T, DispatchError> {
        debug!(url, "GET");
        let response = self
            .client
            .get(url)
            .headers(self.get_headers(token)?)
            .send()?;
        let response = check_status(response)?;
        Ok(response.json::<T>()?)
    }
}

impl WorkflowApi for GitHubApi {
    fn get_repository(&self, token: &str, repo: &str) -> Result<Repository, DispatchError> {
        let url = self.repo_url(repo)?;
        self.get_json(token, &url)
    }

    fn get_workflow(
        &self,
        token: &str,
        repo: &str,
        workflow_id: &str,
    ) -> Result<Workflow, DispatchError> {
        let url = format!(
            "{}/actions/workflows/{}",
            self.repo_url(repo)?,
            urlencoding::encode(workflow_id)
        );
        self.get_json(token, &url)
    }

    fn create_dispatch(
        &self,
        token: &str,
        repo: &str,
        workflow_id: u64,
        git_ref: &str,
        inputs: &Inputs,
    ) -> Result<bool, DispatchError> {
        let url = format!(
            "{}/actions/workflows/{}/dispatches",
            self.repo_url(repo)?,
            workflow_id
        );
        debug!(url = %url, git_ref, "POST");

        let response = self
            .client
            .post(&url)
            .headers(self.get_headers(token)?)
            .json(&DispatchBody { git_ref, inputs })
            .send()?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(true);
        }
        let body = response.text().unwrap_or_default();
        warn!(status = status.as_u16(), body = %body, "dispatch not acknowledged");
        Ok(false)
    }
}

fn check_status(response: Response) -> Result<Response, DispatchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().unwrap_or_default();
    Err(DispatchError::Api {
        status: status.as_u16(),
        message,
    })
}

fn split_repo(repo: &str) -> Result<(&str, &str), DispatchError> {
    match repo.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((owner, name))
        }
        _ => Err(DispatchError::InvalidRepository(repo.to_string())),
    }
}

pub struct DispatchRequest {
    pub repository: String,
    pub workflow_id: String,
    pub git_ref: String,
    pub inputs: Inputs,
    pub credential: Option<String>,
}

impl DispatchRequest {
    pub fn new(repository: impl Into<String>, workflow_id: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            workflow_id: workflow_id.into(),
            git_ref: DEFAULT_REF.to_string(),
            inputs: Inputs::new(),
            credential: None,
        }
    }

    pub fn git_ref(mut self, git_ref: impl Into<String>) -> Self {
        self.git_ref = git_ref.into();
        self
    }

    pub fn input(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    pub fn credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential;
        self
    }
}

impl fmt::Debug for DispatchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchRequest")
            .field("repository", &self.repository)
            .field("workflow_id", &self.workflow_id)
            .field("git_ref", &self.git_ref)
            .field("inputs", &self.inputs)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Triggers `workflow_dispatch` runs and reports each outcome on `out`.
pub struct Dispatcher<A, W = io::Stdout> {
    api: A,
    credentials: CredentialSources,
    out: W,
}

impl<A: WorkflowApi> Dispatcher<A, io::Stdout> {
    pub fn new(api: A, credentials: CredentialSources) -> Self {
        Self::with_output(api, credentials, io::stdout())
    }
}

impl<A: WorkflowApi, W: Write> Dispatcher<A, W> {
    pub fn with_output(api: A, credentials: CredentialSources, out: W) -> Self {
        Self {
            api,
            credentials,
            out,
        }
    }

    /// `Ok(true)` when GitHub accepted the run, `Ok(false)` when it answered
    /// but declined. Everything else is an error.
    pub fn dispatch(&mut self, request: &DispatchRequest) -> Result<bool, DispatchError> {
        let token = self
            .credentials
            .resolve(request.credential.as_deref())
            .ok_or(DispatchError::CredentialMissing)?;

        let result = self.trigger(&token, request);
        match &result {
            Ok(true) => {
                self.status(format_args!(
                    "✓ Successfully triggered workflow '{}' on {}@{}",
                    request.workflow_id, request.repository, request.git_ref
                ));
                if !request.inputs.is_empty() {
                    self.status(format_args!("  Inputs: {}", format_inputs(&request.inputs)));
                }
            }
            Ok(false) => self.status(format_args!(
                "✗ Failed to trigger workflow '{}' on {}@{}",
                request.workflow_id, request.repository, request.git_ref
            )),
            Err(e) => self.status(format_args!("✗ Error triggering workflow: {}", e)),
        }
        result
    }

    /// Status lines never change the dispatch outcome.
    fn status(&mut self, line: fmt::Arguments<'_>) {
        if let Err(e) = writeln!(self.out, "{}", line) {
            warn!(error = %e, "failed to write dispatch status");
        }
    }

    #[cfg(test)]
    pub(crate) fn api(&self) -> &A {
        &self.api
    }

    fn trigger(&self, token: &str, request: &DispatchRequest) -> Result<bool, DispatchError> {
        let repo = self.api.get_repository(token, &request.repository)?;
        debug!(
            repo = %repo.full_name,
            default_branch = ?repo.default_branch,
            "resolved repository"
        );

        let workflow = self
            .api
            .get_workflow(token, &request.repository, &request.workflow_id)?;
        debug!(
            id = workflow.id,
            name = %workflow.name,
            path = %workflow.path,
            state = ?workflow.state,
            "resolved workflow"
        );

        self.api.create_dispatch(
            token,
            &request.repository,
            workflow.id,
            &request.git_ref,
            &request.inputs,
        )
    }
}

fn format_inputs(inputs: &Inputs) -> String {
    json!(inputs).to_string()
}

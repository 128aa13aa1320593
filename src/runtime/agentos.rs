//! `AgentOS` HTTP runtime.
//!
//! Talks to an agent server exposing the `AgentOS` run API:
//!
//! - `POST {base}/agents/{agent_id}/runs` starts a run
//! - `POST {base}/agents/{agent_id}/runs/{run_id}/continue` resumes a paused run
//!
//! Both endpoints take url-encoded form bodies and answer with the run
//! payload as JSON when `stream=false`.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{PendingAction, RunHandle, TeamRuntime};

/// Connection settings for the agent server.
#[derive(Debug, Clone)]
pub struct AgentOsSettings {
    /// Base URL of the agent server (e.g., `http://127.0.0.1:7777`).
    pub base_url: String,
    /// Agent that handles consultations.
    pub agent_id: String,
    /// Optional bearer token.
    pub api_key: Option<String>,
    /// Upper bound for a single HTTP exchange.
    pub timeout: Duration,
}

/// Tool execution as serialized by the agent server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ToolExecution {
    #[serde(default)]
    tool_call_id: Option<String>,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_args: Option<serde_json::Value>,
    #[serde(default)]
    requires_confirmation: Option<bool>,
    #[serde(default)]
    confirmed: Option<bool>,
}

/// Run payload returned by both endpoints.
#[derive(Debug, Deserialize)]
struct RunResponse {
    run_id: String,
    #[serde(default)]
    content: Option<serde_json::Value>,
    #[serde(default)]
    is_paused: bool,
    #[serde(default)]
    tools: Vec<ToolExecution>,
}

impl RunResponse {
    fn into_handle(self, session_id: &str, user_id: Option<String>) -> RunHandle {
        let content = match self.content {
            Some(serde_json::Value::String(s)) => Some(s),
            Some(serde_json::Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };

        let pending = self
            .tools
            .into_iter()
            .filter(|t| t.requires_confirmation.unwrap_or(false))
            .map(|t| PendingAction {
                id: t.tool_call_id.unwrap_or_default(),
                name: t.tool_name.unwrap_or_default(),
                arguments: t.tool_args,
                confirmed: t.confirmed.unwrap_or(false),
            })
            .collect();

        RunHandle {
            run_id: self.run_id,
            session_id: session_id.to_string(),
            user_id,
            is_paused: self.is_paused,
            content,
            pending,
        }
    }
}

/// [`TeamRuntime`] backed by an `AgentOS` server.
#[derive(Clone)]
pub struct AgentOsRuntime {
    http: reqwest::Client,
    settings: AgentOsSettings,
}

impl std::fmt::Debug for AgentOsRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentOsRuntime")
            .field("base_url", &self.settings.base_url)
            .field("agent_id", &self.settings.agent_id)
            .finish()
    }
}

impl AgentOsRuntime {
    pub fn new(settings: AgentOsSettings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, settings })
    }

    fn runs_url(&self) -> String {
        format!(
            "{}/agents/{}/runs",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.agent_id
        )
    }

    async fn post_form(&self, url: &str, form: &[(&str, String)]) -> anyhow::Result<RunResponse> {
        let mut rb = self.http.post(url).form(form);
        if let Some(k) = &self.settings.api_key {
            rb = rb.bearer_auth(k);
        }

        let resp = rb.send().await.with_context(|| format!("request to {url} failed"))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("agent server returned {status}: {body}");
        }

        resp.json::<RunResponse>()
            .await
            .context("agent server returned an unreadable run payload")
    }
}

#[async_trait]
impl TeamRuntime for AgentOsRuntime {
    async fn start(
        &self,
        input: &str,
        session_id: &str,
        user_id: Option<&str>,
    ) -> anyhow::Result<RunHandle> {
        let mut form = vec![
            ("message", input.to_string()),
            ("session_id", session_id.to_string()),
            ("stream", "false".to_string()),
        ];
        if let Some(user) = user_id {
            form.push(("user_id", user.to_string()));
        }

        tracing::debug!(agent_id = %self.settings.agent_id, session_id, "Starting agent run");
        let resp = self.post_form(&self.runs_url(), &form).await?;
        Ok(resp.into_handle(session_id, user_id.map(str::to_string)))
    }

    async fn resume(&self, handle: RunHandle) -> anyhow::Result<RunHandle> {
        let tools: Vec<ToolExecution> = handle
            .pending
            .iter()
            .map(|a| ToolExecution {
                tool_call_id: Some(a.id.clone()),
                tool_name: Some(a.name.clone()),
                tool_args: a.arguments.clone(),
                requires_confirmation: Some(true),
                confirmed: Some(a.confirmed),
            })
            .collect();

        let mut form = vec![
            ("tools", serde_json::to_string(&tools)?),
            ("session_id", handle.session_id.clone()),
            ("stream", "false".to_string()),
        ];
        if let Some(user) = &handle.user_id {
            form.push(("user_id", user.clone()));
        }

        let url = format!("{}/{}/continue", self.runs_url(), handle.run_id);
        tracing::debug!(run_id = %handle.run_id, actions = tools.len(), "Continuing agent run");
        let resp = self.post_form(&url, &form).await?;
        Ok(resp.into_handle(&handle.session_id, handle.user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Form, Json, Router, extract::Path, http::StatusCode, routing::post};
    use std::collections::HashMap;

    async fn spawn_agent_server() -> String {
        async fn start(Form(form): Form<HashMap<String, String>>) -> Json<serde_json::Value> {
            assert_eq!(form.get("stream").map(String::as_str), Some("false"));
            if form.get("message").map(String::as_str) == Some("fail") {
                return Json(serde_json::json!({ "nope": true }));
            }
            Json(serde_json::json!({
                "run_id": "run-42",
                "content": null,
                "is_paused": true,
                "tools": [{
                    "tool_call_id": "call-1",
                    "tool_name": "medical_team_consultation",
                    "tool_args": { "patient_summary": "headache" },
                    "requires_confirmation": true,
                    "confirmed": null
                }]
            }))
        }

        async fn resume(
            Path((_agent, run_id)): Path<(String, String)>,
            Form(form): Form<HashMap<String, String>>,
        ) -> Result<Json<serde_json::Value>, StatusCode> {
            let tools: Vec<serde_json::Value> =
                serde_json::from_str(&form["tools"]).map_err(|_| StatusCode::BAD_REQUEST)?;
            if tools.iter().any(|t| t["confirmed"] != serde_json::json!(true)) {
                return Err(StatusCode::CONFLICT);
            }
            Ok(Json(serde_json::json!({
                "run_id": run_id,
                "content": "Plan X",
                "is_paused": false,
                "tools": []
            })))
        }

        let app = Router::new()
            .route("/agents/{agent}/runs", post(start))
            .route("/agents/{agent}/runs/{run_id}/continue", post(resume));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn runtime(base_url: String) -> AgentOsRuntime {
        AgentOsRuntime::new(AgentOsSettings {
            base_url,
            agent_id: "dr.-hausarzt".into(),
            api_key: None,
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_start_and_continue_paused_run() {
        let rt = runtime(spawn_agent_server().await);

        let mut handle = rt.start("headache", "patient_1", Some("u1")).await.unwrap();
        assert!(handle.is_paused);
        assert_eq!(handle.run_id, "run-42");
        assert_eq!(handle.session_id, "patient_1");
        assert_eq!(handle.pending.len(), 1);
        assert_eq!(handle.pending[0].name, "medical_team_consultation");
        assert!(!handle.pending[0].confirmed);

        handle.pending[0].confirmed = true;
        let done = rt.resume(handle).await.unwrap();
        assert!(!done.is_paused);
        assert_eq!(done.content.as_deref(), Some("Plan X"));
    }

    #[tokio::test]
    async fn test_unconfirmed_continue_is_an_error() {
        let rt = runtime(spawn_agent_server().await);

        let handle = rt.start("headache", "patient_1", None).await.unwrap();
        let err = rt.resume(handle).await.unwrap_err();
        assert!(err.to_string().contains("409"));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_an_error() {
        let rt = runtime(spawn_agent_server().await);
        assert!(rt.start("fail", "patient_1", None).await.is_err());
    }
}

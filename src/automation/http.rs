//! HTTP automation client
//!
//! One run = create a session against the allocation's endpoint, invoke the
//! action operation, delete the session. The session is deleted on every
//! path so a failed operation does not leave the endpoint occupied.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::allocator::Allocation;
use crate::config::AutomationConfig;
use crate::domain::TaskAction;

use super::{Automation, AutomationError, AutomationResult};

pub struct HttpAutomation {
    client: reqwest::Client,
}

impl HttpAutomation {
    pub fn new(config: &AutomationConfig) -> Result<Self, AutomationError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AutomationError::Transport(e.to_string()))?;

        Ok(Self { client })
    }

    async fn create_session(&self, allocation: &Allocation) -> Result<String, AutomationError> {
        let url = format!("{}/session", allocation.endpoint_url.trim_end_matches('/'));
        debug!(%url, device_id = %allocation.device_id, "HttpAutomation::create_session: called");

        let mut caps = json!({
            "platformName": "Android",
            "appium:automationName": "UiAutomator2",
            "appium:deviceName": allocation.device_id,
            "appium:udid": allocation.device_id,
            "appium:noReset": true,
        });
        for (role, port) in &allocation.aux_ports {
            caps[format!("appium:{}", kebab_to_camel(role))] = json!(port);
        }

        let body = json!({"capabilities": {"alwaysMatch": caps, "firstMatch": [{}]}});

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AutomationError::Transport(e.to_string()))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| AutomationError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(AutomationError::SessionCreate {
                endpoint_url: allocation.endpoint_url.clone(),
                message: payload["value"]["message"]
                    .as_str()
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }

        payload["value"]["sessionId"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| AutomationError::SessionCreate {
                endpoint_url: allocation.endpoint_url.clone(),
                message: "response carried no session id".to_string(),
            })
    }

    async fn invoke(
        &self,
        allocation: &Allocation,
        session_id: &str,
        action: &TaskAction,
    ) -> AutomationResult {
        let url = format!(
            "{}/session/{}/drover/{}",
            allocation.endpoint_url.trim_end_matches('/'),
            session_id,
            action.op_name()
        );
        debug!(%url, "HttpAutomation::invoke: called");

        let params = match action {
            TaskAction::SearchNotes(p) => serde_json::to_value(p),
            TaskAction::SearchProducts(p) => serde_json::to_value(p),
        }
        .map_err(|e| AutomationError::Transport(e.to_string()))?;

        let response = self
            .client
            .post(&url)
            .json(&params)
            .send()
            .await
            .map_err(|e| AutomationError::Transport(e.to_string()))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| AutomationError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(AutomationError::Operation {
                op: action.op_name().to_string(),
                message: payload["value"]["message"]
                    .as_str()
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }

        Ok(payload["value"].clone())
    }

    async fn delete_session(&self, allocation: &Allocation, session_id: &str) {
        let url = format!(
            "{}/session/{}",
            allocation.endpoint_url.trim_end_matches('/'),
            session_id
        );

        if let Err(e) = self.client.delete(&url).send().await {
            warn!(%url, error = %e, "session delete failed");
        }
    }
}

#[async_trait]
impl Automation for HttpAutomation {
    async fn run(&self, allocation: &Allocation, action: &TaskAction) -> AutomationResult {
        let session_id = self.create_session(allocation).await?;

        let result = self.invoke(allocation, &session_id, action).await;

        self.delete_session(allocation, &session_id).await;

        result
    }
}

/// `system-port` -> `systemPort`, matching the endpoint's capability names
fn kebab_to_camel(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut upper_next = false;
    for c in s.chars() {
        if c == '-' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

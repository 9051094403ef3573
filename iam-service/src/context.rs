//! Per-request metadata threaded through every orchestrator call.

use std::time::Duration;

use crate::models::DeviceInfo;
use crate::utils::Deadline;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub deadline: Deadline,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
}

impl RequestMeta {
    pub fn new(deadline: Deadline) -> Self {
        Self {
            deadline,
            ip: None,
            user_agent: None,
            request_id: None,
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn device(&self) -> DeviceInfo {
        DeviceInfo {
            ip: self.ip.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}

impl Default for RequestMeta {
    fn default() -> Self {
        Self::new(Deadline::after(DEFAULT_REQUEST_TIMEOUT))
    }
}

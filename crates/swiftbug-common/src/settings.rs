use serde::{Deserialize, Serialize};

/// User-facing capture and storage policy, persisted by the report store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_max_stored_reports")]
    pub max_stored_reports: usize,
    #[serde(default = "default_true")]
    pub include_screenshot: bool,
    #[serde(default = "default_true")]
    pub include_network_requests: bool,
    #[serde(default)]
    pub capture_all_network_requests: bool,
    #[serde(default = "default_max_console_lines")]
    pub max_console_lines: usize,
    #[serde(default = "default_max_network_requests")]
    pub max_network_requests: usize,
    #[serde(default = "default_max_request_body_size")]
    pub max_request_body_size: usize,
    #[serde(default = "default_true")]
    pub ignore_static_resources: bool,
    #[serde(default = "default_localhost_endpoint")]
    pub localhost_endpoint: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_stored_reports: default_max_stored_reports(),
            include_screenshot: true,
            include_network_requests: true,
            capture_all_network_requests: false,
            max_console_lines: default_max_console_lines(),
            max_network_requests: default_max_network_requests(),
            max_request_body_size: default_max_request_body_size(),
            ignore_static_resources: true,
            localhost_endpoint: default_localhost_endpoint(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_stored_reports() -> usize {
    50
}

fn default_max_console_lines() -> usize {
    100
}

fn default_max_network_requests() -> usize {
    50
}

fn default_max_request_body_size() -> usize {
    10 * 1024
}

fn default_localhost_endpoint() -> String {
    "http://localhost:8080".to_string()
}

/// Partial settings update; only the present fields are applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_stored_reports: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_screenshot: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_network_requests: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_all_network_requests: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_console_lines: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_network_requests: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_request_body_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_static_resources: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localhost_endpoint: Option<String>,
}

impl Settings {
    /// Applies `patch` on top of the current values. Numeric caps never drop
    /// below one.
    pub fn merge(&mut self, patch: SettingsPatch) {
        if let Some(v) = patch.max_stored_reports {
            self.max_stored_reports = v.max(1);
        }
        if let Some(v) = patch.include_screenshot {
            self.include_screenshot = v;
        }
        if let Some(v) = patch.include_network_requests {
            self.include_network_requests = v;
        }
        if let Some(v) = patch.capture_all_network_requests {
            self.capture_all_network_requests = v;
        }
        if let Some(v) = patch.max_console_lines {
            self.max_console_lines = v.max(1);
        }
        if let Some(v) = patch.max_network_requests {
            self.max_network_requests = v.max(1);
        }
        if let Some(v) = patch.max_request_body_size {
            self.max_request_body_size = v.max(1);
        }
        if let Some(v) = patch.ignore_static_resources {
            self.ignore_static_resources = v;
        }
        if let Some(v) = patch.localhost_endpoint {
            self.localhost_endpoint = v;
        }
    }
}

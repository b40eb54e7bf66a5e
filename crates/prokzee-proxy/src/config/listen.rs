//! Listener and admin API bind configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Address the MITM proxy listener binds to.
    #[serde(default = "default_proxy_addr")]
    pub addr: String,
    /// Directory holding the root CA cert/key; defaults to the platform
    /// config directory when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_dir: Option<String>,
}

fn default_proxy_addr() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            addr: default_proxy_addr(),
            ca_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminApiConfig {
    #[serde(default = "default_admin_addr")]
    pub addr: String,
}

fn default_admin_addr() -> String {
    "127.0.0.1:8787".to_string()
}

impl Default for AdminApiConfig {
    fn default() -> Self {
        Self {
            addr: default_admin_addr(),
        }
    }
}

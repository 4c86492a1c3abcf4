//! Principal handling

use serde::{Deserialize, Serialize};

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SecurityConfig {
    /// User ids granted every privilege
    pub administrators: Vec<String>,
    /// Restrict non-administrators to reading below `/jcr:system`
    pub system_path_read_only: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            administrators: vec!["admin".to_string()],
            system_path_read_only: true,
        }
    }
}

impl SecurityConfig {
    /// Whether `user_id` is listed as an administrator
    pub fn is_administrator(&self, user_id: &str) -> bool {
        self.administrators.iter().any(|a| a == user_id)
    }
}

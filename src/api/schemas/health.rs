use serde::{Deserialize, Serialize};

pub const HEALTH_KEY_VALUE: &str = "juuuut!";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    #[serde(rename = "jut?")]
    pub jut: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self { jut: HEALTH_KEY_VALUE.to_string() }
    }
}

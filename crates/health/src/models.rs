use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct HealthStatus {
    pub status: String,
}

impl HealthStatus {
    pub fn ok() -> Self {
        Self { status: "ok".to_string() }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct DbHealthStatus {
    pub db_status: String,
}

impl DbHealthStatus {
    pub fn connected() -> Self {
        Self { db_status: "connected".to_string() }
    }
}

pub mod server;

use serde::{Deserialize, Serialize};

/// Body of `POST /controlDoor`.
#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    #[serde(rename = "doorStatus")]
    pub door_status: String,
}

/// Successful reply, echoing the status that was published.
#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub state: &'static str,
}

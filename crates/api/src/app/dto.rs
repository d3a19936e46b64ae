//! Request/response DTOs and JSON mapping helpers.
//!
//! The wire format is camelCase end to end, matching the queue and
//! callback payloads.

use serde::Deserialize;

use callmesh_core::Call;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCallRequest {
    pub to: String,
    pub script_id: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCallRequest {
    pub script_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ListCallsParams {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

pub fn call_to_json(call: Call) -> serde_json::Value {
    serde_json::json!({
        "id": call.id.to_string(),
        "to": call.to,
        "scriptId": call.script_id,
        "metadata": call.metadata,
        "status": call.status,
        "attempts": call.attempts,
        "lastError": call.last_error,
        "createdAt": call.created_at,
        "startedAt": call.started_at,
        "endedAt": call.ended_at,
    })
}

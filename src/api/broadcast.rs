//! Broadcast and buffer drain endpoints.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::delivery::BroadcastResult;
use crate::error::{DeliveryError, Result};
use crate::server::AppState;

/// Upper bound on drained messages per request
const MAX_DRAIN_COUNT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub message: serde_json::Value,
    #[serde(default)]
    pub target_user_ids: Option<Vec<String>>,
}

impl BroadcastRequest {
    fn validate(&self) -> Result<()> {
        if self.message.is_null() {
            return Err(DeliveryError::Validation("message must not be null".to_string()));
        }
        if let Some(targets) = &self.target_user_ids {
            if targets.is_empty() {
                return Err(DeliveryError::Validation(
                    "target_user_ids must not be empty when present".to_string(),
                ));
            }
            if targets.iter().any(|id| id.trim().is_empty()) {
                return Err(DeliveryError::Validation(
                    "target_user_ids must not contain blank ids".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// POST /api/v1/broadcast
pub async fn broadcast_message(
    State(state): State<AppState>,
    Json(request): Json<BroadcastRequest>,
) -> Result<Json<BroadcastResult>> {
    request.validate()?;

    let result = state
        .coordinator
        .broadcast(&request.message, request.target_user_ids.as_deref())
        .await;

    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct DrainQuery {
    pub count: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DrainResponse {
    pub count: usize,
    pub messages: Vec<serde_json::Value>,
}

/// GET /api/v1/buffer/messages?count=
pub async fn drain_buffer(
    State(state): State<AppState>,
    Query(query): Query<DrainQuery>,
) -> Result<Json<DrainResponse>> {
    let count = match query.count {
        Some(0) => {
            return Err(DeliveryError::Validation("count must be positive".to_string()));
        }
        Some(count) => count.min(MAX_DRAIN_COUNT),
        None => MAX_DRAIN_COUNT,
    };

    let messages: Vec<serde_json::Value> = state
        .coordinator
        .drain_buffer(Some(count))
        .into_iter()
        .map(|payload| {
            serde_json::from_slice(&payload).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(&payload).into_owned())
            })
        })
        .collect();

    Ok(Json(DrainResponse {
        count: messages.len(),
        messages,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        let ok: BroadcastRequest =
            serde_json::from_value(serde_json::json!({"message": {"text": "hi"}})).unwrap();
        assert!(ok.validate().is_ok());

        let null: BroadcastRequest =
            serde_json::from_value(serde_json::json!({"message": null})).unwrap();
        assert!(null.validate().is_err());

        let empty: BroadcastRequest = serde_json::from_value(
            serde_json::json!({"message": "x", "target_user_ids": []}),
        )
        .unwrap();
        assert!(matches!(empty.validate(), Err(DeliveryError::Validation(_))));

        let blank: BroadcastRequest = serde_json::from_value(
            serde_json::json!({"message": "x", "target_user_ids": ["u1", " "]}),
        )
        .unwrap();
        assert!(blank.validate().is_err());
    }
}

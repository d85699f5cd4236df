//! REST API types.
//!
//! Field names are camelCase to match what the frontend already sends and
//! renders. Errors are `{ "message": ..., "details": ... }`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{EvaluationError, ServerError, StoreError};
use crate::evaluation::EvaluationRequest;

/// Message returned when required evaluation fields are missing.
pub const MISSING_FIELDS_MESSAGE: &str =
    "countryKey, typeOfActivity, travellerRole, startDate and endDate are required.";

/// Raw body of `POST /api/evaluate`; every field may be missing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateBody {
    pub country_key: Option<String>,
    pub type_of_activity: Option<String>,
    pub traveller_role: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    #[serde(default)]
    pub is_mobile_only: Option<Value>,
}

impl TryFrom<EvaluateBody> for EvaluationRequest {
    type Error = ServerError;

    fn try_from(body: EvaluateBody) -> Result<Self, Self::Error> {
        let required = |v: Option<String>| v.filter(|s| !s.is_empty());
        let missing = || ServerError::BadRequest(MISSING_FIELDS_MESSAGE.to_string());

        Ok(EvaluationRequest {
            country_key: required(body.country_key).ok_or_else(missing)?,
            type_of_activity: required(body.type_of_activity).ok_or_else(missing)?,
            traveller_role: required(body.traveller_role).ok_or_else(missing)?,
            start_date: required(body.start_date).ok_or_else(missing)?,
            end_date: required(body.end_date).ok_or_else(missing)?,
            is_mobile_only: body.is_mobile_only.as_ref().is_some_and(truthy),
        })
    }
}

/// Loose boolean: clients send `true`, `"true"` or `1`.
fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "false" && s != "0",
        Value::Null => false,
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Health check payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub matrix_loaded: bool,
}

/// Create an error body
pub fn error_response(message: &str, details: Value) -> Value {
    json!({
        "message": message,
        "details": details,
    })
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_)
            | ServerError::Evaluation(EvaluationError::UnknownCountry(_))
            | ServerError::Upload(crate::error::UploadError::Validation { .. }) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::Evaluation(EvaluationError::Store(StoreError::NotLoaded))
            | ServerError::Store(StoreError::NotLoaded) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let details = match &self {
            ServerError::Upload(e) => e.details(),
            _ => Value::Null,
        };
        (status, Json(error_response(&self.to_string(), details))).into_response()
    }
}

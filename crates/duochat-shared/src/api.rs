//! HTTP request and response bodies.
//!
//! Request fields are optional so the server can answer a missing field
//! with its own 400 message instead of a generic deserialization error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::UserId;

// --- requests ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

pub type RegisterRequest = CredentialsRequest;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCreateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_public_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrLoginRequest {
    #[serde(default)]
    pub qr_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile_public_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteMessageRequest {
    #[serde(default)]
    pub id: Option<String>,
}

// --- responses ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub email: String,
}

pub type RegisterResponse = UserSummary;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user: UserSummary,
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub public_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrLoginResponse {
    pub user: UserSummary,
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub other_public_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeysResponse {
    pub web_public_key: Option<String>,
    pub mobile_public_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCreateResponse {
    pub qr_token: String,
}

/// One entry of `GET /api/messages`.
///
/// Everything but `id` is handed back exactly as the sender stored it, so a
/// numeric `createdAt` stays numeric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_tag: Option<Value>,
}

impl MessageView {
    /// A passthrough field, when the sender stored it as a string.
    pub fn text(field: &Option<Value>) -> Option<&str> {
        field.as_ref().and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

//! HTTP client for the duochat REST API.

use duochat_shared::api::{
    CredentialsRequest, DeleteMessageRequest, ErrorBody, KeysResponse, LoginRequest,
    LoginResponse, MessageView, QrCreateRequest, QrCreateResponse, QrLoginRequest,
    QrLoginResponse, RefreshRequest, SuccessResponse, TokenPair, UserSummary,
};
use duochat_shared::constants::SOCKET_PATH;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{ClientError, Result};

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    /// `base_url` is the server origin, e.g. `http://localhost:3000`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, http }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// WebSocket URL of the relay, without credentials.
    pub fn socket_url(&self) -> String {
        let origin = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{origin}{SOCKET_PATH}")
    }

    pub async fn register(&self, email: &str, password: &str) -> Result<UserSummary> {
        let body = CredentialsRequest {
            email: Some(email.to_string()),
            password: Some(password.to_string()),
        };
        send(self.http.post(self.url("/api/auth/register")).json(&body)).await
    }

    /// `public_key` is stored as the account's web key when present.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        public_key: Option<&str>,
    ) -> Result<LoginResponse> {
        let body = LoginRequest {
            email: Some(email.to_string()),
            password: Some(password.to_string()),
            public_key: public_key.map(str::to_string),
        };
        send(self.http.post(self.url("/api/auth/login")).json(&body)).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let body = RefreshRequest {
            refresh_token: Some(refresh_token.to_string()),
        };
        send(self.http.post(self.url("/api/auth/refresh")).json(&body)).await
    }

    pub async fn keys(&self, access_token: &str) -> Result<KeysResponse> {
        send(
            self.http
                .get(self.url("/api/auth/keys"))
                .bearer_auth(access_token),
        )
        .await
    }

    /// Ask for a pairing token to show as a QR code.
    pub async fn create_qr(
        &self,
        access_token: &str,
        web_public_key: Option<&str>,
    ) -> Result<String> {
        let body = QrCreateRequest {
            web_public_key: web_public_key.map(str::to_string),
        };
        let resp: QrCreateResponse = send(
            self.http
                .post(self.url("/api/qr/create"))
                .bearer_auth(access_token)
                .json(&body),
        )
        .await?;
        Ok(resp.qr_token)
    }

    pub async fn qr_login(
        &self,
        qr_token: &str,
        mobile_public_key: Option<&str>,
    ) -> Result<QrLoginResponse> {
        let body = QrLoginRequest {
            qr_token: Some(qr_token.to_string()),
            mobile_public_key: mobile_public_key.map(str::to_string),
        };
        send(self.http.post(self.url("/api/mobile/qr-login")).json(&body)).await
    }

    pub async fn fetch_messages(&self, access_token: &str) -> Result<Vec<MessageView>> {
        send(
            self.http
                .get(self.url("/api/messages"))
                .bearer_auth(access_token),
        )
        .await
    }

    /// Delete a message from server history.
    ///
    /// A 404 means the message is already gone (or never synced) and is
    /// reported as `Ok(false)`.
    pub async fn delete_message(&self, access_token: &str, id: &str) -> Result<bool> {
        let body = DeleteMessageRequest {
            id: Some(id.to_string()),
        };
        let result: Result<SuccessResponse> = send(
            self.http
                .post(self.url("/api/messages/delete"))
                .bearer_auth(access_token)
                .json(&body),
        )
        .await;

        match result {
            Ok(resp) => Ok(resp.success),
            Err(ClientError::Api { status: 404, .. }) => {
                debug!(id = %id, "Message already absent on server");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
    let resp = request.send().await?;
    read(resp).await
}

async fn read<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }

    let text = resp.text().await.unwrap_or_default();
    Err(ClientError::Api {
        status: status.as_u16(),
        message: error_message(status, &text),
    })
}

fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| {
            status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    async fn mock_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}/")
    }

    #[test]
    fn test_socket_url() {
        assert_eq!(
            ApiClient::new("http://localhost:3000/").socket_url(),
            "ws://localhost:3000/socket"
        );
        assert_eq!(
            ApiClient::new("https://chat.example.com").socket_url(),
            "wss://chat.example.com/socket"
        );
    }

    #[test]
    fn test_error_message_prefers_server_wording() {
        assert_eq!(
            error_message(StatusCode::UNAUTHORIZED, r#"{"message":"Invalid token"}"#),
            "Invalid token"
        );
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, "<html>"),
            "Bad Gateway"
        );
    }

    #[tokio::test]
    async fn test_login_parses_flattened_tokens() {
        let app = Router::new().route(
            "/api/auth/login",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["publicKey"], "pk");
                Json(json!({
                    "user": {"id": "6f1c1f53-4a52-4b5e-9a53-0f0e6f3c4b11", "email": "a@b.c"},
                    "accessToken": "acc",
                    "refreshToken": "ref",
                    "publicKey": null
                }))
            }),
        );
        let api = ApiClient::new(mock_server(app).await);

        let resp = api.login("a@b.c", "pw", Some("pk")).await.unwrap();
        assert_eq!(resp.user.email, "a@b.c");
        assert_eq!(resp.tokens.access_token, "acc");
        assert_eq!(resp.tokens.refresh_token, "ref");
        assert_eq!(resp.public_key, None);
    }

    #[tokio::test]
    async fn test_api_error_carries_status_and_message() {
        let app = Router::new().route(
            "/api/mobile/qr-login",
            post(|| async {
                (
                    AxumStatus::UNAUTHORIZED,
                    Json(json!({"message": "Invalid or expired QR token"})),
                )
            }),
        );
        let api = ApiClient::new(mock_server(app).await);

        match api.qr_login("used", None).await {
            Err(ClientError::Api { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid or expired QR token");
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_treats_not_found_as_already_gone() {
        let app = Router::new().route(
            "/api/messages/delete",
            post(|Json(body): Json<serde_json::Value>| async move {
                if body["id"] == "m1" {
                    (AxumStatus::OK, Json(json!({"success": true})))
                } else {
                    (
                        AxumStatus::NOT_FOUND,
                        Json(json!({"message": "Message not found"})),
                    )
                }
            }),
        );
        let api = ApiClient::new(mock_server(app).await);

        assert!(api.delete_message("tok", "m1").await.unwrap());
        assert!(!api.delete_message("tok", "m2").await.unwrap());
    }

    #[tokio::test]
    async fn test_bearer_header_is_sent() {
        let app = Router::new().route(
            "/api/messages",
            get(|headers: axum::http::HeaderMap| async move {
                assert_eq!(headers["authorization"], "Bearer tok");
                Json(json!([{"id": "m1", "content": "hi"}]))
            }),
        );
        let api = ApiClient::new(mock_server(app).await);

        let history = api.fetch_messages("tok").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, Some(json!("hi")));
    }
}

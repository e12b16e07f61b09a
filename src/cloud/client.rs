use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{DeviceConfig, PropertyType};

use super::token::TokenProvider;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("no access token available, authentication has not succeeded")]
    NotAuthenticated,

    #[error("status '{0}' cannot be published to a boolean property")]
    InvalidValue(String),

    #[error("publish request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("publish rejected with {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// Convert a caller-supplied status into the property's JSON value.
pub fn encode_value(property_type: PropertyType, status: &str) -> Option<serde_json::Value> {
    match property_type {
        PropertyType::String => Some(json!(status)),
        PropertyType::Boolean => match status.to_ascii_lowercase().as_str() {
            "open" | "true" | "on" | "1" => Some(json!(true)),
            "closed" | "false" | "off" | "0" => Some(json!(false)),
            _ => None,
        },
    }
}

/// Writes the configured thing property on the Arduino IoT Cloud.
pub struct PropertyPublisher {
    http: reqwest::Client,
    tokens: Arc<TokenProvider>,
    device: DeviceConfig,
    publish_url: String,
}

impl PropertyPublisher {
    pub fn new(
        http: reqwest::Client,
        tokens: Arc<TokenProvider>,
        device: DeviceConfig,
        api_url: &str,
    ) -> Self {
        let publish_url = device.publish_url(api_url);
        Self {
            http,
            tokens,
            device,
            publish_url,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.tokens.is_authenticated()
    }

    /// Publish `status` to the property and return the raw response body.
    pub async fn publish(&self, status: &str) -> Result<String, PublishError> {
        let value = encode_value(self.device.property_type, status)
            .ok_or_else(|| PublishError::InvalidValue(status.to_string()))?;
        let token = self.tokens.token().ok_or(PublishError::NotAuthenticated)?;

        debug!("PUT {} value={}", self.publish_url, value);

        let response = self
            .http
            .put(&self.publish_url)
            .bearer_auth(token.secret())
            .json(&json!({ "value": value }))
            .send()
            .await?;

        let status_code = response.status();
        let body = response.text().await?;

        if !status_code.is_success() {
            warn!(
                "Publish to property {} rejected ({}): {}",
                self.device.property_id, status_code, body
            );
            return Err(PublishError::Status {
                status: status_code,
                body,
            });
        }

        info!(
            "Published {} to property {}: {}",
            value, self.device.property_id, body
        );
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::build_http_client;
    use crate::config::CloudConfig;
    use mockito::{Matcher, Server, ServerGuard};
    use std::time::Duration;

    const PUBLISH_PATH: &str = "/v2/things/thing-1/properties/prop-1/publish";

    fn device(property_type: PropertyType) -> DeviceConfig {
        DeviceConfig {
            thing_id: "thing-1".to_string(),
            property_id: "prop-1".to_string(),
            property_type,
        }
    }

    fn tokens(api_url: &str, http: reqwest::Client) -> Arc<TokenProvider> {
        Arc::new(TokenProvider::new(
            http,
            CloudConfig {
                api_url: api_url.to_string(),
                client_id: "client-id".to_string(),
                client_secret: "client-secret".to_string(),
                audience: None,
                timeout_secs: 5,
            },
        ))
    }

    /// Publisher whose token provider has already authenticated with token "T".
    async fn authenticated(
        server: &mut ServerGuard,
        property_type: PropertyType,
    ) -> PropertyPublisher {
        let token_mock = server
            .mock("POST", "/v1/clients/token")
            .with_status(200)
            .with_body(r#"{"access_token":"T"}"#)
            .create_async()
            .await;

        let http = build_http_client(Duration::from_secs(5)).unwrap();
        let tokens = tokens(&server.url(), http.clone());
        tokens.authenticate().await.unwrap();
        token_mock.assert_async().await;
        PropertyPublisher::new(http, tokens, device(property_type), &server.url())
    }

    #[tokio::test]
    async fn test_publish_sends_value_with_bearer_token() {
        let mut server = Server::new_async().await;
        let publisher = authenticated(&mut server, PropertyType::String).await;

        let mock = server
            .mock("PUT", PUBLISH_PATH)
            .match_header("authorization", "Bearer T")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(json!({"value": "open"})))
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let body = publisher.publish("open").await.unwrap();

        assert_eq!(body, r#"{"ok":true}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_publish_escapes_status() {
        let mut server = Server::new_async().await;
        let publisher = authenticated(&mut server, PropertyType::String).await;

        let status = r#"open","value":"closed"#;
        let mock = server
            .mock("PUT", PUBLISH_PATH)
            .match_body(Matcher::Json(json!({ "value": status })))
            .with_status(200)
            .create_async()
            .await;

        publisher.publish(status).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_publish_boolean_property() {
        let mut server = Server::new_async().await;
        let publisher = authenticated(&mut server, PropertyType::Boolean).await;

        let mock = server
            .mock("PUT", PUBLISH_PATH)
            .match_body(Matcher::Json(json!({"value": false})))
            .with_status(200)
            .create_async()
            .await;

        publisher.publish("closed").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_publish_boolean_rejects_unknown_status() {
        let mut server = Server::new_async().await;
        let publisher = authenticated(&mut server, PropertyType::Boolean).await;

        let mock = server
            .mock("PUT", PUBLISH_PATH)
            .expect(0)
            .create_async()
            .await;

        let err = publisher.publish("ajar").await.unwrap_err();

        assert!(matches!(err, PublishError::InvalidValue(ref s) if s == "ajar"), "{err:?}");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_publish_without_token_makes_no_request() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("PUT", PUBLISH_PATH)
            .expect(0)
            .create_async()
            .await;

        let http = build_http_client(Duration::from_secs(5)).unwrap();
        let publisher = PropertyPublisher::new(
            http.clone(),
            tokens(&server.url(), http),
            device(PropertyType::String),
            &server.url(),
        );

        assert!(!publisher.is_ready());
        let err = publisher.publish("open").await.unwrap_err();

        assert!(matches!(err, PublishError::NotAuthenticated), "{err:?}");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_publish_remote_rejection() {
        let mut server = Server::new_async().await;
        let publisher = authenticated(&mut server, PropertyType::String).await;

        let _mock = server
            .mock("PUT", PUBLISH_PATH)
            .with_status(401)
            .with_body(r#"{"detail":"token expired"}"#)
            .create_async()
            .await;

        let err = publisher.publish("open").await.unwrap_err();

        match err {
            PublishError::Status { status, body } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert!(body.contains("token expired"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_repeated_publish_is_identical() {
        let mut server = Server::new_async().await;
        let publisher = authenticated(&mut server, PropertyType::String).await;

        let mock = server
            .mock("PUT", PUBLISH_PATH)
            .match_header("authorization", "Bearer T")
            .match_body(Matcher::Json(json!({"value": "open"})))
            .with_status(200)
            .with_body("{}")
            .expect(2)
            .create_async()
            .await;

        let first = publisher.publish("open").await.unwrap();
        let second = publisher.publish("open").await.unwrap();

        assert_eq!(first, second);
        mock.assert_async().await;
    }

    #[test]
    fn test_encode_value() {
        assert_eq!(encode_value(PropertyType::String, "open"), Some(json!("open")));
        assert_eq!(encode_value(PropertyType::Boolean, "OPEN"), Some(json!(true)));
        assert_eq!(encode_value(PropertyType::Boolean, "on"), Some(json!(true)));
        assert_eq!(encode_value(PropertyType::Boolean, "0"), Some(json!(false)));
        assert_eq!(encode_value(PropertyType::Boolean, "maybe"), None);
    }
}

//! Payment gateway verification clients.
//!
//! The gateway's server-side verification endpoint is the sole source of
//! truth for marking a payment completed; webhook payloads alone are never
//! trusted.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha512;

use crate::config::{FlutterwaveConfig, PaystackConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Paystack,
    Flutterwave,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paystack => "paystack",
            Self::Flutterwave => "flutterwave",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "paystack" => Some(Self::Paystack),
            "flutterwave" => Some(Self::Flutterwave),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Gateway API error: {0}")]
    Api(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Result of a server-side verification call.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    pub success: bool,
    pub gateway_status: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Verify a payment by its provider-specific key (reference for
    /// Paystack, transaction id for Flutterwave).
    async fn verify(&self, key: &str) -> Result<VerifiedPayment, GatewayError>;
}

#[derive(Deserialize)]
struct VerificationEnvelope {
    data: Option<VerificationData>,
}

#[derive(Deserialize)]
struct VerificationData {
    status: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PaystackGateway {
    client: reqwest::Client,
    secret_key: String,
    base_url: String,
}

impl PaystackGateway {
    pub fn new(config: &PaystackConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            secret_key: config.secret_key.clone(),
            base_url: config.base_url.clone(),
        }
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    async fn verify(&self, reference: &str) -> Result<VerifiedPayment, GatewayError> {
        let response = self
            .client
            .get(format!(
                "{}/transaction/verify/{}",
                self.base_url, reference
            ))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let envelope = handle_response(response).await?;
        let status = envelope
            .data
            .and_then(|d| d.status)
            .unwrap_or_default();
        Ok(VerifiedPayment {
            success: status == "success",
            gateway_status: status,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FlutterwaveGateway {
    client: reqwest::Client,
    secret_key: String,
    base_url: String,
}

impl FlutterwaveGateway {
    pub fn new(config: &FlutterwaveConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            secret_key: config.secret_key.clone(),
            base_url: config.base_url.clone(),
        }
    }
}

#[async_trait]
impl PaymentGateway for FlutterwaveGateway {
    async fn verify(&self, transaction_id: &str) -> Result<VerifiedPayment, GatewayError> {
        let response = self
            .client
            .get(format!(
                "{}/transactions/{}/verify",
                self.base_url, transaction_id
            ))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let envelope = handle_response(response).await?;
        let status = envelope
            .data
            .and_then(|d| d.status)
            .unwrap_or_default();
        Ok(VerifiedPayment {
            success: status == "successful",
            gateway_status: status,
        })
    }
}

async fn handle_response(
    response: reqwest::Response,
) -> Result<VerificationEnvelope, GatewayError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| GatewayError::Network(e.to_string()))?;

    if !status.is_success() {
        return Err(GatewayError::Api(format!("HTTP {}: {}", status, body)));
    }

    serde_json::from_str(&body).map_err(|e| GatewayError::Parse(e.to_string()))
}

/// Holds one configured client per supported provider.
pub struct GatewayRegistry {
    paystack: PaystackGateway,
    flutterwave: FlutterwaveGateway,
}

impl GatewayRegistry {
    pub fn new(paystack: &PaystackConfig, flutterwave: &FlutterwaveConfig) -> Self {
        Self {
            paystack: PaystackGateway::new(paystack),
            flutterwave: FlutterwaveGateway::new(flutterwave),
        }
    }

    pub fn get(&self, provider: PaymentProvider) -> &dyn PaymentGateway {
        match provider {
            PaymentProvider::Paystack => &self.paystack,
            PaymentProvider::Flutterwave => &self.flutterwave,
        }
    }
}

/// Paystack signs the raw webhook body with HMAC-SHA512 keyed by the account
/// secret and sends the hex digest in `x-paystack-signature`.
pub fn verify_paystack_signature(secret_key: &str, payload: &[u8], signature: &str) -> bool {
    if secret_key.is_empty() {
        return false;
    }
    let Ok(mut mac) = Hmac::<Sha512>::new_from_slice(secret_key.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes()) == signature.to_lowercase()
}

/// Flutterwave echoes the configured secret hash back in the `verif-hash`
/// header.
pub fn verify_flutterwave_hash(secret_hash: &str, header_value: &str) -> bool {
    !secret_hash.is_empty() && secret_hash == header_value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paystack_config(base_url: String) -> PaystackConfig {
        PaystackConfig {
            secret_key: "sk_test_abc".to_string(),
            base_url,
        }
    }

    fn flutterwave_config(base_url: String) -> FlutterwaveConfig {
        FlutterwaveConfig {
            secret_key: "FLWSECK_TEST-xyz".to_string(),
            secret_hash: "hash-123".to_string(),
            base_url,
        }
    }

    #[test]
    fn test_provider_roundtrip() {
        for provider in [PaymentProvider::Paystack, PaymentProvider::Flutterwave] {
            assert_eq!(PaymentProvider::parse(provider.as_str()), Some(provider));
        }
        assert_eq!(PaymentProvider::parse("stripe"), None);
    }

    #[test]
    fn test_paystack_signature_roundtrip() {
        let secret = "sk_test_abc";
        let payload = br#"{"event":"charge.success"}"#;

        let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        let signature = hex::encode(mac.finalize().into_bytes());

        assert!(verify_paystack_signature(secret, payload, &signature));
        assert!(verify_paystack_signature(
            secret,
            payload,
            &signature.to_uppercase()
        ));
        assert!(!verify_paystack_signature(secret, payload, "deadbeef"));
        assert!(!verify_paystack_signature(secret, b"tampered", &signature));
        assert!(!verify_paystack_signature("", payload, &signature));
    }

    #[test]
    fn test_flutterwave_hash_check() {
        assert!(verify_flutterwave_hash("hash-123", "hash-123"));
        assert!(!verify_flutterwave_hash("hash-123", "other"));
        assert!(!verify_flutterwave_hash("", ""));
    }

    #[tokio::test]
    async fn test_paystack_verify_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/transaction/verify/ref-1")
            .match_header("authorization", "Bearer sk_test_abc")
            .with_status(200)
            .with_body(r#"{"status":true,"data":{"status":"success","amount":5000}}"#)
            .create_async()
            .await;

        let gateway = PaystackGateway::new(&paystack_config(server.url()));
        let verdict = gateway.verify("ref-1").await.unwrap();
        assert!(verdict.success);
        assert_eq!(verdict.gateway_status, "success");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_paystack_verify_non_success_status() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/transaction/verify/ref-2")
            .with_status(200)
            .with_body(r#"{"status":true,"data":{"status":"abandoned"}}"#)
            .create_async()
            .await;

        let gateway = PaystackGateway::new(&paystack_config(server.url()));
        let verdict = gateway.verify("ref-2").await.unwrap();
        assert!(!verdict.success);
        assert_eq!(verdict.gateway_status, "abandoned");
    }

    #[tokio::test]
    async fn test_paystack_verify_http_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/transaction/verify/ref-3")
            .with_status(500)
            .with_body("internal error")
            .create_async()
            .await;

        let gateway = PaystackGateway::new(&paystack_config(server.url()));
        let err = gateway.verify("ref-3").await.unwrap_err();
        assert!(matches!(err, GatewayError::Api(_)));
    }

    #[tokio::test]
    async fn test_flutterwave_verify_successful() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/transactions/42/verify")
            .with_status(200)
            .with_body(r#"{"status":"success","data":{"status":"successful"}}"#)
            .create_async()
            .await;

        let gateway = FlutterwaveGateway::new(&flutterwave_config(server.url()));
        let verdict = gateway.verify("42").await.unwrap();
        assert!(verdict.success);
    }

    #[tokio::test]
    async fn test_flutterwave_verify_failed_charge() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/transactions/43/verify")
            .with_status(200)
            .with_body(r#"{"status":"success","data":{"status":"failed"}}"#)
            .create_async()
            .await;

        let gateway = FlutterwaveGateway::new(&flutterwave_config(server.url()));
        let verdict = gateway.verify("43").await.unwrap();
        assert!(!verdict.success);
        assert_eq!(verdict.gateway_status, "failed");
    }

    #[tokio::test]
    async fn test_verify_missing_data_field() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/transaction/verify/ref-4")
            .with_status(200)
            .with_body(r#"{"status":false,"message":"Transaction reference not found"}"#)
            .create_async()
            .await;

        let gateway = PaystackGateway::new(&paystack_config(server.url()));
        let verdict = gateway.verify("ref-4").await.unwrap();
        assert!(!verdict.success);
        assert_eq!(verdict.gateway_status, "");
    }
}

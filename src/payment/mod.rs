use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;

use crate::config::PaymentConfig;
use crate::quota::{QuotaLedger, UserIdentity};
use crate::Result;

/// Answer of the payment provider for a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentVerdict {
    Confirmed,
    Rejected(String),
}

/// External service confirming that a payment token was paid
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    async fn verify(&self, identity: UserIdentity, token: &str) -> Result<PaymentVerdict>;
}

/// Used when no verification endpoint is configured
pub struct DisabledPayments;

#[async_trait]
impl PaymentVerifier for DisabledPayments {
    async fn verify(&self, _identity: UserIdentity, _token: &str) -> Result<PaymentVerdict> {
        Ok(PaymentVerdict::Rejected("Payments are not enabled for this bot.".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    paid: bool,
    #[serde(default)]
    message: Option<String>,
}

/// Verifies tokens against `GET <verify_url>?identity=..&token=..`
pub struct HttpPaymentVerifier {
    client: Client,
    verify_url: String,
}

impl HttpPaymentVerifier {
    pub fn new(verify_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            verify_url: verify_url.into(),
        }
    }
}

#[async_trait]
impl PaymentVerifier for HttpPaymentVerifier {
    async fn verify(&self, identity: UserIdentity, token: &str) -> Result<PaymentVerdict> {
        let identity = identity.to_string();
        let response = self
            .client
            .get(&self.verify_url)
            .query(&[("identity", identity.as_str()), ("token", token)])
            .send()
            .await
            .context("Failed to reach payment verification service")?;

        if !response.status().is_success() {
            anyhow::bail!("Payment verification failed: HTTP {}", response.status());
        }

        let body: VerifyResponse = response
            .json()
            .await
            .context("Failed to parse payment verification response")?;

        Ok(if body.paid {
            PaymentVerdict::Confirmed
        } else {
            PaymentVerdict::Rejected(
                body.message
                    .unwrap_or_else(|| "Payment not found. Please check your token.".to_string()),
            )
        })
    }
}

/// Verifier selected by configuration
pub fn verifier_from_config(config: &PaymentConfig) -> Arc<dyn PaymentVerifier> {
    match &config.verify_url {
        Some(url) => Arc::new(HttpPaymentVerifier::new(url.clone())),
        None => Arc::new(DisabledPayments),
    }
}

/// Verify `token` and credit the ledger, returning the text for the user.
///
/// Tokens already credited are answered from the ledger without asking the verifier.
pub async fn redeem(
    ledger: &QuotaLedger,
    verifier: &dyn PaymentVerifier,
    identity: UserIdentity,
    token: &str,
) -> String {
    if ledger.is_redeemed(token) {
        return ledger.credit(identity, token).message();
    }

    match verifier.verify(identity, token).await {
        Ok(PaymentVerdict::Confirmed) => ledger.credit(identity, token).message(),
        Ok(PaymentVerdict::Rejected(reason)) => reason,
        Err(e) => {
            tracing::error!(%identity, "Payment verification error: {:#}", e);
            "Payment verification is unavailable right now, please try again later.".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuotaConfig;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ledger() -> QuotaLedger {
        QuotaLedger::new(&QuotaConfig {
            max_requests: 1,
            window_secs: 3600,
            credit_amount: 5,
        })
    }

    #[tokio::test]
    async fn test_redeem_twice_verifies_and_credits_once() {
        let ledger = ledger();
        let mut verifier = MockPaymentVerifier::new();
        verifier
            .expect_verify()
            .times(1)
            .returning(|_, _| Ok(PaymentVerdict::Confirmed));

        let id = UserIdentity(11);
        let first = redeem(&ledger, &verifier, id, "order-1").await;
        let second = redeem(&ledger, &verifier, id, "order-1").await;

        assert!(first.contains("5 requests were added"));
        assert!(second.contains("already been redeemed"));
        assert_eq!(ledger.peek(id).remaining, 6);
    }

    #[tokio::test]
    async fn test_rejected_payment_does_not_credit() {
        let ledger = ledger();
        let mut verifier = MockPaymentVerifier::new();
        verifier
            .expect_verify()
            .returning(|_, _| Ok(PaymentVerdict::Rejected("nope".into())));

        let reply = redeem(&ledger, &verifier, UserIdentity(1), "bad").await;
        assert_eq!(reply, "nope");
        assert!(!ledger.is_redeemed("bad"));
        assert_eq!(ledger.peek(UserIdentity(1)).remaining, 1);
    }

    #[tokio::test]
    async fn test_verifier_error_is_reported_not_propagated() {
        let ledger = ledger();
        let mut verifier = MockPaymentVerifier::new();
        verifier
            .expect_verify()
            .returning(|_, _| Err(anyhow::anyhow!("connection refused")));

        let reply = redeem(&ledger, &verifier, UserIdentity(1), "tok").await;
        assert!(reply.contains("unavailable"));
    }

    #[tokio::test]
    async fn test_disabled_payments_reject() {
        let verdict = DisabledPayments.verify(UserIdentity(1), "tok").await.unwrap();
        assert!(matches!(verdict, PaymentVerdict::Rejected(_)));
    }

    #[tokio::test]
    async fn test_http_verifier_confirms_paid_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/verify"))
            .and(query_param("identity", "42"))
            .and(query_param("token", "order-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "paid": true })))
            .mount(&server)
            .await;

        let verifier = HttpPaymentVerifier::new(format!("{}/verify", server.uri()));
        let verdict = verifier.verify(UserIdentity(42), "order-9").await.unwrap();
        assert_eq!(verdict, PaymentVerdict::Confirmed);
    }

    #[tokio::test]
    async fn test_http_verifier_passes_rejection_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/verify"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "paid": false, "message": "Order not found" })),
            )
            .mount(&server)
            .await;

        let verifier = HttpPaymentVerifier::new(format!("{}/verify", server.uri()));
        let verdict = verifier.verify(UserIdentity(1), "x").await.unwrap();
        assert_eq!(verdict, PaymentVerdict::Rejected("Order not found".into()));
    }

    #[tokio::test]
    async fn test_http_verifier_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let verifier = HttpPaymentVerifier::new(server.uri());
        assert!(verifier.verify(UserIdentity(1), "x").await.is_err());
    }
}

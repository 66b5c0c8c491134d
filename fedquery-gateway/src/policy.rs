//! The policy client (`spec.md` §4.3).

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing::instrument;
use url::Url;

use crate::error::Error;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct PolicyRequest<'a> {
    application_id: &'a str,
    schema_id: &'a str,
    required_fields: &'a [String],
}

/// The policy service's decision for one request (`spec.md` §3
/// `PolicyVerdict`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyVerdict {
    pub app_authorized: bool,
    #[serde(default)]
    pub consent_required: bool,
    #[serde(default)]
    pub consent_required_fields: Vec<String>,
    #[serde(default)]
    pub access_expired: bool,
}

pub struct PolicyClient {
    http: reqwest::Client,
    url: Url,
    timeout: Duration,
}

impl PolicyClient {
    pub fn new(http: reqwest::Client, url: Url, timeout: Duration) -> Self {
        PolicyClient { http, url, timeout }
    }

    /// Evaluates the application's access to `required_fields` against
    /// `schema_id`. Never caches: "each request is evaluated fresh"
    /// (`spec.md` §4.3).
    #[instrument(skip(self, required_fields), fields(application_id))]
    pub async fn evaluate(
        &self,
        application_id: &str,
        schema_id: &str,
        required_fields: &[String],
    ) -> Result<PolicyVerdict, Error> {
        let request = PolicyRequest {
            application_id,
            schema_id,
            required_fields,
        };

        let response = self
            .http
            .post(self.url.clone())
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| Error::PdpError(err.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::PdpError(format!(
                "policy service returned {}",
                response.status()
            )));
        }

        let verdict: PolicyVerdict = response
            .json()
            .await
            .map_err(|err| Error::PdpError(err.to_string()))?;

        if !verdict.app_authorized {
            return Err(Error::PdpNotAllowed {
                application_id: application_id.to_string(),
            });
        }

        if verdict.access_expired {
            return Err(Error::PdpAccessExpired {
                application_id: application_id.to_string(),
            });
        }

        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::matchers::path;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;

    fn client(server: &MockServer) -> PolicyClient {
        PolicyClient::new(
            reqwest::Client::new(),
            Url::parse(&server.uri()).unwrap(),
            Duration::from_millis(500),
        )
    }

    #[tokio::test]
    async fn authorized_verdict_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "appAuthorized": true,
                "consentRequired": true,
                "consentRequiredFields": ["person.nic"],
                "accessExpired": false
            })))
            .mount(&server)
            .await;

        let verdict = client(&server)
            .evaluate("app-1", "schema-v1", &["personInfo.fullName".to_string()])
            .await
            .unwrap();
        assert!(verdict.app_authorized);
        assert!(verdict.consent_required);
        assert_eq!(verdict.consent_required_fields, vec!["person.nic"]);
    }

    #[tokio::test]
    async fn unauthorized_verdict_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "appAuthorized": false
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .evaluate("app-1", "schema-v1", &[])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PDP_NOT_ALLOWED");
    }

    #[tokio::test]
    async fn expired_access_is_rejected_even_when_authorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "appAuthorized": true,
                "accessExpired": true
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .evaluate("app-1", "schema-v1", &[])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PDP_ACCESS_EXPIRED");
    }

    #[tokio::test]
    async fn non_2xx_is_pdp_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client(&server)
            .evaluate("app-1", "schema-v1", &[])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PDP_ERROR");
    }
}

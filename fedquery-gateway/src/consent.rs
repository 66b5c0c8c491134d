//! The consent client (`spec.md` §4.4).

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing::instrument;
use url::Url;

use crate::error::Error;

/// A consent grant's lifecycle status (`spec.md` §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

/// `spec.md` §3 `ConsentDecision`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentDecision {
    pub consent_id: String,
    pub status: ConsentStatus,
    pub grant_expires_at: Option<String>,
    pub portal_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateConsentRequest<'a> {
    application_id: &'a str,
    owner_id: &'a str,
    owner_email: &'a str,
    fields: &'a [String],
    grant_duration_seconds: u64,
}

pub struct ConsentClient {
    http: reqwest::Client,
    url: Url,
    timeout: Duration,
}

impl ConsentClient {
    pub fn new(http: reqwest::Client, url: Url, timeout: Duration) -> Self {
        ConsentClient { http, url, timeout }
    }

    /// `findActive(appId, ownerId, fields) -> ConsentDecision | nil`
    /// (`spec.md` §4.4).
    #[instrument(skip(self, fields))]
    pub async fn find_active(
        &self,
        application_id: &str,
        owner_id: &str,
        fields: &[String],
    ) -> Result<Option<ConsentDecision>, Error> {
        let response = self
            .http
            .get(self.url.clone())
            .query(&[("applicationId", application_id), ("ownerId", owner_id)])
            .query(&[("fields", fields.join(","))])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| Error::CeError(err.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if response.status().is_server_error() {
            return Err(Error::CeError(format!(
                "consent service returned {}",
                response.status()
            )));
        }
        if !response.status().is_success() {
            return Ok(None);
        }

        let decision: ConsentDecision = response
            .json()
            .await
            .map_err(|err| Error::CeError(err.to_string()))?;
        Ok(Some(decision))
    }

    /// `create(appId, ownerId, ownerEmail, fields, grantDuration) ->
    /// ConsentDecision` (`spec.md` §4.4). Not called implicitly by
    /// this crate's own request path — see `SPEC_FULL.md` §4.4 for why
    /// — but exported for an out-of-band caller to invoke directly.
    #[instrument(skip(self, fields))]
    pub async fn create(
        &self,
        application_id: &str,
        owner_id: &str,
        owner_email: &str,
        fields: &[String],
        grant_duration: Duration,
    ) -> Result<ConsentDecision, Error> {
        let request = CreateConsentRequest {
            application_id,
            owner_id,
            owner_email,
            fields,
            grant_duration_seconds: grant_duration.as_secs(),
        };

        let response = self
            .http
            .post(self.url.clone())
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| Error::CeError(err.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::CeError(format!(
                "consent service returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|err| Error::CeError(err.to_string()))
    }
}

/// Applies the decision logic in `spec.md` §4.4 to a resolved
/// [`ConsentDecision`], returning `Ok(())` only when the request may
/// proceed.
pub fn evaluate_decision(
    application_id: &str,
    decision: Option<&ConsentDecision>,
    now_unix_seconds: i64,
) -> Result<(), Error> {
    let Some(decision) = decision else {
        return Err(Error::CeNotApproved {
            application_id: application_id.to_string(),
            portal_url: None,
        });
    };

    match decision.status {
        ConsentStatus::Approved => {
            let expires_at = decision
                .grant_expires_at
                .as_deref()
                .and_then(|ts| ts.parse::<i64>().ok());
            match expires_at {
                Some(expires_at) if expires_at > now_unix_seconds => Ok(()),
                _ => Err(Error::CeExpired {
                    application_id: application_id.to_string(),
                }),
            }
        }
        ConsentStatus::Pending | ConsentStatus::Rejected => Err(Error::CeNotApproved {
            application_id: application_id.to_string(),
            portal_url: decision.portal_url.clone(),
        }),
        ConsentStatus::Expired => Err(Error::CeExpired {
            application_id: application_id.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(status: ConsentStatus, expires_at: Option<&str>) -> ConsentDecision {
        ConsentDecision {
            consent_id: "c-1".to_string(),
            status,
            grant_expires_at: expires_at.map(str::to_string),
            portal_url: Some("https://consent.example/c-1".to_string()),
        }
    }

    #[test]
    fn approved_and_unexpired_proceeds() {
        assert!(evaluate_decision("app", Some(&decision(ConsentStatus::Approved, Some("2000000000"))), 1_700_000_000).is_ok());
    }

    #[test]
    fn approved_and_expired_is_ce_expired() {
        let err = evaluate_decision("app", Some(&decision(ConsentStatus::Approved, Some("100"))), 1_700_000_000).unwrap_err();
        assert_eq!(err.code(), "CE_EXPIRED");
    }

    #[test]
    fn pending_is_ce_not_approved_with_portal_url() {
        let err = evaluate_decision("app", Some(&decision(ConsentStatus::Pending, None)), 0).unwrap_err();
        assert_eq!(err.code(), "CE_NOT_APPROVED");
        match err {
            Error::CeNotApproved { portal_url, .. } => assert!(portal_url.is_some()),
            _ => panic!("expected CeNotApproved"),
        }
    }

    #[test]
    fn rejected_is_ce_not_approved() {
        let err = evaluate_decision("app", Some(&decision(ConsentStatus::Rejected, None)), 0).unwrap_err();
        assert_eq!(err.code(), "CE_NOT_APPROVED");
    }

    #[test]
    fn no_active_consent_is_ce_not_approved() {
        let err = evaluate_decision("app", None, 0).unwrap_err();
        assert_eq!(err.code(), "CE_NOT_APPROVED");
    }
}

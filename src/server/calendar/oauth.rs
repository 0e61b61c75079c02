//! OAuth 2.0 authorization-code and refresh-token flows shared by calendar adapters

use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::CalendarError;

#[derive(Debug, Clone)]
pub struct OAuthApp {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: Option<String>,
    pub authorize_url: String,
    pub token_url: String,
    pub scope: String,
    /// Extra query pairs appended to the consent URL
    pub extra_params: Vec<(&'static str, &'static str)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OAuthTokens {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: Option<String>,
    /// Expiry as epoch milliseconds
    #[serde(rename = "expiryDate")]
    pub expiry_date: Option<i64>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

impl OAuthApp {
    pub fn consent_url(&self) -> Result<String, CalendarError> {
        let redirect_uri = self
            .redirect_uri
            .as_deref()
            .ok_or(CalendarError::MissingCredential("redirectUri"))?;

        let mut params = vec![
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", self.scope.as_str()),
        ];
        params.extend(self.extra_params.iter().copied());

        let url = url::Url::parse_with_params(&self.authorize_url, &params)
            .map_err(|e| CalendarError::InvalidInput(format!("Invalid authorize URL: {}", e)))?;
        Ok(url.to_string())
    }

    pub async fn exchange_code(&self, client: &Client, code: &str) -> Result<OAuthTokens, CalendarError> {
        let redirect_uri = self
            .redirect_uri
            .as_deref()
            .ok_or(CalendarError::MissingCredential("redirectUri"))?;
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];
        self.token_request(client, &form).await
    }

    pub async fn refresh(&self, client: &Client, refresh_token: &str) -> Result<OAuthTokens, CalendarError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("scope", self.scope.as_str()),
        ];
        let mut tokens = self.token_request(client, &form).await?;
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.to_string());
        }
        Ok(tokens)
    }

    async fn token_request(&self, client: &Client, form: &[(&str, &str)]) -> Result<OAuthTokens, CalendarError> {
        let response = client.post(&self.token_url).form(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CalendarError::Api { status: status.as_u16(), message });
        }

        let token: TokenResponse = response.json().await?;
        Ok(OAuthTokens {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expiry_date: token.expires_in.map(|secs| Utc::now().timestamp_millis() + secs * 1000),
        })
    }
}

/// Stored access token while it is still valid, otherwise a refreshed one
pub async fn access_token(
    app: &OAuthApp,
    client: &Client,
    credentials: &serde_json::Value,
) -> Result<String, CalendarError> {
    let stored = credentials.get("accessToken").and_then(|v| v.as_str());
    let expiry = credentials.get("expiryDate").and_then(|v| v.as_i64());

    if let (Some(token), Some(expiry)) = (stored, expiry) {
        if expiry > Utc::now().timestamp_millis() {
            return Ok(token.to_string());
        }
    }

    let refresh_token = credentials
        .get("refreshToken")
        .and_then(|v| v.as_str())
        .ok_or(CalendarError::MissingCredential("refreshToken"))?;
    Ok(app.refresh(client, refresh_token).await?.access_token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn app(token_url: &str) -> OAuthApp {
        OAuthApp {
            client_id: "cid".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: Some("https://app.example.com/oauth/callback".to_string()),
            authorize_url: "https://accounts.example.com/auth".to_string(),
            token_url: token_url.to_string(),
            scope: "calendar offline_access".to_string(),
            extra_params: vec![("prompt", "consent")],
        }
    }

    #[test]
    fn test_consent_url_encodes_params() {
        let url = app("http://unused").consent_url().unwrap();
        let parsed = url::Url::parse(&url).unwrap();
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "cid");
        assert_eq!(pairs["redirect_uri"], "https://app.example.com/oauth/callback");
        assert_eq!(pairs["scope"], "calendar offline_access");
        assert_eq!(pairs["prompt"], "consent");
    }

    #[tokio::test]
    async fn test_valid_stored_token_skips_refresh() {
        let credentials = serde_json::json!({
            "accessToken": "still-good",
            "expiryDate": Utc::now().timestamp_millis() + 60_000,
        });
        let token = access_token(&app("http://unused"), &Client::new(), &credentials).await.unwrap();
        assert_eq!(token, "still-good");
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "rt-1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"fresh","expires_in":3600}"#)
            .create_async()
            .await;

        let credentials = serde_json::json!({
            "accessToken": "stale",
            "expiryDate": 0,
            "refreshToken": "rt-1",
        });
        let token = access_token(&app(&format!("{}/token", server.url())), &Client::new(), &credentials)
            .await
            .unwrap();
        assert_eq!(token, "fresh");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_refresh_token() {
        let result = access_token(&app("http://unused"), &Client::new(), &serde_json::json!({})).await;
        assert!(matches!(result, Err(CalendarError::MissingCredential("refreshToken"))));
    }
}

//! Twilio REST API client
//!
//! Twilio takes form-encoded bodies and basic auth with the account SID.

use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TwilioError {
    #[error("Twilio not configured")]
    NotConfigured,
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
}

#[derive(Clone)]
pub struct TwilioClient {
    client: Client,
    account_sid: String,
    auth_token: String,
    base_url: String,
}

impl TwilioClient {
    /// Returns `None` unless both the SID (`AC...`) and token are present
    pub fn new(
        client: Client,
        account_sid: Option<&str>,
        auth_token: Option<&str>,
        base_url: &str,
    ) -> Option<Self> {
        match (account_sid, auth_token) {
            (Some(sid), Some(token)) if sid.starts_with("AC") && !token.is_empty() => Some(Self {
                client,
                account_sid: sid.to_string(),
                auth_token: token.to_string(),
                base_url: base_url.trim_end_matches('/').to_string(),
            }),
            _ => None,
        }
    }

    fn account_url(&self, path: &str) -> String {
        format!("{}/Accounts/{}{}", self.base_url, self.account_sid, path)
    }

    async fn send<F: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        method: Method,
        url: String,
        form: Option<&F>,
    ) -> Result<R, TwilioError> {
        let mut request = self
            .client
            .request(method, url)
            .basic_auth(&self.account_sid, Some(&self.auth_token));
        if let Some(form) = form {
            request = request.form(form);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<TwilioApiError>(&body)
                .map(|e| e.message)
                .unwrap_or(body);
            return Err(TwilioError::Api { status: status.as_u16(), message });
        }

        Ok(response.json().await?)
    }

    pub async fn search_local_numbers(&self, query: &NumberSearch) -> Result<Vec<AvailableNumber>, TwilioError> {
        let mut params: Vec<(&str, String)> = vec![
            ("SmsEnabled", query.sms_enabled.to_string()),
            ("VoiceEnabled", query.voice_enabled.to_string()),
            ("PageSize", query.limit.to_string()),
        ];
        if let Some(area_code) = &query.area_code {
            params.push(("AreaCode", area_code.clone()));
        }
        if let Some(contains) = &query.contains {
            params.push(("Contains", contains.clone()));
        }

        let url = self.account_url(&format!("/AvailablePhoneNumbers/{}/Local.json", query.country));
        let response = self
            .client
            .get(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TwilioError::Api { status: status.as_u16(), message });
        }

        let page: AvailableNumberPage = response.json().await?;
        Ok(page.available_phone_numbers)
    }

    pub async fn purchase_number(&self, purchase: &NumberPurchase<'_>) -> Result<IncomingNumber, TwilioError> {
        let form = [
            ("PhoneNumber", purchase.phone_number),
            ("FriendlyName", purchase.friendly_name),
            ("VoiceUrl", purchase.voice_url),
            ("VoiceMethod", "POST"),
            ("StatusCallback", purchase.status_callback_url),
            ("StatusCallbackMethod", "POST"),
            ("SmsUrl", purchase.sms_url),
            ("SmsMethod", "POST"),
        ];
        self.send(Method::POST, self.account_url("/IncomingPhoneNumbers.json"), Some(&form[..])).await
    }

    pub async fn update_friendly_name(&self, number_sid: &str, friendly_name: &str) -> Result<IncomingNumber, TwilioError> {
        let form = [("FriendlyName", friendly_name)];
        let url = self.account_url(&format!("/IncomingPhoneNumbers/{}.json", number_sid));
        self.send(Method::POST, url, Some(&form[..])).await
    }

    pub async fn release_number(&self, number_sid: &str) -> Result<(), TwilioError> {
        let url = self.account_url(&format!("/IncomingPhoneNumbers/{}.json", number_sid));
        let response = self
            .client
            .delete(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TwilioError::Api { status: status.as_u16(), message });
        }
        Ok(())
    }

    pub async fn send_sms(&self, to: &str, from: &str, body: &str) -> Result<SmsMessage, TwilioError> {
        let form = [("To", to), ("From", from), ("Body", body)];
        self.send(Method::POST, self.account_url("/Messages.json"), Some(&form[..])).await
    }

    /// Start caller ID verification; Twilio calls the number with the returned code
    pub async fn create_validation_request(
        &self,
        phone_number: &str,
        friendly_name: &str,
    ) -> Result<ValidationRequest, TwilioError> {
        let form = [("PhoneNumber", phone_number), ("FriendlyName", friendly_name)];
        self.send(Method::POST, self.account_url("/OutgoingCallerIds.json"), Some(&form[..])).await
    }

    pub async fn fetch_account(&self) -> Result<Account, TwilioError> {
        let url = format!("{}/Accounts/{}.json", self.base_url, self.account_sid);
        self.send::<[(&str, &str)], _>(Method::GET, url, None).await
    }
}

#[derive(Deserialize)]
struct TwilioApiError {
    message: String,
}

/// Local number search with defaults applied
#[derive(Debug, Clone, PartialEq)]
pub struct NumberSearch {
    pub country: String,
    pub area_code: Option<String>,
    pub contains: Option<String>,
    pub sms_enabled: bool,
    pub voice_enabled: bool,
    pub limit: u32,
}

impl From<&crate::models::SearchNumbersQuery> for NumberSearch {
    fn from(query: &crate::models::SearchNumbersQuery) -> Self {
        Self {
            country: query.country.clone().unwrap_or_else(|| "US".to_string()).to_uppercase(),
            area_code: query.area_code.clone(),
            contains: query.contains.clone(),
            sms_enabled: query.sms_enabled.unwrap_or(true),
            voice_enabled: query.voice_enabled.unwrap_or(true),
            limit: query.limit.unwrap_or(20),
        }
    }
}

pub struct NumberPurchase<'a> {
    pub phone_number: &'a str,
    pub friendly_name: &'a str,
    pub voice_url: &'a str,
    pub status_callback_url: &'a str,
    pub sms_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct AvailableNumberPage {
    #[serde(default)]
    available_phone_numbers: Vec<AvailableNumber>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AvailableNumber {
    #[serde(rename(deserialize = "phone_number", serialize = "phoneNumber"))]
    pub phone_number: String,
    #[serde(rename(deserialize = "friendly_name", serialize = "friendlyName"), default)]
    pub friendly_name: Option<String>,
    #[serde(default)]
    pub locality: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(rename(deserialize = "postal_code", serialize = "postalCode"), default)]
    pub postal_code: Option<String>,
    #[serde(rename(deserialize = "iso_country", serialize = "isoCountry"), default)]
    pub iso_country: Option<String>,
    #[serde(default)]
    pub capabilities: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct IncomingNumber {
    pub sid: String,
    pub phone_number: String,
    #[serde(default)]
    pub friendly_name: Option<String>,
    #[serde(default)]
    pub capabilities: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SmsMessage {
    pub sid: String,
    #[serde(default)]
    pub status: Option<String>,
    pub to: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ValidationRequest {
    #[serde(rename(serialize = "validationCode"))]
    pub validation_code: String,
    #[serde(rename(serialize = "phoneNumber"))]
    pub phone_number: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Account {
    pub sid: String,
    #[serde(default)]
    pub friendly_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

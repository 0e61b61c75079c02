use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const DEFAULT_LLM_PROVIDER: &str = "openai";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: i32 = 500;
pub const DEFAULT_INTERRUPT_SENS: f64 = 0.5;
pub const DEFAULT_RESPONSE_DELAY: i32 = 100;

#[derive(sqlx::FromRow, Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub id: Uuid,
    #[serde(rename = "organizationId")]
    pub organization_id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub status: AgentStatus,
    #[serde(rename = "systemPrompt")]
    pub system_prompt: String,
    #[serde(rename = "firstMessage")]
    pub first_message: Option<String>,
    #[serde(rename = "voiceId")]
    pub voice_id: String,
    #[serde(rename = "llmProvider")]
    pub llm_provider: String,
    #[serde(rename = "llmModel")]
    pub llm_model: String,
    pub temperature: f64,
    #[serde(rename = "maxTokens")]
    pub max_tokens: i32,
    #[serde(rename = "interruptSens")]
    pub interrupt_sens: f64,
    #[serde(rename = "responseDelay")]
    pub response_delay: i32,
    #[serde(rename = "retellAgentId")]
    pub retell_agent_id: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// Agent fields embedded in call listings
#[derive(sqlx::FromRow, Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSummary {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
}

#[derive(sqlx::Type, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "agent_type", rename_all = "lowercase")]
pub enum AgentType {
    Inbound,
    Outbound,
    Transfer,
}

#[derive(sqlx::Type, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "agent_status", rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Inactive,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    #[serde(rename = "systemPrompt")]
    pub system_prompt: String,
    #[serde(rename = "firstMessage")]
    pub first_message: Option<String>,
    #[serde(rename = "voiceId")]
    pub voice_id: String,
    #[serde(rename = "llmProvider")]
    pub llm_provider: Option<String>,
    #[serde(rename = "llmModel")]
    pub llm_model: Option<String>,
    pub temperature: Option<f64>,
    #[serde(rename = "maxTokens")]
    pub max_tokens: Option<i32>,
    #[serde(rename = "interruptSens")]
    pub interrupt_sens: Option<f64>,
    #[serde(rename = "responseDelay")]
    pub response_delay: Option<i32>,
}

/// Partial update; absent fields keep their stored value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAgentRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub agent_type: Option<AgentType>,
    pub status: Option<AgentStatus>,
    #[serde(rename = "systemPrompt")]
    pub system_prompt: Option<String>,
    #[serde(rename = "firstMessage")]
    pub first_message: Option<String>,
    #[serde(rename = "voiceId")]
    pub voice_id: Option<String>,
    #[serde(rename = "llmProvider")]
    pub llm_provider: Option<String>,
    #[serde(rename = "llmModel")]
    pub llm_model: Option<String>,
    pub temperature: Option<f64>,
    #[serde(rename = "maxTokens")]
    pub max_tokens: Option<i32>,
    #[serde(rename = "interruptSens")]
    pub interrupt_sens: Option<f64>,
    #[serde(rename = "responseDelay")]
    pub response_delay: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentListQuery {
    pub search: Option<String>,
}

/// Validation failure for agent tuning parameters
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AgentValidationError {
    #[error("name must not be empty")]
    EmptyName,
    #[error("temperature must be between 0 and 2")]
    Temperature,
    #[error("maxTokens must be positive")]
    MaxTokens,
    #[error("interruptSens must be between 0 and 1")]
    InterruptSensitivity,
    #[error("responseDelay must not be negative")]
    ResponseDelay,
}

fn validate_tuning(
    temperature: Option<f64>,
    max_tokens: Option<i32>,
    interrupt_sens: Option<f64>,
    response_delay: Option<i32>,
) -> Result<(), AgentValidationError> {
    if let Some(t) = temperature {
        if !(0.0..=2.0).contains(&t) {
            return Err(AgentValidationError::Temperature);
        }
    }
    if let Some(m) = max_tokens {
        if m <= 0 {
            return Err(AgentValidationError::MaxTokens);
        }
    }
    if let Some(s) = interrupt_sens {
        if !(0.0..=1.0).contains(&s) {
            return Err(AgentValidationError::InterruptSensitivity);
        }
    }
    if let Some(d) = response_delay {
        if d < 0 {
            return Err(AgentValidationError::ResponseDelay);
        }
    }
    Ok(())
}

impl CreateAgentRequest {
    pub fn validate(&self) -> Result<(), AgentValidationError> {
        if self.name.trim().is_empty() {
            return Err(AgentValidationError::EmptyName);
        }
        validate_tuning(self.temperature, self.max_tokens, self.interrupt_sens, self.response_delay)
    }
}

impl UpdateAgentRequest {
    pub fn validate(&self) -> Result<(), AgentValidationError> {
        if matches!(&self.name, Some(name) if name.trim().is_empty()) {
            return Err(AgentValidationError::EmptyName);
        }
        validate_tuning(self.temperature, self.max_tokens, self.interrupt_sens, self.response_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CreateAgentRequest {
        serde_json::from_value(serde_json::json!({
            "name": "Sales Assistant",
            "type": "inbound",
            "systemPrompt": "You are a helpful assistant.",
            "voiceId": "en-US-JennyNeural"
        }))
        .unwrap()
    }

    #[test]
    fn test_create_request_optional_fields_default_to_none() {
        let req = request();
        assert_eq!(req.agent_type, AgentType::Inbound);
        assert!(req.llm_provider.is_none());
        assert!(req.temperature.is_none());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_temperature_out_of_range_rejected() {
        let mut req = request();
        req.temperature = Some(2.5);
        assert_eq!(req.validate(), Err(AgentValidationError::Temperature));
        req.temperature = Some(2.0);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_interrupt_sensitivity_bounds() {
        let mut req = request();
        req.interrupt_sens = Some(-0.1);
        assert_eq!(req.validate(), Err(AgentValidationError::InterruptSensitivity));
        req.interrupt_sens = Some(1.0);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_blank_name_rejected() {
        let mut req = request();
        req.name = "   ".to_string();
        assert_eq!(req.validate(), Err(AgentValidationError::EmptyName));
    }

    #[test]
    fn test_update_only_validates_present_fields() {
        let update = UpdateAgentRequest {
            max_tokens: Some(0),
            ..Default::default()
        };
        assert_eq!(update.validate(), Err(AgentValidationError::MaxTokens));
        assert!(UpdateAgentRequest::default().validate().is_ok());
    }

    #[test]
    fn test_unknown_agent_type_rejected() {
        let result: Result<CreateAgentRequest, _> = serde_json::from_value(serde_json::json!({
            "name": "x",
            "type": "sales",
            "systemPrompt": "p",
            "voiceId": "v"
        }));
        assert!(result.is_err());
    }
}

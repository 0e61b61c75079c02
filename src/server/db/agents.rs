//! Agent database operations
//!
//! Every lookup is scoped by organization; a row belonging to another
//! organization is indistinguishable from a missing one.

use sqlx::PgPool;
use uuid::Uuid;
use crate::models::{
    Agent, AgentStatus, AgentSummary, AgentType, CreateAgentRequest, UpdateAgentRequest,
    DEFAULT_INTERRUPT_SENS, DEFAULT_LLM_MODEL, DEFAULT_LLM_PROVIDER, DEFAULT_MAX_TOKENS,
    DEFAULT_RESPONSE_DELAY, DEFAULT_TEMPERATURE,
};

pub async fn get_all(
    pool: &PgPool,
    organization_id: Uuid,
    search: Option<&str>,
) -> Result<Vec<Agent>, sqlx::Error> {
    let pattern = search
        .filter(|s| !s.trim().is_empty())
        .map(|s| format!("%{}%", s.trim()));

    sqlx::query_as::<_, Agent>(
        r#"
        SELECT id, organization_id, name, agent_type, status, system_prompt, first_message,
               voice_id, llm_provider, llm_model, temperature, max_tokens, interrupt_sens,
               response_delay, retell_agent_id, created_at, updated_at
        FROM agents
        WHERE organization_id = $1
          AND ($2::text IS NULL OR name ILIKE $2)
        ORDER BY created_at DESC
        "#
    )
    .bind(organization_id)
    .bind(pattern)
    .fetch_all(pool)
    .await
}

pub async fn get_by_id(pool: &PgPool, id: Uuid, organization_id: Uuid) -> Result<Option<Agent>, sqlx::Error> {
    sqlx::query_as::<_, Agent>(
        r#"
        SELECT id, organization_id, name, agent_type, status, system_prompt, first_message,
               voice_id, llm_provider, llm_model, temperature, max_tokens, interrupt_sens,
               response_delay, retell_agent_id, created_at, updated_at
        FROM agents
        WHERE id = $1 AND organization_id = $2
        "#
    )
    .bind(id)
    .bind(organization_id)
    .fetch_optional(pool)
    .await
}

/// Resolve an agent from the id Retell knows it by
pub async fn get_by_retell_id(pool: &PgPool, retell_agent_id: &str) -> Result<Option<Agent>, sqlx::Error> {
    sqlx::query_as::<_, Agent>(
        r#"
        SELECT id, organization_id, name, agent_type, status, system_prompt, first_message,
               voice_id, llm_provider, llm_model, temperature, max_tokens, interrupt_sens,
               response_delay, retell_agent_id, created_at, updated_at
        FROM agents
        WHERE retell_agent_id = $1
        "#
    )
    .bind(retell_agent_id)
    .fetch_optional(pool)
    .await
}

/// Oldest active inbound agent; the default answerer for an organization
pub async fn get_default_inbound(pool: &PgPool, organization_id: Uuid) -> Result<Option<Agent>, sqlx::Error> {
    sqlx::query_as::<_, Agent>(
        r#"
        SELECT id, organization_id, name, agent_type, status, system_prompt, first_message,
               voice_id, llm_provider, llm_model, temperature, max_tokens, interrupt_sens,
               response_delay, retell_agent_id, created_at, updated_at
        FROM agents
        WHERE organization_id = $1 AND agent_type = $2 AND status = $3
        ORDER BY created_at ASC
        LIMIT 1
        "#
    )
    .bind(organization_id)
    .bind(AgentType::Inbound)
    .bind(AgentStatus::Active)
    .fetch_optional(pool)
    .await
}

pub async fn get_summaries(pool: &PgPool, ids: &[Uuid]) -> Result<Vec<AgentSummary>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    sqlx::query_as::<_, AgentSummary>(
        "SELECT id, name, agent_type FROM agents WHERE id = ANY($1)"
    )
    .bind(ids)
    .fetch_all(pool)
    .await
}

pub async fn create(pool: &PgPool, organization_id: Uuid, req: CreateAgentRequest) -> Result<Agent, sqlx::Error> {
    sqlx::query_as::<_, Agent>(
        r#"
        INSERT INTO agents (id, organization_id, name, agent_type, status, system_prompt,
                            first_message, voice_id, llm_provider, llm_model, temperature,
                            max_tokens, interrupt_sens, response_delay)
        VALUES ($1, $2, $3, $4, 'active', $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING id, organization_id, name, agent_type, status, system_prompt, first_message,
                  voice_id, llm_provider, llm_model, temperature, max_tokens, interrupt_sens,
                  response_delay, retell_agent_id, created_at, updated_at
        "#
    )
    .bind(Uuid::new_v4())
    .bind(organization_id)
    .bind(&req.name)
    .bind(req.agent_type)
    .bind(&req.system_prompt)
    .bind(&req.first_message)
    .bind(&req.voice_id)
    .bind(req.llm_provider.as_deref().unwrap_or(DEFAULT_LLM_PROVIDER))
    .bind(req.llm_model.as_deref().unwrap_or(DEFAULT_LLM_MODEL))
    .bind(req.temperature.unwrap_or(DEFAULT_TEMPERATURE))
    .bind(req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS))
    .bind(req.interrupt_sens.unwrap_or(DEFAULT_INTERRUPT_SENS))
    .bind(req.response_delay.unwrap_or(DEFAULT_RESPONSE_DELAY))
    .fetch_one(pool)
    .await
}

/// Apply a partial update; returns `None` when the agent is not in the organization
pub async fn update(
    pool: &PgPool,
    id: Uuid,
    organization_id: Uuid,
    req: UpdateAgentRequest,
) -> Result<Option<Agent>, sqlx::Error> {
    sqlx::query_as::<_, Agent>(
        r#"
        UPDATE agents
        SET name = COALESCE($3, name),
            agent_type = COALESCE($4, agent_type),
            status = COALESCE($5, status),
            system_prompt = COALESCE($6, system_prompt),
            first_message = COALESCE($7, first_message),
            voice_id = COALESCE($8, voice_id),
            llm_provider = COALESCE($9, llm_provider),
            llm_model = COALESCE($10, llm_model),
            temperature = COALESCE($11, temperature),
            max_tokens = COALESCE($12, max_tokens),
            interrupt_sens = COALESCE($13, interrupt_sens),
            response_delay = COALESCE($14, response_delay),
            updated_at = NOW()
        WHERE id = $1 AND organization_id = $2
        RETURNING id, organization_id, name, agent_type, status, system_prompt, first_message,
                  voice_id, llm_provider, llm_model, temperature, max_tokens, interrupt_sens,
                  response_delay, retell_agent_id, created_at, updated_at
        "#
    )
    .bind(id)
    .bind(organization_id)
    .bind(req.name)
    .bind(req.agent_type)
    .bind(req.status)
    .bind(req.system_prompt)
    .bind(req.first_message)
    .bind(req.voice_id)
    .bind(req.llm_provider)
    .bind(req.llm_model)
    .bind(req.temperature)
    .bind(req.max_tokens)
    .bind(req.interrupt_sens)
    .bind(req.response_delay)
    .fetch_optional(pool)
    .await
}

/// Soft delete: agents are archived, never removed, so call history keeps its owner
pub async fn archive(pool: &PgPool, id: Uuid, organization_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE agents SET status = $3, updated_at = NOW() WHERE id = $1 AND organization_id = $2"
    )
    .bind(id)
    .bind(organization_id)
    .bind(AgentStatus::Archived)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_retell_agent_id(
    pool: &PgPool,
    id: Uuid,
    organization_id: Uuid,
    retell_agent_id: &str,
) -> Result<Option<Agent>, sqlx::Error> {
    sqlx::query_as::<_, Agent>(
        r#"
        UPDATE agents
        SET retell_agent_id = $3, updated_at = NOW()
        WHERE id = $1 AND organization_id = $2
        RETURNING id, organization_id, name, agent_type, status, system_prompt, first_message,
                  voice_id, llm_provider, llm_model, temperature, max_tokens, interrupt_sens,
                  response_delay, retell_agent_id, created_at, updated_at
        "#
    )
    .bind(id)
    .bind(organization_id)
    .bind(retell_agent_id)
    .fetch_optional(pool)
    .await
}

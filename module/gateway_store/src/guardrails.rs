//! Guardrail policy rows and the append-only event log

use serde::{ Deserialize, Serialize };
use sqlx::Row;
use uuid::Uuid;

use gateway_types::{ GatewayError, GuardrailAction, GuardrailStage, Result };

use crate::{ db_err, decode_string_list, encode_string_list, now_ms, Store };

/// Webhook / keyword moderation settings embedded in a policy row
#[ derive( Debug, Clone, PartialEq, Serialize, Deserialize ) ]
pub struct ModerationConfig
{
  pub enabled: bool,
  /// `keyword` or `webhook`
  pub provider: String,
  pub action: GuardrailAction,
  #[ serde( default, skip_serializing_if = "Option::is_none" ) ]
  pub webhook_url: Option< String >,
  #[ serde( default, skip_serializing_if = "Option::is_none" ) ]
  pub webhook_auth_header: Option< String >,
  #[ serde( default, skip_serializing_if = "Option::is_none" ) ]
  pub webhook_auth_value: Option< String >,
  #[ serde( default = "default_timeout" ) ]
  pub timeout_seconds: u64,
}

fn default_timeout() -> u64
{
  5
}

/// One row of `guardrail_policies`
#[ derive( Debug, Clone ) ]
pub struct GuardrailPolicyRecord
{
  /// `tenant` or `api_key`
  pub scope: String,
  pub scope_id: Uuid,
  pub enabled: bool,
  pub prompt_blocked_keywords: Vec< String >,
  pub response_blocked_keywords: Vec< String >,
  pub moderation: Option< ModerationConfig >,
  pub version: i64,
  pub created_at: i64,
  pub updated_at: i64,
}

impl GuardrailPolicyRecord
{
  /// A policy with no keywords and no moderation block carries no rules;
  /// an empty api-key policy inherits the tenant policy on read.
  #[ must_use ]
  pub fn is_empty( &self ) -> bool
  {
    self.prompt_blocked_keywords.is_empty()
      && self.response_blocked_keywords.is_empty()
      && self.moderation.is_none()
  }
}

/// One row of `guardrail_events`
#[ derive( Debug, Clone ) ]
pub struct GuardrailEventRecord
{
  pub id: Uuid,
  pub tenant_id: Uuid,
  pub api_key_id: Option< Uuid >,
  pub stage: GuardrailStage,
  pub action: String,
  pub category: Option< String >,
  pub violations: Vec< String >,
  pub created_at: i64,
}

fn decode_policy( row: &sqlx::sqlite::SqliteRow ) -> GuardrailPolicyRecord
{
  let moderation_raw: Option< String > = row.get( "moderation" );

  GuardrailPolicyRecord
  {
    scope: row.get( "scope" ),
    scope_id: row.get( "scope_id" ),
    enabled: row.get::< i64, _ >( "enabled" ) != 0,
    prompt_blocked_keywords: decode_string_list( row.get( "prompt_blocked_keywords" ) ),
    response_blocked_keywords: decode_string_list( row.get( "response_blocked_keywords" ) ),
    moderation: moderation_raw.and_then( |raw| serde_json::from_str( &raw ).ok() ),
    version: row.get( "version" ),
    created_at: row.get( "created_at" ),
    updated_at: row.get( "updated_at" ),
  }
}

impl Store
{
  /// Fetch the policy for a scope, if configured
  pub async fn get_guardrail_policy( &self, scope: &str, scope_id: Uuid ) -> Result< Option< GuardrailPolicyRecord > >
  {
    let row = sqlx::query( "SELECT * FROM guardrail_policies WHERE scope = $1 AND scope_id = $2" )
      .bind( scope )
      .bind( scope_id )
      .fetch_optional( &self.pool )
      .await
      .map_err( db_err )?;

    Ok( row.as_ref().map( decode_policy ) )
  }

  /// Create or replace a policy row
  pub async fn upsert_guardrail_policy( &self, rec: &GuardrailPolicyRecord ) -> Result< () >
  {
    if rec.scope != "tenant" && rec.scope != "api_key"
    {
      return Err( GatewayError::BadRequest( format!( "unknown guardrail scope {}", rec.scope ) ) );
    }

    let moderation = rec.moderation.as_ref()
      .map( |m| serde_json::to_string( m ).unwrap_or_default() );

    sqlx::query(
      "INSERT INTO guardrail_policies \
       (scope, scope_id, enabled, prompt_blocked_keywords, response_blocked_keywords, moderation, \
        created_at, updated_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $7) \
       ON CONFLICT (scope, scope_id) DO UPDATE SET \
         enabled = excluded.enabled, \
         prompt_blocked_keywords = excluded.prompt_blocked_keywords, \
         response_blocked_keywords = excluded.response_blocked_keywords, \
         moderation = excluded.moderation, \
         version = guardrail_policies.version + 1, \
         updated_at = excluded.updated_at"
    )
    .bind( &rec.scope )
    .bind( rec.scope_id )
    .bind( i64::from( rec.enabled ) )
    .bind( encode_string_list( &rec.prompt_blocked_keywords ) )
    .bind( encode_string_list( &rec.response_blocked_keywords ) )
    .bind( moderation )
    .bind( now_ms() )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    Ok( () )
  }

  /// Remove a policy row
  pub async fn delete_guardrail_policy( &self, scope: &str, scope_id: Uuid ) -> Result< () >
  {
    sqlx::query( "DELETE FROM guardrail_policies WHERE scope = $1 AND scope_id = $2" )
      .bind( scope )
      .bind( scope_id )
      .execute( &self.pool )
      .await
      .map_err( db_err )?;

    Ok( () )
  }

  /// Append a guardrail event
  pub async fn insert_guardrail_event(
    &self,
    tenant_id: Uuid,
    api_key_id: Option< Uuid >,
    stage: GuardrailStage,
    action: &str,
    category: Option< &str >,
    violations: &[ String ],
  ) -> Result< Uuid >
  {
    let id = Uuid::new_v4();

    sqlx::query(
      "INSERT INTO guardrail_events (id, tenant_id, api_key_id, stage, action, category, violations, created_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
    )
    .bind( id )
    .bind( tenant_id )
    .bind( api_key_id )
    .bind( stage.as_str() )
    .bind( action )
    .bind( category )
    .bind( encode_string_list( violations ) )
    .bind( now_ms() )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    Ok( id )
  }

  /// Recent guardrail events for a tenant, newest first
  pub async fn list_guardrail_events( &self, tenant_id: Uuid, limit: i64 ) -> Result< Vec< GuardrailEventRecord > >
  {
    let rows = sqlx::query(
      "SELECT * FROM guardrail_events WHERE tenant_id = $1 ORDER BY created_at DESC LIMIT $2"
    )
    .bind( tenant_id )
    .bind( limit )
    .fetch_all( &self.pool )
    .await
    .map_err( db_err )?;

    Ok(
      rows.iter().map( |row|
      {
        let stage_raw: String = row.get( "stage" );
        GuardrailEventRecord
        {
          id: row.get( "id" ),
          tenant_id: row.get( "tenant_id" ),
          api_key_id: row.get( "api_key_id" ),
          stage: if stage_raw == "response" { GuardrailStage::Response } else { GuardrailStage::Prompt },
          action: row.get( "action" ),
          category: row.get( "category" ),
          violations: decode_string_list( row.get( "violations" ) ),
          created_at: row.get( "created_at" ),
        }
      } ).collect()
    )
  }
}

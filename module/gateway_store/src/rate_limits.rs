//! Rate-limit defaults and overrides

use sqlx::Row;
use uuid::Uuid;

use gateway_types::{ RateLimitDefaults, RateLimitSettings, Result };

use crate::{ db_err, now_ms, Store };

fn decode_settings( row: &sqlx::sqlite::SqliteRow ) -> RateLimitSettings
{
  RateLimitSettings
  {
    requests_per_minute: row.get( "requests_per_minute" ),
    tokens_per_minute: row.get( "tokens_per_minute" ),
    parallel_requests: row.get( "parallel_requests" ),
  }
}

impl Store
{
  /// Read the rate-limit-defaults singleton, seeding it on first access
  pub async fn rate_limit_defaults( &self ) -> Result< RateLimitDefaults >
  {
    let row = sqlx::query( "SELECT * FROM rate_limit_defaults WHERE id = 1" )
      .fetch_optional( &self.pool )
      .await
      .map_err( db_err )?;

    match row
    {
      Some( row ) => Ok( RateLimitDefaults
      {
        requests_per_minute: row.get( "requests_per_minute" ),
        tokens_per_minute: row.get( "tokens_per_minute" ),
        parallel_requests_key: row.get( "parallel_requests_key" ),
        parallel_requests_tenant: row.get( "parallel_requests_tenant" ),
      } ),
      None =>
      {
        let defaults = RateLimitDefaults::default();
        self.set_rate_limit_defaults( &defaults ).await?;
        Ok( defaults )
      }
    }
  }

  /// Replace the rate-limit-defaults singleton
  pub async fn set_rate_limit_defaults( &self, defaults: &RateLimitDefaults ) -> Result< () >
  {
    sqlx::query(
      "INSERT INTO rate_limit_defaults \
       (id, requests_per_minute, tokens_per_minute, parallel_requests_key, parallel_requests_tenant, updated_at) \
       VALUES (1, $1, $2, $3, $4, $5) \
       ON CONFLICT (id) DO UPDATE SET \
         requests_per_minute = excluded.requests_per_minute, \
         tokens_per_minute = excluded.tokens_per_minute, \
         parallel_requests_key = excluded.parallel_requests_key, \
         parallel_requests_tenant = excluded.parallel_requests_tenant, \
         updated_at = excluded.updated_at"
    )
    .bind( defaults.requests_per_minute )
    .bind( defaults.tokens_per_minute )
    .bind( defaults.parallel_requests_key )
    .bind( defaults.parallel_requests_tenant )
    .bind( now_ms() )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    Ok( () )
  }

  /// Tenant override, if configured
  pub async fn get_tenant_rate_limit( &self, tenant_id: Uuid ) -> Result< Option< RateLimitSettings > >
  {
    let row = sqlx::query( "SELECT * FROM tenant_rate_limits WHERE tenant_id = $1" )
      .bind( tenant_id )
      .fetch_optional( &self.pool )
      .await
      .map_err( db_err )?;

    Ok( row.as_ref().map( decode_settings ) )
  }

  /// Create or replace a tenant override
  pub async fn upsert_tenant_rate_limit( &self, tenant_id: Uuid, settings: RateLimitSettings ) -> Result< () >
  {
    let now = now_ms();

    sqlx::query(
      "INSERT INTO tenant_rate_limits \
       (tenant_id, requests_per_minute, tokens_per_minute, parallel_requests, created_at, updated_at) \
       VALUES ($1, $2, $3, $4, $5, $5) \
       ON CONFLICT (tenant_id) DO UPDATE SET \
         requests_per_minute = excluded.requests_per_minute, \
         tokens_per_minute = excluded.tokens_per_minute, \
         parallel_requests = excluded.parallel_requests, \
         version = tenant_rate_limits.version + 1, \
         updated_at = excluded.updated_at"
    )
    .bind( tenant_id )
    .bind( settings.requests_per_minute )
    .bind( settings.tokens_per_minute )
    .bind( settings.parallel_requests )
    .bind( now )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    Ok( () )
  }

  /// Drop a tenant override
  pub async fn delete_tenant_rate_limit( &self, tenant_id: Uuid ) -> Result< () >
  {
    sqlx::query( "DELETE FROM tenant_rate_limits WHERE tenant_id = $1" )
      .bind( tenant_id )
      .execute( &self.pool )
      .await
      .map_err( db_err )?;

    Ok( () )
  }

  /// Per-key override, if configured
  pub async fn get_api_key_rate_limit( &self, api_key_id: Uuid ) -> Result< Option< RateLimitSettings > >
  {
    let row = sqlx::query( "SELECT * FROM api_key_rate_limits WHERE api_key_id = $1" )
      .bind( api_key_id )
      .fetch_optional( &self.pool )
      .await
      .map_err( db_err )?;

    Ok( row.as_ref().map( decode_settings ) )
  }

  /// Create or replace a per-key override
  pub async fn upsert_api_key_rate_limit( &self, api_key_id: Uuid, settings: RateLimitSettings ) -> Result< () >
  {
    let now = now_ms();

    sqlx::query(
      "INSERT INTO api_key_rate_limits \
       (api_key_id, requests_per_minute, tokens_per_minute, parallel_requests, created_at, updated_at) \
       VALUES ($1, $2, $3, $4, $5, $5) \
       ON CONFLICT (api_key_id) DO UPDATE SET \
         requests_per_minute = excluded.requests_per_minute, \
         tokens_per_minute = excluded.tokens_per_minute, \
         parallel_requests = excluded.parallel_requests, \
         updated_at = excluded.updated_at"
    )
    .bind( api_key_id )
    .bind( settings.requests_per_minute )
    .bind( settings.tokens_per_minute )
    .bind( settings.parallel_requests )
    .bind( now )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    Ok( () )
  }

  /// Drop a per-key override
  pub async fn delete_api_key_rate_limit( &self, api_key_id: Uuid ) -> Result< () >
  {
    sqlx::query( "DELETE FROM api_key_rate_limits WHERE api_key_id = $1" )
      .bind( api_key_id )
      .execute( &self.pool )
      .await
      .map_err( db_err )?;

    Ok( () )
  }
}

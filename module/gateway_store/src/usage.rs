//! Usage events and daily rollups
//!
//! Every accepted request inserts one event and upserts the matching daily
//! row in the same transaction, so the rollup can never drift from the
//! event log by more than an in-flight transaction.

use sqlx::Row;
use uuid::Uuid;

use gateway_types::Result;

use crate::{ db_err, Store };

/// One row of `usage_events`
#[ derive( Debug, Clone ) ]
pub struct UsageEventRecord
{
  pub id: Uuid,
  pub tenant_id: Uuid,
  pub api_key_id: Uuid,
  pub user_id: Option< Uuid >,
  pub alias: String,
  pub provider: String,
  pub model_type: String,
  pub request_id: String,
  pub ts: i64,
  pub latency_ms: i64,
  pub status: String,
  pub prompt_tokens: i64,
  pub completion_tokens: i64,
  pub total_tokens: i64,
  pub cost_usd: f64,
}

/// One row of `usage_daily`
#[ derive( Debug, Clone ) ]
pub struct DailyUsageRow
{
  pub tenant_id: Uuid,
  pub date: String,
  pub alias: String,
  pub requests: i64,
  pub tokens: i64,
  pub cost_usd: f64,
}

/// UTC calendar date for a millisecond timestamp, as `YYYY-MM-DD`
#[ must_use ]
pub fn date_for_ts( ts_ms: i64 ) -> String
{
  use chrono::{ TimeZone, Utc };
  match Utc.timestamp_millis_opt( ts_ms )
  {
    chrono::LocalResult::Single( dt ) => dt.format( "%Y-%m-%d" ).to_string(),
    _ => "1970-01-01".to_string(),
  }
}

impl Store
{
  /// Record a usage event and bump the daily rollup
  pub async fn insert_usage_event( &self, event: &UsageEventRecord ) -> Result< () >
  {
    let mut tx = self.pool.begin().await.map_err( db_err )?;

    sqlx::query(
      "INSERT INTO usage_events \
       (id, tenant_id, api_key_id, user_id, alias, provider, model_type, request_id, ts, \
        latency_ms, status, prompt_tokens, completion_tokens, total_tokens, cost_usd) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
    )
    .bind( event.id )
    .bind( event.tenant_id )
    .bind( event.api_key_id )
    .bind( event.user_id )
    .bind( &event.alias )
    .bind( &event.provider )
    .bind( &event.model_type )
    .bind( &event.request_id )
    .bind( event.ts )
    .bind( event.latency_ms )
    .bind( &event.status )
    .bind( event.prompt_tokens )
    .bind( event.completion_tokens )
    .bind( event.total_tokens )
    .bind( event.cost_usd )
    .execute( &mut *tx )
    .await
    .map_err( db_err )?;

    let date = date_for_ts( event.ts );

    sqlx::query(
      "INSERT INTO usage_daily (tenant_id, date, alias, requests, tokens, cost_usd) \
       VALUES ($1, $2, $3, 1, $4, $5) \
       ON CONFLICT (tenant_id, date, alias) DO UPDATE SET \
         requests = usage_daily.requests + 1, \
         tokens = usage_daily.tokens + excluded.tokens, \
         cost_usd = usage_daily.cost_usd + excluded.cost_usd"
    )
    .bind( event.tenant_id )
    .bind( &date )
    .bind( &event.alias )
    .bind( event.total_tokens )
    .bind( event.cost_usd )
    .execute( &mut *tx )
    .await
    .map_err( db_err )?;

    tx.commit().await.map_err( db_err )?;

    Ok( () )
  }

  /// Total cost recorded for a tenant in `[from_ms, to_ms)`
  pub async fn sum_usage_cost( &self, tenant_id: Uuid, from_ms: i64, to_ms: i64 ) -> Result< f64 >
  {
    let total: Option< f64 > = sqlx::query_scalar(
      "SELECT SUM(cost_usd) FROM usage_events WHERE tenant_id = $1 AND ts >= $2 AND ts < $3"
    )
    .bind( tenant_id )
    .bind( from_ms )
    .bind( to_ms )
    .fetch_one( &self.pool )
    .await
    .map_err( db_err )?;

    Ok( total.unwrap_or( 0.0 ) )
  }

  /// Daily rollup rows for a tenant across a date range (inclusive)
  pub async fn list_daily_usage(
    &self,
    tenant_id: Uuid,
    from_date: &str,
    to_date: &str,
  ) -> Result< Vec< DailyUsageRow > >
  {
    let rows = sqlx::query(
      "SELECT * FROM usage_daily \
       WHERE tenant_id = $1 AND date >= $2 AND date <= $3 \
       ORDER BY date, alias"
    )
    .bind( tenant_id )
    .bind( from_date )
    .bind( to_date )
    .fetch_all( &self.pool )
    .await
    .map_err( db_err )?;

    Ok(
      rows.iter().map( |row| DailyUsageRow
      {
        tenant_id: row.get( "tenant_id" ),
        date: row.get( "date" ),
        alias: row.get( "alias" ),
        requests: row.get( "requests" ),
        tokens: row.get( "tokens" ),
        cost_usd: row.get( "cost_usd" ),
      } ).collect()
    )
  }

  /// Recent raw events for a tenant, newest first
  pub async fn list_usage_events( &self, tenant_id: Uuid, limit: i64, offset: i64 ) -> Result< Vec< UsageEventRecord > >
  {
    let rows = sqlx::query(
      "SELECT * FROM usage_events WHERE tenant_id = $1 ORDER BY ts DESC, id DESC LIMIT $2 OFFSET $3"
    )
    .bind( tenant_id )
    .bind( limit )
    .bind( offset )
    .fetch_all( &self.pool )
    .await
    .map_err( db_err )?;

    Ok(
      rows.iter().map( |row| UsageEventRecord
      {
        id: row.get( "id" ),
        tenant_id: row.get( "tenant_id" ),
        api_key_id: row.get( "api_key_id" ),
        user_id: row.get( "user_id" ),
        alias: row.get( "alias" ),
        provider: row.get( "provider" ),
        model_type: row.get( "model_type" ),
        request_id: row.get( "request_id" ),
        ts: row.get( "ts" ),
        latency_ms: row.get( "latency_ms" ),
        status: row.get( "status" ),
        prompt_tokens: row.get( "prompt_tokens" ),
        completion_tokens: row.get( "completion_tokens" ),
        total_tokens: row.get( "total_tokens" ),
        cost_usd: row.get( "cost_usd" ),
      } ).collect()
    )
  }
}

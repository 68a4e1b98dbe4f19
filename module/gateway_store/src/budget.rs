//! Budget defaults, overrides, counters and alert state
//!
//! The counter row is the serialisation point for debits: one transactional
//! UPDATE adds the cost and the same transaction re-reads the new total, so
//! concurrent debits compose by sum and the returned ratio is exact.

use sqlx::Row;
use uuid::Uuid;

use gateway_types::{ AlertConfig, AlertLevel, BudgetDefaults, GatewayError, RefreshSchedule, Result };

use crate::{ db_err, decode_string_list, encode_string_list, now_ms, Store };

/// One row of `tenant_budget_overrides`
#[ derive( Debug, Clone ) ]
pub struct BudgetOverrideRecord
{
  pub tenant_id: Uuid,
  pub budget_usd: f64,
  pub warning_threshold: Option< f64 >,
  pub refresh_schedule: Option< RefreshSchedule >,
  pub alert_emails: Vec< String >,
  pub alert_webhooks: Vec< String >,
  pub alert_cooldown_seconds: Option< i64 >,
  pub version: i64,
  pub created_at: i64,
  pub updated_at: i64,
}

/// One row of `budget_counters`
#[ derive( Debug, Clone, Copy ) ]
pub struct BudgetCounterRecord
{
  pub tenant_id: Uuid,
  pub window_start: i64,
  pub window_end: i64,
  pub used_usd: f64,
}

/// Per-tenant alert cooldown bookkeeping
#[ derive( Debug, Clone, Copy ) ]
pub struct AlertStateRecord
{
  pub tenant_id: Uuid,
  pub last_alert_at: Option< i64 >,
  pub last_alert_level: AlertLevel,
}

fn decode_override( row: &sqlx::sqlite::SqliteRow ) -> BudgetOverrideRecord
{
  let schedule: Option< String > = row.get( "refresh_schedule" );
  BudgetOverrideRecord
  {
    tenant_id: row.get( "tenant_id" ),
    budget_usd: row.get( "budget_usd" ),
    warning_threshold: row.get( "warning_threshold" ),
    refresh_schedule: schedule.as_deref().and_then( RefreshSchedule::parse ),
    alert_emails: decode_string_list( row.get( "alert_emails" ) ),
    alert_webhooks: decode_string_list( row.get( "alert_webhooks" ) ),
    alert_cooldown_seconds: row.get( "alert_cooldown_seconds" ),
    version: row.get( "version" ),
    created_at: row.get( "created_at" ),
    updated_at: row.get( "updated_at" ),
  }
}

impl Store
{
  /// Read the budget-defaults singleton, seeding it on first access
  pub async fn budget_defaults( &self ) -> Result< BudgetDefaults >
  {
    let row = sqlx::query( "SELECT * FROM budget_defaults WHERE id = 1" )
      .fetch_optional( &self.pool )
      .await
      .map_err( db_err )?;

    match row
    {
      Some( row ) =>
      {
        let schedule_raw: String = row.get( "refresh_schedule" );
        Ok( BudgetDefaults
        {
          default_usd: row.get( "default_usd" ),
          warning_threshold_perc: row.get( "warning_threshold_perc" ),
          refresh_schedule: RefreshSchedule::parse( &schedule_raw )
            .unwrap_or( RefreshSchedule::CalendarMonth ),
          alert: AlertConfig
          {
            emails: decode_string_list( row.get( "alert_emails" ) ),
            webhooks: decode_string_list( row.get( "alert_webhooks" ) ),
            cooldown_seconds: row.get( "alert_cooldown_seconds" ),
          },
        } )
      }
      None =>
      {
        let defaults = BudgetDefaults::default();
        self.set_budget_defaults( &defaults, None ).await?;
        Ok( defaults )
      }
    }
  }

  /// Replace the budget-defaults singleton
  pub async fn set_budget_defaults( &self, defaults: &BudgetDefaults, updated_by: Option< Uuid > ) -> Result< () >
  {
    sqlx::query(
      "INSERT INTO budget_defaults \
       (id, default_usd, warning_threshold_perc, refresh_schedule, alert_emails, alert_webhooks, \
        alert_cooldown_seconds, updated_at, updated_by_user_id) \
       VALUES (1, $1, $2, $3, $4, $5, $6, $7, $8) \
       ON CONFLICT (id) DO UPDATE SET \
         default_usd = excluded.default_usd, \
         warning_threshold_perc = excluded.warning_threshold_perc, \
         refresh_schedule = excluded.refresh_schedule, \
         alert_emails = excluded.alert_emails, \
         alert_webhooks = excluded.alert_webhooks, \
         alert_cooldown_seconds = excluded.alert_cooldown_seconds, \
         updated_at = excluded.updated_at, \
         updated_by_user_id = excluded.updated_by_user_id"
    )
    .bind( defaults.default_usd )
    .bind( defaults.warning_threshold_perc )
    .bind( defaults.refresh_schedule.as_str() )
    .bind( encode_string_list( &defaults.alert.emails ) )
    .bind( encode_string_list( &defaults.alert.webhooks ) )
    .bind( defaults.alert.cooldown_seconds )
    .bind( now_ms() )
    .bind( updated_by )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    Ok( () )
  }

  /// Fetch a tenant's budget override, if any
  pub async fn get_budget_override( &self, tenant_id: Uuid ) -> Result< Option< BudgetOverrideRecord > >
  {
    let row = sqlx::query( "SELECT * FROM tenant_budget_overrides WHERE tenant_id = $1" )
      .bind( tenant_id )
      .fetch_optional( &self.pool )
      .await
      .map_err( db_err )?;

    Ok( row.as_ref().map( decode_override ) )
  }

  /// Create or replace a tenant's budget override
  pub async fn upsert_budget_override( &self, rec: &BudgetOverrideRecord ) -> Result< () >
  {
    if rec.budget_usd <= 0.0
    {
      return Err( GatewayError::BadRequest( "budget_usd must be positive".to_string() ) );
    }

    let now = now_ms();

    sqlx::query(
      "INSERT INTO tenant_budget_overrides \
       (tenant_id, budget_usd, warning_threshold, refresh_schedule, alert_emails, alert_webhooks, \
        alert_cooldown_seconds, created_at, updated_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8) \
       ON CONFLICT (tenant_id) DO UPDATE SET \
         budget_usd = excluded.budget_usd, \
         warning_threshold = excluded.warning_threshold, \
         refresh_schedule = excluded.refresh_schedule, \
         alert_emails = excluded.alert_emails, \
         alert_webhooks = excluded.alert_webhooks, \
         alert_cooldown_seconds = excluded.alert_cooldown_seconds, \
         version = tenant_budget_overrides.version + 1, \
         updated_at = excluded.updated_at"
    )
    .bind( rec.tenant_id )
    .bind( rec.budget_usd )
    .bind( rec.warning_threshold )
    .bind( rec.refresh_schedule.map( RefreshSchedule::as_str ) )
    .bind( encode_string_list( &rec.alert_emails ) )
    .bind( encode_string_list( &rec.alert_webhooks ) )
    .bind( rec.alert_cooldown_seconds )
    .bind( now )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    Ok( () )
  }

  /// Drop a tenant's budget override, reverting it to defaults
  pub async fn delete_budget_override( &self, tenant_id: Uuid ) -> Result< () >
  {
    sqlx::query( "DELETE FROM tenant_budget_overrides WHERE tenant_id = $1" )
      .bind( tenant_id )
      .execute( &self.pool )
      .await
      .map_err( db_err )?;

    Ok( () )
  }

  /// Read the counter row for a tenant, if one exists
  pub async fn get_budget_counter( &self, tenant_id: Uuid ) -> Result< Option< BudgetCounterRecord > >
  {
    let row = sqlx::query( "SELECT * FROM budget_counters WHERE tenant_id = $1" )
      .bind( tenant_id )
      .fetch_optional( &self.pool )
      .await
      .map_err( db_err )?;

    Ok( row.map( |row| BudgetCounterRecord
    {
      tenant_id: row.get( "tenant_id" ),
      window_start: row.get( "window_start" ),
      window_end: row.get( "window_end" ),
      used_usd: row.get( "used_usd" ),
    } ) )
  }

  /// Install a fresh window for a tenant, replacing any previous counter
  pub async fn reset_budget_counter(
    &self,
    tenant_id: Uuid,
    window_start: i64,
    window_end: i64,
    used_usd: f64,
  ) -> Result< () >
  {
    sqlx::query(
      "INSERT INTO budget_counters (tenant_id, window_start, window_end, used_usd) \
       VALUES ($1, $2, $3, $4) \
       ON CONFLICT (tenant_id) DO UPDATE SET \
         window_start = excluded.window_start, \
         window_end = excluded.window_end, \
         used_usd = excluded.used_usd"
    )
    .bind( tenant_id )
    .bind( window_start )
    .bind( window_end )
    .bind( used_usd )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    Ok( () )
  }

  /// Atomically add spend to the tenant's counter and return the new total
  ///
  /// The UPDATE and the re-read share one transaction, so the returned value
  /// reflects exactly this debit plus everything committed before it.
  pub async fn debit_budget_counter( &self, tenant_id: Uuid, cost_usd: f64 ) -> Result< f64 >
  {
    let mut tx = self.pool.begin().await.map_err( db_err )?;

    let updated = sqlx::query(
      "UPDATE budget_counters SET used_usd = used_usd + $1 WHERE tenant_id = $2"
    )
    .bind( cost_usd )
    .bind( tenant_id )
    .execute( &mut *tx )
    .await
    .map_err( db_err )?;

    if updated.rows_affected() == 0
    {
      return Err( GatewayError::Internal( "budget counter missing during debit".to_string() ) );
    }

    let used: f64 = sqlx::query_scalar( "SELECT used_usd FROM budget_counters WHERE tenant_id = $1" )
      .bind( tenant_id )
      .fetch_one( &mut *tx )
      .await
      .map_err( db_err )?;

    tx.commit().await.map_err( db_err )?;

    Ok( used )
  }

  /// Read alert bookkeeping for a tenant
  pub async fn get_alert_state( &self, tenant_id: Uuid ) -> Result< AlertStateRecord >
  {
    let row = sqlx::query( "SELECT * FROM budget_alert_state WHERE tenant_id = $1" )
      .bind( tenant_id )
      .fetch_optional( &self.pool )
      .await
      .map_err( db_err )?;

    Ok( match row
    {
      Some( row ) =>
      {
        let level_raw: String = row.get( "last_alert_level" );
        AlertStateRecord
        {
          tenant_id,
          last_alert_at: row.get( "last_alert_at" ),
          last_alert_level: AlertLevel::parse( &level_raw ).unwrap_or( AlertLevel::None ),
        }
      }
      None => AlertStateRecord { tenant_id, last_alert_at: None, last_alert_level: AlertLevel::None },
    } )
  }

  /// Record an emitted alert
  pub async fn set_alert_state( &self, tenant_id: Uuid, level: AlertLevel, at: Option< i64 > ) -> Result< () >
  {
    sqlx::query(
      "INSERT INTO budget_alert_state (tenant_id, last_alert_at, last_alert_level) \
       VALUES ($1, $2, $3) \
       ON CONFLICT (tenant_id) DO UPDATE SET \
         last_alert_at = excluded.last_alert_at, \
         last_alert_level = excluded.last_alert_level"
    )
    .bind( tenant_id )
    .bind( at )
    .bind( level.as_str() )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    Ok( () )
  }
}

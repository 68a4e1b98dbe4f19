//! Budget engine
//!
//! Admission checks spend-plus-estimate against the effective limit without
//! committing anything; the post-completion debit is a single transactional
//! counter update whose returned ratio drives threshold alerts. Windows roll
//! forward lazily on access.

pub mod window;

pub use window::{ is_rolling, window_for };

use tokio::sync::mpsc;
use uuid::Uuid;

use gateway_alerts::AlertMessage;
use gateway_store::{ now_ms, BudgetCounterRecord, Store };
use gateway_types::{ AlertConfig, AlertLevel, BudgetDefaults, GatewayError, RefreshSchedule, Result };

/// Effective budget policy for one tenant after merging the override
#[ derive( Debug, Clone ) ]
pub struct EffectiveBudget
{
  pub limit_usd: f64,
  pub warning_threshold: f64,
  pub schedule: RefreshSchedule,
  pub alert: AlertConfig,
}

/// The budget engine
#[ derive( Debug, Clone ) ]
pub struct BudgetEngine
{
  store: Store,
  alert_tx: mpsc::Sender< AlertMessage >,
}

impl BudgetEngine
{
  #[ must_use ]
  pub fn new( store: Store, alert_tx: mpsc::Sender< AlertMessage > ) -> Self
  {
    Self { store, alert_tx }
  }

  /// Merge defaults and the tenant's override into one policy
  pub async fn effective_budget( &self, tenant_id: Uuid, defaults: &BudgetDefaults ) -> Result< EffectiveBudget >
  {
    let overrides = self.store.get_budget_override( tenant_id ).await?;

    Ok( match overrides
    {
      Some( rec ) => EffectiveBudget
      {
        limit_usd: rec.budget_usd,
        warning_threshold: rec.warning_threshold.unwrap_or( defaults.warning_threshold_perc ),
        schedule: rec.refresh_schedule.unwrap_or( defaults.refresh_schedule ),
        alert: AlertConfig
        {
          emails: if rec.alert_emails.is_empty() { defaults.alert.emails.clone() } else { rec.alert_emails },
          webhooks: if rec.alert_webhooks.is_empty() { defaults.alert.webhooks.clone() } else { rec.alert_webhooks },
          cooldown_seconds: rec.alert_cooldown_seconds.unwrap_or( defaults.alert.cooldown_seconds ),
        },
      },
      None => EffectiveBudget
      {
        limit_usd: defaults.default_usd,
        warning_threshold: defaults.warning_threshold_perc,
        schedule: defaults.refresh_schedule,
        alert: defaults.alert.clone(),
      },
    } )
  }

  /// Make sure the tenant's counter covers `now`, rolling it if needed
  ///
  /// Rollover resets the alert ladder. Rolling schedules re-derive spend
  /// from the usage event log; calendar schedules start from zero.
  pub async fn ensure_window( &self, tenant_id: Uuid, budget: &EffectiveBudget ) -> Result< BudgetCounterRecord >
  {
    let now = now_ms();
    let current = self.store.get_budget_counter( tenant_id ).await?;

    if let Some( counter ) = current
    {
      if now < counter.window_end
      {
        return Ok( counter );
      }
    }

    let ( start, end ) = window_for( budget.schedule, now );
    let used = if is_rolling( budget.schedule )
    {
      self.store.sum_usage_cost( tenant_id, start, now ).await?
    }
    else
    {
      0.0
    };

    self.store.reset_budget_counter( tenant_id, start, end, used ).await?;

    // Rollover resets the alert level; the last-alert timestamp survives so
    // cooldown still spaces alerts across adjacent windows.
    let state = self.store.get_alert_state( tenant_id ).await?;
    self.store.set_alert_state( tenant_id, AlertLevel::None, state.last_alert_at ).await?;

    Ok( BudgetCounterRecord { tenant_id, window_start: start, window_end: end, used_usd: used } )
  }

  /// Pre-dispatch admission
  ///
  /// # Errors
  ///
  /// `budget_exceeded` when spend plus the estimate would cross the limit.
  /// Nothing is committed here; the estimate is only compared.
  pub async fn admit( &self, tenant_id: Uuid, estimated_cost_usd: f64, defaults: &BudgetDefaults ) -> Result< () >
  {
    let budget = self.effective_budget( tenant_id, defaults ).await?;
    if budget.limit_usd <= 0.0
    {
      return Ok( () );
    }

    let counter = self.ensure_window( tenant_id, &budget ).await?;

    if counter.used_usd + estimated_cost_usd > budget.limit_usd
    {
      return Err( GatewayError::BudgetExceeded
      {
        used_usd: counter.used_usd,
        limit_usd: budget.limit_usd,
      } );
    }

    Ok( () )
  }

  /// Post-completion debit; returns the new used/limit ratio
  ///
  /// The debit always lands, even past the limit; the request already
  /// happened. Threshold alerts are evaluated on the fresh ratio.
  pub async fn debit( &self, tenant_id: Uuid, actual_cost_usd: f64, defaults: &BudgetDefaults ) -> Result< f64 >
  {
    let budget = self.effective_budget( tenant_id, defaults ).await?;
    self.ensure_window( tenant_id, &budget ).await?;

    let used = self.store.debit_budget_counter( tenant_id, actual_cost_usd ).await?;

    if budget.limit_usd <= 0.0
    {
      return Ok( 0.0 );
    }

    let ratio = used / budget.limit_usd;
    self.evaluate_alerts( tenant_id, ratio, used, &budget ).await?;

    Ok( ratio )
  }

  /// Threshold ladder: one `warn` below one `exceed`, both cooldown-gated
  async fn evaluate_alerts( &self, tenant_id: Uuid, ratio: f64, used: f64, budget: &EffectiveBudget ) -> Result< () >
  {
    let state = self.store.get_alert_state( tenant_id ).await?;
    let now = now_ms();

    let cooldown_ms = budget.alert.cooldown_seconds.max( 60 ) * 1000;
    let cooldown_clear = state.last_alert_at.map_or( true, |at| now - at >= cooldown_ms );

    let level = if ratio >= 1.0 && state.last_alert_level != AlertLevel::Exceed && cooldown_clear
    {
      Some( AlertLevel::Exceed )
    }
    else if ratio >= budget.warning_threshold
      && state.last_alert_level == AlertLevel::None
      && cooldown_clear
      && ratio < 1.0
    {
      Some( AlertLevel::Warn )
    }
    else
    {
      None
    };

    let Some( level ) = level else
    {
      return Ok( () );
    };

    self.store.set_alert_state( tenant_id, level, Some( now ) ).await?;

    let tenant_name = self.store
      .get_tenant( tenant_id )
      .await
      .map( |t| t.name )
      .unwrap_or_else( |_| tenant_id.to_string() );

    let message = AlertMessage
    {
      level,
      tenant_id,
      tenant_name,
      ratio,
      used_usd: used,
      limit_usd: budget.limit_usd,
      emails: budget.alert.emails.clone(),
      webhooks: budget.alert.webhooks.clone(),
    };

    if let Err( err ) = self.alert_tx.try_send( message )
    {
      // A full queue must never block a debit
      tracing::warn!( tenant_id = %tenant_id, error = %err, "alert queue rejected message" );
    }

    Ok( () )
  }
}

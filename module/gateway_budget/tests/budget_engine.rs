//! Integration tests for the budget engine

use tokio::sync::mpsc;
use uuid::Uuid;

use gateway_budget::BudgetEngine;
use gateway_store::{ now_ms, BudgetOverrideRecord, Store };
use gateway_test_db::TestDatabaseBuilder;
use gateway_types::{ AlertLevel, BudgetDefaults, RefreshSchedule };

struct Fixture
{
  _db: gateway_test_db::TestDatabase,
  store: Store,
  engine: BudgetEngine,
  rx: mpsc::Receiver< gateway_alerts::AlertMessage >,
  tenant_id: Uuid,
}

async fn fixture( budget_usd: f64, warning: f64 ) -> Fixture
{
  let db = TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();
  let ( tx, rx ) = mpsc::channel( 16 );
  let engine = BudgetEngine::new( store.clone(), tx );

  let tenant = store.create_tenant( "acme", false ).await.expect( "tenant" );
  store
    .upsert_budget_override( &BudgetOverrideRecord
    {
      tenant_id: tenant.id,
      budget_usd,
      warning_threshold: Some( warning ),
      refresh_schedule: Some( RefreshSchedule::CalendarMonth ),
      alert_emails: vec![ "ops@example.com".to_string() ],
      alert_webhooks: vec![],
      alert_cooldown_seconds: Some( 60 ),
      version: 1,
      created_at: 0,
      updated_at: 0,
    } )
    .await
    .expect( "override" );

  Fixture { store, engine, rx, tenant_id: tenant.id, _db: db }
}

fn defaults() -> BudgetDefaults
{
  BudgetDefaults::default()
}

#[ tokio::test ]
async fn test_warn_fires_once_then_admission_rejects_over_limit()
{
  let mut fx = fixture( 10.0, 0.8 ).await;

  // $8.50 of spend crosses the 80% threshold exactly once
  let ratio = fx.engine.debit( fx.tenant_id, 8.5, &defaults() ).await.expect( "debit" );
  assert!( ( ratio - 0.85 ).abs() < 1e-9 );

  let alert = fx.rx.try_recv().expect( "warn alert" );
  assert_eq!( alert.level, AlertLevel::Warn );
  assert_eq!( alert.emails, vec![ "ops@example.com".to_string() ] );

  // A $2 estimate would land at $10.50 > $10: rejected before any commit
  let err = fx.engine.admit( fx.tenant_id, 2.0, &defaults() ).await.expect_err( "over budget" );
  assert_eq!( err.kind(), "budget_exceeded" );

  let counter = fx.store.get_budget_counter( fx.tenant_id ).await.expect( "counter" ).expect( "row" );
  assert!( ( counter.used_usd - 8.5 ).abs() < 1e-9, "rejected request must not debit" );

  // No second warn while the level is already warn
  fx.engine.debit( fx.tenant_id, 0.1, &defaults() ).await.expect( "small debit" );
  assert!( fx.rx.try_recv().is_err(), "warn must not repeat" );
}

#[ tokio::test ]
async fn test_exceed_fires_after_cooldown_when_limit_reached()
{
  let mut fx = fixture( 10.0, 0.8 ).await;

  fx.engine.debit( fx.tenant_id, 8.5, &defaults() ).await.expect( "debit to 85%" );
  let warn = fx.rx.try_recv().expect( "warn" );
  assert_eq!( warn.level, AlertLevel::Warn );

  // Simulate the cooldown having elapsed since the warn
  fx.store
    .set_alert_state( fx.tenant_id, AlertLevel::Warn, Some( now_ms() - 120_000 ) )
    .await
    .expect( "age the alert state" );

  // $1.50 fits exactly: admitted, debited to $10.00, exceed alert fires
  fx.engine.admit( fx.tenant_id, 1.5, &defaults() ).await.expect( "fits exactly" );
  let ratio = fx.engine.debit( fx.tenant_id, 1.5, &defaults() ).await.expect( "debit to limit" );
  assert!( ( ratio - 1.0 ).abs() < 1e-9 );

  let exceed = fx.rx.try_recv().expect( "exceed" );
  assert_eq!( exceed.level, AlertLevel::Exceed );

  // Anything further is rejected at admission
  let err = fx.engine.admit( fx.tenant_id, 0.5, &defaults() ).await.expect_err( "over" );
  assert_eq!( err.kind(), "budget_exceeded" );

  // And the exceed level never repeats
  fx.engine.debit( fx.tenant_id, 0.01, &defaults() ).await.expect( "late debit" );
  assert!( fx.rx.try_recv().is_err(), "exceed must not repeat" );
}

#[ tokio::test ]
async fn test_direct_jump_to_exceed_skips_warn()
{
  let mut fx = fixture( 10.0, 0.8 ).await;

  fx.engine.debit( fx.tenant_id, 12.0, &defaults() ).await.expect( "blow through" );

  let alert = fx.rx.try_recv().expect( "alert" );
  assert_eq!( alert.level, AlertLevel::Exceed );
  assert!( fx.rx.try_recv().is_err(), "no separate warn on a direct jump" );
}

#[ tokio::test ]
async fn test_window_rollover_resets_spend_and_alert_level()
{
  let mut fx = fixture( 100.0, 0.8 ).await;

  // Install an exhausted counter whose window ended in the past
  let now = now_ms();
  fx.store
    .reset_budget_counter( fx.tenant_id, now - 2_000_000, now - 1_000, 99.99 )
    .await
    .expect( "stale window" );
  fx.store
    .set_alert_state( fx.tenant_id, AlertLevel::Exceed, Some( now - 1_000_000 ) )
    .await
    .expect( "stale alert state" );

  // Access rolls the window; even a non-trivial estimate is admitted again
  fx.engine.admit( fx.tenant_id, 1.0, &defaults() ).await.expect( "fresh window admits" );

  let counter = fx.store.get_budget_counter( fx.tenant_id ).await.expect( "counter" ).expect( "row" );
  assert_eq!( counter.used_usd, 0.0 );
  assert!( counter.window_end > now );

  let state = fx.store.get_alert_state( fx.tenant_id ).await.expect( "state" );
  assert_eq!( state.last_alert_level, AlertLevel::None );

  // The warn ladder restarts in the new window once cooldown allows
  fx.store
    .set_alert_state( fx.tenant_id, AlertLevel::None, Some( now - 120_000 ) )
    .await
    .expect( "clear cooldown" );
  fx.engine.debit( fx.tenant_id, 85.0, &defaults() ).await.expect( "debit" );
  assert_eq!( fx.rx.try_recv().expect( "warn again" ).level, AlertLevel::Warn );
}

#[ tokio::test ]
async fn test_rolling_window_rebuilds_spend_from_events()
{
  let db = TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();
  let ( tx, _rx ) = mpsc::channel( 4 );
  let engine = BudgetEngine::new( store.clone(), tx );

  let tenant = store.create_tenant( "acme", false ).await.expect( "tenant" );
  store
    .upsert_budget_override( &BudgetOverrideRecord
    {
      tenant_id: tenant.id,
      budget_usd: 50.0,
      warning_threshold: None,
      refresh_schedule: Some( RefreshSchedule::Rolling7d ),
      alert_emails: vec![],
      alert_webhooks: vec![],
      alert_cooldown_seconds: None,
      version: 1,
      created_at: 0,
      updated_at: 0,
    } )
    .await
    .expect( "override" );

  // One in-window event, one ancient event
  let mut event = gateway_store::UsageEventRecord
  {
    id: Uuid::new_v4(),
    tenant_id: tenant.id,
    api_key_id: Uuid::new_v4(),
    user_id: None,
    alias: "gpt-4o".to_string(),
    provider: "openai".to_string(),
    model_type: "chat".to_string(),
    request_id: "req-a".to_string(),
    ts: now_ms() - 3_600_000,
    latency_ms: 50,
    status: "ok".to_string(),
    prompt_tokens: 10,
    completion_tokens: 10,
    total_tokens: 20,
    cost_usd: 7.5,
  };
  store.insert_usage_event( &event ).await.expect( "recent event" );

  event.id = Uuid::new_v4();
  event.request_id = "req-b".to_string();
  event.ts = now_ms() - 10 * 24 * 3_600_000;
  event.cost_usd = 40.0;
  store.insert_usage_event( &event ).await.expect( "ancient event" );

  let budget = engine
    .effective_budget( tenant.id, &BudgetDefaults::default() )
    .await
    .expect( "effective" );
  let counter = engine.ensure_window( tenant.id, &budget ).await.expect( "window" );

  // Only the event inside the trailing seven days counts
  assert!( ( counter.used_usd - 7.5 ).abs() < 1e-9 );
}

//! Integration tests for usage rollups and budget counters

use gateway_store::{ now_ms, UsageEventRecord };
use gateway_store::usage::date_for_ts;
use gateway_test_db::TestDatabaseBuilder;
use gateway_types::AlertLevel;
use uuid::Uuid;

fn event( tenant_id: Uuid, alias: &str, tokens: i64, cost: f64 ) -> UsageEventRecord
{
  UsageEventRecord
  {
    id: Uuid::new_v4(),
    tenant_id,
    api_key_id: Uuid::new_v4(),
    user_id: None,
    alias: alias.to_string(),
    provider: "openai".to_string(),
    model_type: "chat".to_string(),
    request_id: Uuid::new_v4().to_string(),
    ts: now_ms(),
    latency_ms: 120,
    status: "ok".to_string(),
    prompt_tokens: tokens / 2,
    completion_tokens: tokens - tokens / 2,
    total_tokens: tokens,
    cost_usd: cost,
  }
}

#[ tokio::test ]
async fn test_daily_rollup_increments_per_event()
{
  let db = TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();
  let tenant = store.create_tenant( "acme", false ).await.expect( "tenant" );

  let first = event( tenant.id, "gpt-4o", 100, 0.01 );
  let date = date_for_ts( first.ts );
  store.insert_usage_event( &first ).await.expect( "first event" );
  store.insert_usage_event( &event( tenant.id, "gpt-4o", 50, 0.005 ) ).await.expect( "second event" );
  store.insert_usage_event( &event( tenant.id, "text-embed", 30, 0.001 ) ).await.expect( "other alias" );

  let daily = store.list_daily_usage( tenant.id, &date, &date ).await.expect( "daily" );
  assert_eq!( daily.len(), 2 );

  let chat = daily.iter().find( |d| d.alias == "gpt-4o" ).expect( "chat row" );
  assert_eq!( chat.requests, 2 );
  assert_eq!( chat.tokens, 150 );
  assert!( ( chat.cost_usd - 0.015 ).abs() < 1e-9 );

  let embed = daily.iter().find( |d| d.alias == "text-embed" ).expect( "embed row" );
  assert_eq!( embed.requests, 1 );
  assert_eq!( embed.tokens, 30 );
}

#[ tokio::test ]
async fn test_sum_usage_cost_respects_window_bounds()
{
  let db = TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();
  let tenant = store.create_tenant( "acme", false ).await.expect( "tenant" );

  let mut ev = event( tenant.id, "gpt-4o", 10, 1.25 );
  ev.ts = 1_000_000;
  store.insert_usage_event( &ev ).await.expect( "in-window" );

  let mut ev = event( tenant.id, "gpt-4o", 10, 3.0 );
  ev.ts = 2_000_000;
  store.insert_usage_event( &ev ).await.expect( "at-bound" );

  // Half-open window: [1_000_000, 2_000_000)
  let sum = store.sum_usage_cost( tenant.id, 1_000_000, 2_000_000 ).await.expect( "sum" );
  assert!( ( sum - 1.25 ).abs() < 1e-9 );
}

#[ tokio::test ]
async fn test_budget_counter_debits_accumulate()
{
  let db = TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();
  let tenant = store.create_tenant( "acme", false ).await.expect( "tenant" );

  let now = now_ms();
  store.reset_budget_counter( tenant.id, now, now + 3_600_000, 0.0 ).await.expect( "reset" );

  let used = store.debit_budget_counter( tenant.id, 2.5 ).await.expect( "debit" );
  assert!( ( used - 2.5 ).abs() < 1e-9 );

  let used = store.debit_budget_counter( tenant.id, 1.5 ).await.expect( "debit" );
  assert!( ( used - 4.0 ).abs() < 1e-9 );

  let counter = store.get_budget_counter( tenant.id ).await.expect( "get" ).expect( "row" );
  assert!( ( counter.used_usd - 4.0 ).abs() < 1e-9 );

  // Rollover resets spend
  store.reset_budget_counter( tenant.id, now + 3_600_000, now + 7_200_000, 0.0 ).await.expect( "rollover" );
  let counter = store.get_budget_counter( tenant.id ).await.expect( "get" ).expect( "row" );
  assert_eq!( counter.used_usd, 0.0 );
}

#[ tokio::test ]
async fn test_alert_state_round_trip()
{
  let db = TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();
  let tenant = store.create_tenant( "acme", false ).await.expect( "tenant" );

  let state = store.get_alert_state( tenant.id ).await.expect( "initial" );
  assert_eq!( state.last_alert_level, AlertLevel::None );
  assert!( state.last_alert_at.is_none() );

  let at = now_ms();
  store.set_alert_state( tenant.id, AlertLevel::Warn, Some( at ) ).await.expect( "set" );

  let state = store.get_alert_state( tenant.id ).await.expect( "read back" );
  assert_eq!( state.last_alert_level, AlertLevel::Warn );
  assert_eq!( state.last_alert_at, Some( at ) );
}

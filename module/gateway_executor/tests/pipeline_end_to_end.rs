//! End-to-end pipeline tests against a fake upstream

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;
use wiremock::matchers::{ method, path };
use wiremock::{ Mock, MockServer, ResponseTemplate };

use gateway_budget::BudgetEngine;
use gateway_catalog::{ CatalogModel, CatalogSnapshot, DeploymentInfo, Router };
use gateway_executor::{ ApiEndpoint, Pipeline, PipelineDeps, StreamFrame };
use gateway_guardrail::GuardrailEngine;
use gateway_limits::{ LimitsEngine, MemoryFastStore };
use gateway_store::{ GuardrailPolicyRecord, Store };
use gateway_telemetry::Metrics;
use gateway_types::{ ModelType, ProviderFamily, RateLimitSettings, RequestContext };

struct Fixture
{
  _db: gateway_test_db::TestDatabase,
  store: Store,
  pipeline: Pipeline,
  snapshot: CatalogSnapshot,
  ctx: RequestContext,
}

fn deployment( endpoint: &str ) -> DeploymentInfo
{
  DeploymentInfo
  {
    id: Uuid::new_v4(),
    endpoint: endpoint.to_string(),
    region: None,
    credentials_ref: "openai-main".to_string(),
    enabled: true,
  }
}

async fn fixture( endpoints: &[ String ] ) -> Fixture
{
  let db = gateway_test_db::TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();
  let tenant = store.create_tenant( "acme", false ).await.expect( "tenant" );

  let model = CatalogModel
  {
    alias: "gpt-4o".to_string(),
    provider: ProviderFamily::Openai,
    provider_model: "gpt-4o-2024-08-06".to_string(),
    model_type: ModelType::Chat,
    enabled: true,
    price_input_per_mtoken_usd: 10.0,
    price_output_per_mtoken_usd: 30.0,
    credentials_ref: "openai-main".to_string(),
    deployments: endpoints.iter().map( |e| deployment( e ) ).collect(),
  };

  let mut snapshot = CatalogSnapshot::default();
  snapshot.defaults.default_models = vec![ "gpt-4o".to_string() ];
  snapshot.models.insert( "gpt-4o".to_string(), model );

  let ( alert_tx, _alert_rx ) = mpsc::channel( 8 );
  let mut credentials = HashMap::new();
  credentials.insert( "openai-main".to_string(), "sk-test".to_string() );

  let pipeline = Pipeline::new( PipelineDeps
  {
    store: store.clone(),
    limits: LimitsEngine::new( MemoryFastStore::shared() ),
    budget: BudgetEngine::new( store.clone(), alert_tx ),
    guardrails: GuardrailEngine::new( store.clone() ),
    router: Arc::new( Router::new() ),
    metrics: Metrics::new().expect( "metrics" ),
    credentials: Arc::new( credentials ),
  } );

  let ctx = RequestContext
  {
    tenant_id: tenant.id,
    api_key_id: Uuid::new_v4(),
    api_key_prefix: "omg-test".to_string(),
    owner_user_id: None,
    key_limits: RateLimitSettings { requests_per_minute: 100, tokens_per_minute: 100_000, parallel_requests: 8 },
    tenant_limits: RateLimitSettings { requests_per_minute: 200, tokens_per_minute: 200_000, parallel_requests: 16 },
    key_quota: None,
    request_id: "req-e2e".to_string(),
  };

  Fixture { store, pipeline, snapshot, ctx, _db: db }
}

fn chat_body() -> serde_json::Value
{
  json!( {
    "model": "gpt-4o",
    "messages": [ { "role": "user", "content": "say hello" } ],
    "max_tokens": 32,
  } )
}

fn completion_response() -> serde_json::Value
{
  json!( {
    "id": "chatcmpl-1",
    "object": "chat.completion",
    "model": "gpt-4o-2024-08-06",
    "choices": [ { "index": 0, "message": { "role": "assistant", "content": "hello!" }, "finish_reason": "stop" } ],
    "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 },
  } )
}

#[ tokio::test ]
async fn test_buffered_request_accounts_usage_and_debits_budget()
{
  let server = MockServer::start().await;
  Mock::given( method( "POST" ) )
    .and( path( "/v1/chat/completions" ) )
    .respond_with( ResponseTemplate::new( 200 ).set_body_json( completion_response() ) )
    .mount( &server )
    .await;

  let fx = fixture( &[ server.uri() ] ).await;

  let response = fx.pipeline
    .execute( &fx.ctx, &fx.snapshot, ApiEndpoint::ChatCompletions, chat_body() )
    .await
    .expect( "pipeline" );

  assert_eq!(
    response.body[ "choices" ][ 0 ][ "message" ][ "content" ],
    json!( "hello!" )
  );

  let events = fx.store.list_usage_events( fx.ctx.tenant_id, 10, 0 ).await.expect( "events" );
  assert_eq!( events.len(), 1 );
  assert_eq!( events[ 0 ].total_tokens, 15 );
  assert_eq!( events[ 0 ].status, "ok" );
  assert_eq!( events[ 0 ].alias, "gpt-4o" );

  // 10 prompt tokens at $10/M plus 5 completion tokens at $30/M
  let expected_cost = 10.0 * 10.0 / 1e6 + 5.0 * 30.0 / 1e6;
  assert!( ( events[ 0 ].cost_usd - expected_cost ).abs() < 1e-12 );

  let counter = fx.store
    .get_budget_counter( fx.ctx.tenant_id )
    .await
    .expect( "counter" )
    .expect( "row" );
  assert!( ( counter.used_usd - expected_cost ).abs() < 1e-12 );
}

#[ tokio::test ]
async fn test_failover_retries_against_second_deployment()
{
  let broken = MockServer::start().await;
  Mock::given( method( "POST" ) )
    .respond_with( ResponseTemplate::new( 503 ) )
    .mount( &broken )
    .await;

  let healthy = MockServer::start().await;
  Mock::given( method( "POST" ) )
    .and( path( "/v1/chat/completions" ) )
    .respond_with( ResponseTemplate::new( 200 ).set_body_json( completion_response() ) )
    .mount( &healthy )
    .await;

  let fx = fixture( &[ broken.uri(), healthy.uri() ] ).await;

  // Whatever the rotation order, the retry budget reaches the good one
  let response = fx.pipeline
    .execute( &fx.ctx, &fx.snapshot, ApiEndpoint::ChatCompletions, chat_body() )
    .await
    .expect( "failover" );
  assert_eq!( response.body[ "usage" ][ "total_tokens" ], json!( 15 ) );
}

#[ tokio::test ]
async fn test_upstream_4xx_surfaces_without_retry()
{
  let server = MockServer::start().await;
  Mock::given( method( "POST" ) )
    .respond_with( ResponseTemplate::new( 400 ).set_body_json( json!( {
      "error": { "message": "context length exceeded" }
    } ) ) )
    .expect( 1 )
    .mount( &server )
    .await;

  let fx = fixture( &[ server.uri() ] ).await;

  let err = fx.pipeline
    .execute( &fx.ctx, &fx.snapshot, ApiEndpoint::ChatCompletions, chat_body() )
    .await
    .expect_err( "rejected" );

  assert_eq!( err.kind(), "upstream_rejected" );
  assert!( err.to_string().contains( "context length exceeded" ) );
}

#[ tokio::test ]
async fn test_budget_admission_rejects_before_dispatch()
{
  let server = MockServer::start().await;
  Mock::given( method( "POST" ) )
    .respond_with( ResponseTemplate::new( 200 ).set_body_json( completion_response() ) )
    .expect( 0 )
    .mount( &server )
    .await;

  let fx = fixture( &[ server.uri() ] ).await;

  // A budget far below the blended estimate for this request
  fx.store
    .upsert_budget_override( &gateway_store::BudgetOverrideRecord
    {
      tenant_id: fx.ctx.tenant_id,
      budget_usd: 0.000001,
      warning_threshold: None,
      refresh_schedule: None,
      alert_emails: vec![],
      alert_webhooks: vec![],
      alert_cooldown_seconds: None,
      version: 1,
      created_at: 0,
      updated_at: 0,
    } )
    .await
    .expect( "override" );

  let err = fx.pipeline
    .execute( &fx.ctx, &fx.snapshot, ApiEndpoint::ChatCompletions, chat_body() )
    .await
    .expect_err( "over budget" );
  assert_eq!( err.kind(), "budget_exceeded" );

  let events = fx.store.list_usage_events( fx.ctx.tenant_id, 10, 0 ).await.expect( "events" );
  assert!( events.is_empty(), "rejected requests must not meter usage" );
}

#[ tokio::test ]
async fn test_model_not_in_allowlist_reads_as_not_found()
{
  let server = MockServer::start().await;
  let mut fx = fixture( &[ server.uri() ] ).await;
  fx.snapshot.defaults.default_models.clear();

  let err = fx.pipeline
    .execute( &fx.ctx, &fx.snapshot, ApiEndpoint::ChatCompletions, chat_body() )
    .await
    .expect_err( "not allowed" );
  assert_eq!( err.kind(), "model_not_allowed" );
  assert_eq!( err.to_string(), "model not found" );
}

fn sse_body() -> String
{
  [
    r#"data: {"id":"chatcmpl-1","choices":[{"index":0,"delta":{"role":"assistant","content":"hel"}}]}"#,
    "",
    r#"data: {"id":"chatcmpl-1","choices":[{"index":0,"delta":{"content":"lo there"}}]}"#,
    "",
    r#"data: {"id":"chatcmpl-1","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
    "",
    r#"data: {"id":"chatcmpl-1","choices":[],"usage":{"prompt_tokens":9,"completion_tokens":4,"total_tokens":13}}"#,
    "",
    "data: [DONE]",
    "",
    "",
  ]
  .join( "\n" )
}

#[ tokio::test ]
async fn test_streaming_forwards_chunks_and_meters_final_usage()
{
  let server = MockServer::start().await;
  Mock::given( method( "POST" ) )
    .and( path( "/v1/chat/completions" ) )
    .respond_with(
      ResponseTemplate::new( 200 )
        .insert_header( "content-type", "text/event-stream" )
        .set_body_raw( sse_body(), "text/event-stream" ),
    )
    .mount( &server )
    .await;

  let fx = fixture( &[ server.uri() ] ).await;

  let mut body = chat_body();
  body[ "stream" ] = json!( true );

  let mut rx = fx.pipeline
    .execute_stream( fx.ctx.clone(), Arc::new( fx.snapshot.clone() ), body )
    .await
    .expect( "stream" );

  let mut data_frames = Vec::new();
  let mut saw_done = false;
  while let Some( frame ) = rx.recv().await
  {
    match frame
    {
      StreamFrame::Data( payload ) => data_frames.push( payload ),
      StreamFrame::Done => { saw_done = true; }
    }
  }

  assert!( saw_done );
  assert_eq!( data_frames.len(), 4, "every upstream data payload is forwarded" );
  assert!( data_frames[ 0 ].contains( "hel" ) );

  // Accounting ran with the terminal usage frame
  let events = fx.store.list_usage_events( fx.ctx.tenant_id, 10, 0 ).await.expect( "events" );
  assert_eq!( events.len(), 1 );
  assert_eq!( events[ 0 ].prompt_tokens, 9 );
  assert_eq!( events[ 0 ].completion_tokens, 4 );
  assert_eq!( events[ 0 ].status, "ok" );
}

#[ tokio::test ]
async fn test_streaming_guardrail_truncates_mid_stream()
{
  let server = MockServer::start().await;
  Mock::given( method( "POST" ) )
    .respond_with(
      ResponseTemplate::new( 200 )
        .insert_header( "content-type", "text/event-stream" )
        .set_body_raw( sse_body(), "text/event-stream" ),
    )
    .mount( &server )
    .await;

  let fx = fixture( &[ server.uri() ] ).await;

  // "hello there" accumulates across the first two chunks
  fx.store
    .upsert_guardrail_policy( &GuardrailPolicyRecord
    {
      scope: "tenant".to_string(),
      scope_id: fx.ctx.tenant_id,
      enabled: true,
      prompt_blocked_keywords: vec![],
      response_blocked_keywords: vec![ "hello there".to_string() ],
      moderation: None,
      version: 1,
      created_at: 0,
      updated_at: 0,
    } )
    .await
    .expect( "policy" );

  let mut body = chat_body();
  body[ "stream" ] = json!( true );

  let mut rx = fx.pipeline
    .execute_stream( fx.ctx.clone(), Arc::new( fx.snapshot.clone() ), body )
    .await
    .expect( "stream" );

  let mut frames = Vec::new();
  while let Some( frame ) = rx.recv().await
  {
    frames.push( frame );
  }

  // The stream ends with a trailing error frame before Done
  let error_frame = frames.iter().rev().find_map( |frame| match frame
  {
    StreamFrame::Data( payload ) if payload.contains( "guardrail_violation" ) => Some( payload.clone() ),
    _ => None,
  } );
  assert!( error_frame.is_some(), "expected a trailing guardrail error frame" );
  assert_eq!( frames.last(), Some( &StreamFrame::Done ) );

  let events = fx.store.list_usage_events( fx.ctx.tenant_id, 10, 0 ).await.expect( "events" );
  assert_eq!( events.len(), 1 );
  assert_eq!( events[ 0 ].status, "guardrail_truncated" );

  let guardrail_events = fx.store.list_guardrail_events( fx.ctx.tenant_id, 10 ).await.expect( "guardrail" );
  assert_eq!( guardrail_events.len(), 1 );
  assert_eq!( guardrail_events[ 0 ].action, "block" );
}

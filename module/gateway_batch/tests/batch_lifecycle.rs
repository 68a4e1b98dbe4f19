//! Batch lifecycle tests against a fake upstream

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;
use wiremock::matchers::{ method, path };
use wiremock::{ Mock, MockServer, ResponseTemplate };

use gateway_batch::BatchEngine;
use gateway_budget::BudgetEngine;
use gateway_catalog::{ Router, SnapshotCache };
use gateway_executor::{ Pipeline, PipelineDeps };
use gateway_files::{ FilesService, MemoryBlobStore };
use gateway_guardrail::GuardrailEngine;
use gateway_limits::{ LimitsEngine, MemoryFastStore };
use gateway_store::api_keys::NewApiKey;
use gateway_store::catalog::NewCatalogEntry;
use gateway_store::Store;
use gateway_telemetry::Metrics;
use gateway_types::{ ApiKeyKind, BatchStatus, FilePurpose, ModelType, ProviderFamily };

struct Fixture
{
  _db: gateway_test_db::TestDatabase,
  store: Store,
  files: FilesService,
  engine: Arc< BatchEngine >,
  tenant_id: Uuid,
  api_key_id: Uuid,
}

async fn fixture( upstream: &MockServer ) -> Fixture
{
  let db = gateway_test_db::TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();

  let tenant = store.create_tenant( "acme", false ).await.expect( "tenant" );
  let api_key = store
    .create_api_key( NewApiKey
    {
      tenant_id: tenant.id,
      kind: ApiKeyKind::Tenant,
      owner_user_id: None,
      prefix: "omg-batchkey".to_string(),
      secret_hash: "argon2-placeholder".to_string(),
      name: "batch key".to_string(),
      scopes: vec![],
      quota: None,
    } )
    .await
    .expect( "api key" );

  store
    .create_catalog_entry( NewCatalogEntry
    {
      alias: "gpt-4o".to_string(),
      provider: ProviderFamily::Openai,
      provider_model: "gpt-4o-2024-08-06".to_string(),
      deployment: "primary".to_string(),
      enabled: true,
      price_input_per_mtoken_usd: 10.0,
      price_output_per_mtoken_usd: 30.0,
      model_type: ModelType::Chat,
      credentials_ref: "openai-main".to_string(),
    } )
    .await
    .expect( "catalog entry" );
  store
    .create_deployment( "gpt-4o", &upstream.uri(), None, "openai-main", true )
    .await
    .expect( "deployment" );
  store
    .set_default_models( &[ "gpt-4o".to_string() ] )
    .await
    .expect( "default models" );

  let snapshots = SnapshotCache::new( store.clone() ).await.expect( "snapshot" );

  let blob = Arc::new( MemoryBlobStore::new() );
  let files = FilesService::new( store.clone(), blob.clone() );

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

  let engine = Arc::new( BatchEngine::new(
    store.clone(),
    files.clone(),
    blob,
    pipeline,
    snapshots,
  ) );

  Fixture
  {
    store,
    files,
    engine,
    tenant_id: tenant.id,
    api_key_id: api_key.id,
    _db: db,
  }
}

fn completion_response() -> serde_json::Value
{
  json!( {
    "id": "chatcmpl-1",
    "object": "chat.completion",
    "choices": [ { "index": 0, "message": { "role": "assistant", "content": "done" }, "finish_reason": "stop" } ],
    "usage": { "prompt_tokens": 4, "completion_tokens": 2, "total_tokens": 6 },
  } )
}

fn input_content( count: usize, alias: &str ) -> String
{
  ( 0..count )
    .map( |i|
    {
      json!( {
        "custom_id": format!( "job-{i}" ),
        "method": "POST",
        "url": "/v1/chat/completions",
        "body": { "model": alias, "messages": [ { "role": "user", "content": format!( "item {i}" ) } ], "max_tokens": 8 },
      } )
      .to_string()
    } )
    .collect::< Vec< _ > >()
    .join( "\n" )
}

async fn upload_input( fx: &Fixture, content: &str ) -> Uuid
{
  let settings = fx.store.file_settings().await.expect( "settings" );
  fx.files
    .upload(
      fx.tenant_id,
      "input.jsonl",
      FilePurpose::Batch,
      "application/jsonl",
      &[ content.as_bytes() ],
      None,
      &settings,
    )
    .await
    .expect( "upload" )
    .id
}

async fn wait_terminal( store: &Store, batch_id: Uuid ) -> gateway_store::BatchRecord
{
  for _ in 0..200
  {
    let batch = store.get_batch( batch_id ).await.expect( "batch" );
    if batch.status.is_terminal()
    {
      return batch;
    }
    tokio::time::sleep( Duration::from_millis( 25 ) ).await;
  }
  panic!( "batch did not reach a terminal state in time" );
}

#[ tokio::test ]
async fn test_batch_completes_with_one_output_line_per_input()
{
  let upstream = MockServer::start().await;
  Mock::given( method( "POST" ) )
    .and( path( "/v1/chat/completions" ) )
    .respond_with( ResponseTemplate::new( 200 ).set_body_json( completion_response() ) )
    .mount( &upstream )
    .await;

  let fx = fixture( &upstream ).await;
  let input_id = upload_input( &fx, &input_content( 5, "gpt-4o" ) ).await;

  let batch = Arc::clone( &fx.engine )
    .create(
      fx.tenant_id,
      fx.api_key_id,
      "/v1/chat/completions".to_string(),
      "24h".to_string(),
      input_id,
      json!( { "job": "test" } ),
      Some( 2 ),
    )
    .await
    .expect( "create" );

  assert_eq!( batch.status, BatchStatus::Validating );
  assert_eq!( batch.request_counts.total, 5 );
  assert_eq!( batch.max_concurrency, 2 );

  let done = wait_terminal( &fx.store, batch.id ).await;
  assert_eq!( done.status, BatchStatus::Completed );
  assert_eq!( done.request_counts.completed, 5 );
  assert_eq!( done.request_counts.failed, 0 );
  assert_eq!(
    done.request_counts.total,
    done.request_counts.completed + done.request_counts.failed + done.request_counts.cancelled
  );

  // Output file carries exactly one line per input, unique by custom_id
  let output_id = done.output_file_id.expect( "output file" );
  let ( _, data ) = fx.files.open( fx.tenant_id, output_id ).await.expect( "open output" );
  let text = String::from_utf8( data ).expect( "utf8" );
  let mut custom_ids: Vec< String > = text
    .lines()
    .map( |line| serde_json::from_str::< serde_json::Value >( line ).expect( "json line" ) )
    .map( |line| line[ "custom_id" ].as_str().expect( "custom_id" ).to_string() )
    .collect();
  custom_ids.sort();
  custom_ids.dedup();
  assert_eq!( custom_ids.len(), 5 );

  assert!( done.error_file_id.is_none() );

  // Inner requests went through the metered data plane
  let events = fx.store.list_usage_events( fx.tenant_id, 20, 0 ).await.expect( "events" );
  assert_eq!( events.len(), 5 );
}

#[ tokio::test ]
async fn test_failed_lines_go_to_the_error_file()
{
  let upstream = MockServer::start().await;
  Mock::given( method( "POST" ) )
    .and( path( "/v1/chat/completions" ) )
    .respond_with( ResponseTemplate::new( 200 ).set_body_json( completion_response() ) )
    .mount( &upstream )
    .await;

  let fx = fixture( &upstream ).await;

  // Three good lines plus one against an alias outside the allowlist
  let mut content = input_content( 3, "gpt-4o" );
  content.push( '\n' );
  content.push_str(
    &json!( {
      "custom_id": "job-bad",
      "method": "POST",
      "url": "/v1/chat/completions",
      "body": { "model": "not-a-model", "messages": [ { "role": "user", "content": "x" } ] },
    } )
    .to_string(),
  );

  let input_id = upload_input( &fx, &content ).await;
  let batch = Arc::clone( &fx.engine )
    .create(
      fx.tenant_id,
      fx.api_key_id,
      "/v1/chat/completions".to_string(),
      "24h".to_string(),
      input_id,
      serde_json::Value::Null,
      None,
    )
    .await
    .expect( "create" );

  let done = wait_terminal( &fx.store, batch.id ).await;
  assert_eq!( done.status, BatchStatus::Completed, "partial failures do not fail the batch" );
  assert_eq!( done.request_counts.completed, 3 );
  assert_eq!( done.request_counts.failed, 1 );

  let error_id = done.error_file_id.expect( "error file" );
  let ( _, data ) = fx.files.open( fx.tenant_id, error_id ).await.expect( "open errors" );
  let text = String::from_utf8( data ).expect( "utf8" );
  let line: serde_json::Value = serde_json::from_str( text.lines().next().expect( "one line" ) ).expect( "json" );
  assert_eq!( line[ "custom_id" ], json!( "job-bad" ) );
  assert_eq!( line[ "error" ][ "code" ], json!( "model_not_allowed" ) );
}

#[ tokio::test ]
async fn test_cancel_drains_workers_and_accounts_every_line()
{
  let upstream = MockServer::start().await;
  Mock::given( method( "POST" ) )
    .and( path( "/v1/chat/completions" ) )
    .respond_with(
      ResponseTemplate::new( 200 )
        .set_body_json( completion_response() )
        .set_delay( Duration::from_millis( 100 ) ),
    )
    .mount( &upstream )
    .await;

  let fx = fixture( &upstream ).await;
  let input_id = upload_input( &fx, &input_content( 30, "gpt-4o" ) ).await;

  let batch = Arc::clone( &fx.engine )
    .create(
      fx.tenant_id,
      fx.api_key_id,
      "/v1/chat/completions".to_string(),
      "24h".to_string(),
      input_id,
      serde_json::Value::Null,
      Some( 2 ),
    )
    .await
    .expect( "create" );

  tokio::time::sleep( Duration::from_millis( 300 ) ).await;
  fx.engine.cancel( fx.tenant_id, batch.id ).await.expect( "cancel" );

  let done = wait_terminal( &fx.store, batch.id ).await;
  assert_eq!( done.status, BatchStatus::Cancelled );

  let counts = done.request_counts;
  assert_eq!( counts.total, 30 );
  assert_eq!( counts.total, counts.completed + counts.failed + counts.cancelled );
  assert!( counts.cancelled > 0, "undispatched lines count as cancelled" );
}

#[ tokio::test ]
async fn test_invalid_input_file_rejects_batch_creation()
{
  let upstream = MockServer::start().await;
  let fx = fixture( &upstream ).await;

  let input_id = upload_input( &fx, "this is not jsonl" ).await;
  let err = Arc::clone( &fx.engine )
    .create(
      fx.tenant_id,
      fx.api_key_id,
      "/v1/chat/completions".to_string(),
      "24h".to_string(),
      input_id,
      serde_json::Value::Null,
      None,
    )
    .await
    .expect_err( "invalid input" );

  assert_eq!( err.kind(), "bad_request" );
}

#[ tokio::test ]
async fn test_recovery_resumes_from_the_progress_cursor()
{
  let upstream = MockServer::start().await;
  Mock::given( method( "POST" ) )
    .and( path( "/v1/chat/completions" ) )
    .respond_with( ResponseTemplate::new( 200 ).set_body_json( completion_response() ) )
    .mount( &upstream )
    .await;

  let fx = fixture( &upstream ).await;
  let input_id = upload_input( &fx, &input_content( 4, "gpt-4o" ) ).await;

  // A batch left mid-flight by a previous process: in_progress, cursor at 2
  let record = fx.store
    .create_batch( gateway_store::batches::NewBatch
    {
      tenant_id: fx.tenant_id,
      api_key_id: fx.api_key_id,
      endpoint: "/v1/chat/completions".to_string(),
      completion_window: "24h".to_string(),
      input_file_id: input_id,
      metadata: serde_json::Value::Null,
      max_concurrency: 2,
      total_requests: 4,
      expires_at: None,
    } )
    .await
    .expect( "batch row" );
  fx.store.update_batch_status( record.id, BatchStatus::InProgress ).await.expect( "in progress" );
  fx.store
    .update_batch_progress(
      record.id,
      gateway_store::RequestCounts { total: 4, completed: 0, failed: 0, cancelled: 0 },
      2,
    )
    .await
    .expect( "cursor" );

  let resumed = Arc::clone( &fx.engine ).recover().await.expect( "recover" );
  assert_eq!( resumed, 1 );

  let done = wait_terminal( &fx.store, record.id ).await;
  assert_eq!( done.status, BatchStatus::Completed );

  // Only the two undispatched lines ran; the rest were already dispatched
  // before the crash (their sidecar output was lost with the fake crash)
  assert_eq!( done.request_counts.completed, 2 );
}

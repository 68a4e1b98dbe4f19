//! HTTP surface tests: auth, envelopes, planes

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{ header, Request, StatusCode };
use http_body_util::BodyExt;
use serde_json::{ json, Value };
use tokio::sync::mpsc;
use tower::ServiceExt;
use wiremock::matchers::{ method, path };
use wiremock::{ Mock, MockServer, ResponseTemplate };

use gateway_auth::{ password, CredentialResolver, JwtSecret, KeyMaterial };
use gateway_batch::BatchEngine;
use gateway_budget::BudgetEngine;
use gateway_catalog::SnapshotCache;
use gateway_control_api::{ build_router, AppState };
use gateway_executor::{ Pipeline, PipelineDeps };
use gateway_files::{ FilesService, MemoryBlobStore };
use gateway_guardrail::GuardrailEngine;
use gateway_limits::{ LimitsEngine, LoginRateLimiter, MemoryFastStore };
use gateway_store::api_keys::NewApiKey;
use gateway_store::catalog::NewCatalogEntry;
use gateway_store::Store;
use gateway_telemetry::Metrics;
use gateway_types::{ ApiKeyKind, MembershipRole, ModelType, ProviderFamily, RateLimitSettings, TenantStatus };

struct Fixture
{
  _db: gateway_test_db::TestDatabase,
  store: Store,
  app: axum::Router,
  state: AppState,
  tenant_id: uuid::Uuid,
  wire_token: String,
  api_key_id: uuid::Uuid,
}

async fn fixture( upstream: Option< &MockServer > ) -> Fixture
{
  let db = gateway_test_db::TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();

  let tenant = store.create_tenant( "acme", false ).await.expect( "tenant" );

  let material = KeyMaterial::new();
  let generated = material.generate().expect( "key" );
  let api_key = store
    .create_api_key( NewApiKey
    {
      tenant_id: tenant.id,
      kind: ApiKeyKind::Tenant,
      owner_user_id: None,
      prefix: generated.prefix.clone(),
      secret_hash: generated.secret_hash.clone(),
      name: "ci".to_string(),
      scopes: vec![],
      quota: None,
    } )
    .await
    .expect( "key row" );

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
    .expect( "catalog" );

  if let Some( upstream ) = upstream
  {
    store
      .create_deployment( "gpt-4o", &upstream.uri(), None, "openai-main", true )
      .await
      .expect( "deployment" );
  }
  store.set_default_models( &[ "gpt-4o".to_string() ] ).await.expect( "defaults" );

  let snapshots = SnapshotCache::new( store.clone() ).await.expect( "snapshots" );
  let router = Arc::new( gateway_catalog::Router::new() );
  let metrics = Metrics::new().expect( "metrics" );
  let ( alert_tx, _alert_rx ) = mpsc::channel( 8 );
  let limits = LimitsEngine::new( MemoryFastStore::shared() );

  let mut credentials = HashMap::new();
  credentials.insert( "openai-main".to_string(), "sk-test".to_string() );

  let pipeline = Pipeline::new( PipelineDeps
  {
    store: store.clone(),
    limits: limits.clone(),
    budget: BudgetEngine::new( store.clone(), alert_tx ),
    guardrails: GuardrailEngine::new( store.clone() ),
    router: Arc::clone( &router ),
    metrics: metrics.clone(),
    credentials: Arc::new( credentials ),
  } );

  let blob = Arc::new( MemoryBlobStore::new() );
  let files = FilesService::new( store.clone(), blob.clone() );
  let batches = Arc::new( BatchEngine::new(
    store.clone(),
    files.clone(),
    blob,
    pipeline.clone(),
    Arc::clone( &snapshots ),
  ) );

  let state = AppState
  {
    resolver: CredentialResolver::new( store.clone() ),
    store: store.clone(),
    jwt: Arc::new( JwtSecret::new( "test-jwt-secret".to_string() ) ),
    snapshots,
    pipeline,
    files,
    batches,
    router,
    limits,
    metrics,
    login_limiter: LoginRateLimiter::new(),
    key_material: KeyMaterial::new(),
  };

  Fixture
  {
    app: build_router( state.clone() ),
    state,
    store,
    tenant_id: tenant.id,
    wire_token: generated.wire_token,
    api_key_id: api_key.id,
    _db: db,
  }
}

async fn body_json( response: axum::response::Response ) -> Value
{
  let bytes = response.into_body().collect().await.expect( "body" ).to_bytes();
  serde_json::from_slice( &bytes ).expect( "json body" )
}

fn get( path: &str, bearer: Option< &str > ) -> Request< Body >
{
  let mut builder = Request::builder().method( "GET" ).uri( path );
  if let Some( token ) = bearer
  {
    builder = builder.header( header::AUTHORIZATION, format!( "Bearer {token}" ) );
  }
  builder.body( Body::empty() ).expect( "request" )
}

fn post_json( path: &str, bearer: Option< &str >, body: &Value ) -> Request< Body >
{
  let mut builder = Request::builder()
    .method( "POST" )
    .uri( path )
    .header( header::CONTENT_TYPE, "application/json" );
  if let Some( token ) = bearer
  {
    builder = builder.header( header::AUTHORIZATION, format!( "Bearer {token}" ) );
  }
  builder.body( Body::from( body.to_string() ) ).expect( "request" )
}

#[ tokio::test ]
async fn test_models_require_and_honour_bearer_auth()
{
  let fx = fixture( None ).await;

  // No credential: the envelope carries a stable type
  let response = fx.app.clone().oneshot( get( "/v1/models", None ) ).await.expect( "send" );
  assert_eq!( response.status(), StatusCode::UNAUTHORIZED );
  let body = body_json( response ).await;
  assert_eq!( body[ "error" ][ "type" ], json!( "unauthorized" ) );

  // Valid credential: the tenant's aliases come back
  let response = fx.app.clone().oneshot( get( "/v1/models", Some( &fx.wire_token ) ) ).await.expect( "send" );
  assert_eq!( response.status(), StatusCode::OK );
  let body = body_json( response ).await;
  assert_eq!( body[ "data" ][ 0 ][ "id" ], json!( "gpt-4o" ) );
}

#[ tokio::test ]
async fn test_suspended_tenant_gets_403()
{
  let fx = fixture( None ).await;

  let tenant = fx.store.get_tenant( fx.tenant_id ).await.expect( "tenant" );
  fx.store
    .update_tenant( fx.tenant_id, None, Some( TenantStatus::Suspended ), tenant.version )
    .await
    .expect( "suspend" );

  let response = fx.app.clone().oneshot( get( "/v1/models", Some( &fx.wire_token ) ) ).await.expect( "send" );
  assert_eq!( response.status(), StatusCode::FORBIDDEN );
  let body = body_json( response ).await;
  assert_eq!( body[ "error" ][ "type" ], json!( "tenant_suspended" ) );
}

#[ tokio::test ]
async fn test_chat_completion_round_trip_over_http()
{
  let upstream = MockServer::start().await;
  Mock::given( method( "POST" ) )
    .and( path( "/v1/chat/completions" ) )
    .respond_with( ResponseTemplate::new( 200 ).set_body_json( json!( {
      "id": "chatcmpl-1",
      "object": "chat.completion",
      "choices": [ { "index": 0, "message": { "role": "assistant", "content": "pong" }, "finish_reason": "stop" } ],
      "usage": { "prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4 },
    } ) ) )
    .mount( &upstream )
    .await;

  let fx = fixture( Some( &upstream ) ).await;

  let request_body = json!( {
    "model": "gpt-4o",
    "messages": [ { "role": "user", "content": "ping" } ],
    "max_tokens": 8,
  } );

  let response = fx.app.clone()
    .oneshot( post_json( "/v1/chat/completions", Some( &fx.wire_token ), &request_body ) )
    .await
    .expect( "send" );
  assert_eq!( response.status(), StatusCode::OK );

  let body = body_json( response ).await;
  assert_eq!( body[ "choices" ][ 0 ][ "message" ][ "content" ], json!( "pong" ) );

  let events = fx.store.list_usage_events( fx.tenant_id, 10, 0 ).await.expect( "events" );
  assert_eq!( events.len(), 1 );
  assert_eq!( events[ 0 ].total_tokens, 4 );
}

#[ tokio::test ]
async fn test_rate_limit_surfaces_retry_after()
{
  let upstream = MockServer::start().await;
  Mock::given( method( "POST" ) )
    .respond_with( ResponseTemplate::new( 200 ).set_body_json( json!( {
      "choices": [ { "index": 0, "message": { "role": "assistant", "content": "ok" } } ],
      "usage": { "prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2 },
    } ) ) )
    .mount( &upstream )
    .await;

  let fx = fixture( Some( &upstream ) ).await;

  // One request per minute for this key
  fx.store
    .upsert_api_key_rate_limit(
      fx.api_key_id,
      RateLimitSettings { requests_per_minute: 1, tokens_per_minute: 0, parallel_requests: 0 },
    )
    .await
    .expect( "override" );

  let request_body = json!( {
    "model": "gpt-4o",
    "messages": [ { "role": "user", "content": "ping" } ],
    "max_tokens": 4,
  } );

  let first = fx.app.clone()
    .oneshot( post_json( "/v1/chat/completions", Some( &fx.wire_token ), &request_body ) )
    .await
    .expect( "send" );
  assert_eq!( first.status(), StatusCode::OK );

  let second = fx.app.clone()
    .oneshot( post_json( "/v1/chat/completions", Some( &fx.wire_token ), &request_body ) )
    .await
    .expect( "send" );
  assert_eq!( second.status(), StatusCode::TOO_MANY_REQUESTS );
  assert!( second.headers().contains_key( header::RETRY_AFTER ) );

  let body = body_json( second ).await;
  assert_eq!( body[ "error" ][ "type" ], json!( "rate_limited" ) );
}

#[ tokio::test ]
async fn test_admin_login_and_rbac()
{
  let fx = fixture( None ).await;

  let hash = password::hash_password( "correct horse" ).expect( "hash" );
  let admin = fx.store
    .create_user( "root@example.com", "Root", Some( &hash ), true )
    .await
    .expect( "admin" );
  let plain = fx.store
    .create_user( "user@example.com", "User", Some( &hash ), false )
    .await
    .expect( "user" );

  // Wrong password fails closed
  let response = fx.app.clone()
    .oneshot( post_json(
      "/admin/auth/login",
      None,
      &json!( { "email": "root@example.com", "password": "wrong" } ),
    ) )
    .await
    .expect( "send" );
  assert_eq!( response.status(), StatusCode::UNAUTHORIZED );

  // Right password yields a session token
  let response = fx.app.clone()
    .oneshot( post_json(
      "/admin/auth/login",
      None,
      &json!( { "email": "root@example.com", "password": "correct horse" } ),
    ) )
    .await
    .expect( "send" );
  assert_eq!( response.status(), StatusCode::OK );
  let body = body_json( response ).await;
  let admin_token = body[ "token" ].as_str().expect( "token" ).to_string();
  assert_eq!( body[ "user" ][ "id" ], json!( admin.id ) );

  // Super admin may list tenants
  let response = fx.app.clone()
    .oneshot( get( "/admin/tenants", Some( &admin_token ) ) )
    .await
    .expect( "send" );
  assert_eq!( response.status(), StatusCode::OK );

  // A plain user may not
  let user_token = fx.state.jwt.issue( plain.id, &plain.email, false ).expect( "token" );
  let response = fx.app.clone()
    .oneshot( get( "/admin/tenants", Some( &user_token ) ) )
    .await
    .expect( "send" );
  assert_eq!( response.status(), StatusCode::FORBIDDEN );
}

#[ tokio::test ]
async fn test_login_brute_force_is_rate_limited()
{
  let fx = fixture( None ).await;

  let login = json!( { "email": "nobody@example.com", "password": "guess" } );

  for _ in 0..5
  {
    let response = fx.app.clone()
      .oneshot( post_json( "/admin/auth/login", None, &login ) )
      .await
      .expect( "send" );
    assert_eq!( response.status(), StatusCode::UNAUTHORIZED );
  }

  let response = fx.app.clone()
    .oneshot( post_json( "/admin/auth/login", None, &login ) )
    .await
    .expect( "send" );
  assert_eq!( response.status(), StatusCode::TOO_MANY_REQUESTS );
  assert!( response.headers().contains_key( header::RETRY_AFTER ) );
}

#[ tokio::test ]
async fn test_user_plane_personal_keys()
{
  let fx = fixture( None ).await;

  let hash = password::hash_password( "pw" ).expect( "hash" );
  let user = fx.store
    .create_user( "jane@example.com", "Jane", Some( &hash ), false )
    .await
    .expect( "user" );
  let personal = fx.store.create_tenant( "personal-jane@example.com", true ).await.expect( "personal" );
  fx.store.add_membership( personal.id, user.id, MembershipRole::Owner ).await.expect( "owner" );

  let token = fx.state.jwt.issue( user.id, &user.email, false ).expect( "token" );

  // Create a personal key; the wire token is returned exactly once
  let response = fx.app.clone()
    .oneshot( post_json( "/user/keys", Some( &token ), &json!( { "name": "laptop" } ) ) )
    .await
    .expect( "send" );
  assert_eq!( response.status(), StatusCode::OK );
  let body = body_json( response ).await;
  let wire_token = body[ "token" ].as_str().expect( "wire token" ).to_string();
  assert!( wire_token.starts_with( "omg-" ) );

  // The fresh personal key authenticates on the data plane
  let response = fx.app.clone()
    .oneshot( get( "/v1/models", Some( &wire_token ) ) )
    .await
    .expect( "send" );
  assert_eq!( response.status(), StatusCode::OK );

  // And shows up in the listing without its secret
  let response = fx.app.clone()
    .oneshot( get( "/user/keys", Some( &token ) ) )
    .await
    .expect( "send" );
  let body = body_json( response ).await;
  assert_eq!( body[ "data" ].as_array().expect( "list" ).len(), 1 );
  assert!( body[ "data" ][ 0 ].get( "token" ).is_none() );
}

#[ tokio::test ]
async fn test_healthz_and_metrics_endpoints()
{
  let fx = fixture( None ).await;

  let response = fx.app.clone().oneshot( get( "/healthz", None ) ).await.expect( "send" );
  assert_eq!( response.status(), StatusCode::OK );

  // Drive one counted request, then read the registry
  let _ = fx.app.clone().oneshot( get( "/v1/models", Some( &fx.wire_token ) ) ).await.expect( "send" );

  let response = fx.app.clone().oneshot( get( "/metrics", None ) ).await.expect( "send" );
  assert_eq!( response.status(), StatusCode::OK );
  let bytes = response.into_body().collect().await.expect( "body" ).to_bytes();
  let text = String::from_utf8_lossy( &bytes );
  assert!( text.contains( "open_model_gateway_http_requests_total" ) );
}

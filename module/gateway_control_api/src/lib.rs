//! HTTP surface for the model gateway
//!
//! Wires the engines together into one axum application: the public
//! OpenAI-compatible plane, the admin plane, the user plane, liveness and
//! metrics. `serve` additionally starts the background machinery: alert
//! dispatcher, retention sweepers, batch recovery, snapshot refresh.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use error::{ ApiError, ApiResult };
pub use state::AppState;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{ Duration, Instant };

use axum::extract::{ MatchedPath, Request, State };
use axum::middleware::{ self, Next };
use axum::response::Response;
use axum::routing::get;
use axum::{ Json, Router };
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use gateway_alerts::{ AlertDispatcher, OutboundTransport, SmtpConfig };
use gateway_auth::{ password, CredentialResolver, JwtSecret, KeyMaterial };
use gateway_batch::BatchEngine;
use gateway_budget::BudgetEngine;
use gateway_catalog::SnapshotCache;
use gateway_executor::{ Pipeline, PipelineDeps };
use gateway_files::{ FilesService, FsBlobStore };
use gateway_guardrail::GuardrailEngine;
use gateway_limits::{ FastStore, LimitsEngine, LoginRateLimiter, MemoryFastStore, RedisFastStore };
use gateway_store::Store;
use gateway_telemetry::Metrics;
use gateway_types::{ GatewayError, MembershipRole, Result };

/// Build the full application state from configuration
pub async fn build_state( config: &ServerConfig ) -> Result< AppState >
{
  let store = Store::connect( &config.database_url ).await?;

  bootstrap_admin( &store, config ).await?;

  let fast: Arc< dyn FastStore > = match &config.redis_url
  {
    Some( url ) => Arc::new( RedisFastStore::connect( url ).await? ),
    None => MemoryFastStore::shared(),
  };
  let limits = LimitsEngine::new( fast );

  let ( alert_tx, alert_rx ) = mpsc::channel( 256 );
  let transport = OutboundTransport::new(
    config.smtp.as_ref().map( |smtp| SmtpConfig
    {
      host: smtp.host.clone(),
      port: smtp.port,
      username: smtp.username.clone(),
      password: smtp.password.clone(),
      starttls: smtp.starttls,
      from: smtp.from.clone(),
    } ),
    Duration::from_secs( 10 ),
  )?;
  let dispatcher = AlertDispatcher::new( store.clone(), Arc::new( transport ) );
  tokio::spawn( dispatcher.run( alert_rx ) );

  let snapshots = SnapshotCache::new( store.clone() ).await?;
  let router = Arc::new( gateway_catalog::Router::new() );
  let metrics = Metrics::new()?;
  let budget = BudgetEngine::new( store.clone(), alert_tx );
  let guardrails = GuardrailEngine::new( store.clone() );

  let pipeline = Pipeline::new( PipelineDeps
  {
    store: store.clone(),
    limits: limits.clone(),
    budget,
    guardrails,
    router: Arc::clone( &router ),
    metrics: metrics.clone(),
    credentials: Arc::new( config.credentials.clone() ),
  } );

  let blob = Arc::new( FsBlobStore::new( PathBuf::from( &config.blob_root ) ) );
  let files = FilesService::new( store.clone(), blob.clone() );

  let batches = Arc::new( BatchEngine::new(
    store.clone(),
    files.clone(),
    blob,
    pipeline.clone(),
    Arc::clone( &snapshots ),
  ) );

  Ok( AppState
  {
    resolver: CredentialResolver::new( store.clone() ),
    store,
    jwt: Arc::new( JwtSecret::new( config.jwt_secret.clone() ) ),
    snapshots,
    pipeline,
    files,
    batches,
    router,
    limits,
    metrics,
    login_limiter: LoginRateLimiter::new(),
    key_material: KeyMaterial::new(),
  } )
}

/// Seed the configured super admin on first start
async fn bootstrap_admin( store: &Store, config: &ServerConfig ) -> Result< () >
{
  let Some( bootstrap ) = &config.bootstrap_admin else
  {
    return Ok( () );
  };

  if store.get_user_by_email( &bootstrap.email ).await?.is_some()
  {
    return Ok( () );
  }

  let hash = password::hash_password( &bootstrap.password )?;
  let user = store.create_user( &bootstrap.email, "Administrator", Some( &hash ), true ).await?;

  let personal = store.create_tenant( &format!( "personal-{}", user.email ), true ).await?;
  store.add_membership( personal.id, user.id, MembershipRole::Owner ).await?;

  tracing::info!( email = %bootstrap.email, "bootstrap admin created" );
  Ok( () )
}

/// Assemble the axum application
pub fn build_router( state: AppState ) -> Router
{
  Router::new()
    .merge( routes::public::router() )
    .merge( routes::admin::router() )
    .merge( routes::user::router() )
    .route( "/healthz", get( healthz ) )
    .route( "/metrics", get( export_metrics ) )
    .layer( middleware::from_fn_with_state( state.clone(), track_http ) )
    .layer( TraceLayer::new_for_http() )
    .layer( CorsLayer::permissive() )
    .with_state( state )
}

async fn healthz() -> Json< serde_json::Value >
{
  Json( serde_json::json!( { "status": "ok" } ) )
}

async fn export_metrics( State( state ): State< AppState > ) -> ApiResult< String >
{
  Ok( state.metrics.export()? )
}

/// Count and time every request by method, matched route and status
async fn track_http( State( state ): State< AppState >, request: Request, next: Next ) -> Response
{
  let method = request.method().to_string();
  let route = request
    .extensions()
    .get::< MatchedPath >()
    .map_or_else( || "unmatched".to_string(), |path| path.as_str().to_string() );

  let started = Instant::now();
  let response = next.run( request ).await;

  state.metrics.http_requests_total
    .with_label_values( &[ &method, &route, response.status().as_str() ] )
    .inc();
  state.metrics.http_request_duration_seconds
    .with_label_values( &[ &method, &route ] )
    .observe( started.elapsed().as_secs_f64() );

  response
}

/// Start background maintenance tasks
pub async fn spawn_background_tasks( state: &AppState ) -> Result< () >
{
  // Resume batches interrupted by the previous process
  let resumed = Arc::clone( &state.batches ).recover().await?;
  if resumed > 0
  {
    tracing::info!( resumed, "batches resumed after restart" );
  }

  tokio::spawn( state.files.clone().run_sweeper() );
  tokio::spawn( gateway_batch::run_expiry_sweeper( state.store.clone() ) );

  let limits = state.limits.clone();
  tokio::spawn( async move
  {
    let mut ticker = tokio::time::interval( Duration::from_secs( 60 ) );
    loop
    {
      ticker.tick().await;
      match limits.sweep_once().await
      {
        Ok( 0 ) => {}
        Ok( reset ) => tracing::info!( reset, "idle parallel semaphores reset" ),
        Err( err ) => tracing::warn!( error = %err, "semaphore sweep failed" ),
      }
    }
  } );

  let snapshots = Arc::clone( &state.snapshots );
  tokio::spawn( async move
  {
    let mut ticker = tokio::time::interval( Duration::from_secs( 10 ) );
    loop
    {
      ticker.tick().await;
      if let Err( err ) = snapshots.refresh_if_stale().await
      {
        tracing::warn!( error = %err, "snapshot fallback refresh failed" );
      }
    }
  } );

  Ok( () )
}

/// Run the server until the process stops
pub async fn serve( config: ServerConfig ) -> Result< () >
{
  let state = build_state( &config ).await?;
  spawn_background_tasks( &state ).await?;

  let app = build_router( state );

  let listener = tokio::net::TcpListener::bind( &config.listen_addr )
    .await
    .map_err( |e| GatewayError::Internal( format!( "bind {}: {e}", config.listen_addr ) ) )?;

  tracing::info!( addr = %config.listen_addr, "gateway listening" );

  axum::serve( listener, app.into_make_service_with_connect_info::< SocketAddr >() )
    .await
    .map_err( |e| GatewayError::Internal( format!( "server: {e}" ) ) )
}

//! Shared application state and auth extractors

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::authorization::Bearer;
use headers::{ Authorization, Cookie };
use uuid::Uuid;

use gateway_auth::{ CredentialResolver, JwtSecret, KeyMaterial };
use gateway_batch::BatchEngine;
use gateway_catalog::{ CatalogSnapshot, Router, SnapshotCache };
use gateway_executor::Pipeline;
use gateway_files::FilesService;
use gateway_limits::{ LimitsEngine, LoginRateLimiter };
use gateway_store::{ ApiKeyRecord, Store, TenantRecord, UserRecord };
use gateway_telemetry::Metrics;
use gateway_types::{ GatewayError, RequestContext };

use crate::error::ApiError;

/// Everything the handlers share
#[ derive( Clone ) ]
pub struct AppState
{
  pub store: Store,
  pub resolver: CredentialResolver,
  pub jwt: Arc< JwtSecret >,
  pub snapshots: Arc< SnapshotCache >,
  pub pipeline: Pipeline,
  pub files: FilesService,
  pub batches: Arc< BatchEngine >,
  pub router: Arc< Router >,
  pub limits: LimitsEngine,
  pub metrics: Metrics,
  pub login_limiter: LoginRateLimiter,
  pub key_material: KeyMaterial,
}

impl core::fmt::Debug for AppState
{
  fn fmt( &self, f: &mut core::fmt::Formatter< '_ > ) -> core::fmt::Result
  {
    f.debug_struct( "AppState" ).finish_non_exhaustive()
  }
}

/// Pull the bearer token out of the Authorization header
async fn bearer_token( parts: &mut Parts, state: &AppState ) -> Option< String >
{
  TypedHeader::< Authorization< Bearer > >::from_request_parts( parts, state )
    .await
    .ok()
    .map( |TypedHeader( Authorization( bearer ) )| bearer.token().to_string() )
}

/// Pull the session token from the cookie jar
async fn session_cookie( parts: &mut Parts, state: &AppState ) -> Option< String >
{
  TypedHeader::< Cookie >::from_request_parts( parts, state )
    .await
    .ok()
    .and_then( |TypedHeader( cookies )| cookies.get( "gateway_session" ).map( str::to_string ) )
}

/// Authenticated data-plane credential
///
/// The snapshot pointer is loaded here, once, and rides along for the rest
/// of the request.
#[ derive( Debug, Clone ) ]
pub struct ApiCredential
{
  pub context: RequestContext,
  pub tenant: TenantRecord,
  pub api_key: ApiKeyRecord,
  pub snapshot: Arc< CatalogSnapshot >,
}

#[ axum::async_trait ]
impl FromRequestParts< AppState > for ApiCredential
{
  type Rejection = ApiError;

  async fn from_request_parts( parts: &mut Parts, state: &AppState ) -> Result< Self, Self::Rejection >
  {
    let Some( bearer ) = bearer_token( parts, state ).await else
    {
      return Err( ApiError( GatewayError::Unauthorized ) );
    };

    let snapshot = state.snapshots.load();
    let request_id = format!( "req_{}", Uuid::new_v4().as_simple() );

    let resolved = state.resolver
      .resolve( &bearer, &snapshot.defaults.rate_limit, request_id )
      .await?;

    Ok( Self
    {
      context: resolved.context,
      tenant: resolved.tenant,
      api_key: resolved.api_key,
      snapshot,
    } )
  }
}

/// Authenticated control-plane session (admin and user planes)
#[ derive( Debug, Clone ) ]
pub struct SessionUser
{
  pub user: UserRecord,
}

#[ axum::async_trait ]
impl FromRequestParts< AppState > for SessionUser
{
  type Rejection = ApiError;

  async fn from_request_parts( parts: &mut Parts, state: &AppState ) -> Result< Self, Self::Rejection >
  {
    let token = match bearer_token( parts, state ).await
    {
      Some( token ) => token,
      None => session_cookie( parts, state )
        .await
        .ok_or( ApiError( GatewayError::Unauthorized ) )?,
    };

    let claims = state.jwt.verify( &token )?;
    let user = state.store.get_user( claims.user_id()? ).await
      .map_err( |_| ApiError( GatewayError::Unauthorized ) )?;

    Ok( Self { user } )
  }
}

/// Session restricted to super admins
#[ derive( Debug, Clone ) ]
pub struct SuperAdmin
{
  pub user: UserRecord,
}

#[ axum::async_trait ]
impl FromRequestParts< AppState > for SuperAdmin
{
  type Rejection = ApiError;

  async fn from_request_parts( parts: &mut Parts, state: &AppState ) -> Result< Self, Self::Rejection >
  {
    let session = SessionUser::from_request_parts( parts, state ).await?;

    if !session.user.is_super_admin
    {
      return Err( ApiError( GatewayError::Forbidden( "requires super admin".to_string() ) ) );
    }

    Ok( Self { user: session.user } )
  }
}

//! User plane: `/user/*`
//!
//! Self-service over the caller's own resources: profile, memberships,
//! personal api keys, and read access to the tenants they belong to.

use axum::extract::{ Path, Query, State };
use axum::routing::{ get, post };
use axum::{ Json, Router };
use serde::Deserialize;
use serde_json::{ json, Value };
use uuid::Uuid;

use gateway_auth::ensure_tenant_role;
use gateway_store::api_keys::NewApiKey;
use gateway_store::{ Store, TenantRecord, UserRecord };
use gateway_types::{ ApiKeyKind, GatewayError, MembershipRole };

use crate::error::{ ApiError, ApiResult };
use crate::state::{ AppState, SessionUser };

pub fn router() -> Router< AppState >
{
  Router::new()
    .route( "/user/me", get( me ) )
    .route( "/user/tenants", get( my_tenants ) )
    .route( "/user/keys", get( my_keys ).post( create_personal_key ) )
    .route( "/user/keys/:id/revoke", post( revoke_personal_key ) )
    .route( "/user/usage/daily", get( my_usage_daily ) )
    .route( "/user/files", get( my_files ) )
    .route( "/user/batches", get( my_batches ) )
}

/// The personal tenant owned by this user
async fn personal_tenant( store: &Store, user: &UserRecord ) -> ApiResult< TenantRecord >
{
  let memberships = store.list_memberships_for_user( user.id ).await?;

  for membership in memberships
  {
    if membership.role != MembershipRole::Owner
    {
      continue;
    }
    let tenant = store.get_tenant( membership.tenant_id ).await?;
    if tenant.is_personal
    {
      return Ok( tenant );
    }
  }

  Err( ApiError( GatewayError::NotFound( "personal tenant".to_string() ) ) )
}

async fn me( session: SessionUser ) -> Json< Value >
{
  Json( json!( {
    "id": session.user.id,
    "email": session.user.email,
    "name": session.user.name,
    "is_super_admin": session.user.is_super_admin,
    "last_login_at": session.user.last_login_at,
  } ) )
}

async fn my_tenants(
  State( state ): State< AppState >,
  session: SessionUser,
) -> ApiResult< Json< Value > >
{
  let memberships = state.store.list_memberships_for_user( session.user.id ).await?;

  let mut data = Vec::new();
  for membership in memberships
  {
    let tenant = state.store.get_tenant( membership.tenant_id ).await?;
    data.push( json!( {
      "tenant_id": tenant.id,
      "name": tenant.name,
      "is_personal": tenant.is_personal,
      "role": membership.role.as_str(),
    } ) );
  }

  Ok( Json( json!( { "data": data } ) ) )
}

async fn my_keys(
  State( state ): State< AppState >,
  session: SessionUser,
) -> ApiResult< Json< Value > >
{
  let keys = state.store.list_personal_api_keys( session.user.id ).await?;

  Ok( Json( json!( {
    "data": keys.iter().map( |k| json!( {
      "id": k.id,
      "prefix": k.prefix,
      "name": k.name,
      "created_at": k.created_at,
      "revoked_at": k.revoked_at,
      "last_used_at": k.last_used_at,
    } ) ).collect::< Vec< _ > >(),
  } ) ) )
}

#[ derive( Debug, Deserialize ) ]
struct CreatePersonalKeyRequest
{
  name: String,
}

async fn create_personal_key(
  State( state ): State< AppState >,
  session: SessionUser,
  Json( request ): Json< CreatePersonalKeyRequest >,
) -> ApiResult< Json< Value > >
{
  let tenant = personal_tenant( &state.store, &session.user ).await?;

  let generated = state.key_material.generate()?;
  let record = state.store
    .create_api_key( NewApiKey
    {
      tenant_id: tenant.id,
      kind: ApiKeyKind::Personal,
      owner_user_id: Some( session.user.id ),
      prefix: generated.prefix,
      secret_hash: generated.secret_hash,
      name: request.name,
      scopes: vec![],
      quota: None,
    } )
    .await?;

  let _ = state.store
    .insert_audit_entry(
      Some( session.user.id ),
      "personal_key_created",
      "api_key",
      &record.id.to_string(),
      Value::Null,
    )
    .await;

  Ok( Json( json!( {
    "id": record.id,
    "prefix": record.prefix,
    "name": record.name,
    "token": generated.wire_token,
  } ) ) )
}

async fn revoke_personal_key(
  State( state ): State< AppState >,
  session: SessionUser,
  Path( id ): Path< Uuid >,
) -> ApiResult< Json< Value > >
{
  let key = state.store.get_api_key( id ).await?;
  if key.owner_user_id != Some( session.user.id )
  {
    return Err( ApiError( GatewayError::NotFound( "api key".to_string() ) ) );
  }

  state.store.revoke_api_key( id ).await?;

  let _ = state.store
    .insert_audit_entry(
      Some( session.user.id ),
      "personal_key_revoked",
      "api_key",
      &id.to_string(),
      Value::Null,
    )
    .await;

  Ok( Json( json!( { "ok": true } ) ) )
}

#[ derive( Debug, Deserialize ) ]
struct UsageQuery
{
  from: String,
  to: String,
  /// Defaults to the personal tenant
  #[ serde( default ) ]
  tenant_id: Option< Uuid >,
}

async fn my_usage_daily(
  State( state ): State< AppState >,
  session: SessionUser,
  Query( query ): Query< UsageQuery >,
) -> ApiResult< Json< Value > >
{
  let tenant_id = match query.tenant_id
  {
    Some( id ) =>
    {
      ensure_tenant_role( &state.store, &session.user, id, MembershipRole::Viewer ).await?;
      id
    }
    None => personal_tenant( &state.store, &session.user ).await?.id,
  };

  let rows = state.store.list_daily_usage( tenant_id, &query.from, &query.to ).await?;

  Ok( Json( json!( {
    "data": rows.iter().map( |r| json!( {
      "date": r.date,
      "alias": r.alias,
      "requests": r.requests,
      "tokens": r.tokens,
      "cost_usd": r.cost_usd,
    } ) ).collect::< Vec< _ > >(),
  } ) ) )
}

#[ derive( Debug, Deserialize ) ]
struct ScopedPaging
{
  #[ serde( default = "default_limit" ) ]
  limit: i64,
  #[ serde( default ) ]
  offset: i64,
  #[ serde( default ) ]
  tenant_id: Option< Uuid >,
}

fn default_limit() -> i64
{
  50
}

async fn scoped_tenant(
  state: &AppState,
  session: &SessionUser,
  requested: Option< Uuid >,
) -> ApiResult< Uuid >
{
  match requested
  {
    Some( id ) =>
    {
      ensure_tenant_role( &state.store, &session.user, id, MembershipRole::Viewer ).await?;
      Ok( id )
    }
    None => Ok( personal_tenant( &state.store, &session.user ).await?.id ),
  }
}

async fn my_files(
  State( state ): State< AppState >,
  session: SessionUser,
  Query( paging ): Query< ScopedPaging >,
) -> ApiResult< Json< Value > >
{
  let tenant_id = scoped_tenant( &state, &session, paging.tenant_id ).await?;
  let records = state.files.list( tenant_id, paging.limit.clamp( 1, 200 ), paging.offset.max( 0 ) ).await?;

  Ok( Json( json!( {
    "data": records.iter().map( |f| json!( {
      "id": f.id,
      "filename": f.filename,
      "purpose": f.purpose.as_str(),
      "bytes": f.bytes,
      "status": f.status.as_str(),
    } ) ).collect::< Vec< _ > >(),
  } ) ) )
}

async fn my_batches(
  State( state ): State< AppState >,
  session: SessionUser,
  Query( paging ): Query< ScopedPaging >,
) -> ApiResult< Json< Value > >
{
  let tenant_id = scoped_tenant( &state, &session, paging.tenant_id ).await?;
  let records = state.store
    .list_batches_for_tenant( tenant_id, paging.limit.clamp( 1, 200 ), paging.offset.max( 0 ) )
    .await?;

  Ok( Json( json!( {
    "data": records.iter().map( |b| json!( {
      "id": b.id,
      "status": b.status.as_str(),
      "endpoint": b.endpoint,
      "created_at": b.created_at,
    } ) ).collect::< Vec< _ > >(),
  } ) ) )
}

//! Admin plane: `/admin/*`
//!
//! Session-authenticated management surface. Global singletons (catalog,
//! defaults, settings, users) require a super admin; tenant-scoped
//! resources require an `admin` role in that tenant. Every mutation writes
//! an audit entry, and anything the snapshot serves triggers a push
//! refresh so the data plane observes the change immediately.

use std::net::{ IpAddr, Ipv4Addr, SocketAddr };

use axum::extract::{ ConnectInfo, Path, Query, State };
use axum::routing::{ delete, get, post, put };
use axum::{ Json, Router };
use serde::Deserialize;
use serde_json::{ json, Value };
use uuid::Uuid;

use gateway_auth::{ ensure_tenant_role, password };
use gateway_store::api_keys::NewApiKey;
use gateway_store::catalog::NewCatalogEntry;
use gateway_store::{ BudgetOverrideRecord, GuardrailPolicyRecord, ModerationConfig, UserRecord };
use gateway_types::
{
  ApiKeyKind,
  BatchSettings,
  BudgetDefaults,
  FileSettings,
  GatewayError,
  MembershipRole,
  ModelType,
  ProviderFamily,
  RateLimitDefaults,
  RateLimitSettings,
  RefreshSchedule,
  TenantStatus,
};

use crate::error::{ ApiError, ApiResult };
use crate::state::{ AppState, SessionUser, SuperAdmin };

pub fn router() -> Router< AppState >
{
  Router::new()
    .route( "/admin/auth/login", post( login ) )
    .route( "/admin/tenants", get( list_tenants ).post( create_tenant ) )
    .route( "/admin/tenants/:id", get( get_tenant ).put( update_tenant ).delete( delete_tenant ) )
    .route( "/admin/tenants/:id/members", get( list_members ).post( add_member ) )
    .route( "/admin/tenants/:id/members/:user_id", put( update_member ).delete( remove_member ) )
    .route( "/admin/tenants/:id/keys", get( list_keys ).post( create_key ) )
    .route( "/admin/keys/:id/revoke", post( revoke_key ) )
    .route( "/admin/keys/:id/rate-limit", put( put_key_rate_limit ).delete( delete_key_rate_limit ) )
    .route( "/admin/users", get( list_users ).post( create_user ) )
    .route( "/admin/users/:id", delete( delete_user ) )
    .route( "/admin/catalog", get( list_catalog ).post( create_catalog_entry ) )
    .route( "/admin/catalog/:alias", put( update_catalog_entry ).delete( delete_catalog_entry ) )
    .route( "/admin/catalog/:alias/deployments", post( create_deployment ) )
    .route( "/admin/deployments/:id", delete( delete_deployment ) )
    .route( "/admin/tenants/:id/models", get( list_tenant_models ).post( grant_tenant_model ) )
    .route( "/admin/tenants/:id/models/:alias", delete( revoke_tenant_model ) )
    .route( "/admin/budget/defaults", get( get_budget_defaults ).put( put_budget_defaults ) )
    .route(
      "/admin/tenants/:id/budget",
      get( get_tenant_budget ).put( put_tenant_budget ).delete( delete_tenant_budget ),
    )
    .route( "/admin/rate-limits/defaults", get( get_rate_limit_defaults ).put( put_rate_limit_defaults ) )
    .route(
      "/admin/tenants/:id/rate-limit",
      put( put_tenant_rate_limit ).delete( delete_tenant_rate_limit ),
    )
    .route( "/admin/guardrails/:scope/:id", get( get_guardrail ).put( put_guardrail ).delete( delete_guardrail ) )
    .route( "/admin/settings/files", get( get_file_settings ).put( put_file_settings ) )
    .route( "/admin/settings/batch", get( get_batch_settings ).put( put_batch_settings ) )
    .route( "/admin/settings/default-models", get( get_default_models ).put( put_default_models ) )
    .route( "/admin/audit", get( list_audit ) )
    .route( "/admin/tenants/:id/usage/daily", get( tenant_usage_daily ) )
    .route( "/admin/tenants/:id/usage/events", get( tenant_usage_events ) )
    .route( "/admin/tenants/:id/files", get( tenant_files ) )
    .route( "/admin/tenants/:id/batches", get( tenant_batches ) )
}

async fn audit( state: &AppState, user: &UserRecord, action: &str, resource_type: &str, resource_id: &str )
{
  let result = state.store
    .insert_audit_entry( Some( user.id ), action, resource_type, resource_id, Value::Null )
    .await;

  if let Err( err ) = result
  {
    tracing::warn!( action, error = %err, "audit entry not written" );
  }
}

async fn refresh_snapshot( state: &AppState )
{
  if let Err( err ) = state.snapshots.refresh().await
  {
    tracing::warn!( error = %err, "snapshot refresh failed; TTL fallback will catch up" );
  }
}

// ---------------------------------------------------------------------------
// Sign-in
// ---------------------------------------------------------------------------

#[ derive( Debug, Deserialize ) ]
struct LoginRequest
{
  email: String,
  password: String,
}

async fn login(
  State( state ): State< AppState >,
  connect_info: Option< ConnectInfo< SocketAddr > >,
  Json( request ): Json< LoginRequest >,
) -> ApiResult< Json< Value > >
{
  let peer_ip = connect_info
    .map( |info| info.0.ip() )
    .unwrap_or( IpAddr::V4( Ipv4Addr::LOCALHOST ) );

  if let Err( retry_after ) = state.login_limiter.check_and_record( peer_ip )
  {
    return Err( ApiError( GatewayError::RateLimited
    {
      scope: "key",
      axis: "rpm",
      retry_after_secs: retry_after,
    } ) );
  }

  let user = state.store.get_user_by_email( &request.email ).await?;

  let Some( user ) = user else
  {
    let _ = state.store
      .insert_audit_entry( None, "login_failed", "user", &request.email, Value::Null )
      .await;
    return Err( ApiError( GatewayError::Unauthorized ) );
  };

  let verified = user
    .password_hash
    .as_deref()
    .is_some_and( |hash| password::verify_password( &request.password, hash ) );

  if !verified
  {
    let _ = state.store
      .insert_audit_entry( None, "login_failed", "user", &user.id.to_string(), Value::Null )
      .await;
    return Err( ApiError( GatewayError::Unauthorized ) );
  }

  state.store.touch_last_login( user.id ).await?;
  audit( &state, &user, "login", "user", &user.id.to_string() ).await;

  let token = state.jwt.issue( user.id, &user.email, user.is_super_admin )?;

  Ok( Json( json!( {
    "token": token,
    "user": {
      "id": user.id,
      "email": user.email,
      "name": user.name,
      "is_super_admin": user.is_super_admin,
    },
  } ) ) )
}

// ---------------------------------------------------------------------------
// Tenants and memberships
// ---------------------------------------------------------------------------

#[ derive( Debug, Deserialize ) ]
struct Paging
{
  #[ serde( default = "default_limit" ) ]
  limit: i64,
  #[ serde( default ) ]
  offset: i64,
}

fn default_limit() -> i64
{
  50
}

fn tenant_json( tenant: &gateway_store::TenantRecord ) -> Value
{
  json!( {
    "id": tenant.id,
    "name": tenant.name,
    "status": tenant.status.as_str(),
    "is_personal": tenant.is_personal,
    "version": tenant.version,
    "created_at": tenant.created_at,
    "updated_at": tenant.updated_at,
  } )
}

async fn list_tenants(
  State( state ): State< AppState >,
  _admin: SuperAdmin,
  Query( paging ): Query< Paging >,
) -> ApiResult< Json< Value > >
{
  let tenants = state.store.list_tenants( paging.limit.clamp( 1, 200 ), paging.offset.max( 0 ) ).await?;
  Ok( Json( json!( { "data": tenants.iter().map( tenant_json ).collect::< Vec< _ > >() } ) ) )
}

#[ derive( Debug, Deserialize ) ]
struct CreateTenantRequest
{
  name: String,
  /// First owner of the tenant
  owner_user_id: Uuid,
}

async fn create_tenant(
  State( state ): State< AppState >,
  admin: SuperAdmin,
  Json( request ): Json< CreateTenantRequest >,
) -> ApiResult< Json< Value > >
{
  let tenant = state.store.create_tenant( &request.name, false ).await?;
  state.store.add_membership( tenant.id, request.owner_user_id, MembershipRole::Owner ).await?;

  audit( &state, &admin.user, "tenant_created", "tenant", &tenant.id.to_string() ).await;

  Ok( Json( tenant_json( &tenant ) ) )
}

async fn get_tenant(
  State( state ): State< AppState >,
  session: SessionUser,
  Path( id ): Path< Uuid >,
) -> ApiResult< Json< Value > >
{
  ensure_tenant_role( &state.store, &session.user, id, MembershipRole::Viewer ).await?;
  let tenant = state.store.get_tenant( id ).await?;
  Ok( Json( tenant_json( &tenant ) ) )
}

#[ derive( Debug, Deserialize ) ]
struct UpdateTenantRequest
{
  #[ serde( default ) ]
  name: Option< String >,
  #[ serde( default ) ]
  status: Option< TenantStatus >,
  version: i64,
}

async fn update_tenant(
  State( state ): State< AppState >,
  session: SessionUser,
  Path( id ): Path< Uuid >,
  Json( request ): Json< UpdateTenantRequest >,
) -> ApiResult< Json< Value > >
{
  // Suspension is a platform decision, not a tenant-admin one
  if request.status.is_some() && !session.user.is_super_admin
  {
    return Err( ApiError( GatewayError::Forbidden( "status changes require super admin".to_string() ) ) );
  }
  ensure_tenant_role( &state.store, &session.user, id, MembershipRole::Admin ).await?;

  let tenant = state.store
    .update_tenant( id, request.name.as_deref(), request.status, request.version )
    .await?;

  audit( &state, &session.user, "tenant_updated", "tenant", &id.to_string() ).await;

  Ok( Json( tenant_json( &tenant ) ) )
}

async fn delete_tenant(
  State( state ): State< AppState >,
  admin: SuperAdmin,
  Path( id ): Path< Uuid >,
) -> ApiResult< Json< Value > >
{
  state.store.delete_tenant( id ).await?;
  audit( &state, &admin.user, "tenant_deleted", "tenant", &id.to_string() ).await;
  refresh_snapshot( &state ).await;

  Ok( Json( json!( { "deleted": true } ) ) )
}

async fn list_members(
  State( state ): State< AppState >,
  session: SessionUser,
  Path( id ): Path< Uuid >,
) -> ApiResult< Json< Value > >
{
  ensure_tenant_role( &state.store, &session.user, id, MembershipRole::Viewer ).await?;
  let members = state.store.list_memberships( id ).await?;

  Ok( Json( json!( {
    "data": members.iter().map( |m| json!( {
      "tenant_id": m.tenant_id,
      "user_id": m.user_id,
      "role": m.role.as_str(),
    } ) ).collect::< Vec< _ > >(),
  } ) ) )
}

#[ derive( Debug, Deserialize ) ]
struct MemberRequest
{
  user_id: Uuid,
  role: MembershipRole,
}

async fn add_member(
  State( state ): State< AppState >,
  session: SessionUser,
  Path( id ): Path< Uuid >,
  Json( request ): Json< MemberRequest >,
) -> ApiResult< Json< Value > >
{
  ensure_tenant_role( &state.store, &session.user, id, MembershipRole::Admin ).await?;
  state.store.add_membership( id, request.user_id, request.role ).await?;
  audit( &state, &session.user, "member_added", "membership", &format!( "{id}/{}", request.user_id ) ).await;

  Ok( Json( json!( { "ok": true } ) ) )
}

#[ derive( Debug, Deserialize ) ]
struct UpdateMemberRequest
{
  role: MembershipRole,
}

async fn update_member(
  State( state ): State< AppState >,
  session: SessionUser,
  Path( ( id, user_id ) ): Path< ( Uuid, Uuid ) >,
  Json( request ): Json< UpdateMemberRequest >,
) -> ApiResult< Json< Value > >
{
  ensure_tenant_role( &state.store, &session.user, id, MembershipRole::Admin ).await?;
  state.store.update_membership_role( id, user_id, request.role ).await?;
  audit( &state, &session.user, "member_updated", "membership", &format!( "{id}/{user_id}" ) ).await;

  Ok( Json( json!( { "ok": true } ) ) )
}

async fn remove_member(
  State( state ): State< AppState >,
  session: SessionUser,
  Path( ( id, user_id ) ): Path< ( Uuid, Uuid ) >,
) -> ApiResult< Json< Value > >
{
  ensure_tenant_role( &state.store, &session.user, id, MembershipRole::Admin ).await?;
  state.store.remove_membership( id, user_id ).await?;
  audit( &state, &session.user, "member_removed", "membership", &format!( "{id}/{user_id}" ) ).await;

  Ok( Json( json!( { "ok": true } ) ) )
}

// ---------------------------------------------------------------------------
// API keys
// ---------------------------------------------------------------------------

fn key_json( key: &gateway_store::ApiKeyRecord ) -> Value
{
  json!( {
    "id": key.id,
    "tenant_id": key.tenant_id,
    "kind": key.kind.as_str(),
    "prefix": key.prefix,
    "name": key.name,
    "scopes": key.scopes,
    "created_at": key.created_at,
    "revoked_at": key.revoked_at,
    "last_used_at": key.last_used_at,
  } )
}

async fn list_keys(
  State( state ): State< AppState >,
  session: SessionUser,
  Path( id ): Path< Uuid >,
) -> ApiResult< Json< Value > >
{
  ensure_tenant_role( &state.store, &session.user, id, MembershipRole::Viewer ).await?;
  let keys = state.store.list_api_keys_for_tenant( id ).await?;
  Ok( Json( json!( { "data": keys.iter().map( key_json ).collect::< Vec< _ > >() } ) ) )
}

#[ derive( Debug, Deserialize ) ]
struct CreateKeyRequest
{
  name: String,
  #[ serde( default ) ]
  scopes: Vec< String >,
}

async fn create_key(
  State( state ): State< AppState >,
  session: SessionUser,
  Path( id ): Path< Uuid >,
  Json( request ): Json< CreateKeyRequest >,
) -> ApiResult< Json< Value > >
{
  ensure_tenant_role( &state.store, &session.user, id, MembershipRole::Admin ).await?;

  let generated = state.key_material.generate()?;
  let record = state.store
    .create_api_key( NewApiKey
    {
      tenant_id: id,
      kind: ApiKeyKind::Tenant,
      owner_user_id: None,
      prefix: generated.prefix,
      secret_hash: generated.secret_hash,
      name: request.name,
      scopes: request.scopes,
      quota: None,
    } )
    .await?;

  audit( &state, &session.user, "api_key_created", "api_key", &record.id.to_string() ).await;

  // The wire token is shown exactly once
  let mut body = key_json( &record );
  body[ "token" ] = json!( generated.wire_token );
  Ok( Json( body ) )
}

async fn revoke_key(
  State( state ): State< AppState >,
  session: SessionUser,
  Path( id ): Path< Uuid >,
) -> ApiResult< Json< Value > >
{
  let key = state.store.get_api_key( id ).await?;
  ensure_tenant_role( &state.store, &session.user, key.tenant_id, MembershipRole::Admin ).await?;

  state.store.revoke_api_key( id ).await?;
  audit( &state, &session.user, "api_key_revoked", "api_key", &id.to_string() ).await;

  Ok( Json( json!( { "ok": true } ) ) )
}

async fn put_key_rate_limit(
  State( state ): State< AppState >,
  session: SessionUser,
  Path( id ): Path< Uuid >,
  Json( settings ): Json< RateLimitSettings >,
) -> ApiResult< Json< Value > >
{
  let key = state.store.get_api_key( id ).await?;
  ensure_tenant_role( &state.store, &session.user, key.tenant_id, MembershipRole::Admin ).await?;

  state.store.upsert_api_key_rate_limit( id, settings ).await?;
  audit( &state, &session.user, "key_rate_limit_set", "api_key", &id.to_string() ).await;

  Ok( Json( json!( { "ok": true } ) ) )
}

async fn delete_key_rate_limit(
  State( state ): State< AppState >,
  session: SessionUser,
  Path( id ): Path< Uuid >,
) -> ApiResult< Json< Value > >
{
  let key = state.store.get_api_key( id ).await?;
  ensure_tenant_role( &state.store, &session.user, key.tenant_id, MembershipRole::Admin ).await?;

  state.store.delete_api_key_rate_limit( id ).await?;
  audit( &state, &session.user, "key_rate_limit_cleared", "api_key", &id.to_string() ).await;

  Ok( Json( json!( { "ok": true } ) ) )
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

async fn list_users(
  State( state ): State< AppState >,
  _admin: SuperAdmin,
  Query( paging ): Query< Paging >,
) -> ApiResult< Json< Value > >
{
  let users = state.store.list_users( paging.limit.clamp( 1, 200 ), paging.offset.max( 0 ) ).await?;

  Ok( Json( json!( {
    "data": users.iter().map( |u| json!( {
      "id": u.id,
      "email": u.email,
      "name": u.name,
      "is_super_admin": u.is_super_admin,
      "last_login_at": u.last_login_at,
    } ) ).collect::< Vec< _ > >(),
  } ) ) )
}

#[ derive( Debug, Deserialize ) ]
struct CreateUserRequest
{
  email: String,
  name: String,
  #[ serde( default ) ]
  password: Option< String >,
  #[ serde( default ) ]
  is_super_admin: bool,
}

async fn create_user(
  State( state ): State< AppState >,
  admin: SuperAdmin,
  Json( request ): Json< CreateUserRequest >,
) -> ApiResult< Json< Value > >
{
  let password_hash = match &request.password
  {
    Some( plain ) => Some( password::hash_password( plain )? ),
    None => None,
  };

  let user = state.store
    .create_user( &request.email, &request.name, password_hash.as_deref(), request.is_super_admin )
    .await?;

  // Personal tenant, owned by exactly this user
  let personal = state.store
    .create_tenant( &format!( "personal-{}", user.email ), true )
    .await?;
  state.store.add_membership( personal.id, user.id, MembershipRole::Owner ).await?;

  audit( &state, &admin.user, "user_created", "user", &user.id.to_string() ).await;

  Ok( Json( json!( {
    "id": user.id,
    "email": user.email,
    "personal_tenant_id": personal.id,
  } ) ) )
}

async fn delete_user(
  State( state ): State< AppState >,
  admin: SuperAdmin,
  Path( id ): Path< Uuid >,
) -> ApiResult< Json< Value > >
{
  state.store.delete_user( id ).await?;
  audit( &state, &admin.user, "user_deleted", "user", &id.to_string() ).await;

  Ok( Json( json!( { "deleted": true } ) ) )
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[ derive( Debug, Deserialize ) ]
struct CatalogEntryRequest
{
  alias: String,
  provider: ProviderFamily,
  provider_model: String,
  deployment: String,
  #[ serde( default = "default_enabled" ) ]
  enabled: bool,
  #[ serde( default ) ]
  price_input_per_mtoken_usd: f64,
  #[ serde( default ) ]
  price_output_per_mtoken_usd: f64,
  model_type: ModelType,
  credentials_ref: String,
  #[ serde( default ) ]
  version: Option< i64 >,
}

fn default_enabled() -> bool
{
  true
}

async fn list_catalog(
  State( state ): State< AppState >,
  _session: SessionUser,
) -> ApiResult< Json< Value > >
{
  let snapshot = state.snapshots.load();

  let mut data = Vec::new();
  for model in snapshot.models.values()
  {
    let health = state.router.health( model );
    data.push( json!( {
      "alias": model.alias,
      "provider": model.provider.as_str(),
      "provider_model": model.provider_model,
      "model_type": model.model_type.as_str(),
      "enabled": model.enabled,
      "price_input_per_mtoken_usd": model.price_input_per_mtoken_usd,
      "price_output_per_mtoken_usd": model.price_output_per_mtoken_usd,
      "status": health.status( model.enabled ).as_str(),
      "total_routes": health.total_routes,
      "healthy_routes": health.healthy_routes,
    } ) );
  }
  data.sort_by( |a, b| a[ "alias" ].as_str().cmp( &b[ "alias" ].as_str() ) );

  Ok( Json( json!( { "data": data } ) ) )
}

async fn create_catalog_entry(
  State( state ): State< AppState >,
  admin: SuperAdmin,
  Json( request ): Json< CatalogEntryRequest >,
) -> ApiResult< Json< Value > >
{
  let entry = state.store
    .create_catalog_entry( NewCatalogEntry
    {
      alias: request.alias,
      provider: request.provider,
      provider_model: request.provider_model,
      deployment: request.deployment,
      enabled: request.enabled,
      price_input_per_mtoken_usd: request.price_input_per_mtoken_usd,
      price_output_per_mtoken_usd: request.price_output_per_mtoken_usd,
      model_type: request.model_type,
      credentials_ref: request.credentials_ref,
    } )
    .await?;

  audit( &state, &admin.user, "catalog_entry_created", "model", &entry.alias ).await;
  refresh_snapshot( &state ).await;

  Ok( Json( json!( { "alias": entry.alias, "version": entry.version } ) ) )
}

async fn update_catalog_entry(
  State( state ): State< AppState >,
  admin: SuperAdmin,
  Path( alias ): Path< String >,
  Json( request ): Json< CatalogEntryRequest >,
) -> ApiResult< Json< Value > >
{
  let expected_version = request.version
    .ok_or_else( || ApiError( GatewayError::BadRequest( "version is required on update".to_string() ) ) )?;

  let entry = state.store
    .update_catalog_entry(
      &alias,
      NewCatalogEntry
      {
        alias: alias.clone(),
        provider: request.provider,
        provider_model: request.provider_model,
        deployment: request.deployment,
        enabled: request.enabled,
        price_input_per_mtoken_usd: request.price_input_per_mtoken_usd,
        price_output_per_mtoken_usd: request.price_output_per_mtoken_usd,
        model_type: request.model_type,
        credentials_ref: request.credentials_ref,
      },
      expected_version,
    )
    .await?;

  audit( &state, &admin.user, "catalog_entry_updated", "model", &entry.alias ).await;
  refresh_snapshot( &state ).await;

  Ok( Json( json!( { "alias": entry.alias, "version": entry.version } ) ) )
}

async fn delete_catalog_entry(
  State( state ): State< AppState >,
  admin: SuperAdmin,
  Path( alias ): Path< String >,
) -> ApiResult< Json< Value > >
{
  state.store.delete_catalog_entry( &alias ).await?;
  audit( &state, &admin.user, "catalog_entry_deleted", "model", &alias ).await;
  refresh_snapshot( &state ).await;

  Ok( Json( json!( { "deleted": true } ) ) )
}

#[ derive( Debug, Deserialize ) ]
struct CreateDeploymentRequest
{
  endpoint: String,
  #[ serde( default ) ]
  region: Option< String >,
  credentials_ref: String,
  #[ serde( default = "default_enabled" ) ]
  enabled: bool,
}

async fn create_deployment(
  State( state ): State< AppState >,
  admin: SuperAdmin,
  Path( alias ): Path< String >,
  Json( request ): Json< CreateDeploymentRequest >,
) -> ApiResult< Json< Value > >
{
  let deployment = state.store
    .create_deployment(
      &alias,
      &request.endpoint,
      request.region.as_deref(),
      &request.credentials_ref,
      request.enabled,
    )
    .await?;

  audit( &state, &admin.user, "deployment_created", "deployment", &deployment.id.to_string() ).await;
  refresh_snapshot( &state ).await;

  Ok( Json( json!( { "id": deployment.id, "alias": deployment.alias } ) ) )
}

async fn delete_deployment(
  State( state ): State< AppState >,
  admin: SuperAdmin,
  Path( id ): Path< Uuid >,
) -> ApiResult< Json< Value > >
{
  state.store.delete_deployment( id ).await?;
  audit( &state, &admin.user, "deployment_deleted", "deployment", &id.to_string() ).await;
  refresh_snapshot( &state ).await;

  Ok( Json( json!( { "deleted": true } ) ) )
}

async fn list_tenant_models(
  State( state ): State< AppState >,
  session: SessionUser,
  Path( id ): Path< Uuid >,
) -> ApiResult< Json< Value > >
{
  ensure_tenant_role( &state.store, &session.user, id, MembershipRole::Viewer ).await?;
  let aliases = state.store.list_tenant_models( id ).await?;
  Ok( Json( json!( { "data": aliases } ) ) )
}

#[ derive( Debug, Deserialize ) ]
struct GrantModelRequest
{
  alias: String,
}

async fn grant_tenant_model(
  State( state ): State< AppState >,
  admin: SuperAdmin,
  Path( id ): Path< Uuid >,
  Json( request ): Json< GrantModelRequest >,
) -> ApiResult< Json< Value > >
{
  state.store.add_tenant_model( id, &request.alias ).await?;
  audit( &state, &admin.user, "tenant_model_granted", "tenant", &format!( "{id}/{}", request.alias ) ).await;
  refresh_snapshot( &state ).await;

  Ok( Json( json!( { "ok": true } ) ) )
}

async fn revoke_tenant_model(
  State( state ): State< AppState >,
  admin: SuperAdmin,
  Path( ( id, alias ) ): Path< ( Uuid, String ) >,
) -> ApiResult< Json< Value > >
{
  state.store.remove_tenant_model( id, &alias ).await?;
  audit( &state, &admin.user, "tenant_model_revoked", "tenant", &format!( "{id}/{alias}" ) ).await;
  refresh_snapshot( &state ).await;

  Ok( Json( json!( { "ok": true } ) ) )
}

// ---------------------------------------------------------------------------
// Budget and rate-limit configuration
// ---------------------------------------------------------------------------

async fn get_budget_defaults(
  State( state ): State< AppState >,
  _session: SessionUser,
) -> ApiResult< Json< BudgetDefaults > >
{
  Ok( Json( state.store.budget_defaults().await? ) )
}

async fn put_budget_defaults(
  State( state ): State< AppState >,
  admin: SuperAdmin,
  Json( defaults ): Json< BudgetDefaults >,
) -> ApiResult< Json< Value > >
{
  if defaults.warning_threshold_perc <= 0.0 || defaults.warning_threshold_perc > 1.0
  {
    return Err( ApiError( GatewayError::BadRequest(
      "warning_threshold_perc must be in (0, 1]".to_string()
    ) ) );
  }
  if defaults.alert.cooldown_seconds < 60
  {
    return Err( ApiError( GatewayError::BadRequest(
      "alert cooldown must be at least 60 seconds".to_string()
    ) ) );
  }

  state.store.set_budget_defaults( &defaults, Some( admin.user.id ) ).await?;
  audit( &state, &admin.user, "budget_defaults_updated", "budget_defaults", "singleton" ).await;
  refresh_snapshot( &state ).await;

  Ok( Json( json!( { "ok": true } ) ) )
}

#[ derive( Debug, Deserialize ) ]
struct TenantBudgetRequest
{
  budget_usd: f64,
  #[ serde( default ) ]
  warning_threshold: Option< f64 >,
  #[ serde( default ) ]
  refresh_schedule: Option< RefreshSchedule >,
  #[ serde( default ) ]
  alert_emails: Vec< String >,
  #[ serde( default ) ]
  alert_webhooks: Vec< String >,
  #[ serde( default ) ]
  alert_cooldown_seconds: Option< i64 >,
}

async fn get_tenant_budget(
  State( state ): State< AppState >,
  session: SessionUser,
  Path( id ): Path< Uuid >,
) -> ApiResult< Json< Value > >
{
  ensure_tenant_role( &state.store, &session.user, id, MembershipRole::Viewer ).await?;

  let overrides = state.store.get_budget_override( id ).await?;
  let counter = state.store.get_budget_counter( id ).await?;

  Ok( Json( json!( {
    "override": overrides.map( |o| json!( {
      "budget_usd": o.budget_usd,
      "warning_threshold": o.warning_threshold,
      "refresh_schedule": o.refresh_schedule.map( RefreshSchedule::as_str ),
      "alert_emails": o.alert_emails,
      "alert_webhooks": o.alert_webhooks,
      "alert_cooldown_seconds": o.alert_cooldown_seconds,
    } ) ),
    "counter": counter.map( |c| json!( {
      "window_start": c.window_start,
      "window_end": c.window_end,
      "used_usd": c.used_usd,
    } ) ),
  } ) ) )
}

async fn put_tenant_budget(
  State( state ): State< AppState >,
  admin: SuperAdmin,
  Path( id ): Path< Uuid >,
  Json( request ): Json< TenantBudgetRequest >,
) -> ApiResult< Json< Value > >
{
  state.store
    .upsert_budget_override( &BudgetOverrideRecord
    {
      tenant_id: id,
      budget_usd: request.budget_usd,
      warning_threshold: request.warning_threshold,
      refresh_schedule: request.refresh_schedule,
      alert_emails: request.alert_emails,
      alert_webhooks: request.alert_webhooks,
      alert_cooldown_seconds: request.alert_cooldown_seconds,
      version: 0,
      created_at: 0,
      updated_at: 0,
    } )
    .await?;

  audit( &state, &admin.user, "tenant_budget_set", "tenant", &id.to_string() ).await;
  refresh_snapshot( &state ).await;

  Ok( Json( json!( { "ok": true } ) ) )
}

async fn delete_tenant_budget(
  State( state ): State< AppState >,
  admin: SuperAdmin,
  Path( id ): Path< Uuid >,
) -> ApiResult< Json< Value > >
{
  state.store.delete_budget_override( id ).await?;
  audit( &state, &admin.user, "tenant_budget_cleared", "tenant", &id.to_string() ).await;
  refresh_snapshot( &state ).await;

  Ok( Json( json!( { "ok": true } ) ) )
}

async fn get_rate_limit_defaults(
  State( state ): State< AppState >,
  _session: SessionUser,
) -> ApiResult< Json< RateLimitDefaults > >
{
  Ok( Json( state.store.rate_limit_defaults().await? ) )
}

async fn put_rate_limit_defaults(
  State( state ): State< AppState >,
  admin: SuperAdmin,
  Json( defaults ): Json< RateLimitDefaults >,
) -> ApiResult< Json< Value > >
{
  state.store.set_rate_limit_defaults( &defaults ).await?;
  audit( &state, &admin.user, "rate_limit_defaults_updated", "rate_limit_defaults", "singleton" ).await;
  refresh_snapshot( &state ).await;

  Ok( Json( json!( { "ok": true } ) ) )
}

async fn put_tenant_rate_limit(
  State( state ): State< AppState >,
  admin: SuperAdmin,
  Path( id ): Path< Uuid >,
  Json( settings ): Json< RateLimitSettings >,
) -> ApiResult< Json< Value > >
{
  state.store.upsert_tenant_rate_limit( id, settings ).await?;
  audit( &state, &admin.user, "tenant_rate_limit_set", "tenant", &id.to_string() ).await;
  refresh_snapshot( &state ).await;

  Ok( Json( json!( { "ok": true } ) ) )
}

async fn delete_tenant_rate_limit(
  State( state ): State< AppState >,
  admin: SuperAdmin,
  Path( id ): Path< Uuid >,
) -> ApiResult< Json< Value > >
{
  state.store.delete_tenant_rate_limit( id ).await?;
  audit( &state, &admin.user, "tenant_rate_limit_cleared", "tenant", &id.to_string() ).await;
  refresh_snapshot( &state ).await;

  Ok( Json( json!( { "ok": true } ) ) )
}

// ---------------------------------------------------------------------------
// Guardrails
// ---------------------------------------------------------------------------

#[ derive( Debug, Deserialize ) ]
struct GuardrailRequest
{
  #[ serde( default = "default_enabled" ) ]
  enabled: bool,
  #[ serde( default ) ]
  prompt_blocked_keywords: Vec< String >,
  #[ serde( default ) ]
  response_blocked_keywords: Vec< String >,
  #[ serde( default ) ]
  moderation: Option< ModerationConfig >,
}

async fn get_guardrail(
  State( state ): State< AppState >,
  _session: SessionUser,
  Path( ( scope, id ) ): Path< ( String, Uuid ) >,
) -> ApiResult< Json< Value > >
{
  let policy = state.store.get_guardrail_policy( &scope, id ).await?;

  Ok( Json( json!( {
    "policy": policy.map( |p| json!( {
      "scope": p.scope,
      "scope_id": p.scope_id,
      "enabled": p.enabled,
      "prompt_blocked_keywords": p.prompt_blocked_keywords,
      "response_blocked_keywords": p.response_blocked_keywords,
      "moderation": p.moderation,
      "version": p.version,
    } ) ),
  } ) ) )
}

async fn put_guardrail(
  State( state ): State< AppState >,
  admin: SuperAdmin,
  Path( ( scope, id ) ): Path< ( String, Uuid ) >,
  Json( request ): Json< GuardrailRequest >,
) -> ApiResult< Json< Value > >
{
  state.store
    .upsert_guardrail_policy( &GuardrailPolicyRecord
    {
      scope: scope.clone(),
      scope_id: id,
      enabled: request.enabled,
      prompt_blocked_keywords: request.prompt_blocked_keywords,
      response_blocked_keywords: request.response_blocked_keywords,
      moderation: request.moderation,
      version: 0,
      created_at: 0,
      updated_at: 0,
    } )
    .await?;

  audit( &state, &admin.user, "guardrail_policy_set", "guardrail", &format!( "{scope}/{id}" ) ).await;

  Ok( Json( json!( { "ok": true } ) ) )
}

async fn delete_guardrail(
  State( state ): State< AppState >,
  admin: SuperAdmin,
  Path( ( scope, id ) ): Path< ( String, Uuid ) >,
) -> ApiResult< Json< Value > >
{
  state.store.delete_guardrail_policy( &scope, id ).await?;
  audit( &state, &admin.user, "guardrail_policy_deleted", "guardrail", &format!( "{scope}/{id}" ) ).await;

  Ok( Json( json!( { "ok": true } ) ) )
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

async fn get_file_settings(
  State( state ): State< AppState >,
  _session: SessionUser,
) -> ApiResult< Json< FileSettings > >
{
  Ok( Json( state.store.file_settings().await? ) )
}

async fn put_file_settings(
  State( state ): State< AppState >,
  admin: SuperAdmin,
  Json( settings ): Json< FileSettings >,
) -> ApiResult< Json< Value > >
{
  state.store.set_file_settings( &settings ).await?;
  audit( &state, &admin.user, "file_settings_updated", "settings", "files" ).await;
  refresh_snapshot( &state ).await;

  Ok( Json( json!( { "ok": true } ) ) )
}

async fn get_batch_settings(
  State( state ): State< AppState >,
  _session: SessionUser,
) -> ApiResult< Json< BatchSettings > >
{
  Ok( Json( state.store.batch_settings().await? ) )
}

async fn put_batch_settings(
  State( state ): State< AppState >,
  admin: SuperAdmin,
  Json( settings ): Json< BatchSettings >,
) -> ApiResult< Json< Value > >
{
  state.store.set_batch_settings( &settings ).await?;
  audit( &state, &admin.user, "batch_settings_updated", "settings", "batch" ).await;
  refresh_snapshot( &state ).await;

  Ok( Json( json!( { "ok": true } ) ) )
}

async fn get_default_models(
  State( state ): State< AppState >,
  _session: SessionUser,
) -> ApiResult< Json< Vec< String > > >
{
  Ok( Json( state.store.default_models().await? ) )
}

async fn put_default_models(
  State( state ): State< AppState >,
  admin: SuperAdmin,
  Json( aliases ): Json< Vec< String > >,
) -> ApiResult< Json< Value > >
{
  state.store.set_default_models( &aliases ).await?;
  audit( &state, &admin.user, "default_models_updated", "settings", "default_models" ).await;
  refresh_snapshot( &state ).await;

  Ok( Json( json!( { "ok": true } ) ) )
}

// ---------------------------------------------------------------------------
// Audit, usage, files and batches
// ---------------------------------------------------------------------------

async fn list_audit(
  State( state ): State< AppState >,
  _admin: SuperAdmin,
  Query( paging ): Query< Paging >,
) -> ApiResult< Json< Value > >
{
  let entries = state.store
    .list_audit_entries( paging.limit.clamp( 1, 500 ), paging.offset.max( 0 ) )
    .await?;

  Ok( Json( json!( {
    "data": entries.iter().map( |e| json!( {
      "id": e.id,
      "user_id": e.user_id,
      "action": e.action,
      "resource_type": e.resource_type,
      "resource_id": e.resource_id,
      "metadata": e.metadata,
      "created_at": e.created_at,
    } ) ).collect::< Vec< _ > >(),
  } ) ) )
}

#[ derive( Debug, Deserialize ) ]
struct DateRange
{
  from: String,
  to: String,
}

async fn tenant_usage_daily(
  State( state ): State< AppState >,
  session: SessionUser,
  Path( id ): Path< Uuid >,
  Query( range ): Query< DateRange >,
) -> ApiResult< Json< Value > >
{
  ensure_tenant_role( &state.store, &session.user, id, MembershipRole::Viewer ).await?;

  let rows = state.store.list_daily_usage( id, &range.from, &range.to ).await?;

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

async fn tenant_usage_events(
  State( state ): State< AppState >,
  session: SessionUser,
  Path( id ): Path< Uuid >,
  Query( paging ): Query< Paging >,
) -> ApiResult< Json< Value > >
{
  ensure_tenant_role( &state.store, &session.user, id, MembershipRole::Viewer ).await?;

  let events = state.store
    .list_usage_events( id, paging.limit.clamp( 1, 500 ), paging.offset.max( 0 ) )
    .await?;

  Ok( Json( json!( {
    "data": events.iter().map( |e| json!( {
      "id": e.id,
      "alias": e.alias,
      "provider": e.provider,
      "request_id": e.request_id,
      "ts": e.ts,
      "latency_ms": e.latency_ms,
      "status": e.status,
      "total_tokens": e.total_tokens,
      "cost_usd": e.cost_usd,
    } ) ).collect::< Vec< _ > >(),
  } ) ) )
}

async fn tenant_files(
  State( state ): State< AppState >,
  session: SessionUser,
  Path( id ): Path< Uuid >,
  Query( paging ): Query< Paging >,
) -> ApiResult< Json< Value > >
{
  ensure_tenant_role( &state.store, &session.user, id, MembershipRole::Viewer ).await?;
  let records = state.files.list( id, paging.limit.clamp( 1, 200 ), paging.offset.max( 0 ) ).await?;

  Ok( Json( json!( {
    "data": records.iter().map( |f| json!( {
      "id": f.id,
      "filename": f.filename,
      "purpose": f.purpose.as_str(),
      "bytes": f.bytes,
      "status": f.status.as_str(),
      "expires_at": f.expires_at,
    } ) ).collect::< Vec< _ > >(),
  } ) ) )
}

async fn tenant_batches(
  State( state ): State< AppState >,
  session: SessionUser,
  Path( id ): Path< Uuid >,
  Query( paging ): Query< Paging >,
) -> ApiResult< Json< Value > >
{
  ensure_tenant_role( &state.store, &session.user, id, MembershipRole::Viewer ).await?;
  let records = state.store
    .list_batches_for_tenant( id, paging.limit.clamp( 1, 200 ), paging.offset.max( 0 ) )
    .await?;

  Ok( Json( json!( {
    "data": records.iter().map( |b| json!( {
      "id": b.id,
      "status": b.status.as_str(),
      "endpoint": b.endpoint,
      "request_counts": {
        "total": b.request_counts.total,
        "completed": b.request_counts.completed,
        "failed": b.request_counts.failed,
        "cancelled": b.request_counts.cancelled,
      },
      "created_at": b.created_at,
    } ) ).collect::< Vec< _ > >(),
  } ) ) )
}

//! Bearer-credential resolver for the data plane
//!
//! Turns the inbound bearer string into a [`RequestContext`]: active key by
//! prefix, Argon2id secret verification, tenant status check, effective
//! limit resolution. The only externally observable failure below the
//! tenant check is `unauthorized`, with the same verification cost on every
//! path.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use gateway_limits::resolve_effective;
use gateway_store::{ now_ms, ApiKeyRecord, Store, TenantRecord };
use gateway_types::{ ApiKeyKind, GatewayError, RateLimitDefaults, RequestContext, Result, TenantStatus };

use crate::keys::{ split_wire_token, KeyMaterial };

/// Minimum interval between `last_used_at` writes per key, milliseconds
const LAST_USED_COALESCE_MS: i64 = 60_000;

/// A successfully resolved credential
#[ derive( Debug, Clone ) ]
pub struct ResolvedCredential
{
  pub context: RequestContext,
  pub tenant: TenantRecord,
  pub api_key: ApiKeyRecord,
}

/// The resolver service
#[ derive( Debug, Clone ) ]
pub struct CredentialResolver
{
  store: Store,
  material: KeyMaterial,
  last_used_stamps: Arc< DashMap< Uuid, i64 > >,
}

impl CredentialResolver
{
  #[ must_use ]
  pub fn new( store: Store ) -> Self
  {
    Self
    {
      store,
      material: KeyMaterial::new(),
      last_used_stamps: Arc::new( DashMap::new() ),
    }
  }

  /// Resolve a bearer token into a request context
  ///
  /// # Errors
  ///
  /// `unauthorized` for malformed tokens, unknown prefixes, bad secrets and
  /// ownerless personal keys; `tenant_suspended` once the credential is
  /// known good but its tenant is suspended.
  pub async fn resolve(
    &self,
    bearer: &str,
    defaults: &RateLimitDefaults,
    request_id: String,
  ) -> Result< ResolvedCredential >
  {
    let Some( ( prefix, secret ) ) = split_wire_token( bearer ) else
    {
      return Err( GatewayError::Unauthorized );
    };

    let Some( api_key ) = self.store.find_active_api_key_by_prefix( prefix ).await? else
    {
      // Same verification work as the mismatch path
      self.material.verify_dummy( secret );
      return Err( GatewayError::Unauthorized );
    };

    if !self.material.verify_secret( secret, &api_key.secret_hash )
    {
      return Err( GatewayError::Unauthorized );
    }

    // A personal key must have a living owner
    if api_key.kind == ApiKeyKind::Personal && api_key.owner_user_id.is_none()
    {
      return Err( GatewayError::Unauthorized );
    }

    let tenant = self.store.get_tenant( api_key.tenant_id ).await?;
    if tenant.status == TenantStatus::Suspended
    {
      return Err( GatewayError::TenantSuspended );
    }

    let tenant_override = self.store.get_tenant_rate_limit( tenant.id ).await?;
    let key_override = self.store.get_api_key_rate_limit( api_key.id ).await?;
    let effective = resolve_effective( defaults, tenant_override, key_override );

    self.touch_last_used( api_key.id ).await;

    let context = RequestContext
    {
      tenant_id: tenant.id,
      api_key_id: api_key.id,
      api_key_prefix: api_key.prefix.clone(),
      owner_user_id: api_key.owner_user_id,
      key_limits: effective.key,
      tenant_limits: effective.tenant,
      key_quota: api_key.quota,
      request_id,
    };

    Ok( ResolvedCredential { context, tenant, api_key } )
  }

  /// Best-effort `last_used_at` update, at most once a minute per key
  async fn touch_last_used( &self, api_key_id: Uuid )
  {
    let now = now_ms();

    let stale = self.last_used_stamps
      .get( &api_key_id )
      .map_or( true, |stamp| now - *stamp >= LAST_USED_COALESCE_MS );

    if !stale
    {
      return;
    }

    self.last_used_stamps.insert( api_key_id, now );

    if let Err( err ) = self.store.touch_api_key_last_used( api_key_id ).await
    {
      tracing::debug!( api_key_id = %api_key_id, error = %err, "last_used update skipped" );
    }
  }
}

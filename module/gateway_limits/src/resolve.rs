//! Effective limit resolution
//!
//! Deterministic, no I/O: the caller supplies the defaults snapshot and any
//! overrides it loaded, this module folds them into the pair of effective
//! settings the engine enforces.

use gateway_types::{ RateLimitDefaults, RateLimitSettings };

/// The enforced pair: per-key limits already clamped by the tenant ceiling
#[ derive( Debug, Clone, Copy, PartialEq, Eq ) ]
pub struct EffectiveLimits
{
  pub key: RateLimitSettings,
  pub tenant: RateLimitSettings,
}

/// Fold defaults and overrides into effective limits
///
/// Tenant limit is the override when one exists, else the defaults. Key limit
/// starts from its override (else the key defaults) and each axis is clamped
/// by the corresponding tenant axis, so `0 < key ≤ tenant` holds for every
/// enabled axis.
#[ must_use ]
pub fn resolve_effective(
  defaults: &RateLimitDefaults,
  tenant_override: Option< RateLimitSettings >,
  key_override: Option< RateLimitSettings >,
) -> EffectiveLimits
{
  let tenant = tenant_override.unwrap_or( RateLimitSettings
  {
    requests_per_minute: defaults.requests_per_minute,
    tokens_per_minute: defaults.tokens_per_minute,
    parallel_requests: defaults.parallel_requests_tenant,
  } );

  let key_base = key_override.unwrap_or( RateLimitSettings
  {
    requests_per_minute: defaults.requests_per_minute,
    tokens_per_minute: defaults.tokens_per_minute,
    parallel_requests: defaults.parallel_requests_key,
  } );

  EffectiveLimits
  {
    key: key_base.clamped_by( tenant ),
    tenant,
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  fn defaults() -> RateLimitDefaults
  {
    RateLimitDefaults
    {
      requests_per_minute: 600,
      tokens_per_minute: 100_000,
      parallel_requests_key: 8,
      parallel_requests_tenant: 32,
    }
  }

  #[ test ]
  fn defaults_apply_without_overrides()
  {
    let effective = resolve_effective( &defaults(), None, None );

    assert_eq!( effective.tenant.requests_per_minute, 600 );
    assert_eq!( effective.tenant.parallel_requests, 32 );
    assert_eq!( effective.key.parallel_requests, 8 );
    assert_eq!( effective.key.requests_per_minute, 600 );
  }

  #[ test ]
  fn key_override_is_clamped_by_tenant_ceiling()
  {
    let tenant = RateLimitSettings { requests_per_minute: 100, tokens_per_minute: 10_000, parallel_requests: 4 };
    let key = RateLimitSettings { requests_per_minute: 500, tokens_per_minute: 5_000, parallel_requests: 16 };

    let effective = resolve_effective( &defaults(), Some( tenant ), Some( key ) );

    assert_eq!( effective.key.requests_per_minute, 100 );
    assert_eq!( effective.key.tokens_per_minute, 5_000 );
    assert_eq!( effective.key.parallel_requests, 4 );
  }

  #[ test ]
  fn disabled_axes_stay_disabled()
  {
    let tenant = RateLimitSettings { requests_per_minute: 0, tokens_per_minute: 0, parallel_requests: 0 };

    let effective = resolve_effective( &defaults(), Some( tenant ), None );

    // Tenant disabled every axis; the key keeps its own defaults unclamped
    assert_eq!( effective.tenant.requests_per_minute, 0 );
    assert_eq!( effective.key.requests_per_minute, 600 );
    assert_eq!( effective.key.parallel_requests, 8 );
  }
}

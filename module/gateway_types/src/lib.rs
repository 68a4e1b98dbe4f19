//! Shared types for the model gateway
//!
//! Foundational enums, the error taxonomy, and the per-request context bundle
//! used across all gateway crates.

pub mod context;
pub mod defaults;
pub mod enums;
pub mod error;

pub use context::RequestContext;
pub use defaults::{ AlertConfig, BatchSettings, BudgetDefaults, FileSettings, GatewayDefaults, RateLimitDefaults };
pub use enums::
{
  AlertLevel,
  ApiKeyKind,
  BatchStatus,
  FilePurpose,
  FileStatus,
  GuardrailAction,
  GuardrailStage,
  MembershipRole,
  ModelType,
  ProviderFamily,
  RefreshSchedule,
  RouteStatus,
  TenantStatus,
};
pub use error::{ GatewayError, Result };

/// Limit values for one scope (api key or tenant)
///
/// A non-positive value disables enforcement for that axis.
#[ derive( Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize ) ]
pub struct RateLimitSettings
{
  /// Requests per minute
  pub requests_per_minute: i64,
  /// Tokens per minute
  pub tokens_per_minute: i64,
  /// Concurrent in-flight requests
  pub parallel_requests: i64,
}

impl RateLimitSettings
{
  /// Settings with every axis disabled
  #[ must_use ]
  pub fn unlimited() -> Self
  {
    Self { requests_per_minute: 0, tokens_per_minute: 0, parallel_requests: 0 }
  }

  /// Clamp each enabled axis of `self` by the corresponding enabled axis of `ceiling`
  #[ must_use ]
  pub fn clamped_by( self, ceiling: Self ) -> Self
  {
    fn clamp( own: i64, cap: i64 ) -> i64
    {
      match ( own > 0, cap > 0 )
      {
        ( true, true ) => own.min( cap ),
        ( false, true ) => cap,
        _ => own,
      }
    }

    Self
    {
      requests_per_minute: clamp( self.requests_per_minute, ceiling.requests_per_minute ),
      tokens_per_minute: clamp( self.tokens_per_minute, ceiling.tokens_per_minute ),
      parallel_requests: clamp( self.parallel_requests, ceiling.parallel_requests ),
    }
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn clamp_takes_minimum_of_enabled_axes()
  {
    let key = RateLimitSettings { requests_per_minute: 100, tokens_per_minute: 0, parallel_requests: 8 };
    let tenant = RateLimitSettings { requests_per_minute: 60, tokens_per_minute: 5000, parallel_requests: 4 };

    let effective = key.clamped_by( tenant );

    assert_eq!( effective.requests_per_minute, 60 );
    // Disabled key axis inherits the tenant ceiling
    assert_eq!( effective.tokens_per_minute, 5000 );
    assert_eq!( effective.parallel_requests, 4 );
  }

  #[ test ]
  fn clamp_with_disabled_ceiling_keeps_own_value()
  {
    let key = RateLimitSettings { requests_per_minute: 100, tokens_per_minute: 200, parallel_requests: 2 };
    let tenant = RateLimitSettings::unlimited();

    assert_eq!( key.clamped_by( tenant ), key );
  }
}

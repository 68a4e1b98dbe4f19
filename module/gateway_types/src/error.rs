//! Gateway error taxonomy
//!
//! One error enum shared across every crate. Each variant carries a stable
//! `kind` string that surfaces verbatim in the HTTP error envelope, so the
//! taxonomy here is a public contract, not an implementation detail.

use thiserror::Error;

/// Result alias used across the gateway crates
pub type Result< T > = core::result::Result< T, GatewayError >;

/// Error taxonomy for the gateway
///
/// Auth, policy, input, upstream, integrity and internal kinds. The HTTP
/// layer maps kinds to statuses; background workers map them to
/// retryable/permanent handling.
#[ derive( Debug, Error ) ]
pub enum GatewayError
{
  /// Credential missing, malformed, unknown prefix or bad secret
  #[ error( "invalid or missing credentials" ) ]
  Unauthorized,

  /// The resolved tenant is suspended
  #[ error( "tenant is suspended" ) ]
  TenantSuspended,

  /// Authenticated but not allowed to perform the operation
  #[ error( "forbidden: {0}" ) ]
  Forbidden( String ),

  /// A rate-limit axis was exhausted
  #[ error( "rate limit exceeded on {scope} {axis}" ) ]
  RateLimited
  {
    /// `key` or `tenant`
    scope: &'static str,
    /// `rpm`, `tpm` or `parallel`
    axis: &'static str,
    /// Seconds until the window rolls over
    retry_after_secs: u64,
  },

  /// Budget admission or debit rejected the request
  #[ error( "budget exceeded: used ${used_usd:.4} of ${limit_usd:.4}" ) ]
  BudgetExceeded
  {
    used_usd: f64,
    limit_usd: f64,
  },

  /// A guardrail policy blocked the request
  #[ error( "request blocked by content policy" ) ]
  GuardrailViolation
  {
    /// Non-revealing category label (`keyword`, `moderation`)
    category: String,
  },

  /// Alias absent from the tenant allowlist (wire message says "model not found")
  #[ error( "model not found" ) ]
  ModelNotAllowed,

  /// Alias exists but is disabled in the catalog
  #[ error( "model is disabled" ) ]
  ModelDisabled,

  /// Malformed request body or parameters
  #[ error( "bad request: {0}" ) ]
  BadRequest( String ),

  /// Body larger than the configured limit
  #[ error( "payload too large" ) ]
  PayloadTooLarge,

  /// Endpoint not enabled for this deployment of the gateway
  #[ error( "unsupported endpoint: {0}" ) ]
  UnsupportedEndpoint( String ),

  /// Transport failure or 5xx from the upstream provider (gateway may retry)
  #[ error( "upstream unavailable: {0}" ) ]
  UpstreamUnavailable( String ),

  /// 4xx from the upstream provider, surfaced to the caller
  #[ error( "upstream rejected request: {message}" ) ]
  UpstreamRejected
  {
    status: u16,
    message: String,
  },

  /// Unique constraint or optimistic-concurrency collision
  #[ error( "conflict: {0}" ) ]
  Conflict( String ),

  /// Entity absent, deleted or expired
  #[ error( "not found: {0}" ) ]
  NotFound( String ),

  /// Unexpected condition; detail is logged, never surfaced
  #[ error( "internal error" ) ]
  Internal( String ),
}

impl GatewayError
{
  /// Stable `type` string used in the HTTP error envelope
  #[ must_use ]
  pub fn kind( &self ) -> &'static str
  {
    match self
    {
      Self::Unauthorized => "unauthorized",
      Self::TenantSuspended => "tenant_suspended",
      Self::Forbidden( _ ) => "forbidden",
      Self::RateLimited { .. } => "rate_limited",
      Self::BudgetExceeded { .. } => "budget_exceeded",
      Self::GuardrailViolation { .. } => "guardrail_violation",
      Self::ModelNotAllowed => "model_not_allowed",
      Self::ModelDisabled => "model_disabled",
      Self::BadRequest( _ ) => "bad_request",
      Self::PayloadTooLarge => "payload_too_large",
      Self::UnsupportedEndpoint( _ ) => "unsupported_endpoint",
      Self::UpstreamUnavailable( _ ) => "upstream_unavailable",
      Self::UpstreamRejected { .. } => "upstream_rejected",
      Self::Conflict( _ ) => "conflict",
      Self::NotFound( _ ) => "not_found",
      Self::Internal( _ ) => "internal",
    }
  }

  /// Seconds the caller should wait before retrying, when meaningful
  #[ must_use ]
  pub fn retry_after( &self ) -> Option< u64 >
  {
    match self
    {
      Self::RateLimited { retry_after_secs, .. } => Some( *retry_after_secs ),
      Self::UpstreamRejected { status: 429, .. } => Some( 1 ),
      _ => None,
    }
  }

  /// Whether a background worker should re-queue the failed unit of work
  #[ must_use ]
  pub fn is_retryable( &self ) -> bool
  {
    matches!( self, Self::UpstreamUnavailable( _ ) | Self::RateLimited { .. } )
  }

  /// Wrap a storage-layer failure
  pub fn storage( err: impl core::fmt::Display ) -> Self
  {
    Self::Internal( format!( "storage: {err}" ) )
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn kinds_are_stable()
  {
    assert_eq!( GatewayError::Unauthorized.kind(), "unauthorized" );
    assert_eq!(
      GatewayError::RateLimited { scope: "key", axis: "rpm", retry_after_secs: 30 }.kind(),
      "rate_limited"
    );
    assert_eq!(
      GatewayError::BudgetExceeded { used_usd: 10.5, limit_usd: 10.0 }.kind(),
      "budget_exceeded"
    );
  }

  #[ test ]
  fn model_not_allowed_reads_as_not_found()
  {
    // Wording must not leak whether the alias exists in the catalog
    assert_eq!( GatewayError::ModelNotAllowed.to_string(), "model not found" );
  }

  #[ test ]
  fn retry_after_only_on_transient_kinds()
  {
    let limited = GatewayError::RateLimited { scope: "tenant", axis: "tpm", retry_after_secs: 42 };
    assert_eq!( limited.retry_after(), Some( 42 ) );
    assert_eq!( GatewayError::Unauthorized.retry_after(), None );
  }
}

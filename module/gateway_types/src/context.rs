//! Per-request identity and policy bundle
//!
//! Built once by the credential resolver and handed to every downstream
//! stage as a value. Releases on cancellation walk this bundle in reverse
//! acquisition order.

use serde::{ Deserialize, Serialize };
use uuid::Uuid;

use crate::RateLimitSettings;

/// Per-key spending quota carried on the api key row
#[ derive( Debug, Clone, Copy, PartialEq, Serialize, Deserialize ) ]
pub struct KeyQuota
{
  /// Budget ceiling for this key alone, USD
  pub budget_usd: Option< f64 >,
  /// Warning threshold ratio in (0, 1]
  pub warning_threshold: Option< f64 >,
}

/// Resolved identity and effective policy for one inbound request
#[ derive( Debug, Clone, Serialize, Deserialize ) ]
pub struct RequestContext
{
  /// Tenant the credential belongs to
  pub tenant_id: Uuid,
  /// The authenticated api key
  pub api_key_id: Uuid,
  /// Public printable prefix of the key (for logs and events)
  pub api_key_prefix: String,
  /// Owner of a personal key, absent for tenant keys
  pub owner_user_id: Option< Uuid >,
  /// Effective per-key limits after clamping by the tenant ceiling
  pub key_limits: RateLimitSettings,
  /// Effective tenant-level limits
  pub tenant_limits: RateLimitSettings,
  /// Optional per-key quota
  pub key_quota: Option< KeyQuota >,
  /// Correlation id assigned at ingress
  pub request_id: String,
}

impl RequestContext
{
  /// Smallest enabled parallel limit across both scopes, if any
  #[ must_use ]
  pub fn parallel_ceiling( &self ) -> Option< i64 >
  {
    let key = self.key_limits.parallel_requests;
    let tenant = self.tenant_limits.parallel_requests;
    match ( key > 0, tenant > 0 )
    {
      ( true, true ) => Some( key.min( tenant ) ),
      ( true, false ) => Some( key ),
      ( false, true ) => Some( tenant ),
      ( false, false ) => None,
    }
  }
}

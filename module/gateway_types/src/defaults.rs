//! Versioned defaults snapshot
//!
//! Admin-mutable singletons (budget defaults, rate-limit defaults, file and
//! batch settings, the default-model set) are published as one immutable
//! snapshot. A request reads the snapshot pointer at ingress and keeps it for
//! its lifetime; mutations publish a whole new snapshot.

use serde::{ Deserialize, Serialize };

use crate::enums::RefreshSchedule;

/// Alert delivery configuration attached to budget defaults and overrides
#[ derive( Debug, Clone, PartialEq, Serialize, Deserialize ) ]
pub struct AlertConfig
{
  #[ serde( default ) ]
  pub emails: Vec< String >,
  #[ serde( default ) ]
  pub webhooks: Vec< String >,
  /// Minimum seconds between consecutive alerts of the same level
  pub cooldown_seconds: i64,
}

impl Default for AlertConfig
{
  fn default() -> Self
  {
    Self { emails: Vec::new(), webhooks: Vec::new(), cooldown_seconds: 3600 }
  }
}

/// Singleton budget defaults
#[ derive( Debug, Clone, PartialEq, Serialize, Deserialize ) ]
pub struct BudgetDefaults
{
  /// Budget applied to tenants without an override, USD
  pub default_usd: f64,
  /// Warning threshold ratio in (0, 1]
  pub warning_threshold_perc: f64,
  pub refresh_schedule: RefreshSchedule,
  pub alert: AlertConfig,
}

impl Default for BudgetDefaults
{
  fn default() -> Self
  {
    Self
    {
      default_usd: 100.0,
      warning_threshold_perc: 0.8,
      refresh_schedule: RefreshSchedule::CalendarMonth,
      alert: AlertConfig::default(),
    }
  }
}

/// Singleton rate-limit defaults
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
pub struct RateLimitDefaults
{
  pub requests_per_minute: i64,
  pub tokens_per_minute: i64,
  /// Default parallel ceiling per api key
  pub parallel_requests_key: i64,
  /// Default parallel ceiling per tenant
  pub parallel_requests_tenant: i64,
}

impl Default for RateLimitDefaults
{
  fn default() -> Self
  {
    Self
    {
      requests_per_minute: 600,
      tokens_per_minute: 200_000,
      parallel_requests_key: 16,
      parallel_requests_tenant: 64,
    }
  }
}

/// File service settings
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
pub struct FileSettings
{
  pub max_size_mb: i64,
  /// TTL applied when the tenant has no override, seconds
  pub default_ttl_seconds: i64,
  /// Hard ceiling for any TTL, seconds
  pub max_ttl_seconds: i64,
}

impl Default for FileSettings
{
  fn default() -> Self
  {
    Self
    {
      max_size_mb: 64,
      default_ttl_seconds: 30 * 24 * 3600,
      max_ttl_seconds: 90 * 24 * 3600,
    }
  }
}

/// Batch engine settings
#[ derive( Debug, Clone, PartialEq, Serialize, Deserialize ) ]
pub struct BatchSettings
{
  /// Ceiling on worker-pool size regardless of what the batch requests
  pub max_concurrency: i64,
  /// Inner request URLs a batch line may target
  pub allowed_endpoints: Vec< String >,
  /// Default time-to-terminal for a batch, seconds
  pub default_expiry_seconds: i64,
}

impl Default for BatchSettings
{
  fn default() -> Self
  {
    Self
    {
      max_concurrency: 16,
      allowed_endpoints: vec!
      [
        "/v1/chat/completions".to_string(),
        "/v1/embeddings".to_string(),
      ],
      default_expiry_seconds: 24 * 3600,
    }
  }
}

/// The complete published snapshot
#[ derive( Debug, Clone, PartialEq, Serialize, Deserialize, Default ) ]
pub struct GatewayDefaults
{
  pub budget: BudgetDefaults,
  pub rate_limit: RateLimitDefaults,
  pub files: FileSettings,
  pub batch: BatchSettings,
  /// Aliases every tenant may use without an explicit allowlist row
  #[ serde( default ) ]
  pub default_models: Vec< String >,
}

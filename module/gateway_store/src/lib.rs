//! Relational storage facade
//!
//! Typed query surface over the gateway's SQLite schema. One `Store` handle
//! wraps the pool; per-table modules hang domain methods off it. Migrations
//! are applied idempotently at connect time.

use sqlx::{ SqlitePool, sqlite::SqlitePoolOptions };

use gateway_types::{ GatewayError, Result };

pub mod api_keys;
pub mod audit;
pub mod batches;
pub mod budget;
pub mod catalog;
pub mod files;
pub mod guardrails;
pub mod memberships;
pub mod rate_limits;
pub mod settings;
pub mod tenants;
pub mod usage;
pub mod users;

pub use api_keys::ApiKeyRecord;
pub use audit::AuditEntryRecord;
pub use batches::{ BatchRecord, RequestCounts };
pub use budget::{ BudgetCounterRecord, BudgetOverrideRecord };
pub use catalog::{ CatalogEntryRecord, DeploymentRecord };
pub use files::FileRecord;
pub use guardrails::{ GuardrailEventRecord, GuardrailPolicyRecord, ModerationConfig };
pub use memberships::MembershipRecord;
pub use tenants::TenantRecord;
pub use usage::{ DailyUsageRow, UsageEventRecord };
pub use users::UserRecord;

/// Storage handle shared across the gateway
///
/// Cheap to clone; all methods borrow the inner pool.
#[ derive( Debug, Clone ) ]
pub struct Store
{
  pool: SqlitePool,
}

impl Store
{
  /// Wrap an existing pool without applying migrations
  ///
  /// Test environments build the pool through `gateway_test_db` and hand it
  /// here; the builder owns schema setup.
  #[ must_use ]
  pub fn from_pool( pool: SqlitePool ) -> Self
  {
    Self { pool }
  }

  /// Connect and apply migrations
  ///
  /// # Errors
  ///
  /// Returns `internal` if the connection or migration fails.
  pub async fn connect( database_url: &str ) -> Result< Self >
  {
    let pool = SqlitePoolOptions::new()
      .max_connections( 5 )
      .connect( database_url )
      .await
      .map_err( GatewayError::storage )?;

    apply_migrations( &pool ).await?;

    Ok( Self { pool } )
  }

  /// Access the underlying pool
  #[ must_use ]
  pub fn pool( &self ) -> &SqlitePool
  {
    &self.pool
  }
}

/// Apply the schema to a pool
///
/// Every statement is `IF NOT EXISTS`-guarded, so repeated application is a
/// no-op.
pub async fn apply_migrations( pool: &SqlitePool ) -> Result< () >
{
  let migration = include_str!( "../migrations/001_initial_schema.sql" );
  sqlx::raw_sql( migration )
    .execute( pool )
    .await
    .map_err( GatewayError::storage )?;

  Ok( () )
}

/// Current time in milliseconds since the UNIX epoch
#[ allow( clippy::cast_possible_truncation ) ]
#[ must_use ]
pub fn now_ms() -> i64
{
  std::time::SystemTime::now()
    .duration_since( std::time::UNIX_EPOCH )
    .expect( "system clock before UNIX epoch" )
    .as_millis() as i64
}

/// Map a sqlx failure onto the gateway taxonomy
///
/// Unique-constraint violations become `conflict`; everything else is
/// `internal` with the detail kept for logs.
pub( crate ) fn db_err( err: sqlx::Error ) -> GatewayError
{
  match &err
  {
    sqlx::Error::Database( db ) if db.is_unique_violation() =>
      GatewayError::Conflict( "row already exists".to_string() ),
    sqlx::Error::RowNotFound =>
      GatewayError::NotFound( "row".to_string() ),
    _ => GatewayError::storage( err ),
  }
}

/// Decode a JSON TEXT column into a string list, tolerating legacy nulls
pub( crate ) fn decode_string_list( raw: Option< String > ) -> Vec< String >
{
  raw
    .and_then( |s| serde_json::from_str( &s ).ok() )
    .unwrap_or_default()
}

/// Encode a string list for a JSON TEXT column
pub( crate ) fn encode_string_list( list: &[ String ] ) -> String
{
  serde_json::to_string( list ).unwrap_or_else( |_| "[]".to_string() )
}

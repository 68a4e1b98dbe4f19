//! Test database infrastructure for gateway crates
//!
//! Ergonomic builders for isolated test databases with automatic cleanup and
//! schema setup.
//!
//! # Examples
//!
//! ```no_run
//! use gateway_test_db::{ TestDatabaseBuilder, StorageMode };
//!
//! # async fn example() {
//! let db = TestDatabaseBuilder::new()
//!   .storage_mode( StorageMode::InMemory )
//!   .build()
//!   .await
//!   .expect( "failed to create test database" );
//!
//! let pool = db.pool();
//! // Use pool for testing...
//! # }
//! ```

use sqlx::{ SqlitePool, sqlite::SqlitePoolOptions };
use tempfile::TempDir;
use thiserror::Error;

/// Test-db failures
#[ derive( Debug, Error ) ]
pub enum TestDbError
{
  #[ error( "database error: {0}" ) ]
  Database( String ),
  #[ error( "io error: {0}" ) ]
  Io( String ),
}

/// Result alias
pub type Result< T > = core::result::Result< T, TestDbError >;

/// Where the test database lives
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Default ) ]
pub enum StorageMode
{
  /// Single-connection in-memory database; fastest, vanishes on drop
  #[ default ]
  InMemory,
  /// File inside a temporary directory; survives pooled connections
  TempFile,
}

/// Test database handle with automatic cleanup
#[ derive( Debug ) ]
pub struct TestDatabase
{
  pool: SqlitePool,
  _temp: Option< TempDir >,
  storage_mode: StorageMode,
}

impl TestDatabase
{
  /// Connection pool for the test database
  #[ must_use ]
  pub fn pool( &self ) -> &SqlitePool
  {
    &self.pool
  }

  /// Storage mode the database was built with
  #[ must_use ]
  pub fn storage_mode( &self ) -> StorageMode
  {
    self.storage_mode
  }

  /// A `Store` facade over the pool
  #[ must_use ]
  pub fn store( &self ) -> gateway_store::Store
  {
    gateway_store::Store::from_pool( self.pool.clone() )
  }
}

/// Builder for [`TestDatabase`]
#[ derive( Debug, Default ) ]
pub struct TestDatabaseBuilder
{
  storage_mode: StorageMode,
}

impl TestDatabaseBuilder
{
  /// Start with defaults (in-memory)
  #[ must_use ]
  pub fn new() -> Self
  {
    Self::default()
  }

  /// Choose the storage mode
  #[ must_use ]
  pub fn storage_mode( mut self, mode: StorageMode ) -> Self
  {
    self.storage_mode = mode;
    self
  }

  /// Build the database and apply the gateway schema
  ///
  /// In-memory databases are pinned to a single connection: every pooled
  /// connection to `sqlite::memory:` would otherwise see its own empty
  /// database.
  pub async fn build( self ) -> Result< TestDatabase >
  {
    let ( pool, temp ) = match self.storage_mode
    {
      StorageMode::InMemory =>
      {
        let pool = SqlitePoolOptions::new()
          .max_connections( 1 )
          .connect( "sqlite::memory:" )
          .await
          .map_err( |e| TestDbError::Database( e.to_string() ) )?;
        ( pool, None )
      }
      StorageMode::TempFile =>
      {
        let dir = TempDir::new().map_err( |e| TestDbError::Io( e.to_string() ) )?;
        let path = dir.path().join( "gateway_test.db" );
        let url = format!( "sqlite://{}?mode=rwc", path.display() );
        let pool = SqlitePoolOptions::new()
          .max_connections( 5 )
          .connect( &url )
          .await
          .map_err( |e| TestDbError::Database( e.to_string() ) )?;
        ( pool, Some( dir ) )
      }
    };

    gateway_store::apply_migrations( &pool )
      .await
      .map_err( |e| TestDbError::Database( e.to_string() ) )?;

    Ok( TestDatabase
    {
      pool,
      _temp: temp,
      storage_mode: self.storage_mode,
    } )
  }
}

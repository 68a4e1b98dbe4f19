//! User table access
//!
//! Deleting a user also revokes that user's personal api keys in the same
//! transaction; a personal key must never outlive its owner.

use sqlx::Row;
use uuid::Uuid;

use gateway_types::{ GatewayError, Result };

use crate::{ db_err, now_ms, Store };

/// One row of the `users` table
#[ derive( Debug, Clone ) ]
pub struct UserRecord
{
  pub id: Uuid,
  pub email: String,
  pub name: String,
  pub password_hash: Option< String >,
  pub is_super_admin: bool,
  pub last_login_at: Option< i64 >,
  pub created_at: i64,
  pub updated_at: i64,
}

fn decode( row: &sqlx::sqlite::SqliteRow ) -> UserRecord
{
  UserRecord
  {
    id: row.get( "id" ),
    email: row.get( "email" ),
    name: row.get( "name" ),
    password_hash: row.get( "password_hash" ),
    is_super_admin: row.get::< i64, _ >( "is_super_admin" ) != 0,
    last_login_at: row.get( "last_login_at" ),
    created_at: row.get( "created_at" ),
    updated_at: row.get( "updated_at" ),
  }
}

impl Store
{
  /// Create a user
  ///
  /// # Errors
  ///
  /// `conflict` when the email is taken.
  pub async fn create_user(
    &self,
    email: &str,
    name: &str,
    password_hash: Option< &str >,
    is_super_admin: bool,
  ) -> Result< UserRecord >
  {
    let id = Uuid::new_v4();
    let now = now_ms();

    sqlx::query(
      "INSERT INTO users (id, email, name, password_hash, is_super_admin, created_at, updated_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $6)"
    )
    .bind( id )
    .bind( email )
    .bind( name )
    .bind( password_hash )
    .bind( i64::from( is_super_admin ) )
    .bind( now )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    self.get_user( id ).await
  }

  /// Fetch a user by id
  pub async fn get_user( &self, id: Uuid ) -> Result< UserRecord >
  {
    let row = sqlx::query( "SELECT * FROM users WHERE id = $1" )
      .bind( id )
      .fetch_optional( &self.pool )
      .await
      .map_err( db_err )?
      .ok_or_else( || GatewayError::NotFound( "user".to_string() ) )?;

    Ok( decode( &row ) )
  }

  /// Fetch a user by email, if present
  pub async fn get_user_by_email( &self, email: &str ) -> Result< Option< UserRecord > >
  {
    let row = sqlx::query( "SELECT * FROM users WHERE email = $1" )
      .bind( email )
      .fetch_optional( &self.pool )
      .await
      .map_err( db_err )?;

    Ok( row.as_ref().map( decode ) )
  }

  /// List users, newest first
  pub async fn list_users( &self, limit: i64, offset: i64 ) -> Result< Vec< UserRecord > >
  {
    let rows = sqlx::query( "SELECT * FROM users ORDER BY created_at DESC LIMIT $1 OFFSET $2" )
      .bind( limit )
      .bind( offset )
      .fetch_all( &self.pool )
      .await
      .map_err( db_err )?;

    Ok( rows.iter().map( decode ).collect() )
  }

  /// Stamp a successful sign-in
  pub async fn touch_last_login( &self, id: Uuid ) -> Result< () >
  {
    sqlx::query( "UPDATE users SET last_login_at = $1, updated_at = $1 WHERE id = $2" )
      .bind( now_ms() )
      .bind( id )
      .execute( &self.pool )
      .await
      .map_err( db_err )?;

    Ok( () )
  }

  /// Replace the stored password hash
  pub async fn set_password_hash( &self, id: Uuid, password_hash: &str ) -> Result< () >
  {
    let result = sqlx::query( "UPDATE users SET password_hash = $1, updated_at = $2 WHERE id = $3" )
      .bind( password_hash )
      .bind( now_ms() )
      .bind( id )
      .execute( &self.pool )
      .await
      .map_err( db_err )?;

    if result.rows_affected() == 0
    {
      return Err( GatewayError::NotFound( "user".to_string() ) );
    }

    Ok( () )
  }

  /// Delete a user, revoking their personal keys first
  pub async fn delete_user( &self, id: Uuid ) -> Result< () >
  {
    let mut tx = self.pool.begin().await.map_err( db_err )?;
    let now = now_ms();

    sqlx::query(
      "UPDATE api_keys SET revoked_at = $1, updated_at = $1 \
       WHERE owner_user_id = $2 AND kind = 'personal' AND revoked_at IS NULL"
    )
    .bind( now )
    .bind( id )
    .execute( &mut *tx )
    .await
    .map_err( db_err )?;

    let result = sqlx::query( "DELETE FROM users WHERE id = $1" )
      .bind( id )
      .execute( &mut *tx )
      .await
      .map_err( db_err )?;

    if result.rows_affected() == 0
    {
      return Err( GatewayError::NotFound( "user".to_string() ) );
    }

    tx.commit().await.map_err( db_err )?;

    Ok( () )
  }
}

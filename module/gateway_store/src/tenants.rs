//! Tenant table access

use sqlx::Row;
use uuid::Uuid;

use gateway_types::{ GatewayError, Result, TenantStatus };

use crate::{ db_err, now_ms, Store };

/// One row of the `tenants` table
#[ derive( Debug, Clone ) ]
pub struct TenantRecord
{
  pub id: Uuid,
  pub name: String,
  pub status: TenantStatus,
  pub is_personal: bool,
  pub version: i64,
  pub created_at: i64,
  pub updated_at: i64,
}

fn decode( row: &sqlx::sqlite::SqliteRow ) -> Result< TenantRecord >
{
  let status_raw: String = row.get( "status" );
  Ok( TenantRecord
  {
    id: row.get( "id" ),
    name: row.get( "name" ),
    status: TenantStatus::parse( &status_raw )
      .ok_or_else( || GatewayError::Internal( format!( "bad tenant status {status_raw}" ) ) )?,
    is_personal: row.get::< i64, _ >( "is_personal" ) != 0,
    version: row.get( "version" ),
    created_at: row.get( "created_at" ),
    updated_at: row.get( "updated_at" ),
  } )
}

impl Store
{
  /// Create a tenant
  ///
  /// # Errors
  ///
  /// `conflict` when the name is taken.
  pub async fn create_tenant( &self, name: &str, is_personal: bool ) -> Result< TenantRecord >
  {
    if name.is_empty() || name.len() > 128
    {
      return Err( GatewayError::BadRequest( "tenant name must be 1..=128 characters".to_string() ) );
    }

    let id = Uuid::new_v4();
    let now = now_ms();

    sqlx::query(
      "INSERT INTO tenants (id, name, status, is_personal, created_at, updated_at) \
       VALUES ($1, $2, 'active', $3, $4, $4)"
    )
    .bind( id )
    .bind( name )
    .bind( i64::from( is_personal ) )
    .bind( now )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    self.get_tenant( id ).await
  }

  /// Fetch a tenant by id
  pub async fn get_tenant( &self, id: Uuid ) -> Result< TenantRecord >
  {
    let row = sqlx::query( "SELECT * FROM tenants WHERE id = $1" )
      .bind( id )
      .fetch_optional( &self.pool )
      .await
      .map_err( db_err )?
      .ok_or_else( || GatewayError::NotFound( "tenant".to_string() ) )?;

    decode( &row )
  }

  /// Fetch a tenant by its unique name
  pub async fn get_tenant_by_name( &self, name: &str ) -> Result< Option< TenantRecord > >
  {
    let row = sqlx::query( "SELECT * FROM tenants WHERE name = $1" )
      .bind( name )
      .fetch_optional( &self.pool )
      .await
      .map_err( db_err )?;

    row.as_ref().map( decode ).transpose()
  }

  /// List tenants, newest first
  pub async fn list_tenants( &self, limit: i64, offset: i64 ) -> Result< Vec< TenantRecord > >
  {
    let rows = sqlx::query( "SELECT * FROM tenants ORDER BY created_at DESC LIMIT $1 OFFSET $2" )
      .bind( limit )
      .bind( offset )
      .fetch_all( &self.pool )
      .await
      .map_err( db_err )?;

    rows.iter().map( decode ).collect()
  }

  /// Rename or change status with optimistic concurrency
  ///
  /// # Errors
  ///
  /// `conflict` when `expected_version` no longer matches.
  pub async fn update_tenant(
    &self,
    id: Uuid,
    name: Option< &str >,
    status: Option< TenantStatus >,
    expected_version: i64,
  ) -> Result< TenantRecord >
  {
    let current = self.get_tenant( id ).await?;
    let new_name = name.unwrap_or( &current.name );
    let new_status = status.unwrap_or( current.status );

    let result = sqlx::query(
      "UPDATE tenants SET name = $1, status = $2, version = version + 1, updated_at = $3 \
       WHERE id = $4 AND version = $5"
    )
    .bind( new_name )
    .bind( new_status.as_str() )
    .bind( now_ms() )
    .bind( id )
    .bind( expected_version )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    if result.rows_affected() == 0
    {
      return Err( GatewayError::Conflict( "tenant was modified concurrently".to_string() ) );
    }

    self.get_tenant( id ).await
  }

  /// Delete a tenant and everything hanging off it (FK cascade)
  pub async fn delete_tenant( &self, id: Uuid ) -> Result< () >
  {
    let result = sqlx::query( "DELETE FROM tenants WHERE id = $1" )
      .bind( id )
      .execute( &self.pool )
      .await
      .map_err( db_err )?;

    if result.rows_affected() == 0
    {
      return Err( GatewayError::NotFound( "tenant".to_string() ) );
    }

    Ok( () )
  }
}

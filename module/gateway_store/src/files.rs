//! File metadata rows
//!
//! Blob content lives in the blob store; these rows carry everything else,
//! including the TTL the retention sweeper acts on.

use sqlx::Row;
use uuid::Uuid;

use gateway_types::{ FilePurpose, FileStatus, GatewayError, Result };

use crate::{ db_err, now_ms, Store };

/// One row of the `files` table
#[ derive( Debug, Clone ) ]
pub struct FileRecord
{
  pub id: Uuid,
  pub tenant_id: Uuid,
  pub filename: String,
  pub purpose: FilePurpose,
  pub content_type: String,
  pub bytes: i64,
  pub storage_backend: String,
  pub encrypted: bool,
  pub checksum: String,
  pub expires_at: i64,
  pub created_at: i64,
  pub updated_at: i64,
  pub deleted_at: Option< i64 >,
  pub status: FileStatus,
  pub status_details: Option< String >,
}

fn decode( row: &sqlx::sqlite::SqliteRow ) -> Result< FileRecord >
{
  let purpose_raw: String = row.get( "purpose" );
  let status_raw: String = row.get( "status" );

  Ok( FileRecord
  {
    id: row.get( "id" ),
    tenant_id: row.get( "tenant_id" ),
    filename: row.get( "filename" ),
    purpose: FilePurpose::parse( &purpose_raw )
      .ok_or_else( || GatewayError::Internal( format!( "bad file purpose {purpose_raw}" ) ) )?,
    content_type: row.get( "content_type" ),
    bytes: row.get( "bytes" ),
    storage_backend: row.get( "storage_backend" ),
    encrypted: row.get::< i64, _ >( "encrypted" ) != 0,
    checksum: row.get( "checksum" ),
    expires_at: row.get( "expires_at" ),
    created_at: row.get( "created_at" ),
    updated_at: row.get( "updated_at" ),
    deleted_at: row.get( "deleted_at" ),
    status: FileStatus::parse( &status_raw ).unwrap_or( FileStatus::Error ),
    status_details: row.get( "status_details" ),
  } )
}

/// Fields for inserting a file row
#[ derive( Debug, Clone ) ]
pub struct NewFile
{
  pub tenant_id: Uuid,
  pub filename: String,
  pub purpose: FilePurpose,
  pub content_type: String,
  pub bytes: i64,
  pub storage_backend: String,
  pub checksum: String,
  pub expires_at: i64,
}

impl Store
{
  /// Insert a file row in `uploaded` status
  pub async fn create_file( &self, new: NewFile ) -> Result< FileRecord >
  {
    let id = Uuid::new_v4();
    let now = now_ms();

    sqlx::query(
      "INSERT INTO files \
       (id, tenant_id, filename, purpose, content_type, bytes, storage_backend, encrypted, \
        checksum, expires_at, created_at, updated_at, status) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $9, $10, $10, 'uploaded')"
    )
    .bind( id )
    .bind( new.tenant_id )
    .bind( &new.filename )
    .bind( new.purpose.as_str() )
    .bind( &new.content_type )
    .bind( new.bytes )
    .bind( &new.storage_backend )
    .bind( &new.checksum )
    .bind( new.expires_at )
    .bind( now )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    self.get_file( id ).await
  }

  /// Fetch a file row by id
  pub async fn get_file( &self, id: Uuid ) -> Result< FileRecord >
  {
    let row = sqlx::query( "SELECT * FROM files WHERE id = $1" )
      .bind( id )
      .fetch_optional( &self.pool )
      .await
      .map_err( db_err )?
      .ok_or_else( || GatewayError::NotFound( "file".to_string() ) )?;

    decode( &row )
  }

  /// Files of a tenant, newest first
  pub async fn list_files_for_tenant( &self, tenant_id: Uuid, limit: i64, offset: i64 ) -> Result< Vec< FileRecord > >
  {
    let rows = sqlx::query(
      "SELECT * FROM files WHERE tenant_id = $1 AND deleted_at IS NULL \
       ORDER BY created_at DESC LIMIT $2 OFFSET $3"
    )
    .bind( tenant_id )
    .bind( limit )
    .bind( offset )
    .fetch_all( &self.pool )
    .await
    .map_err( db_err )?;

    rows.iter().map( decode ).collect()
  }

  /// Update lifecycle status
  pub async fn set_file_status( &self, id: Uuid, status: FileStatus, details: Option< &str > ) -> Result< () >
  {
    sqlx::query( "UPDATE files SET status = $1, status_details = $2, updated_at = $3 WHERE id = $4" )
      .bind( status.as_str() )
      .bind( details )
      .bind( now_ms() )
      .bind( id )
      .execute( &self.pool )
      .await
      .map_err( db_err )?;

    Ok( () )
  }

  /// Soft-delete a file row
  pub async fn mark_file_deleted( &self, id: Uuid ) -> Result< () >
  {
    let now = now_ms();
    let result = sqlx::query(
      "UPDATE files SET deleted_at = $1, status = 'deleted', updated_at = $1 \
       WHERE id = $2 AND deleted_at IS NULL"
    )
    .bind( now )
    .bind( id )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    if result.rows_affected() == 0
    {
      return Err( GatewayError::NotFound( "file".to_string() ) );
    }

    Ok( () )
  }

  /// Files past their TTL that the sweeper has not yet processed
  pub async fn list_expired_files( &self, now: i64, limit: i64 ) -> Result< Vec< FileRecord > >
  {
    let rows = sqlx::query(
      "SELECT * FROM files WHERE expires_at < $1 AND deleted_at IS NULL LIMIT $2"
    )
    .bind( now )
    .bind( limit )
    .fetch_all( &self.pool )
    .await
    .map_err( db_err )?;

    rows.iter().map( decode ).collect()
  }
}

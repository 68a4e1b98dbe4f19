//! Append-only audit log

use sqlx::Row;
use uuid::Uuid;

use gateway_types::Result;

use crate::{ db_err, now_ms, Store };

/// One row of the `audit_log` table
#[ derive( Debug, Clone ) ]
pub struct AuditEntryRecord
{
  pub id: Uuid,
  pub user_id: Option< Uuid >,
  pub action: String,
  pub resource_type: String,
  pub resource_id: String,
  pub metadata: serde_json::Value,
  pub created_at: i64,
}

impl Store
{
  /// Append an audit entry
  pub async fn insert_audit_entry(
    &self,
    user_id: Option< Uuid >,
    action: &str,
    resource_type: &str,
    resource_id: &str,
    metadata: serde_json::Value,
  ) -> Result< Uuid >
  {
    let id = Uuid::new_v4();

    sqlx::query(
      "INSERT INTO audit_log (id, user_id, action, resource_type, resource_id, metadata, created_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7)"
    )
    .bind( id )
    .bind( user_id )
    .bind( action )
    .bind( resource_type )
    .bind( resource_id )
    .bind( serde_json::to_string( &metadata ).unwrap_or_else( |_| "{}".to_string() ) )
    .bind( now_ms() )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    Ok( id )
  }

  /// Read the log, newest first
  pub async fn list_audit_entries( &self, limit: i64, offset: i64 ) -> Result< Vec< AuditEntryRecord > >
  {
    let rows = sqlx::query(
      "SELECT * FROM audit_log ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
    )
    .bind( limit )
    .bind( offset )
    .fetch_all( &self.pool )
    .await
    .map_err( db_err )?;

    Ok(
      rows.iter().map( |row|
      {
        let metadata_raw: String = row.get( "metadata" );
        AuditEntryRecord
        {
          id: row.get( "id" ),
          user_id: row.get( "user_id" ),
          action: row.get( "action" ),
          resource_type: row.get( "resource_type" ),
          resource_id: row.get( "resource_id" ),
          metadata: serde_json::from_str( &metadata_raw ).unwrap_or( serde_json::Value::Null ),
          created_at: row.get( "created_at" ),
        }
      } ).collect()
    )
  }
}

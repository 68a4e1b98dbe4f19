//! Batch rows and the forward-only state machine
//!
//! `update_batch_status` enforces legal transitions at the storage layer so
//! a racing worker and cancel request cannot push a batch backwards.

use sqlx::Row;
use uuid::Uuid;

use gateway_types::{ BatchStatus, GatewayError, Result };

use crate::{ db_err, now_ms, Store };

/// Line-level accounting for a batch
#[ derive( Debug, Clone, Copy, Default, PartialEq, Eq ) ]
pub struct RequestCounts
{
  pub total: i64,
  pub completed: i64,
  pub failed: i64,
  pub cancelled: i64,
}

/// One row of the `batches` table
#[ derive( Debug, Clone ) ]
pub struct BatchRecord
{
  pub id: Uuid,
  pub tenant_id: Uuid,
  pub api_key_id: Uuid,
  pub endpoint: String,
  pub completion_window: String,
  pub input_file_id: Uuid,
  pub output_file_id: Option< Uuid >,
  pub error_file_id: Option< Uuid >,
  pub status: BatchStatus,
  pub metadata: serde_json::Value,
  pub max_concurrency: i64,
  pub request_counts: RequestCounts,
  pub progress_line: i64,
  pub cancel_requested: bool,
  pub in_progress_at: Option< i64 >,
  pub finalizing_at: Option< i64 >,
  pub completed_at: Option< i64 >,
  pub cancelled_at: Option< i64 >,
  pub failed_at: Option< i64 >,
  pub expires_at: Option< i64 >,
  pub created_at: i64,
  pub updated_at: i64,
}

fn decode( row: &sqlx::sqlite::SqliteRow ) -> Result< BatchRecord >
{
  let status_raw: String = row.get( "status" );
  let metadata_raw: String = row.get( "metadata" );

  Ok( BatchRecord
  {
    id: row.get( "id" ),
    tenant_id: row.get( "tenant_id" ),
    api_key_id: row.get( "api_key_id" ),
    endpoint: row.get( "endpoint" ),
    completion_window: row.get( "completion_window" ),
    input_file_id: row.get( "input_file_id" ),
    output_file_id: row.get( "output_file_id" ),
    error_file_id: row.get( "error_file_id" ),
    status: BatchStatus::parse( &status_raw )
      .ok_or_else( || GatewayError::Internal( format!( "bad batch status {status_raw}" ) ) )?,
    metadata: serde_json::from_str( &metadata_raw ).unwrap_or( serde_json::Value::Null ),
    max_concurrency: row.get( "max_concurrency" ),
    request_counts: RequestCounts
    {
      total: row.get( "total_requests" ),
      completed: row.get( "completed_requests" ),
      failed: row.get( "failed_requests" ),
      cancelled: row.get( "cancelled_requests" ),
    },
    progress_line: row.get( "progress_line" ),
    cancel_requested: row.get::< i64, _ >( "cancel_requested" ) != 0,
    in_progress_at: row.get( "in_progress_at" ),
    finalizing_at: row.get( "finalizing_at" ),
    completed_at: row.get( "completed_at" ),
    cancelled_at: row.get( "cancelled_at" ),
    failed_at: row.get( "failed_at" ),
    expires_at: row.get( "expires_at" ),
    created_at: row.get( "created_at" ),
    updated_at: row.get( "updated_at" ),
  } )
}

/// Fields for inserting a batch
#[ derive( Debug, Clone ) ]
pub struct NewBatch
{
  pub tenant_id: Uuid,
  pub api_key_id: Uuid,
  pub endpoint: String,
  pub completion_window: String,
  pub input_file_id: Uuid,
  pub metadata: serde_json::Value,
  pub max_concurrency: i64,
  pub total_requests: i64,
  pub expires_at: Option< i64 >,
}

impl Store
{
  /// Insert a batch in `validating` status
  pub async fn create_batch( &self, new: NewBatch ) -> Result< BatchRecord >
  {
    let id = Uuid::new_v4();
    let now = now_ms();

    sqlx::query(
      "INSERT INTO batches \
       (id, tenant_id, api_key_id, endpoint, completion_window, input_file_id, metadata, \
        max_concurrency, total_requests, expires_at, created_at, updated_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)"
    )
    .bind( id )
    .bind( new.tenant_id )
    .bind( new.api_key_id )
    .bind( &new.endpoint )
    .bind( &new.completion_window )
    .bind( new.input_file_id )
    .bind( serde_json::to_string( &new.metadata ).unwrap_or_else( |_| "{}".to_string() ) )
    .bind( new.max_concurrency )
    .bind( new.total_requests )
    .bind( new.expires_at )
    .bind( now )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    self.get_batch( id ).await
  }

  /// Fetch a batch by id
  pub async fn get_batch( &self, id: Uuid ) -> Result< BatchRecord >
  {
    let row = sqlx::query( "SELECT * FROM batches WHERE id = $1" )
      .bind( id )
      .fetch_optional( &self.pool )
      .await
      .map_err( db_err )?
      .ok_or_else( || GatewayError::NotFound( "batch".to_string() ) )?;

    decode( &row )
  }

  /// Batches of a tenant, newest first
  pub async fn list_batches_for_tenant( &self, tenant_id: Uuid, limit: i64, offset: i64 ) -> Result< Vec< BatchRecord > >
  {
    let rows = sqlx::query(
      "SELECT * FROM batches WHERE tenant_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3"
    )
    .bind( tenant_id )
    .bind( limit )
    .bind( offset )
    .fetch_all( &self.pool )
    .await
    .map_err( db_err )?;

    rows.iter().map( decode ).collect()
  }

  /// Batches the recovery scan must resume
  pub async fn list_non_terminal_batches( &self ) -> Result< Vec< BatchRecord > >
  {
    let rows = sqlx::query(
      "SELECT * FROM batches WHERE status IN ('validating', 'in_progress', 'finalizing') ORDER BY created_at"
    )
    .fetch_all( &self.pool )
    .await
    .map_err( db_err )?;

    rows.iter().map( decode ).collect()
  }

  /// Transition a batch, stamping the matching timestamp column
  ///
  /// # Errors
  ///
  /// `conflict` when the transition is not legal from the current status.
  pub async fn update_batch_status( &self, id: Uuid, next: BatchStatus ) -> Result< BatchRecord >
  {
    let mut tx = self.pool.begin().await.map_err( db_err )?;

    let current_raw: String = sqlx::query_scalar( "SELECT status FROM batches WHERE id = $1" )
      .bind( id )
      .fetch_optional( &mut *tx )
      .await
      .map_err( db_err )?
      .ok_or_else( || GatewayError::NotFound( "batch".to_string() ) )?;

    let current = BatchStatus::parse( &current_raw )
      .ok_or_else( || GatewayError::Internal( format!( "bad batch status {current_raw}" ) ) )?;

    if !current.can_transition_to( next )
    {
      return Err( GatewayError::Conflict(
        format!( "batch cannot move from {} to {}", current.as_str(), next.as_str() )
      ) );
    }

    let now = now_ms();
    let stamp_column = match next
    {
      BatchStatus::InProgress => Some( "in_progress_at" ),
      BatchStatus::Finalizing => Some( "finalizing_at" ),
      BatchStatus::Completed => Some( "completed_at" ),
      BatchStatus::Cancelled => Some( "cancelled_at" ),
      BatchStatus::Failed | BatchStatus::Expired => Some( "failed_at" ),
      BatchStatus::Validating => None,
    };

    let sql = match stamp_column
    {
      Some( column ) => format!(
        "UPDATE batches SET status = $1, {column} = $2, updated_at = $2 WHERE id = $3"
      ),
      None => "UPDATE batches SET status = $1, updated_at = $2 WHERE id = $3".to_string(),
    };

    sqlx::query( &sql )
      .bind( next.as_str() )
      .bind( now )
      .bind( id )
      .execute( &mut *tx )
      .await
      .map_err( db_err )?;

    tx.commit().await.map_err( db_err )?;

    self.get_batch( id ).await
  }

  /// Bump line counters and the resume cursor
  pub async fn update_batch_progress(
    &self,
    id: Uuid,
    counts: RequestCounts,
    progress_line: i64,
  ) -> Result< () >
  {
    sqlx::query(
      "UPDATE batches SET completed_requests = $1, failed_requests = $2, cancelled_requests = $3, \
       progress_line = $4, updated_at = $5 WHERE id = $6"
    )
    .bind( counts.completed )
    .bind( counts.failed )
    .bind( counts.cancelled )
    .bind( progress_line )
    .bind( now_ms() )
    .bind( id )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    Ok( () )
  }

  /// Attach the assembled output / error files
  pub async fn set_batch_result_files(
    &self,
    id: Uuid,
    output_file_id: Option< Uuid >,
    error_file_id: Option< Uuid >,
  ) -> Result< () >
  {
    sqlx::query(
      "UPDATE batches SET output_file_id = $1, error_file_id = $2, updated_at = $3 WHERE id = $4"
    )
    .bind( output_file_id )
    .bind( error_file_id )
    .bind( now_ms() )
    .bind( id )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    Ok( () )
  }

  /// Flag a batch for cancellation; workers observe the flag and drain
  pub async fn request_batch_cancel( &self, id: Uuid ) -> Result< () >
  {
    sqlx::query( "UPDATE batches SET cancel_requested = 1, updated_at = $1 WHERE id = $2" )
      .bind( now_ms() )
      .bind( id )
      .execute( &self.pool )
      .await
      .map_err( db_err )?;

    Ok( () )
  }
}

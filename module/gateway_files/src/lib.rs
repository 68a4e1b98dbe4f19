//! Files service
//!
//! Upload with incremental SHA-256, TTL-bounded retention, and a sweeper
//! that turns expired rows into deleted ones and removes their blobs.

pub mod blob;

pub use blob::{ BlobStore, FsBlobStore, MemoryBlobStore };

use std::sync::Arc;
use std::time::Duration;

use sha2::{ Digest, Sha256 };
use uuid::Uuid;

use gateway_store::{ now_ms, files::NewFile, FileRecord, Store };
use gateway_types::{ FilePurpose, FileSettings, GatewayError, Result };

/// Sweep cadence
pub const SWEEP_INTERVAL: Duration = Duration::from_secs( 60 );

/// The files service
#[ derive( Debug, Clone ) ]
pub struct FilesService
{
  store: Store,
  blob: Arc< dyn BlobStore >,
}

impl FilesService
{
  #[ must_use ]
  pub fn new( store: Store, blob: Arc< dyn BlobStore > ) -> Self
  {
    Self { store, blob }
  }

  /// Store content and its metadata row
  ///
  /// The hash runs incrementally over the chunks as they arrive from the
  /// multipart reader; the size cap is enforced before anything touches the
  /// blob store.
  ///
  /// # Errors
  ///
  /// `payload_too_large` beyond `settings.max_size_mb`; `bad_request` for a
  /// TTL above the admin ceiling.
  pub async fn upload(
    &self,
    tenant_id: Uuid,
    filename: &str,
    purpose: FilePurpose,
    content_type: &str,
    chunks: &[ &[ u8 ] ],
    ttl_seconds: Option< i64 >,
    settings: &FileSettings,
  ) -> Result< FileRecord >
  {
    let max_bytes = settings.max_size_mb.max( 1 ) * 1024 * 1024;

    let mut hasher = Sha256::new();
    let mut data = Vec::new();
    for chunk in chunks
    {
      if ( data.len() + chunk.len() ) as i64 > max_bytes
      {
        return Err( GatewayError::PayloadTooLarge );
      }
      hasher.update( chunk );
      data.extend_from_slice( chunk );
    }

    let checksum = hex::encode( hasher.finalize() );

    let ttl = match ttl_seconds
    {
      Some( requested ) if requested > settings.max_ttl_seconds =>
      {
        return Err( GatewayError::BadRequest( "requested ttl exceeds the allowed maximum".to_string() ) );
      }
      Some( requested ) if requested > 0 => requested,
      _ => settings.default_ttl_seconds.min( settings.max_ttl_seconds ),
    };

    let record = self.store
      .create_file( NewFile
      {
        tenant_id,
        filename: filename.to_string(),
        purpose,
        content_type: content_type.to_string(),
        bytes: data.len() as i64,
        storage_backend: self.blob.backend_name().to_string(),
        checksum,
        expires_at: now_ms() + ttl * 1000,
      } )
      .await?;

    self.blob.put( &blob_key( tenant_id, record.id ), &data ).await?;

    Ok( record )
  }

  /// Fetch metadata, honouring tenancy and expiry
  pub async fn get_meta( &self, tenant_id: Uuid, file_id: Uuid ) -> Result< FileRecord >
  {
    let record = self.store.get_file( file_id ).await?;

    if record.tenant_id != tenant_id
    {
      return Err( GatewayError::NotFound( "file".to_string() ) );
    }
    if record.deleted_at.is_some() || record.expires_at < now_ms()
    {
      return Err( GatewayError::NotFound( "file".to_string() ) );
    }

    Ok( record )
  }

  /// Open content with its metadata
  pub async fn open( &self, tenant_id: Uuid, file_id: Uuid ) -> Result< ( FileRecord, Vec< u8 > ) >
  {
    let record = self.get_meta( tenant_id, file_id ).await?;
    let data = self.blob.open( &blob_key( tenant_id, file_id ) ).await?;
    Ok( ( record, data ) )
  }

  /// List a tenant's live files
  pub async fn list( &self, tenant_id: Uuid, limit: i64, offset: i64 ) -> Result< Vec< FileRecord > >
  {
    self.store.list_files_for_tenant( tenant_id, limit, offset ).await
  }

  /// Soft-delete a file and drop its blob
  pub async fn delete( &self, tenant_id: Uuid, file_id: Uuid ) -> Result< () >
  {
    let record = self.store.get_file( file_id ).await?;
    if record.tenant_id != tenant_id
    {
      return Err( GatewayError::NotFound( "file".to_string() ) );
    }

    self.store.mark_file_deleted( file_id ).await?;
    if let Err( err ) = self.blob.delete( &blob_key( tenant_id, file_id ) ).await
    {
      tracing::warn!( file_id = %file_id, error = %err, "blob removal failed, row already deleted" );
    }

    Ok( () )
  }

  /// One retention pass: mark expired rows deleted, drop their blobs
  pub async fn sweep_once( &self ) -> Result< u64 >
  {
    let expired = self.store.list_expired_files( now_ms(), 500 ).await?;
    let mut swept = 0;

    for record in expired
    {
      if let Err( err ) = self.store.mark_file_deleted( record.id ).await
      {
        tracing::warn!( file_id = %record.id, error = %err, "expired file not marked" );
        continue;
      }

      let blob = Arc::clone( &self.blob );
      let key = blob_key( record.tenant_id, record.id );
      tokio::spawn( async move
      {
        let _ = blob.delete( &key ).await;
      } );

      swept += 1;
    }

    Ok( swept )
  }

  /// Run the sweeper until the process stops
  pub async fn run_sweeper( self )
  {
    let mut ticker = tokio::time::interval( SWEEP_INTERVAL );
    loop
    {
      ticker.tick().await;
      match self.sweep_once().await
      {
        Ok( 0 ) => {}
        Ok( swept ) => tracing::info!( swept, "expired files removed" ),
        Err( err ) => tracing::warn!( error = %err, "file sweep failed" ),
      }
    }
  }
}

/// Blob key for a file
#[ must_use ]
pub fn blob_key( tenant_id: Uuid, file_id: Uuid ) -> String
{
  format!( "{tenant_id}/{file_id}" )
}

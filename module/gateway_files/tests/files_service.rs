//! Integration tests for the files service

use std::sync::Arc;

use sha2::{ Digest, Sha256 };

use gateway_files::{ blob_key, FilesService, MemoryBlobStore };
use gateway_store::now_ms;
use gateway_test_db::TestDatabaseBuilder;
use gateway_types::{ FilePurpose, FileSettings, FileStatus };

struct Fixture
{
  _db: gateway_test_db::TestDatabase,
  store: gateway_store::Store,
  service: FilesService,
  tenant_id: uuid::Uuid,
}

async fn fixture() -> Fixture
{
  let db = TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();
  let tenant = store.create_tenant( "acme", false ).await.expect( "tenant" );

  Fixture
  {
    service: FilesService::new( store.clone(), Arc::new( MemoryBlobStore::new() ) ),
    store,
    tenant_id: tenant.id,
    _db: db,
  }
}

fn settings() -> FileSettings
{
  FileSettings { max_size_mb: 1, default_ttl_seconds: 3600, max_ttl_seconds: 7200 }
}

#[ tokio::test ]
async fn test_upload_records_checksum_and_round_trips()
{
  let fx = fixture().await;

  let content = b"line one\nline two\n";
  let record = fx.service
    .upload( fx.tenant_id, "input.jsonl", FilePurpose::Batch, "application/jsonl", &[ content ], None, &settings() )
    .await
    .expect( "upload" );

  let expected = hex::encode( Sha256::digest( content ) );
  assert_eq!( record.checksum, expected );
  assert_eq!( record.bytes, content.len() as i64 );
  assert_eq!( record.status, FileStatus::Uploaded );
  assert_eq!( record.storage_backend, "memory" );

  let ( meta, data ) = fx.service.open( fx.tenant_id, record.id ).await.expect( "open" );
  assert_eq!( meta.id, record.id );
  assert_eq!( data, content );
}

#[ tokio::test ]
async fn test_upload_enforces_size_cap()
{
  let fx = fixture().await;

  let oversized = vec![ 0u8; 2 * 1024 * 1024 ];
  let err = fx.service
    .upload( fx.tenant_id, "big.bin", FilePurpose::UserUpload, "application/octet-stream", &[ &oversized ], None, &settings() )
    .await
    .expect_err( "too large" );

  assert_eq!( err.kind(), "payload_too_large" );
}

#[ tokio::test ]
async fn test_ttl_above_ceiling_is_rejected()
{
  let fx = fixture().await;

  let err = fx.service
    .upload( fx.tenant_id, "x.txt", FilePurpose::UserUpload, "text/plain", &[ b"x" ], Some( 999_999 ), &settings() )
    .await
    .expect_err( "ttl too long" );

  assert_eq!( err.kind(), "bad_request" );
}

#[ tokio::test ]
async fn test_open_after_expiry_is_not_found()
{
  let fx = fixture().await;

  let record = fx.service
    .upload( fx.tenant_id, "x.txt", FilePurpose::UserUpload, "text/plain", &[ b"payload" ], Some( 1 ), &settings() )
    .await
    .expect( "upload" );

  // Force the row past its TTL rather than sleeping
  sqlx::query( "UPDATE files SET expires_at = $1 WHERE id = $2" )
    .bind( now_ms() - 10 )
    .bind( record.id )
    .execute( fx.store.pool() )
    .await
    .expect( "age the file" );

  let err = fx.service.open( fx.tenant_id, record.id ).await.expect_err( "expired" );
  assert_eq!( err.kind(), "not_found" );
}

#[ tokio::test ]
async fn test_sweeper_marks_expired_rows_deleted()
{
  let fx = fixture().await;

  let record = fx.service
    .upload( fx.tenant_id, "x.txt", FilePurpose::UserUpload, "text/plain", &[ b"payload" ], None, &settings() )
    .await
    .expect( "upload" );

  sqlx::query( "UPDATE files SET expires_at = $1 WHERE id = $2" )
    .bind( now_ms() - 10 )
    .bind( record.id )
    .execute( fx.store.pool() )
    .await
    .expect( "age the file" );

  let swept = fx.service.sweep_once().await.expect( "sweep" );
  assert_eq!( swept, 1 );

  let row = fx.store.get_file( record.id ).await.expect( "row survives" );
  assert_eq!( row.status, FileStatus::Deleted );
  assert!( row.deleted_at.is_some() );

  // A second pass finds nothing
  assert_eq!( fx.service.sweep_once().await.expect( "sweep" ), 0 );
}

#[ tokio::test ]
async fn test_cross_tenant_access_reads_as_not_found()
{
  let fx = fixture().await;
  let other = fx.store.create_tenant( "rival", false ).await.expect( "tenant" );

  let record = fx.service
    .upload( fx.tenant_id, "x.txt", FilePurpose::UserUpload, "text/plain", &[ b"secret" ], None, &settings() )
    .await
    .expect( "upload" );

  let err = fx.service.open( other.id, record.id ).await.expect_err( "cross tenant" );
  assert_eq!( err.kind(), "not_found" );

  // Blob key embeds the owner, so even direct key math is tenant-scoped
  assert!( blob_key( fx.tenant_id, record.id ).starts_with( &fx.tenant_id.to_string() ) );
}

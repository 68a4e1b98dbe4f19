//! Integration tests for batch rows and the storage-level state machine

use gateway_store::batches::NewBatch;
use gateway_store::RequestCounts;
use gateway_test_db::TestDatabaseBuilder;
use gateway_types::BatchStatus;
use uuid::Uuid;

async fn seeded_batch( store: &gateway_store::Store ) -> gateway_store::BatchRecord
{
  let tenant = store.create_tenant( "acme", false ).await.expect( "tenant" );
  store
    .create_batch( NewBatch
    {
      tenant_id: tenant.id,
      api_key_id: Uuid::new_v4(),
      endpoint: "/v1/chat/completions".to_string(),
      completion_window: "24h".to_string(),
      input_file_id: Uuid::new_v4(),
      metadata: serde_json::json!( { "job": "nightly" } ),
      max_concurrency: 4,
      total_requests: 10,
      expires_at: None,
    } )
    .await
    .expect( "batch" )
}

#[ tokio::test ]
async fn test_batch_walks_the_happy_path()
{
  let db = TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();
  let batch = seeded_batch( &store ).await;

  assert_eq!( batch.status, BatchStatus::Validating );

  let batch = store.update_batch_status( batch.id, BatchStatus::InProgress ).await.expect( "start" );
  assert!( batch.in_progress_at.is_some() );

  let batch = store.update_batch_status( batch.id, BatchStatus::Finalizing ).await.expect( "finalize" );
  let batch = store.update_batch_status( batch.id, BatchStatus::Completed ).await.expect( "complete" );
  assert!( batch.completed_at.is_some() );
  assert!( batch.status.is_terminal() );
}

#[ tokio::test ]
async fn test_illegal_transitions_conflict()
{
  let db = TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();
  let batch = seeded_batch( &store ).await;

  // Cannot jump straight from validating to completed
  let err = store
    .update_batch_status( batch.id, BatchStatus::Completed )
    .await
    .expect_err( "skip states" );
  assert_eq!( err.kind(), "conflict" );

  // Terminal states are final
  store.update_batch_status( batch.id, BatchStatus::Cancelled ).await.expect( "cancel" );
  let err = store
    .update_batch_status( batch.id, BatchStatus::InProgress )
    .await
    .expect_err( "resurrect" );
  assert_eq!( err.kind(), "conflict" );
}

#[ tokio::test ]
async fn test_progress_and_result_files_round_trip()
{
  let db = TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();
  let batch = seeded_batch( &store ).await;

  let counts = RequestCounts { total: 10, completed: 6, failed: 1, cancelled: 3 };
  store.update_batch_progress( batch.id, counts, 10 ).await.expect( "progress" );

  let output = Uuid::new_v4();
  let errors = Uuid::new_v4();
  store.set_batch_result_files( batch.id, Some( output ), Some( errors ) ).await.expect( "files" );
  store.request_batch_cancel( batch.id ).await.expect( "cancel flag" );

  let loaded = store.get_batch( batch.id ).await.expect( "reload" );
  assert_eq!( loaded.request_counts.completed, 6 );
  assert_eq!( loaded.request_counts.failed, 1 );
  assert_eq!( loaded.request_counts.cancelled, 3 );
  assert_eq!( loaded.progress_line, 10 );
  assert_eq!( loaded.output_file_id, Some( output ) );
  assert_eq!( loaded.error_file_id, Some( errors ) );
  assert!( loaded.cancel_requested );

  // total = completed + failed + cancelled once terminal
  let counts = loaded.request_counts;
  assert_eq!( counts.total, counts.completed + counts.failed + counts.cancelled );
}

#[ tokio::test ]
async fn test_non_terminal_scan_for_recovery()
{
  let db = TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();

  let running = seeded_batch( &store ).await;
  store.update_batch_status( running.id, BatchStatus::InProgress ).await.expect( "start" );

  let finished = store
    .create_batch( NewBatch
    {
      tenant_id: running.tenant_id,
      api_key_id: Uuid::new_v4(),
      endpoint: "/v1/embeddings".to_string(),
      completion_window: "24h".to_string(),
      input_file_id: Uuid::new_v4(),
      metadata: serde_json::Value::Null,
      max_concurrency: 1,
      total_requests: 1,
      expires_at: None,
    } )
    .await
    .expect( "second batch" );
  store.update_batch_status( finished.id, BatchStatus::Cancelled ).await.expect( "cancel" );

  let open = store.list_non_terminal_batches().await.expect( "scan" );
  assert_eq!( open.len(), 1 );
  assert_eq!( open[ 0 ].id, running.id );
}

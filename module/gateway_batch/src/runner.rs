//! Batch execution
//!
//! One driver task per batch feeds a bounded worker pool. Every worker
//! re-enters the data-plane pipeline with the batch owner's credential
//! context, so guardrails, limits and budgets apply to each inner request
//! exactly as they would interactively.

use std::sync::{ Arc, Mutex };
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use gateway_catalog::SnapshotCache;
use gateway_executor::{ ApiEndpoint, Pipeline };
use gateway_files::{ BlobStore, FilesService };
use gateway_limits::resolve_effective;
use gateway_store::{ now_ms, batches::NewBatch, BatchRecord, RequestCounts, Store };
use gateway_types::
{
  BatchStatus,
  FilePurpose,
  GatewayError,
  RequestContext,
  Result,
  TenantStatus,
};

use crate::ingest::{ parse_input_lines, BatchLine };
use crate::{ ErrorBody, ErrorLine, OutputLine, OutputResponse };

/// Lines between sidecar flushes
const SIDECAR_FLUSH_EVERY: usize = 20;

#[ derive( Debug, Default ) ]
struct Buffers
{
  outputs: Vec< String >,
  errors: Vec< String >,
  completed: i64,
  failed: i64,
}

/// The batch engine
#[ derive( Debug ) ]
pub struct BatchEngine
{
  store: Store,
  files: FilesService,
  scratch: Arc< dyn BlobStore >,
  pipeline: Pipeline,
  snapshots: Arc< SnapshotCache >,
}

impl BatchEngine
{
  #[ must_use ]
  pub fn new(
    store: Store,
    files: FilesService,
    scratch: Arc< dyn BlobStore >,
    pipeline: Pipeline,
    snapshots: Arc< SnapshotCache >,
  ) -> Self
  {
    Self { store, files, scratch, pipeline, snapshots }
  }

  /// Validate the input file, create the batch and start it
  pub async fn create(
    self: Arc< Self >,
    tenant_id: Uuid,
    api_key_id: Uuid,
    endpoint: String,
    completion_window: String,
    input_file_id: Uuid,
    metadata: serde_json::Value,
    requested_concurrency: Option< i64 >,
  ) -> Result< BatchRecord >
  {
    let snapshot = self.snapshots.load();
    let settings = &snapshot.defaults.batch;

    if !settings.allowed_endpoints.iter().any( |allowed| allowed == &endpoint )
    {
      return Err( GatewayError::UnsupportedEndpoint( endpoint ) );
    }

    let ( record, content ) = self.files.open( tenant_id, input_file_id ).await?;
    if record.purpose != FilePurpose::Batch
    {
      return Err( GatewayError::BadRequest( "input file purpose must be `batch`".to_string() ) );
    }

    let content = String::from_utf8( content )
      .map_err( |_| GatewayError::BadRequest( "input file is not valid UTF-8".to_string() ) )?;
    let lines = parse_input_lines( &content, &settings.allowed_endpoints )?;

    // Worker pool bounded by the request, the admin ceiling and whatever
    // parallel headroom the tenant has.
    let tenant_override = self.store.get_tenant_rate_limit( tenant_id ).await?;
    let effective = resolve_effective( &snapshot.defaults.rate_limit, tenant_override, None );
    let mut max_concurrency = requested_concurrency
      .unwrap_or( settings.max_concurrency )
      .min( settings.max_concurrency );
    if effective.tenant.parallel_requests > 0
    {
      max_concurrency = max_concurrency.min( effective.tenant.parallel_requests );
    }
    max_concurrency = max_concurrency.max( 1 );

    let expiry_seconds = parse_completion_window( &completion_window )
      .unwrap_or( settings.default_expiry_seconds );

    let batch = self.store
      .create_batch( NewBatch
      {
        tenant_id,
        api_key_id,
        endpoint,
        completion_window,
        input_file_id,
        metadata,
        max_concurrency,
        total_requests: lines.len() as i64,
        expires_at: Some( now_ms() + expiry_seconds * 1000 ),
      } )
      .await?;

    Arc::clone( &self ).spawn_run( batch.id );

    Ok( batch )
  }

  /// Flag a batch for cancellation; running workers drain
  pub async fn cancel( &self, tenant_id: Uuid, batch_id: Uuid ) -> Result< BatchRecord >
  {
    let batch = self.store.get_batch( batch_id ).await?;
    if batch.tenant_id != tenant_id
    {
      return Err( GatewayError::NotFound( "batch".to_string() ) );
    }
    if batch.status.is_terminal()
    {
      return Err( GatewayError::Conflict( "batch already finished".to_string() ) );
    }

    self.store.request_batch_cancel( batch_id ).await?;
    self.store.get_batch( batch_id ).await
  }

  /// Resume every non-terminal batch after a restart
  pub async fn recover( self: Arc< Self > ) -> Result< usize >
  {
    let open = self.store.list_non_terminal_batches().await?;
    let count = open.len();

    for batch in open
    {
      tracing::info!( batch_id = %batch.id, status = batch.status.as_str(), "resuming batch" );
      Arc::clone( &self ).spawn_run( batch.id );
    }

    Ok( count )
  }

  /// Detach the driver task for one batch
  pub fn spawn_run( self: Arc< Self >, batch_id: Uuid )
  {
    tokio::spawn( async move
    {
      if let Err( err ) = self.run( batch_id ).await
      {
        tracing::error!( batch_id = %batch_id, error = %err, "batch run failed" );
        let _ = self.store.update_batch_status( batch_id, BatchStatus::Failed ).await;
      }
    } );
  }

  async fn run( &self, batch_id: Uuid ) -> Result< () >
  {
    let batch = self.store.get_batch( batch_id ).await?;

    let batch = match batch.status
    {
      BatchStatus::Validating => self.store.update_batch_status( batch_id, BatchStatus::InProgress ).await?,
      BatchStatus::InProgress => batch,
      BatchStatus::Finalizing =>
      {
        let restored = self.restore_buffers( batch.id ).await;
        return self.finalize( batch, restored, BatchStatus::Completed ).await;
      }
      _ => return Ok( () ),
    };

    let snapshot = self.snapshots.load();
    let ctx = self.context_for( &batch ).await?;

    let ( _, content ) = self.files.open( batch.tenant_id, batch.input_file_id ).await?;
    let content = String::from_utf8( content )
      .map_err( |_| GatewayError::Internal( "input file no longer valid UTF-8".to_string() ) )?;
    let lines = parse_input_lines( &content, &snapshot.defaults.batch.allowed_endpoints )?;

    let buffers = Arc::new( Mutex::new( self.restore_buffers( batch.id ).await ) );
    let semaphore = Arc::new( Semaphore::new( batch.max_concurrency.max( 1 ) as usize ) );
    let mut join = JoinSet::new();

    let start_line = batch.progress_line.max( 0 ) as usize;
    let mut dispatched = start_line;
    let mut outcome = BatchStatus::Finalizing;

    for ( index, line ) in lines.iter().enumerate().skip( start_line )
    {
      // Drain signals: cancellation and expiry stop dispatching new lines
      let fresh = self.store.get_batch( batch.id ).await?;
      if fresh.cancel_requested
      {
        outcome = BatchStatus::Cancelled;
        break;
      }
      if fresh.expires_at.is_some_and( |at| at < now_ms() )
      {
        outcome = BatchStatus::Expired;
        break;
      }

      let permit = Arc::clone( &semaphore )
        .acquire_owned()
        .await
        .map_err( |_| GatewayError::Internal( "batch semaphore closed".to_string() ) )?;

      let pipeline = self.pipeline.clone();
      let snapshot = Arc::clone( &snapshot );
      let spawn_buffers = Arc::clone( &buffers );
      let mut line_ctx = ctx.clone();
      line_ctx.request_id = format!( "batch_{}_{}", batch.id.as_simple(), index );
      let line = line.clone();

      join.spawn( async move
      {
        let _permit = permit;
        run_line( &pipeline, &snapshot, line_ctx, &line, &spawn_buffers ).await;
      } );

      dispatched = index + 1;

      let counts = self.counts_snapshot( &buffers, lines.len() as i64, 0 );
      self.store.update_batch_progress( batch.id, counts, dispatched as i64 ).await?;

      if dispatched % SIDECAR_FLUSH_EVERY == 0
      {
        self.flush_sidecars( batch.id, &buffers ).await;
      }
    }

    // In-flight workers are allowed to finish
    while join.join_next().await.is_some() {}

    self.flush_sidecars( batch.id, &buffers ).await;

    let buffers = match Arc::try_unwrap( buffers )
    {
      Ok( inner ) => inner.into_inner().unwrap_or_default(),
      Err( shared ) => Buffers
      {
        outputs: shared.lock().map( |b| b.outputs.clone() ).unwrap_or_default(),
        errors: shared.lock().map( |b| b.errors.clone() ).unwrap_or_default(),
        completed: shared.lock().map( |b| b.completed ).unwrap_or( 0 ),
        failed: shared.lock().map( |b| b.failed ).unwrap_or( 0 ),
      },
    };

    self.finalize( self.store.get_batch( batch.id ).await?, buffers, outcome ).await
  }

  async fn finalize( &self, batch: BatchRecord, buffers: Buffers, outcome: BatchStatus ) -> Result< () >
  {
    let snapshot = self.snapshots.load();

    // Assemble result files from whatever completed, even on cancel/expiry
    let output_file = if buffers.outputs.is_empty()
    {
      None
    }
    else
    {
      let content = format!( "{}\n", buffers.outputs.join( "\n" ) );
      Some(
        self.files
          .upload(
            batch.tenant_id,
            &format!( "batch_{}_output.jsonl", batch.id.as_simple() ),
            FilePurpose::BatchOutput,
            "application/jsonl",
            &[ content.as_bytes() ],
            None,
            &snapshot.defaults.files,
          )
          .await?,
      )
    };

    let error_file = if buffers.errors.is_empty()
    {
      None
    }
    else
    {
      let content = format!( "{}\n", buffers.errors.join( "\n" ) );
      Some(
        self.files
          .upload(
            batch.tenant_id,
            &format!( "batch_{}_errors.jsonl", batch.id.as_simple() ),
            FilePurpose::BatchErrors,
            "application/jsonl",
            &[ content.as_bytes() ],
            None,
            &snapshot.defaults.files,
          )
          .await?,
      )
    };

    self.store
      .set_batch_result_files(
        batch.id,
        output_file.map( |f| f.id ),
        error_file.map( |f| f.id ),
      )
      .await?;

    // Undispatched lines count as cancelled in the terminal tally
    let cancelled = ( batch.request_counts.total - buffers.completed - buffers.failed ).max( 0 );
    let counts = RequestCounts
    {
      total: batch.request_counts.total,
      completed: buffers.completed,
      failed: buffers.failed,
      cancelled,
    };
    self.store.update_batch_progress( batch.id, counts, batch.progress_line ).await?;

    match outcome
    {
      BatchStatus::Finalizing =>
      {
        self.store.update_batch_status( batch.id, BatchStatus::Finalizing ).await?;
        self.store.update_batch_status( batch.id, BatchStatus::Completed ).await?;
      }
      terminal =>
      {
        self.store.update_batch_status( batch.id, terminal ).await?;
      }
    }

    self.drop_sidecars( batch.id ).await;

    tracing::info!(
      batch_id = %batch.id,
      completed = counts.completed,
      failed = counts.failed,
      cancelled = counts.cancelled,
      "batch finished"
    );

    Ok( () )
  }

  /// Rebuild the owner's request context for inner dispatches
  async fn context_for( &self, batch: &BatchRecord ) -> Result< RequestContext >
  {
    let api_key = self.store.get_api_key( batch.api_key_id ).await?;
    if !api_key.is_active()
    {
      return Err( GatewayError::Unauthorized );
    }

    let tenant = self.store.get_tenant( batch.tenant_id ).await?;
    if tenant.status == TenantStatus::Suspended
    {
      return Err( GatewayError::TenantSuspended );
    }

    let snapshot = self.snapshots.load();
    let tenant_override = self.store.get_tenant_rate_limit( tenant.id ).await?;
    let key_override = self.store.get_api_key_rate_limit( api_key.id ).await?;
    let effective = resolve_effective( &snapshot.defaults.rate_limit, tenant_override, key_override );

    Ok( RequestContext
    {
      tenant_id: tenant.id,
      api_key_id: api_key.id,
      api_key_prefix: api_key.prefix.clone(),
      owner_user_id: api_key.owner_user_id,
      key_limits: effective.key,
      tenant_limits: effective.tenant,
      key_quota: api_key.quota,
      request_id: format!( "batch_{}", batch.id.as_simple() ),
    } )
  }

  fn counts_snapshot( &self, buffers: &Arc< Mutex< Buffers > >, total: i64, cancelled: i64 ) -> RequestCounts
  {
    let guard = buffers.lock();
    match guard
    {
      Ok( guard ) => RequestCounts
      {
        total,
        completed: guard.completed,
        failed: guard.failed,
        cancelled,
      },
      Err( _ ) => RequestCounts { total, completed: 0, failed: 0, cancelled },
    }
  }

  async fn restore_buffers( &self, batch_id: Uuid ) -> Buffers
  {
    let mut buffers = Buffers::default();

    if let Ok( data ) = self.scratch.open( &sidecar_key( batch_id, "output" ) ).await
    {
      buffers.outputs = String::from_utf8_lossy( &data )
        .lines()
        .map( str::to_string )
        .collect();
      buffers.completed = buffers.outputs.len() as i64;
    }
    if let Ok( data ) = self.scratch.open( &sidecar_key( batch_id, "errors" ) ).await
    {
      buffers.errors = String::from_utf8_lossy( &data )
        .lines()
        .map( str::to_string )
        .collect();
      buffers.failed = buffers.errors.len() as i64;
    }

    buffers
  }

  async fn flush_sidecars( &self, batch_id: Uuid, buffers: &Arc< Mutex< Buffers > > )
  {
    let ( outputs, errors ) = match buffers.lock()
    {
      Ok( guard ) => ( guard.outputs.join( "\n" ), guard.errors.join( "\n" ) ),
      Err( _ ) => return,
    };

    if !outputs.is_empty()
    {
      let _ = self.scratch.put( &sidecar_key( batch_id, "output" ), outputs.as_bytes() ).await;
    }
    if !errors.is_empty()
    {
      let _ = self.scratch.put( &sidecar_key( batch_id, "errors" ), errors.as_bytes() ).await;
    }
  }

  async fn drop_sidecars( &self, batch_id: Uuid )
  {
    let _ = self.scratch.delete( &sidecar_key( batch_id, "output" ) ).await;
    let _ = self.scratch.delete( &sidecar_key( batch_id, "errors" ) ).await;
  }
}

/// Scratch key for a batch sidecar file
#[ must_use ]
fn sidecar_key( batch_id: Uuid, kind: &str ) -> String
{
  format!( "{batch_id}/{kind}" )
}

async fn run_line(
  pipeline: &Pipeline,
  snapshot: &gateway_catalog::CatalogSnapshot,
  ctx: RequestContext,
  line: &BatchLine,
  buffers: &Arc< Mutex< Buffers > >,
)
{
  let endpoint = match ApiEndpoint::parse( &line.url )
  {
    Ok( endpoint ) => endpoint,
    Err( err ) =>
    {
      push_error( buffers, line, &err );
      return;
    }
  };

  match pipeline.execute( &ctx, snapshot, endpoint, line.body.clone() ).await
  {
    Ok( response ) =>
    {
      let output = OutputLine
      {
        id: format!( "batch_req_{}", Uuid::new_v4().as_simple() ),
        custom_id: &line.custom_id,
        response: OutputResponse
        {
          status_code: 200,
          request_id: &ctx.request_id,
          body: &response.body,
        },
      };

      if let Ok( serialized ) = serde_json::to_string( &output )
      {
        if let Ok( mut guard ) = buffers.lock()
        {
          guard.outputs.push( serialized );
          guard.completed += 1;
        }
      }
    }
    Err( err ) => push_error( buffers, line, &err ),
  }
}

fn push_error( buffers: &Arc< Mutex< Buffers > >, line: &BatchLine, err: &GatewayError )
{
  let message = err.to_string();
  let error_line = ErrorLine
  {
    id: format!( "batch_req_{}", Uuid::new_v4().as_simple() ),
    custom_id: &line.custom_id,
    error: ErrorBody
    {
      code: err.kind(),
      message: &message,
    },
  };

  if let Ok( serialized ) = serde_json::to_string( &error_line )
  {
    if let Ok( mut guard ) = buffers.lock()
    {
      guard.errors.push( serialized );
      guard.failed += 1;
    }
  }
}

/// Parse completion windows like `24h` or `7d` into seconds
fn parse_completion_window( window: &str ) -> Option< i64 >
{
  let window = window.trim();
  let ( digits, unit ) = window.split_at( window.len().checked_sub( 1 )? );
  let value: i64 = digits.parse().ok()?;

  match unit
  {
    "h" => Some( value.checked_mul( 3600 )? ),
    "d" => Some( value.checked_mul( 24 * 3600 )? ),
    "m" => Some( value.checked_mul( 60 )? ),
    _ => None,
  }
}

/// Sweep non-terminal batches past their expiry once a minute
///
/// The running driver observes expiry itself; this covers batches whose
/// driver is gone (crash before resume).
pub async fn run_expiry_sweeper( store: Store )
{
  let mut ticker = tokio::time::interval( Duration::from_secs( 60 ) );
  loop
  {
    ticker.tick().await;
    let Ok( open ) = store.list_non_terminal_batches().await else
    {
      continue;
    };

    for batch in open
    {
      if batch.expires_at.is_some_and( |at| at < now_ms() )
      {
        tracing::info!( batch_id = %batch.id, "batch expired" );
        let _ = store.update_batch_status( batch.id, BatchStatus::Expired ).await;
      }
    }
  }
}

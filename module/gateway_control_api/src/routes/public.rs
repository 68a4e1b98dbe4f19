//! Public data plane: `/v1/*`
//!
//! Bearer-authenticated, OpenAI-compatible. Model endpoints run the full
//! pipeline; files and batches are tenant-scoped CRUD over their services.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{ DefaultBodyLimit, Multipart, Path, Query, State };
use axum::http::header;
use axum::response::sse::{ Event, KeepAlive, Sse };
use axum::response::{ IntoResponse, Response };
use axum::routing::{ get, post };
use axum::{ Json, Router };
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{ json, Value };
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use gateway_executor::{ ApiEndpoint, StreamFrame };
use gateway_store::{ BatchRecord, FileRecord };
use gateway_types::{ FilePurpose, GatewayError };

use crate::error::{ ApiError, ApiResult, JsonBody };
use crate::state::{ ApiCredential, AppState };

/// Upload ceiling for the multipart route; the per-tenant limit from admin
/// settings is enforced underneath
const MULTIPART_BODY_LIMIT: usize = 256 * 1024 * 1024;

pub fn router() -> Router< AppState >
{
  Router::new()
    .route( "/v1/models", get( list_models ) )
    .route( "/v1/chat/completions", post( chat_completions ) )
    .route( "/v1/embeddings", post( embeddings ) )
    .route( "/v1/images/generations", post( images_generations ) )
    .route( "/v1/images/edits", post( images_edits ) )
    .route( "/v1/images/variations", post( images_variations ) )
    .route( "/v1/audio/transcriptions", post( audio_transcriptions ) )
    .route( "/v1/audio/translations", post( audio_translations ) )
    .route( "/v1/audio/speech", post( audio_speech ) )
    .route(
      "/v1/files",
      post( upload_file ).get( list_files ).layer( DefaultBodyLimit::max( MULTIPART_BODY_LIMIT ) ),
    )
    .route( "/v1/files/:id", get( get_file ).delete( delete_file ) )
    .route( "/v1/files/:id/content", get( file_content ) )
    .route( "/v1/batches", post( create_batch ).get( list_batches ) )
    .route( "/v1/batches/:id", get( get_batch ) )
    .route( "/v1/batches/:id/cancel", post( cancel_batch ) )
    .route( "/v1/batches/:id/output", get( batch_output ) )
    .route( "/v1/batches/:id/errors", get( batch_errors ) )
}

async fn list_models( cred: ApiCredential ) -> Json< Value >
{
  let models: Vec< Value > = cred
    .snapshot
    .aliases_for_tenant( cred.context.tenant_id )
    .into_iter()
    .map( |model| json!( {
      "id": model.alias,
      "object": "model",
      "owned_by": model.provider.as_str(),
    } ) )
    .collect();

  Json( json!( { "object": "list", "data": models } ) )
}

async fn chat_completions(
  State( state ): State< AppState >,
  cred: ApiCredential,
  JsonBody( body ): JsonBody< Value >,
) -> ApiResult< Response >
{
  let wants_stream = body.get( "stream" ).and_then( Value::as_bool ).unwrap_or( false );

  if wants_stream
  {
    let rx = state.pipeline
      .execute_stream( cred.context, cred.snapshot, body )
      .await?;

    let events = ReceiverStream::new( rx ).map( |frame| -> Result< Event, Infallible >
    {
      match frame
      {
        StreamFrame::Data( payload ) => Ok( Event::default().data( payload ) ),
        StreamFrame::Done => Ok( Event::default().data( "[DONE]" ) ),
      }
    } );

    return Ok( Sse::new( events ).keep_alive( KeepAlive::default() ).into_response() );
  }

  buffered( &state, &cred, ApiEndpoint::ChatCompletions, body ).await
}

async fn embeddings(
  State( state ): State< AppState >,
  cred: ApiCredential,
  JsonBody( body ): JsonBody< Value >,
) -> ApiResult< Response >
{
  buffered( &state, &cred, ApiEndpoint::Embeddings, body ).await
}

async fn images_generations(
  State( state ): State< AppState >,
  cred: ApiCredential,
  JsonBody( body ): JsonBody< Value >,
) -> ApiResult< Response >
{
  buffered( &state, &cred, ApiEndpoint::ImagesGenerations, body ).await
}

async fn images_edits(
  State( state ): State< AppState >,
  cred: ApiCredential,
  JsonBody( body ): JsonBody< Value >,
) -> ApiResult< Response >
{
  buffered( &state, &cred, ApiEndpoint::ImagesEdits, body ).await
}

async fn images_variations(
  State( state ): State< AppState >,
  cred: ApiCredential,
  JsonBody( body ): JsonBody< Value >,
) -> ApiResult< Response >
{
  buffered( &state, &cred, ApiEndpoint::ImagesVariations, body ).await
}

async fn audio_transcriptions(
  State( state ): State< AppState >,
  cred: ApiCredential,
  JsonBody( body ): JsonBody< Value >,
) -> ApiResult< Response >
{
  buffered( &state, &cred, ApiEndpoint::AudioTranscriptions, body ).await
}

async fn audio_translations(
  State( state ): State< AppState >,
  cred: ApiCredential,
  JsonBody( body ): JsonBody< Value >,
) -> ApiResult< Response >
{
  buffered( &state, &cred, ApiEndpoint::AudioTranslations, body ).await
}

async fn audio_speech(
  State( state ): State< AppState >,
  cred: ApiCredential,
  JsonBody( body ): JsonBody< Value >,
) -> ApiResult< Response >
{
  buffered( &state, &cred, ApiEndpoint::AudioSpeech, body ).await
}

async fn buffered(
  state: &AppState,
  cred: &ApiCredential,
  endpoint: ApiEndpoint,
  body: Value,
) -> ApiResult< Response >
{
  let outcome = state.pipeline
    .execute( &cred.context, &cred.snapshot, endpoint, body )
    .await?;

  let mut response = Json( outcome.body ).into_response();

  if !outcome.dropped_fields.is_empty()
  {
    if let Ok( value ) = header::HeaderValue::from_str( &outcome.dropped_fields.join( "," ) )
    {
      response.headers_mut().insert( "x-gateway-dropped-params", value );
    }
  }

  Ok( response )
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

fn file_json( record: &FileRecord ) -> Value
{
  json!( {
    "id": record.id,
    "object": "file",
    "bytes": record.bytes,
    "created_at": record.created_at / 1000,
    "expires_at": record.expires_at / 1000,
    "filename": record.filename,
    "purpose": record.purpose.as_str(),
    "status": record.status.as_str(),
    "checksum": record.checksum,
  } )
}

async fn upload_file(
  State( state ): State< AppState >,
  cred: ApiCredential,
  mut multipart: Multipart,
) -> ApiResult< Json< Value > >
{
  let mut purpose = FilePurpose::UserUpload;
  let mut filename = String::from( "upload" );
  let mut content_type = String::from( "application/octet-stream" );
  let mut data: Option< Vec< u8 > > = None;

  while let Some( field ) = multipart
    .next_field()
    .await
    .map_err( |e| ApiError( GatewayError::BadRequest( format!( "multipart: {e}" ) ) ) )?
  {
    match field.name().unwrap_or_default()
    {
      "purpose" =>
      {
        let raw = field
          .text()
          .await
          .map_err( |e| ApiError( GatewayError::BadRequest( format!( "multipart: {e}" ) ) ) )?;
        purpose = FilePurpose::parse( &raw )
          .ok_or_else( || ApiError( GatewayError::BadRequest( format!( "unknown purpose {raw}" ) ) ) )?;
      }
      "file" =>
      {
        if let Some( name ) = field.file_name()
        {
          filename = name.to_string();
        }
        if let Some( mime ) = field.content_type()
        {
          content_type = mime.to_string();
        }
        let bytes = field
          .bytes()
          .await
          .map_err( |e| ApiError( GatewayError::BadRequest( format!( "multipart: {e}" ) ) ) )?;
        data = Some( bytes.to_vec() );
      }
      _ => {}
    }
  }

  let Some( data ) = data else
  {
    return Err( ApiError( GatewayError::BadRequest( "missing `file` field".to_string() ) ) );
  };

  let record = state.files
    .upload(
      cred.context.tenant_id,
      &filename,
      purpose,
      &content_type,
      &[ &data ],
      None,
      &cred.snapshot.defaults.files,
    )
    .await?;

  Ok( Json( file_json( &record ) ) )
}

#[ derive( Debug, Deserialize ) ]
struct Paging
{
  #[ serde( default = "default_limit" ) ]
  limit: i64,
  #[ serde( default ) ]
  offset: i64,
}

fn default_limit() -> i64
{
  50
}

async fn list_files(
  State( state ): State< AppState >,
  cred: ApiCredential,
  Query( paging ): Query< Paging >,
) -> ApiResult< Json< Value > >
{
  let records = state.files
    .list( cred.context.tenant_id, paging.limit.clamp( 1, 200 ), paging.offset.max( 0 ) )
    .await?;

  Ok( Json( json!( {
    "object": "list",
    "data": records.iter().map( file_json ).collect::< Vec< _ > >(),
  } ) ) )
}

async fn get_file(
  State( state ): State< AppState >,
  cred: ApiCredential,
  Path( id ): Path< Uuid >,
) -> ApiResult< Json< Value > >
{
  let record = state.files.get_meta( cred.context.tenant_id, id ).await?;
  Ok( Json( file_json( &record ) ) )
}

async fn delete_file(
  State( state ): State< AppState >,
  cred: ApiCredential,
  Path( id ): Path< Uuid >,
) -> ApiResult< Json< Value > >
{
  state.files.delete( cred.context.tenant_id, id ).await?;
  Ok( Json( json!( { "id": id, "object": "file", "deleted": true } ) ) )
}

async fn file_content(
  State( state ): State< AppState >,
  cred: ApiCredential,
  Path( id ): Path< Uuid >,
) -> ApiResult< Response >
{
  let ( record, data ) = state.files.open( cred.context.tenant_id, id ).await?;

  let mut response = data.into_response();
  if let Ok( value ) = header::HeaderValue::from_str( &record.content_type )
  {
    response.headers_mut().insert( header::CONTENT_TYPE, value );
  }

  Ok( response )
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

fn batch_json( record: &BatchRecord ) -> Value
{
  json!( {
    "id": record.id,
    "object": "batch",
    "endpoint": record.endpoint,
    "input_file_id": record.input_file_id,
    "completion_window": record.completion_window,
    "status": record.status.as_str(),
    "output_file_id": record.output_file_id,
    "error_file_id": record.error_file_id,
    "created_at": record.created_at / 1000,
    "in_progress_at": record.in_progress_at.map( |t| t / 1000 ),
    "finalizing_at": record.finalizing_at.map( |t| t / 1000 ),
    "completed_at": record.completed_at.map( |t| t / 1000 ),
    "cancelled_at": record.cancelled_at.map( |t| t / 1000 ),
    "failed_at": record.failed_at.map( |t| t / 1000 ),
    "expires_at": record.expires_at.map( |t| t / 1000 ),
    "metadata": record.metadata,
    "request_counts": {
      "total": record.request_counts.total,
      "completed": record.request_counts.completed,
      "failed": record.request_counts.failed,
      "cancelled": record.request_counts.cancelled,
    },
  } )
}

#[ derive( Debug, Deserialize ) ]
struct CreateBatchRequest
{
  input_file_id: Uuid,
  endpoint: String,
  #[ serde( default = "default_completion_window" ) ]
  completion_window: String,
  #[ serde( default ) ]
  metadata: Value,
  #[ serde( default ) ]
  max_concurrency: Option< i64 >,
}

fn default_completion_window() -> String
{
  "24h".to_string()
}

async fn create_batch(
  State( state ): State< AppState >,
  cred: ApiCredential,
  JsonBody( request ): JsonBody< CreateBatchRequest >,
) -> ApiResult< Json< Value > >
{
  let record = Arc::clone( &state.batches )
    .create(
      cred.context.tenant_id,
      cred.context.api_key_id,
      request.endpoint,
      request.completion_window,
      request.input_file_id,
      request.metadata,
      request.max_concurrency,
    )
    .await?;

  Ok( Json( batch_json( &record ) ) )
}

async fn list_batches(
  State( state ): State< AppState >,
  cred: ApiCredential,
  Query( paging ): Query< Paging >,
) -> ApiResult< Json< Value > >
{
  let records = state.store
    .list_batches_for_tenant( cred.context.tenant_id, paging.limit.clamp( 1, 200 ), paging.offset.max( 0 ) )
    .await?;

  Ok( Json( json!( {
    "object": "list",
    "data": records.iter().map( batch_json ).collect::< Vec< _ > >(),
  } ) ) )
}

async fn get_batch(
  State( state ): State< AppState >,
  cred: ApiCredential,
  Path( id ): Path< Uuid >,
) -> ApiResult< Json< Value > >
{
  let record = state.store.get_batch( id ).await?;
  if record.tenant_id != cred.context.tenant_id
  {
    return Err( ApiError( GatewayError::NotFound( "batch".to_string() ) ) );
  }

  Ok( Json( batch_json( &record ) ) )
}

async fn cancel_batch(
  State( state ): State< AppState >,
  cred: ApiCredential,
  Path( id ): Path< Uuid >,
) -> ApiResult< Json< Value > >
{
  let record = state.batches.cancel( cred.context.tenant_id, id ).await?;
  Ok( Json( batch_json( &record ) ) )
}

async fn batch_output(
  State( state ): State< AppState >,
  cred: ApiCredential,
  Path( id ): Path< Uuid >,
) -> ApiResult< Response >
{
  batch_result_file( &state, &cred, id, true ).await
}

async fn batch_errors(
  State( state ): State< AppState >,
  cred: ApiCredential,
  Path( id ): Path< Uuid >,
) -> ApiResult< Response >
{
  batch_result_file( &state, &cred, id, false ).await
}

async fn batch_result_file(
  state: &AppState,
  cred: &ApiCredential,
  batch_id: Uuid,
  output: bool,
) -> ApiResult< Response >
{
  let record = state.store.get_batch( batch_id ).await?;
  if record.tenant_id != cred.context.tenant_id
  {
    return Err( ApiError( GatewayError::NotFound( "batch".to_string() ) ) );
  }

  let file_id = if output { record.output_file_id } else { record.error_file_id };
  let Some( file_id ) = file_id else
  {
    return Err( ApiError( GatewayError::NotFound( "batch result file".to_string() ) ) );
  };

  let ( _, data ) = state.files.open( cred.context.tenant_id, file_id ).await?;

  let mut response = data.into_response();
  response.headers_mut().insert(
    header::CONTENT_TYPE,
    header::HeaderValue::from_static( "application/jsonl" ),
  );

  Ok( response )
}

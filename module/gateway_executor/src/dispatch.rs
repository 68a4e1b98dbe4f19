//! Upstream dispatch and response normalization
//!
//! Buffered calls return the normalized OpenAI-shaped body plus metered
//! usage. Streaming calls hand back the raw byte stream; the pipeline owns
//! the pump so it can tap content for guardrails while forwarding chunks.

use std::time::Duration;

use serde_json::{ json, Value };

use gateway_types::{ GatewayError, ProviderFamily, Result };

use crate::translate::WireRequest;

/// Token counts metered for one request
#[ derive( Debug, Clone, Copy, Default, PartialEq, Eq ) ]
pub struct UsageTokens
{
  pub prompt_tokens: i64,
  pub completion_tokens: i64,
  pub total_tokens: i64,
}

impl UsageTokens
{
  #[ must_use ]
  pub fn new( prompt: i64, completion: i64 ) -> Self
  {
    Self
    {
      prompt_tokens: prompt,
      completion_tokens: completion,
      total_tokens: prompt + completion,
    }
  }
}

/// Result of a buffered upstream call
#[ derive( Debug, Clone ) ]
pub struct DispatchOutcome
{
  /// Body normalized to the OpenAI shape
  pub body: Value,
  pub usage: UsageTokens,
}

/// Send a buffered request and normalize the response
///
/// # Errors
///
/// Transport failures and upstream 5xx map to `upstream_unavailable`
/// (retryable by the pipeline); upstream 4xx maps to `upstream_rejected`
/// and is surfaced as-is.
pub async fn send_json(
  http: &reqwest::Client,
  wire: &WireRequest,
  family: ProviderFamily,
  timeout: Duration,
) -> Result< DispatchOutcome >
{
  let mut request = http.post( &wire.url ).timeout( timeout ).json( &wire.body );
  for ( name, value ) in &wire.headers
  {
    request = request.header( name, value );
  }

  let response = request
    .send()
    .await
    .map_err( |e| GatewayError::UpstreamUnavailable( e.to_string() ) )?;

  let status = response.status();

  if status.is_server_error()
  {
    return Err( GatewayError::UpstreamUnavailable( format!( "upstream returned {status}" ) ) );
  }

  if status.is_client_error()
  {
    let message = response
      .json::< Value >()
      .await
      .ok()
      .and_then( |body| extract_error_message( &body ) )
      .unwrap_or_else( || format!( "upstream returned {status}" ) );

    return Err( GatewayError::UpstreamRejected { status: status.as_u16(), message } );
  }

  let raw = response
    .json::< Value >()
    .await
    .map_err( |e| GatewayError::UpstreamUnavailable( format!( "upstream body: {e}" ) ) )?;

  let body = normalize_response( family, &raw );
  let usage = extract_usage( &body );

  Ok( DispatchOutcome { body, usage } )
}

/// Open a streaming request and return the byte stream
pub async fn open_stream(
  http: &reqwest::Client,
  wire: &WireRequest,
  timeout: Duration,
) -> Result< reqwest::Response >
{
  let mut request = http.post( &wire.url ).timeout( timeout ).json( &wire.body );
  for ( name, value ) in &wire.headers
  {
    request = request.header( name, value );
  }

  let response = request
    .send()
    .await
    .map_err( |e| GatewayError::UpstreamUnavailable( e.to_string() ) )?;

  let status = response.status();
  if status.is_server_error()
  {
    return Err( GatewayError::UpstreamUnavailable( format!( "upstream returned {status}" ) ) );
  }
  if status.is_client_error()
  {
    let message = response
      .json::< Value >()
      .await
      .ok()
      .and_then( |body| extract_error_message( &body ) )
      .unwrap_or_else( || format!( "upstream returned {status}" ) );
    return Err( GatewayError::UpstreamRejected { status: status.as_u16(), message } );
  }

  Ok( response )
}

/// Pull the human-readable message out of a provider error body
fn extract_error_message( body: &Value ) -> Option< String >
{
  body
    .get( "error" )
    .and_then( |e| e.get( "message" ) )
    .or_else( || body.get( "message" ) )
    .and_then( Value::as_str )
    .map( str::to_string )
}

/// Normalize a buffered response to the OpenAI shape
#[ must_use ]
pub fn normalize_response( family: ProviderFamily, raw: &Value ) -> Value
{
  match family
  {
    ProviderFamily::Anthropic => anthropic_to_openai( raw ),
    _ => raw.clone(),
  }
}

fn anthropic_to_openai( raw: &Value ) -> Value
{
  let text = raw
    .get( "content" )
    .and_then( Value::as_array )
    .map( |blocks|
    {
      blocks
        .iter()
        .filter_map( |block| block.get( "text" ).and_then( Value::as_str ) )
        .collect::< Vec< _ > >()
        .join( "" )
    } )
    .unwrap_or_default();

  let input_tokens = raw
    .pointer( "/usage/input_tokens" )
    .and_then( Value::as_i64 )
    .unwrap_or( 0 );
  let output_tokens = raw
    .pointer( "/usage/output_tokens" )
    .and_then( Value::as_i64 )
    .unwrap_or( 0 );

  let finish_reason = match raw.get( "stop_reason" ).and_then( Value::as_str )
  {
    Some( "max_tokens" ) => "length",
    _ => "stop",
  };

  json!( {
    "id": raw.get( "id" ).cloned().unwrap_or( json!( "" ) ),
    "object": "chat.completion",
    "model": raw.get( "model" ).cloned().unwrap_or( json!( "" ) ),
    "choices": [ {
      "index": 0,
      "message": { "role": "assistant", "content": text },
      "finish_reason": finish_reason,
    } ],
    "usage": {
      "prompt_tokens": input_tokens,
      "completion_tokens": output_tokens,
      "total_tokens": input_tokens + output_tokens,
    },
  } )
}

/// Read token usage from an OpenAI-shaped body
#[ must_use ]
pub fn extract_usage( body: &Value ) -> UsageTokens
{
  let Some( usage ) = body.get( "usage" ) else
  {
    return UsageTokens::default();
  };

  let prompt = usage
    .get( "prompt_tokens" )
    .or_else( || usage.get( "input_tokens" ) )
    .and_then( Value::as_i64 )
    .unwrap_or( 0 );
  let completion = usage
    .get( "completion_tokens" )
    .or_else( || usage.get( "output_tokens" ) )
    .and_then( Value::as_i64 )
    .unwrap_or( 0 );
  let total = usage
    .get( "total_tokens" )
    .and_then( Value::as_i64 )
    .unwrap_or( prompt + completion );

  UsageTokens { prompt_tokens: prompt, completion_tokens: completion, total_tokens: total }
}

/// Incremental server-sent-events splitter
///
/// Feed raw bytes, get back complete `data:` payloads. Events are
/// `\n\n`-separated; one event may span many chunks and one chunk may
/// carry many events.
#[ derive( Debug, Default ) ]
pub struct SseParser
{
  buffer: String,
}

impl SseParser
{
  #[ must_use ]
  pub fn new() -> Self
  {
    Self::default()
  }

  /// Push a chunk and drain the completed data payloads
  pub fn push( &mut self, chunk: &[ u8 ] ) -> Vec< String >
  {
    self.buffer.push_str( &String::from_utf8_lossy( chunk ) );

    let mut payloads = Vec::new();
    while let Some( boundary ) = self.buffer.find( "\n\n" )
    {
      let event: String = self.buffer[ ..boundary ].to_string();
      self.buffer = self.buffer[ boundary + 2.. ].to_string();

      for line in event.lines()
      {
        if let Some( data ) = line.strip_prefix( "data:" )
        {
          payloads.push( data.trim_start().to_string() );
        }
      }
    }

    payloads
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn test_sse_parser_handles_split_events()
  {
    let mut parser = SseParser::new();

    let first = parser.push( b"data: {\"a\":" );
    assert!( first.is_empty(), "incomplete event must stay buffered" );

    let second = parser.push( b"1}\n\ndata: [DONE]\n\n" );
    assert_eq!( second, vec![ "{\"a\":1}".to_string(), "[DONE]".to_string() ] );
  }

  #[ test ]
  fn test_sse_parser_handles_many_events_per_chunk()
  {
    let mut parser = SseParser::new();
    let payloads = parser.push( b"data: one\n\ndata: two\n\ndata: three\n\n" );
    assert_eq!( payloads.len(), 3 );
  }

  #[ test ]
  fn test_usage_extraction_covers_both_conventions()
  {
    let openai = json!( { "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 } } );
    assert_eq!( extract_usage( &openai ), UsageTokens::new( 10, 5 ) );

    let anthropic = json!( { "usage": { "input_tokens": 7, "output_tokens": 3 } } );
    assert_eq!( extract_usage( &anthropic ), UsageTokens::new( 7, 3 ) );

    assert_eq!( extract_usage( &json!( {} ) ), UsageTokens::default() );
  }

  #[ test ]
  fn test_anthropic_normalization()
  {
    let raw = json!( {
      "id": "msg_1",
      "model": "claude-3-5-sonnet",
      "content": [ { "type": "text", "text": "hello " }, { "type": "text", "text": "world" } ],
      "stop_reason": "end_turn",
      "usage": { "input_tokens": 12, "output_tokens": 4 },
    } );

    let body = normalize_response( ProviderFamily::Anthropic, &raw );
    assert_eq!( body[ "choices" ][ 0 ][ "message" ][ "content" ], json!( "hello world" ) );
    assert_eq!( body[ "usage" ][ "total_tokens" ], json!( 16 ) );
    assert_eq!( body[ "object" ], json!( "chat.completion" ) );
  }
}

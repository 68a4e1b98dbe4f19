//! Batch input validation
//!
//! Input files are UTF-8 JSONL; every line must be an object carrying
//! `custom_id`, `method`, `url` and `body`, with the URL inside the
//! admin-allowed endpoint set. Validation happens before the batch row is
//! created, so a rejected file leaves nothing behind.

use serde::Deserialize;
use serde_json::Value;

use gateway_types::{ GatewayError, Result };

/// One parsed input line
#[ derive( Debug, Clone, Deserialize ) ]
pub struct BatchLine
{
  pub custom_id: String,
  pub method: String,
  pub url: String,
  pub body: Value,
}

/// Parse and validate a whole input file
///
/// # Errors
///
/// `bad_request` naming the first offending line.
pub fn parse_input_lines( content: &str, allowed_endpoints: &[ String ] ) -> Result< Vec< BatchLine > >
{
  let mut lines = Vec::new();

  for ( index, raw ) in content.lines().enumerate()
  {
    let line_no = index + 1;
    let trimmed = raw.trim();
    if trimmed.is_empty()
    {
      continue;
    }

    let line: BatchLine = serde_json::from_str( trimmed )
      .map_err( |e| GatewayError::BadRequest( format!( "input line {line_no}: {e}" ) ) )?;

    if line.custom_id.is_empty()
    {
      return Err( GatewayError::BadRequest( format!( "input line {line_no}: empty custom_id" ) ) );
    }
    if line.method != "POST"
    {
      return Err( GatewayError::BadRequest( format!(
        "input line {line_no}: method must be POST"
      ) ) );
    }
    if !allowed_endpoints.iter().any( |allowed| allowed == &line.url )
    {
      return Err( GatewayError::BadRequest( format!(
        "input line {line_no}: url {} is not enabled for batches",
        line.url
      ) ) );
    }
    if !line.body.is_object()
    {
      return Err( GatewayError::BadRequest( format!( "input line {line_no}: body must be an object" ) ) );
    }

    lines.push( line );
  }

  if lines.is_empty()
  {
    return Err( GatewayError::BadRequest( "input file contains no requests".to_string() ) );
  }

  Ok( lines )
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  fn allowed() -> Vec< String >
  {
    vec![ "/v1/chat/completions".to_string(), "/v1/embeddings".to_string() ]
  }

  #[ test ]
  fn test_valid_file_parses_every_line()
  {
    let content = concat!(
      r#"{"custom_id":"a","method":"POST","url":"/v1/chat/completions","body":{"model":"m"}}"#, "\n",
      "\n",
      r#"{"custom_id":"b","method":"POST","url":"/v1/embeddings","body":{"model":"m"}}"#, "\n",
    );

    let lines = parse_input_lines( content, &allowed() ).expect( "parse" );
    assert_eq!( lines.len(), 2 );
    assert_eq!( lines[ 0 ].custom_id, "a" );
    assert_eq!( lines[ 1 ].url, "/v1/embeddings" );
  }

  #[ test ]
  fn test_bad_json_names_the_line()
  {
    let content = concat!(
      r#"{"custom_id":"a","method":"POST","url":"/v1/chat/completions","body":{}}"#, "\n",
      "not json\n",
    );

    let err = parse_input_lines( content, &allowed() ).expect_err( "bad json" );
    assert!( err.to_string().contains( "line 2" ) );
  }

  #[ test ]
  fn test_disallowed_url_is_rejected()
  {
    let content = r#"{"custom_id":"a","method":"POST","url":"/v1/images/generations","body":{}}"#;
    let err = parse_input_lines( content, &allowed() ).expect_err( "bad url" );
    assert_eq!( err.kind(), "bad_request" );
  }

  #[ test ]
  fn test_get_method_is_rejected()
  {
    let content = r#"{"custom_id":"a","method":"GET","url":"/v1/chat/completions","body":{}}"#;
    let err = parse_input_lines( content, &allowed() ).expect_err( "bad method" );
    assert!( err.to_string().contains( "method must be POST" ) );
  }

  #[ test ]
  fn test_empty_file_is_rejected()
  {
    let err = parse_input_lines( "\n\n", &allowed() ).expect_err( "empty" );
    assert_eq!( err.kind(), "bad_request" );
  }
}

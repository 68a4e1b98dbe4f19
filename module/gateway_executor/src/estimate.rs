//! Token estimation for admission and TPM reservation
//!
//! A character heuristic, deliberately simple: roughly four characters per
//! token over the textual payload, plus the requested completion budget.
//! Estimates only need to be monotone in input size; the limits engine
//! reconciles against the provider's metered count afterwards.

use serde_json::Value;

use gateway_guardrail::prompt_text;
use gateway_types::ModelType;

/// Characters per token assumed by the heuristic
const CHARS_PER_TOKEN: i64 = 4;

/// Completion budget assumed for chat requests without `max_tokens`
const DEFAULT_COMPLETION_TOKENS: i64 = 1024;

/// Estimate the total token cost of a request
#[ must_use ]
pub fn estimate_request_tokens( model_type: ModelType, body: &Value ) -> i64
{
  let input_chars = prompt_text( body ).chars().count() as i64;
  let input_tokens = ( input_chars + CHARS_PER_TOKEN - 1 ) / CHARS_PER_TOKEN;

  let completion_tokens = match model_type
  {
    ModelType::Chat => body
      .get( "max_tokens" )
      .or_else( || body.get( "max_completion_tokens" ) )
      .and_then( Value::as_i64 )
      .unwrap_or( DEFAULT_COMPLETION_TOKENS ),
    _ => 0,
  };

  input_tokens + completion_tokens.max( 0 )
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use serde_json::json;

  #[ test ]
  fn test_estimate_grows_with_input()
  {
    let small = json!( { "messages": [ { "role": "user", "content": "hi" } ] } );
    let large = json!( { "messages": [ { "role": "user", "content": "hi ".repeat( 500 ) } ] } );

    let small_estimate = estimate_request_tokens( ModelType::Chat, &small );
    let large_estimate = estimate_request_tokens( ModelType::Chat, &large );

    assert!( large_estimate > small_estimate );
  }

  #[ test ]
  fn test_max_tokens_is_respected()
  {
    let body = json!( {
      "messages": [ { "role": "user", "content": "12345678" } ],
      "max_tokens": 50,
    } );

    // ceil(8 / 4) = 2 input tokens + 50 requested completion tokens
    assert_eq!( estimate_request_tokens( ModelType::Chat, &body ), 52 );
  }

  #[ test ]
  fn test_non_chat_endpoints_skip_completion_budget()
  {
    let body = json!( { "input": "12345678" } );
    assert_eq!( estimate_request_tokens( ModelType::Embedding, &body ), 2 );
  }
}

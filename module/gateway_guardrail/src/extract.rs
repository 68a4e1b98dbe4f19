//! Stage text extraction from OpenAI-shaped bodies

use serde_json::Value;

/// Concatenated user-role message content from a chat body
#[ must_use ]
pub fn prompt_text( body: &Value ) -> String
{
  let Some( messages ) = body.get( "messages" ).and_then( Value::as_array ) else
  {
    // Non-chat endpoints carry their text in `input` or `prompt`
    return body
      .get( "input" )
      .or_else( || body.get( "prompt" ) )
      .map( flatten_content )
      .unwrap_or_default();
  };

  let mut parts = Vec::new();
  for message in messages
  {
    let role = message.get( "role" ).and_then( Value::as_str ).unwrap_or_default();
    if role != "user"
    {
      continue;
    }
    if let Some( content ) = message.get( "content" )
    {
      let text = flatten_content( content );
      if !text.is_empty()
      {
        parts.push( text );
      }
    }
  }

  parts.join( "\n" )
}

/// Concatenated assistant content from a completed response body
#[ must_use ]
pub fn response_text( body: &Value ) -> String
{
  let Some( choices ) = body.get( "choices" ).and_then( Value::as_array ) else
  {
    return String::new();
  };

  let mut parts = Vec::new();
  for choice in choices
  {
    let content = choice
      .get( "message" )
      .and_then( |m| m.get( "content" ) )
      .or_else( || choice.get( "text" ) );

    if let Some( content ) = content
    {
      let text = flatten_content( content );
      if !text.is_empty()
      {
        parts.push( text );
      }
    }
  }

  parts.join( "\n" )
}

/// Flatten a string or an array of content parts into plain text
fn flatten_content( content: &Value ) -> String
{
  match content
  {
    Value::String( text ) => text.clone(),
    Value::Array( items ) => items
      .iter()
      .filter_map( |item| match item
      {
        Value::String( text ) => Some( text.clone() ),
        Value::Object( _ ) => item.get( "text" ).and_then( Value::as_str ).map( str::to_string ),
        _ => None,
      } )
      .collect::< Vec< _ > >()
      .join( "\n" ),
    _ => String::new(),
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use serde_json::json;

  #[ test ]
  fn test_prompt_text_takes_only_user_messages()
  {
    let body = json!( {
      "messages": [
        { "role": "system", "content": "You are terse." },
        { "role": "user", "content": "first question" },
        { "role": "assistant", "content": "an answer" },
        { "role": "user", "content": "second question" },
      ]
    } );

    assert_eq!( prompt_text( &body ), "first question\nsecond question" );
  }

  #[ test ]
  fn test_prompt_text_flattens_part_arrays()
  {
    let body = json!( {
      "messages": [
        { "role": "user", "content": [
          { "type": "text", "text": "look at this" },
          { "type": "image_url", "image_url": { "url": "https://example.com/x.png" } },
        ] },
      ]
    } );

    assert_eq!( prompt_text( &body ), "look at this" );
  }

  #[ test ]
  fn test_embeddings_input_is_covered()
  {
    let body = json!( { "input": [ "alpha", "beta" ] } );
    assert_eq!( prompt_text( &body ), "alpha\nbeta" );
  }

  #[ test ]
  fn test_response_text_reads_choices()
  {
    let body = json!( {
      "choices": [
        { "index": 0, "message": { "role": "assistant", "content": "hello there" } },
      ]
    } );

    assert_eq!( response_text( &body ), "hello there" );
  }
}

//! Provider wire translation
//!
//! Fixed per-family mapping from the caller's OpenAI-shaped body to the
//! upstream request: endpoint URL, auth headers, body reshaping. Fields a
//! family cannot express are dropped and reported so the HTTP layer can
//! attach a warning header. Responses are normalized back to the OpenAI
//! shape in `dispatch`.

use serde_json::{ json, Value };

use gateway_catalog::{ CatalogModel, DeploymentInfo };
use gateway_types::{ GatewayError, ProviderFamily, Result };

use crate::ApiEndpoint;

const AZURE_API_VERSION: &str = "2024-06-01";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_DEFAULT_MAX_TOKENS: i64 = 4096;

/// A ready-to-send upstream request
#[ derive( Debug, Clone ) ]
pub struct WireRequest
{
  pub url: String,
  pub headers: Vec< ( String, String ) >,
  pub body: Value,
  /// Caller fields the family mapping had to drop
  pub dropped_fields: Vec< String >,
}

/// Translate a request for one deployment
///
/// `api_key` is the secret resolved from the deployment's credentials
/// reference; it exists only for the lifetime of the dispatch.
pub fn translate(
  model: &CatalogModel,
  deployment: &DeploymentInfo,
  endpoint: ApiEndpoint,
  api_key: &str,
  body: &Value,
) -> Result< WireRequest >
{
  let base = deployment.endpoint.trim_end_matches( '/' );

  match model.provider
  {
    ProviderFamily::Openai | ProviderFamily::OpenaiCompatible =>
      Ok( openai_request( base, model, endpoint, api_key, body ) ),
    ProviderFamily::AzureOpenai => Ok( azure_request( base, model, endpoint, api_key, body ) ),
    ProviderFamily::Anthropic => anthropic_request( base, model, endpoint, api_key, body ),
    ProviderFamily::Bedrock => bedrock_request( base, model, endpoint, api_key, body ),
    ProviderFamily::Vertex => vertex_request( base, model, endpoint, api_key, body ),
  }
}

fn openai_request(
  base: &str,
  model: &CatalogModel,
  endpoint: ApiEndpoint,
  api_key: &str,
  body: &Value,
) -> WireRequest
{
  let mut body = body.clone();
  if let Some( map ) = body.as_object_mut()
  {
    map.insert( "model".to_string(), json!( model.provider_model ) );
  }

  WireRequest
  {
    url: format!( "{base}{}", endpoint.path() ),
    headers: vec![ ( "authorization".to_string(), format!( "Bearer {api_key}" ) ) ],
    body,
    dropped_fields: Vec::new(),
  }
}

fn azure_request(
  base: &str,
  model: &CatalogModel,
  endpoint: ApiEndpoint,
  api_key: &str,
  body: &Value,
) -> WireRequest
{
  // Azure addresses the deployment in the path; the body carries no model
  let mut body = body.clone();
  let mut dropped = Vec::new();
  if let Some( map ) = body.as_object_mut()
  {
    if map.remove( "model" ).is_some()
    {
      dropped.push( "model".to_string() );
    }
  }

  let path = endpoint.path().trim_start_matches( "/v1" );

  WireRequest
  {
    url: format!(
      "{base}/openai/deployments/{}{path}?api-version={AZURE_API_VERSION}",
      model.provider_model
    ),
    headers: vec![ ( "api-key".to_string(), api_key.to_string() ) ],
    body,
    dropped_fields: dropped,
  }
}

fn anthropic_request(
  base: &str,
  model: &CatalogModel,
  endpoint: ApiEndpoint,
  api_key: &str,
  body: &Value,
) -> Result< WireRequest >
{
  if endpoint != ApiEndpoint::ChatCompletions
  {
    return Err( GatewayError::UnsupportedEndpoint(
      format!( "{} is not available on anthropic deployments", endpoint.path() )
    ) );
  }

  let mut dropped = Vec::new();

  // System messages move to the top-level field; everything else stays in
  // the messages array with the same role/content convention.
  let mut system_parts = Vec::new();
  let mut messages = Vec::new();
  if let Some( source ) = body.get( "messages" ).and_then( Value::as_array )
  {
    for message in source
    {
      let role = message.get( "role" ).and_then( Value::as_str ).unwrap_or_default();
      if role == "system"
      {
        if let Some( content ) = message.get( "content" ).and_then( Value::as_str )
        {
          system_parts.push( content.to_string() );
        }
        continue;
      }
      messages.push( message.clone() );
    }
  }

  let mut wire_body = json!( {
    "model": model.provider_model,
    "messages": messages,
    "max_tokens": body
      .get( "max_tokens" )
      .and_then( Value::as_i64 )
      .unwrap_or( ANTHROPIC_DEFAULT_MAX_TOKENS ),
  } );

  if !system_parts.is_empty()
  {
    wire_body[ "system" ] = json!( system_parts.join( "\n" ) );
  }
  for field in [ "temperature", "top_p", "stop", "stream" ]
  {
    if let Some( value ) = body.get( field )
    {
      wire_body[ field ] = value.clone();
    }
  }
  for field in [ "logit_bias", "presence_penalty", "frequency_penalty", "n", "seed" ]
  {
    if body.get( field ).is_some()
    {
      dropped.push( field.to_string() );
    }
  }

  Ok( WireRequest
  {
    url: format!( "{base}/v1/messages" ),
    headers: vec!
    [
      ( "x-api-key".to_string(), api_key.to_string() ),
      ( "anthropic-version".to_string(), ANTHROPIC_VERSION.to_string() ),
    ],
    body: wire_body,
    dropped_fields: dropped,
  } )
}

fn bedrock_request(
  base: &str,
  model: &CatalogModel,
  endpoint: ApiEndpoint,
  api_key: &str,
  body: &Value,
) -> Result< WireRequest >
{
  if endpoint != ApiEndpoint::ChatCompletions && endpoint != ApiEndpoint::Embeddings
  {
    return Err( GatewayError::UnsupportedEndpoint(
      format!( "{} is not available on bedrock deployments", endpoint.path() )
    ) );
  }

  let mut body = body.clone();
  let mut dropped = Vec::new();
  if let Some( map ) = body.as_object_mut()
  {
    // The model id is addressed in the path
    if map.remove( "model" ).is_some()
    {
      dropped.push( "model".to_string() );
    }
  }

  Ok( WireRequest
  {
    url: format!( "{base}/model/{}/invoke", model.provider_model ),
    headers: vec![ ( "authorization".to_string(), format!( "Bearer {api_key}" ) ) ],
    body,
    dropped_fields: dropped,
  } )
}

fn vertex_request(
  base: &str,
  model: &CatalogModel,
  endpoint: ApiEndpoint,
  api_key: &str,
  body: &Value,
) -> Result< WireRequest >
{
  if endpoint != ApiEndpoint::ChatCompletions && endpoint != ApiEndpoint::Embeddings
  {
    return Err( GatewayError::UnsupportedEndpoint(
      format!( "{} is not available on vertex deployments", endpoint.path() )
    ) );
  }

  // Vertex exposes an OpenAI-compatible chat surface per publisher model
  let mut body = body.clone();
  if let Some( map ) = body.as_object_mut()
  {
    map.insert( "model".to_string(), json!( model.provider_model ) );
  }

  Ok( WireRequest
  {
    url: format!( "{base}/v1/openapi{}", endpoint.path().trim_start_matches( "/v1" ) ),
    headers: vec![ ( "authorization".to_string(), format!( "Bearer {api_key}" ) ) ],
    body,
    dropped_fields: Vec::new(),
  } )
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use gateway_types::ModelType;
  use uuid::Uuid;

  fn model( family: ProviderFamily ) -> CatalogModel
  {
    CatalogModel
    {
      alias: "my-model".to_string(),
      provider: family,
      provider_model: "upstream-model-id".to_string(),
      model_type: ModelType::Chat,
      enabled: true,
      price_input_per_mtoken_usd: 1.0,
      price_output_per_mtoken_usd: 2.0,
      credentials_ref: "cred".to_string(),
      deployments: Vec::new(),
    }
  }

  fn deployment() -> DeploymentInfo
  {
    DeploymentInfo
    {
      id: Uuid::new_v4(),
      endpoint: "https://upstream.example.com".to_string(),
      region: None,
      credentials_ref: "cred".to_string(),
      enabled: true,
    }
  }

  #[ test ]
  fn test_openai_translation_sets_model_and_bearer()
  {
    let body = json!( { "model": "my-model", "messages": [] } );
    let wire = translate( &model( ProviderFamily::Openai ), &deployment(), ApiEndpoint::ChatCompletions, "sk-test", &body )
      .expect( "translate" );

    assert_eq!( wire.url, "https://upstream.example.com/v1/chat/completions" );
    assert_eq!( wire.body[ "model" ], json!( "upstream-model-id" ) );
    assert_eq!( wire.headers[ 0 ].1, "Bearer sk-test" );
    assert!( wire.dropped_fields.is_empty() );
  }

  #[ test ]
  fn test_azure_translation_moves_model_into_path()
  {
    let body = json!( { "model": "my-model", "messages": [] } );
    let wire = translate( &model( ProviderFamily::AzureOpenai ), &deployment(), ApiEndpoint::ChatCompletions, "azure-key", &body )
      .expect( "translate" );

    assert!( wire.url.contains( "/openai/deployments/upstream-model-id/chat/completions" ) );
    assert!( wire.url.contains( "api-version=" ) );
    assert!( wire.body.get( "model" ).is_none() );
    assert_eq!( wire.dropped_fields, vec![ "model".to_string() ] );
    assert_eq!( wire.headers[ 0 ].0, "api-key" );
  }

  #[ test ]
  fn test_anthropic_translation_lifts_system_and_drops_unsupported()
  {
    let body = json!( {
      "model": "my-model",
      "messages": [
        { "role": "system", "content": "be terse" },
        { "role": "user", "content": "hello" },
      ],
      "logit_bias": { "50256": -100 },
      "temperature": 0.2,
    } );

    let wire = translate( &model( ProviderFamily::Anthropic ), &deployment(), ApiEndpoint::ChatCompletions, "ak", &body )
      .expect( "translate" );

    assert_eq!( wire.url, "https://upstream.example.com/v1/messages" );
    assert_eq!( wire.body[ "system" ], json!( "be terse" ) );
    assert_eq!( wire.body[ "messages" ].as_array().expect( "messages" ).len(), 1 );
    assert_eq!( wire.body[ "max_tokens" ], json!( ANTHROPIC_DEFAULT_MAX_TOKENS ) );
    assert_eq!( wire.body[ "temperature" ], json!( 0.2 ) );
    assert_eq!( wire.dropped_fields, vec![ "logit_bias".to_string() ] );
    assert!( wire.headers.iter().any( |( name, _ )| name == "anthropic-version" ) );
  }

  #[ test ]
  fn test_anthropic_rejects_non_chat_endpoints()
  {
    let err = translate( &model( ProviderFamily::Anthropic ), &deployment(), ApiEndpoint::Embeddings, "ak", &json!( {} ) )
      .expect_err( "unsupported" );
    assert_eq!( err.kind(), "unsupported_endpoint" );
  }
}

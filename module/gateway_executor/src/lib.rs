//! Executor and data-plane pipeline
//!
//! Everything between a resolved request context and the upstream provider:
//! alias authorization, limit reservation, budget admission, guardrails,
//! deployment selection, the dispatch itself (buffered or streamed), usage
//! accounting and the post-completion debit. The HTTP layer and the batch
//! engine both enter through [`Pipeline`].

pub mod cost;
pub mod dispatch;
pub mod estimate;
pub mod pipeline;
pub mod translate;

pub use pipeline::{ Pipeline, PipelineDeps, StreamFrame };

use gateway_types::{ GatewayError, ModelType, Result };

/// Public endpoints the data plane serves
#[ derive( Debug, Clone, Copy, PartialEq, Eq ) ]
pub enum ApiEndpoint
{
  ChatCompletions,
  Embeddings,
  ImagesGenerations,
  ImagesEdits,
  ImagesVariations,
  AudioTranscriptions,
  AudioTranslations,
  AudioSpeech,
}

impl ApiEndpoint
{
  /// Parse a `/v1/...` path
  pub fn parse( path: &str ) -> Result< Self >
  {
    match path
    {
      "/v1/chat/completions" => Ok( Self::ChatCompletions ),
      "/v1/embeddings" => Ok( Self::Embeddings ),
      "/v1/images/generations" => Ok( Self::ImagesGenerations ),
      "/v1/images/edits" => Ok( Self::ImagesEdits ),
      "/v1/images/variations" => Ok( Self::ImagesVariations ),
      "/v1/audio/transcriptions" => Ok( Self::AudioTranscriptions ),
      "/v1/audio/translations" => Ok( Self::AudioTranslations ),
      "/v1/audio/speech" => Ok( Self::AudioSpeech ),
      other => Err( GatewayError::UnsupportedEndpoint( other.to_string() ) ),
    }
  }

  /// The `/v1/...` path
  #[ must_use ]
  pub fn path( self ) -> &'static str
  {
    match self
    {
      Self::ChatCompletions => "/v1/chat/completions",
      Self::Embeddings => "/v1/embeddings",
      Self::ImagesGenerations => "/v1/images/generations",
      Self::ImagesEdits => "/v1/images/edits",
      Self::ImagesVariations => "/v1/images/variations",
      Self::AudioTranscriptions => "/v1/audio/transcriptions",
      Self::AudioTranslations => "/v1/audio/translations",
      Self::AudioSpeech => "/v1/audio/speech",
    }
  }

  /// Catalog modality this endpoint requires
  #[ must_use ]
  pub fn model_type( self ) -> ModelType
  {
    match self
    {
      Self::ChatCompletions => ModelType::Chat,
      Self::Embeddings => ModelType::Embedding,
      Self::ImagesGenerations | Self::ImagesEdits | Self::ImagesVariations => ModelType::Image,
      Self::AudioTranscriptions => ModelType::AudioTranscription,
      Self::AudioTranslations => ModelType::AudioTranslation,
      Self::AudioSpeech => ModelType::AudioSpeech,
    }
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn test_endpoint_parse_round_trip()
  {
    for endpoint in [
      ApiEndpoint::ChatCompletions,
      ApiEndpoint::Embeddings,
      ApiEndpoint::ImagesGenerations,
      ApiEndpoint::AudioSpeech,
    ]
    {
      assert_eq!( ApiEndpoint::parse( endpoint.path() ).expect( "parse" ), endpoint );
    }

    let err = ApiEndpoint::parse( "/v1/unknown" ).expect_err( "unknown path" );
    assert_eq!( err.kind(), "unsupported_endpoint" );
  }
}

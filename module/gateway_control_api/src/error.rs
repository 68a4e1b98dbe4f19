//! JSON error envelope
//!
//! Every failure leaving the HTTP surface is `{ "error": { "type",
//! "message", "code"? } }` with the status mapped from the error kind and a
//! `Retry-After` header on transient classes. Internal detail never crosses
//! the wire; it is logged here and replaced with a generic message.

use axum::http::{ header, StatusCode };
use axum::response::{ IntoResponse, Response };
use axum::Json;
use serde::Serialize;

use gateway_types::GatewayError;

/// Envelope payload
#[ derive( Debug, Serialize ) ]
pub struct ErrorBody
{
  pub error: ErrorDetail,
}

#[ derive( Debug, Serialize ) ]
pub struct ErrorDetail
{
  #[ serde( rename = "type" ) ]
  pub kind: String,
  pub message: String,
  #[ serde( skip_serializing_if = "Option::is_none" ) ]
  pub code: Option< u16 >,
}

/// Wrapper giving `GatewayError` an HTTP rendering
#[ derive( Debug ) ]
pub struct ApiError( pub GatewayError );

impl From< GatewayError > for ApiError
{
  fn from( err: GatewayError ) -> Self
  {
    Self( err )
  }
}

/// HTTP status for an error kind
#[ must_use ]
pub fn status_for( err: &GatewayError ) -> StatusCode
{
  match err
  {
    GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
    GatewayError::BudgetExceeded { .. } => StatusCode::PAYMENT_REQUIRED,
    GatewayError::TenantSuspended | GatewayError::Forbidden( _ ) => StatusCode::FORBIDDEN,
    GatewayError::ModelNotAllowed | GatewayError::NotFound( _ ) => StatusCode::NOT_FOUND,
    GatewayError::Conflict( _ ) => StatusCode::CONFLICT,
    GatewayError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
    GatewayError::GuardrailViolation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
    GatewayError::BadRequest( _ )
    | GatewayError::UnsupportedEndpoint( _ )
    | GatewayError::ModelDisabled => StatusCode::BAD_REQUEST,
    GatewayError::UpstreamUnavailable( _ ) => StatusCode::BAD_GATEWAY,
    GatewayError::UpstreamRejected { .. } => StatusCode::SERVICE_UNAVAILABLE,
    GatewayError::Internal( _ ) => StatusCode::INTERNAL_SERVER_ERROR,
  }
}

impl IntoResponse for ApiError
{
  fn into_response( self ) -> Response
  {
    let err = self.0;
    let status = status_for( &err );

    let message = match &err
    {
      GatewayError::Internal( detail ) =>
      {
        tracing::error!( detail = %detail, "internal error" );
        "an internal error occurred".to_string()
      }
      other => other.to_string(),
    };

    let upstream_code = match &err
    {
      GatewayError::UpstreamRejected { status, .. } => Some( *status ),
      _ => None,
    };

    let body = ErrorBody
    {
      error: ErrorDetail
      {
        kind: err.kind().to_string(),
        message,
        code: upstream_code,
      },
    };

    let mut response = ( status, Json( body ) ).into_response();

    if let Some( seconds ) = err.retry_after()
    {
      if let Ok( value ) = header::HeaderValue::from_str( &seconds.to_string() )
      {
        response.headers_mut().insert( header::RETRY_AFTER, value );
      }
    }

    response
  }
}

/// Result alias for handlers
pub type ApiResult< T > = core::result::Result< T, ApiError >;

/// JSON body extractor with the gateway's error envelope
///
/// Axum's default `Json` rejection is a plain-text 422; the public contract
/// wants a 400 `bad_request` envelope for malformed bodies, so handlers on
/// the data plane take `JsonBody` instead.
#[ derive( Debug ) ]
pub struct JsonBody< T >( pub T );

#[ axum::async_trait ]
impl< T, S > axum::extract::FromRequest< S > for JsonBody< T >
where
  T: serde::de::DeserializeOwned,
  S: Send + Sync,
{
  type Rejection = ApiError;

  async fn from_request(
    req: axum::extract::Request,
    state: &S,
  ) -> core::result::Result< Self, Self::Rejection >
  {
    match < Json< T > as axum::extract::FromRequest< S > >::from_request( req, state ).await
    {
      Ok( value ) => Ok( Self( value.0 ) ),
      Err( rejection ) => Err( ApiError( GatewayError::BadRequest( rejection.to_string() ) ) ),
    }
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn test_status_mapping_matches_the_contract()
  {
    assert_eq!( status_for( &GatewayError::Unauthorized ), StatusCode::UNAUTHORIZED );
    assert_eq!(
      status_for( &GatewayError::BudgetExceeded { used_usd: 1.0, limit_usd: 1.0 } ),
      StatusCode::PAYMENT_REQUIRED
    );
    assert_eq!( status_for( &GatewayError::TenantSuspended ), StatusCode::FORBIDDEN );
    assert_eq!( status_for( &GatewayError::ModelNotAllowed ), StatusCode::NOT_FOUND );
    assert_eq!(
      status_for( &GatewayError::RateLimited { scope: "key", axis: "rpm", retry_after_secs: 5 } ),
      StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(
      status_for( &GatewayError::GuardrailViolation { category: "keyword".to_string() } ),
      StatusCode::UNPROCESSABLE_ENTITY
    );
    assert_eq!(
      status_for( &GatewayError::UpstreamUnavailable( "x".to_string() ) ),
      StatusCode::BAD_GATEWAY
    );
    assert_eq!(
      status_for( &GatewayError::UpstreamRejected { status: 400, message: "x".to_string() } ),
      StatusCode::SERVICE_UNAVAILABLE
    );
  }
}

//! Outbound moderation webhook client

use std::time::Duration;

use serde::{ Deserialize, Serialize };

use gateway_types::{ GatewayError, GuardrailAction, GuardrailStage, Result };

/// Request body posted to the moderation webhook
#[ derive( Debug, Serialize ) ]
struct ClassifyRequest< 'a >
{
  stage: &'a str,
  content: &'a str,
}

/// Verdict returned by the webhook
#[ derive( Debug, Clone, Deserialize ) ]
pub struct WebhookVerdict
{
  #[ serde( default = "default_action" ) ]
  pub action: GuardrailAction,
  #[ serde( default ) ]
  pub violations: Vec< String >,
  #[ serde( default ) ]
  pub category: Option< String >,
}

fn default_action() -> GuardrailAction
{
  GuardrailAction::Allow
}

/// POST the stage content to the webhook and parse the verdict
///
/// # Errors
///
/// Timeouts, transport failures and non-2xx statuses all error; the caller
/// treats every error as allow-and-log.
pub async fn classify(
  http: &reqwest::Client,
  url: &str,
  auth_header: Option< &str >,
  auth_value: Option< &str >,
  timeout: Duration,
  stage: GuardrailStage,
  content: &str,
) -> Result< WebhookVerdict >
{
  let mut request = http
    .post( url )
    .timeout( timeout )
    .json( &ClassifyRequest { stage: stage.as_str(), content } );

  if let ( Some( header ), Some( value ) ) = ( auth_header, auth_value )
  {
    request = request.header( header, value );
  }

  let response = request
    .send()
    .await
    .map_err( |e| GatewayError::UpstreamUnavailable( format!( "moderation webhook: {e}" ) ) )?;

  if !response.status().is_success()
  {
    return Err( GatewayError::UpstreamUnavailable(
      format!( "moderation webhook returned {}", response.status() )
    ) );
  }

  response
    .json::< WebhookVerdict >()
    .await
    .map_err( |e| GatewayError::UpstreamUnavailable( format!( "moderation webhook body: {e}" ) ) )
}

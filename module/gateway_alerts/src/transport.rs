//! Delivery transports
//!
//! One trait, two channels: SMTP for emails, HTTP POST for webhooks. Every
//! attempt resolves to delivered / retryable / permanent so the dispatcher
//! can decide about retries without knowing transport internals.

use std::time::Duration;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{ AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor };

use crate::AlertMessage;

/// Result of one delivery attempt
#[ derive( Debug, Clone, PartialEq, Eq ) ]
pub enum DeliveryOutcome
{
  Delivered,
  /// Transient failure (network, 5xx); worth retrying
  Retryable( String ),
  /// Permanent failure (4xx, bad address); logged, never retried
  Permanent( String ),
}

/// Alert delivery surface
#[ async_trait ]
pub trait AlertTransport: Send + Sync + core::fmt::Debug
{
  async fn send_email( &self, to: &str, alert: &AlertMessage ) -> DeliveryOutcome;
  async fn send_webhook( &self, url: &str, alert: &AlertMessage ) -> DeliveryOutcome;
}

/// SMTP connection settings
#[ derive( Debug, Clone ) ]
pub struct SmtpConfig
{
  pub host: String,
  pub port: u16,
  pub username: Option< String >,
  pub password: Option< String >,
  /// Upgrade the connection with STARTTLS instead of implicit TLS
  pub starttls: bool,
  pub from: String,
}

/// Production transport: lettre SMTP + reqwest webhooks
pub struct OutboundTransport
{
  mailer: Option< AsyncSmtpTransport< Tokio1Executor > >,
  from: String,
  http: reqwest::Client,
  webhook_timeout: Duration,
}

impl core::fmt::Debug for OutboundTransport
{
  fn fmt( &self, f: &mut core::fmt::Formatter< '_ > ) -> core::fmt::Result
  {
    f.debug_struct( "OutboundTransport" )
      .field( "smtp_enabled", &self.mailer.is_some() )
      .field( "from", &self.from )
      .finish_non_exhaustive()
  }
}

impl OutboundTransport
{
  /// Build from optional SMTP settings; with none, email attempts fail
  /// permanently and only webhooks deliver.
  pub fn new( smtp: Option< SmtpConfig >, webhook_timeout: Duration ) -> gateway_types::Result< Self >
  {
    let ( mailer, from ) = match smtp
    {
      Some( config ) =>
      {
        let mut builder = if config.starttls
        {
          AsyncSmtpTransport::< Tokio1Executor >::starttls_relay( &config.host )
            .map_err( |e| gateway_types::GatewayError::Internal( format!( "smtp relay: {e}" ) ) )?
        }
        else
        {
          AsyncSmtpTransport::< Tokio1Executor >::relay( &config.host )
            .map_err( |e| gateway_types::GatewayError::Internal( format!( "smtp relay: {e}" ) ) )?
        };

        builder = builder.port( config.port );

        if let ( Some( user ), Some( pass ) ) = ( config.username.clone(), config.password.clone() )
        {
          builder = builder.credentials( Credentials::new( user, pass ) );
        }

        ( Some( builder.build() ), config.from )
      }
      None => ( None, String::new() ),
    };

    Ok( Self
    {
      mailer,
      from,
      http: reqwest::Client::new(),
      webhook_timeout,
    } )
  }
}

#[ async_trait ]
impl AlertTransport for OutboundTransport
{
  async fn send_email( &self, to: &str, alert: &AlertMessage ) -> DeliveryOutcome
  {
    let Some( mailer ) = &self.mailer else
    {
      return DeliveryOutcome::Permanent( "smtp transport not configured".to_string() );
    };

    let from = match self.from.parse()
    {
      Ok( mailbox ) => mailbox,
      Err( e ) => return DeliveryOutcome::Permanent( format!( "bad from address: {e}" ) ),
    };
    let to_mailbox = match to.parse()
    {
      Ok( mailbox ) => mailbox,
      Err( e ) => return DeliveryOutcome::Permanent( format!( "bad recipient {to}: {e}" ) ),
    };

    let email = match Message::builder()
      .from( from )
      .to( to_mailbox )
      .subject( alert.subject() )
      .body( alert.body() )
    {
      Ok( email ) => email,
      Err( e ) => return DeliveryOutcome::Permanent( format!( "message build: {e}" ) ),
    };

    match mailer.send( email ).await
    {
      Ok( _ ) => DeliveryOutcome::Delivered,
      Err( e ) if e.is_permanent() => DeliveryOutcome::Permanent( e.to_string() ),
      Err( e ) => DeliveryOutcome::Retryable( e.to_string() ),
    }
  }

  async fn send_webhook( &self, url: &str, alert: &AlertMessage ) -> DeliveryOutcome
  {
    let payload = serde_json::json!( {
      "level": alert.level,
      "tenant": alert.tenant_name,
      "tenant_id": alert.tenant_id,
      "ratio": alert.ratio,
      "used_usd": alert.used_usd,
      "limit_usd": alert.limit_usd,
    } );

    let result = self.http
      .post( url )
      .timeout( self.webhook_timeout )
      .json( &payload )
      .send()
      .await;

    match result
    {
      Ok( response ) if response.status().is_success() => DeliveryOutcome::Delivered,
      Ok( response ) if response.status().is_client_error() =>
        DeliveryOutcome::Permanent( format!( "webhook returned {}", response.status() ) ),
      Ok( response ) =>
        DeliveryOutcome::Retryable( format!( "webhook returned {}", response.status() ) ),
      Err( e ) => DeliveryOutcome::Retryable( e.to_string() ),
    }
  }
}

//! The delivery loop
//!
//! Drains the alert queue; each recipient gets up to `RETRY_LIMIT` attempts
//! with exponential backoff on retryable failures. Permanent failures go to
//! the audit log and never block anything upstream.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use gateway_store::Store;

use crate::transport::{ AlertTransport, DeliveryOutcome };
use crate::AlertMessage;

/// Attempts per recipient, including the first
pub const RETRY_LIMIT: u32 = 3;

/// Base backoff between attempts
const BACKOFF_BASE: Duration = Duration::from_millis( 500 );

/// The dispatcher task
#[ derive( Debug ) ]
pub struct AlertDispatcher
{
  store: Store,
  transport: Arc< dyn AlertTransport >,
}

impl AlertDispatcher
{
  #[ must_use ]
  pub fn new( store: Store, transport: Arc< dyn AlertTransport > ) -> Self
  {
    Self { store, transport }
  }

  /// Drain the queue until every sender is dropped
  pub async fn run( self, mut rx: mpsc::Receiver< AlertMessage > )
  {
    while let Some( alert ) = rx.recv().await
    {
      self.deliver( &alert ).await;
    }
    tracing::debug!( "alert queue closed, dispatcher stopping" );
  }

  /// Deliver one alert to every configured recipient
  pub async fn deliver( &self, alert: &AlertMessage )
  {
    for email in &alert.emails
    {
      let outcome = self
        .attempt_with_retry( || self.transport.send_email( email, alert ) )
        .await;
      self.settle_outcome( alert, "email", email, outcome ).await;
    }

    for webhook in &alert.webhooks
    {
      let outcome = self
        .attempt_with_retry( || self.transport.send_webhook( webhook, alert ) )
        .await;
      self.settle_outcome( alert, "webhook", webhook, outcome ).await;
    }
  }

  async fn attempt_with_retry< F, Fut >( &self, attempt: F ) -> DeliveryOutcome
  where
    F: Fn() -> Fut,
    Fut: core::future::Future< Output = DeliveryOutcome >,
  {
    let mut last = DeliveryOutcome::Retryable( "no attempt made".to_string() );

    for try_index in 0..RETRY_LIMIT
    {
      last = attempt().await;
      match &last
      {
        DeliveryOutcome::Delivered | DeliveryOutcome::Permanent( _ ) => return last,
        DeliveryOutcome::Retryable( reason ) =>
        {
          tracing::debug!( attempt = try_index + 1, reason = %reason, "alert delivery retry" );
          if try_index + 1 < RETRY_LIMIT
          {
            tokio::time::sleep( BACKOFF_BASE * 2u32.pow( try_index ) ).await;
          }
        }
      }
    }

    last
  }

  async fn settle_outcome( &self, alert: &AlertMessage, channel: &str, target: &str, outcome: DeliveryOutcome )
  {
    match outcome
    {
      DeliveryOutcome::Delivered =>
      {
        tracing::info!(
          tenant = %alert.tenant_name,
          level = alert.level.as_str(),
          channel,
          "budget alert delivered"
        );
      }
      DeliveryOutcome::Retryable( reason ) | DeliveryOutcome::Permanent( reason ) =>
      {
        tracing::warn!(
          tenant = %alert.tenant_name,
          channel,
          target,
          reason = %reason,
          "budget alert delivery failed"
        );

        let audit = self.store
          .insert_audit_entry(
            None,
            "alert_delivery_failed",
            "tenant",
            &alert.tenant_id.to_string(),
            serde_json::json!( {
              "channel": channel,
              "target": target,
              "level": alert.level.as_str(),
              "reason": reason,
            } ),
          )
          .await;

        if let Err( err ) = audit
        {
          tracing::warn!( error = %err, "alert failure not audited" );
        }
      }
    }
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use async_trait::async_trait;
  use std::sync::Mutex;

  #[ derive( Debug, Default ) ]
  struct RecordingTransport
  {
    emails: Mutex< Vec< String > >,
    webhooks: Mutex< Vec< String > >,
    email_failures_before_success: Mutex< u32 >,
  }

  #[ async_trait ]
  impl AlertTransport for RecordingTransport
  {
    async fn send_email( &self, to: &str, _alert: &AlertMessage ) -> DeliveryOutcome
    {
      let mut remaining = self.email_failures_before_success.lock().expect( "lock" );
      if *remaining > 0
      {
        *remaining -= 1;
        return DeliveryOutcome::Retryable( "simulated 5xx".to_string() );
      }
      self.emails.lock().expect( "lock" ).push( to.to_string() );
      DeliveryOutcome::Delivered
    }

    async fn send_webhook( &self, url: &str, _alert: &AlertMessage ) -> DeliveryOutcome
    {
      self.webhooks.lock().expect( "lock" ).push( url.to_string() );
      DeliveryOutcome::Delivered
    }
  }

  fn alert() -> AlertMessage
  {
    AlertMessage
    {
      level: gateway_types::AlertLevel::Warn,
      tenant_id: uuid::Uuid::new_v4(),
      tenant_name: "acme".to_string(),
      ratio: 0.85,
      used_usd: 8.5,
      limit_usd: 10.0,
      emails: vec![ "ops@example.com".to_string() ],
      webhooks: vec![ "https://hooks.example.com/budget".to_string() ],
    }
  }

  #[ tokio::test ]
  async fn test_delivers_to_every_channel()
  {
    let db = gateway_test_db::TestDatabaseBuilder::new().build().await.expect( "db" );
    let transport = Arc::new( RecordingTransport::default() );
    let dispatcher = AlertDispatcher::new( db.store(), transport.clone() );

    dispatcher.deliver( &alert() ).await;

    assert_eq!( transport.emails.lock().expect( "lock" ).len(), 1 );
    assert_eq!( transport.webhooks.lock().expect( "lock" ).len(), 1 );
  }

  #[ tokio::test ]
  async fn test_retryable_failures_are_retried_to_success()
  {
    let db = gateway_test_db::TestDatabaseBuilder::new().build().await.expect( "db" );
    let transport = Arc::new( RecordingTransport::default() );
    *transport.email_failures_before_success.lock().expect( "lock" ) = 2;

    let dispatcher = AlertDispatcher::new( db.store(), transport.clone() );
    dispatcher.deliver( &alert() ).await;

    // Two retryable failures, then the third attempt lands
    assert_eq!( transport.emails.lock().expect( "lock" ).len(), 1 );
  }

  #[ tokio::test ]
  async fn test_exhausted_retries_write_an_audit_entry()
  {
    let db = gateway_test_db::TestDatabaseBuilder::new().build().await.expect( "db" );
    let store = db.store();
    let transport = Arc::new( RecordingTransport::default() );
    *transport.email_failures_before_success.lock().expect( "lock" ) = RETRY_LIMIT + 1;

    let dispatcher = AlertDispatcher::new( store.clone(), transport.clone() );
    let mut message = alert();
    message.webhooks.clear();
    dispatcher.deliver( &message ).await;

    assert!( transport.emails.lock().expect( "lock" ).is_empty() );

    let audit = store.list_audit_entries( 10, 0 ).await.expect( "audit" );
    assert_eq!( audit.len(), 1 );
    assert_eq!( audit[ 0 ].action, "alert_delivery_failed" );
  }
}

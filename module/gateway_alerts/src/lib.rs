//! Budget alert dispatcher
//!
//! Consumes alert messages from an in-process queue and delivers them over
//! SMTP and webhooks. Threshold logic and cooldown suppression live in the
//! budget engine; this crate only ships what it is told to ship, retrying
//! transient failures and audit-logging permanent ones.

pub mod dispatcher;
pub mod transport;

pub use dispatcher::{ AlertDispatcher, RETRY_LIMIT };
pub use transport::{ AlertTransport, DeliveryOutcome, OutboundTransport, SmtpConfig };

use serde::{ Deserialize, Serialize };
use uuid::Uuid;

use gateway_types::AlertLevel;

/// One alert to deliver
#[ derive( Debug, Clone, Serialize, Deserialize ) ]
pub struct AlertMessage
{
  pub level: AlertLevel,
  pub tenant_id: Uuid,
  pub tenant_name: String,
  /// used / limit at the moment of the debit
  pub ratio: f64,
  pub used_usd: f64,
  pub limit_usd: f64,
  pub emails: Vec< String >,
  pub webhooks: Vec< String >,
}

impl AlertMessage
{
  /// Subject line for email delivery
  #[ must_use ]
  pub fn subject( &self ) -> String
  {
    match self.level
    {
      AlertLevel::Exceed => format!( "[gateway] budget exceeded for {}", self.tenant_name ),
      _ => format!( "[gateway] budget warning for {}", self.tenant_name ),
    }
  }

  /// Plain-text body for email delivery
  #[ must_use ]
  pub fn body( &self ) -> String
  {
    format!(
      "Tenant {} has used ${:.2} of its ${:.2} budget ({:.0}%).",
      self.tenant_name,
      self.used_usd,
      self.limit_usd,
      self.ratio * 100.0,
    )
  }
}

//! Server configuration
//!
//! TOML file plus environment overrides (prefix `GATEWAY_`, `__` as the
//! nesting separator). A `.env` file is honoured in development.
//!
//! ```toml
//! listen_addr = "0.0.0.0:8080"
//! database_url = "sqlite://gateway.db?mode=rwc"
//! jwt_secret = "change-me"
//!
//! [credentials]
//! openai-main = "sk-..."
//! ```

use std::collections::HashMap;

use serde::{ Deserialize, Serialize };

use gateway_types::{ GatewayError, Result };

/// SMTP settings for the alert dispatcher
#[ derive( Debug, Clone, Serialize, Deserialize ) ]
pub struct SmtpSettings
{
  pub host: String,
  #[ serde( default = "default_smtp_port" ) ]
  pub port: u16,
  #[ serde( default ) ]
  pub username: Option< String >,
  #[ serde( default ) ]
  pub password: Option< String >,
  #[ serde( default = "default_true" ) ]
  pub starttls: bool,
  pub from: String,
}

fn default_smtp_port() -> u16
{
  587
}

fn default_true() -> bool
{
  true
}

/// Bootstrap super-admin credentials, applied once at startup
#[ derive( Debug, Clone, Serialize, Deserialize ) ]
pub struct BootstrapAdmin
{
  pub email: String,
  pub password: String,
}

/// Complete server configuration
#[ derive( Debug, Clone, Serialize, Deserialize ) ]
pub struct ServerConfig
{
  #[ serde( default = "default_listen_addr" ) ]
  pub listen_addr: String,

  pub database_url: String,

  /// Redis URL for the fast store; absent means the in-process backend
  #[ serde( default ) ]
  pub redis_url: Option< String >,

  /// Root directory for blob content
  #[ serde( default = "default_blob_root" ) ]
  pub blob_root: String,

  /// HS256 signing secret for sessions
  pub jwt_secret: String,

  #[ serde( default ) ]
  pub bootstrap_admin: Option< BootstrapAdmin >,

  #[ serde( default ) ]
  pub smtp: Option< SmtpSettings >,

  /// credentials_ref → provider secret
  #[ serde( default ) ]
  pub credentials: HashMap< String, String >,
}

fn default_listen_addr() -> String
{
  "127.0.0.1:8080".to_string()
}

fn default_blob_root() -> String
{
  "./data/blobs".to_string()
}

impl ServerConfig
{
  /// Load from `gateway.toml` (when present) and the environment
  pub fn load() -> Result< Self >
  {
    // Development convenience; missing .env is fine
    let _ = dotenvy::dotenv();

    let builder = config::Config::builder()
      .add_source( config::File::with_name( "gateway" ).required( false ) )
      .add_source(
        config::Environment::with_prefix( "GATEWAY" )
          .separator( "__" )
      );

    builder
      .build()
      .map_err( |e| GatewayError::Internal( format!( "config build: {e}" ) ) )?
      .try_deserialize()
      .map_err( |e| GatewayError::Internal( format!( "config parse: {e}" ) ) )
  }

  /// Load from an explicit TOML file
  pub fn from_file( path: &str ) -> Result< Self >
  {
    config::Config::builder()
      .add_source( config::File::with_name( path ) )
      .build()
      .map_err( |e| GatewayError::Internal( format!( "config build: {e}" ) ) )?
      .try_deserialize()
      .map_err( |e| GatewayError::Internal( format!( "config parse: {e}" ) ) )
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn test_minimal_toml_parses_with_defaults()
  {
    let raw = r#"
      database_url = "sqlite::memory:"
      jwt_secret = "test-secret"

      [credentials]
      openai-main = "sk-test"
    "#;

    let parsed: ServerConfig = toml::from_str( raw ).expect( "parse" );
    assert_eq!( parsed.listen_addr, "127.0.0.1:8080" );
    assert!( parsed.redis_url.is_none() );
    assert_eq!( parsed.credentials.get( "openai-main" ).map( String::as_str ), Some( "sk-test" ) );
  }

  #[ test ]
  fn test_smtp_block_defaults()
  {
    let raw = r#"
      database_url = "sqlite::memory:"
      jwt_secret = "s"

      [smtp]
      host = "mail.example.com"
      from = "gateway@example.com"
    "#;

    let parsed: ServerConfig = toml::from_str( raw ).expect( "parse" );
    let smtp = parsed.smtp.expect( "smtp" );
    assert_eq!( smtp.port, 587 );
    assert!( smtp.starttls );
  }
}

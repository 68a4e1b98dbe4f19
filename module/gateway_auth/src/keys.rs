//! API key material: generation and verification
//!
//! The wire token is `prefix + "_" + secret`. The prefix is public and
//! printable (it never contains an underscore, so the first underscore is
//! always the separator); the secret is 32 random bytes. Only an Argon2id
//! hash of the secret is stored: memory-hard, salted, constant-time on
//! verification.
//!
//! Unknown prefixes verify against a fixed dummy hash so the work done for
//! "no such key" and "wrong secret" is indistinguishable from outside.

use std::sync::OnceLock;

use argon2::password_hash::{ rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString };
use argon2::Argon2;
use base64::{ engine::general_purpose, Engine as _ };
use rand::{ distributions::Alphanumeric, Rng };

use gateway_types::{ GatewayError, Result };

/// Public prefix marker for gateway keys
const PREFIX_TAG: &str = "omg-";
/// Random characters in the public prefix
const PREFIX_RANDOM_LEN: usize = 12;

/// A freshly generated key: the wire token exists only here, never at rest
#[ derive( Debug, Clone ) ]
pub struct GeneratedKey
{
  /// Public printable prefix (stored, indexed)
  pub prefix: String,
  /// The full bearer token handed to the caller exactly once
  pub wire_token: String,
  /// Argon2id hash of the secret (stored)
  pub secret_hash: String,
}

/// Key generation and verification service
#[ derive( Debug, Clone, Default ) ]
pub struct KeyMaterial;

impl KeyMaterial
{
  #[ must_use ]
  pub fn new() -> Self
  {
    Self
  }

  /// Generate a new key pair
  ///
  /// # Errors
  ///
  /// Returns `internal` if the hasher rejects its input (does not happen for
  /// generated secrets).
  pub fn generate( &self ) -> Result< GeneratedKey >
  {
    let mut rng = rand::thread_rng();
    let random_part: String = ( 0..PREFIX_RANDOM_LEN )
      .map( |_| rng.sample( Alphanumeric ) as char )
      .collect();
    let prefix = format!( "{PREFIX_TAG}{}", random_part.to_lowercase() );

    let secret_bytes: [ u8; 32 ] = rng.gen();
    let secret = general_purpose::URL_SAFE_NO_PAD.encode( secret_bytes );

    let secret_hash = self.hash_secret( &secret )?;

    Ok( GeneratedKey
    {
      wire_token: format!( "{prefix}_{secret}" ),
      prefix,
      secret_hash,
    } )
  }

  /// Hash a secret with Argon2id
  pub fn hash_secret( &self, secret: &str ) -> Result< String >
  {
    let salt = SaltString::generate( &mut OsRng );
    Argon2::default()
      .hash_password( secret.as_bytes(), &salt )
      .map( |hash| hash.to_string() )
      .map_err( |e| GatewayError::Internal( format!( "argon2 hash: {e}" ) ) )
  }

  /// Verify a secret against its stored hash
  #[ must_use ]
  pub fn verify_secret( &self, secret: &str, stored_hash: &str ) -> bool
  {
    let Ok( parsed ) = PasswordHash::new( stored_hash ) else
    {
      return false;
    };

    Argon2::default().verify_password( secret.as_bytes(), &parsed ).is_ok()
  }

  /// Burn the same verification work as a real mismatch
  ///
  /// Called when no row matches the presented prefix, so the two failure
  /// paths cost the same.
  pub fn verify_dummy( &self, secret: &str )
  {
    let _ = self.verify_secret( secret, dummy_hash() );
  }
}

/// Split a wire token into `(prefix, secret)` at the first underscore
#[ must_use ]
pub fn split_wire_token( token: &str ) -> Option< ( &str, &str ) >
{
  let ( prefix, secret ) = token.split_once( '_' )?;
  if prefix.is_empty() || secret.is_empty()
  {
    return None;
  }
  Some( ( prefix, secret ) )
}

fn dummy_hash() -> &'static str
{
  static DUMMY: OnceLock< String > = OnceLock::new();
  DUMMY.get_or_init( ||
  {
    let salt = SaltString::generate( &mut OsRng );
    Argon2::default()
      .hash_password( b"dummy-comparison-secret", &salt )
      .map( |hash| hash.to_string() )
      .unwrap_or_default()
  } )
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn test_generated_token_round_trips()
  {
    let material = KeyMaterial::new();
    let key = material.generate().expect( "generate" );

    let ( prefix, secret ) = split_wire_token( &key.wire_token ).expect( "split" );
    assert_eq!( prefix, key.prefix );
    assert!( material.verify_secret( secret, &key.secret_hash ) );
    assert!( !material.verify_secret( "not-the-secret", &key.secret_hash ) );
  }

  #[ test ]
  fn test_prefix_never_contains_separator()
  {
    let material = KeyMaterial::new();
    for _ in 0..16
    {
      let key = material.generate().expect( "generate" );
      assert!( !key.prefix.contains( '_' ) );
      assert!( key.prefix.starts_with( "omg-" ) );
    }
  }

  #[ test ]
  fn test_hashes_are_salted()
  {
    let material = KeyMaterial::new();
    let first = material.hash_secret( "same-secret" ).expect( "hash" );
    let second = material.hash_secret( "same-secret" ).expect( "hash" );

    assert_ne!( first, second, "argon2 salts must differ" );
    assert!( material.verify_secret( "same-secret", &first ) );
    assert!( material.verify_secret( "same-secret", &second ) );
  }

  #[ test ]
  fn test_split_rejects_malformed_tokens()
  {
    assert!( split_wire_token( "noseparator" ).is_none() );
    assert!( split_wire_token( "_leading" ).is_none() );
    assert!( split_wire_token( "trailing_" ).is_none() );

    // Secrets may themselves contain underscores; split at the first one
    let ( prefix, secret ) = split_wire_token( "omg-abc_se_cret" ).expect( "split" );
    assert_eq!( prefix, "omg-abc" );
    assert_eq!( secret, "se_cret" );
  }
}

//! Session tokens for the admin and user planes
//!
//! HS256 JWTs carrying the user id; OIDC sign-in and local sign-in both end
//! here; whatever authenticated the user, the session material is the same.

use jsonwebtoken::{ decode, encode, DecodingKey, EncodingKey, Header, Validation };
use serde::{ Deserialize, Serialize };
use uuid::Uuid;

use gateway_types::{ GatewayError, Result };

/// Default session lifetime, seconds
const SESSION_TTL_SECS: i64 = 60 * 60 * 12;

/// Claims carried by a session token
#[ derive( Debug, Clone, Serialize, Deserialize ) ]
pub struct SessionClaims
{
  /// User id
  pub sub: String,
  /// User email, for display and logs
  pub email: String,
  /// Whether the user bypasses tenant scoping
  pub is_super_admin: bool,
  /// Issued at (unix seconds)
  pub iat: i64,
  /// Expiry (unix seconds)
  pub exp: i64,
  /// Token id
  pub jti: String,
}

impl SessionClaims
{
  /// Parse the subject back into a user id
  pub fn user_id( &self ) -> Result< Uuid >
  {
    Uuid::parse_str( &self.sub ).map_err( |_| GatewayError::Unauthorized )
  }
}

/// JWT signing/verification service
#[ derive( Clone ) ]
pub struct JwtSecret
{
  secret: String,
}

impl core::fmt::Debug for JwtSecret
{
  fn fmt( &self, f: &mut core::fmt::Formatter< '_ > ) -> core::fmt::Result
  {
    f.debug_struct( "JwtSecret" ).finish_non_exhaustive()
  }
}

impl JwtSecret
{
  /// Wrap a signing secret (sourced from configuration)
  #[ must_use ]
  pub fn new( secret: String ) -> Self
  {
    Self { secret }
  }

  /// Issue a session token for a user
  pub fn issue( &self, user_id: Uuid, email: &str, is_super_admin: bool ) -> Result< String >
  {
    let now = chrono::Utc::now().timestamp();

    let claims = SessionClaims
    {
      sub: user_id.to_string(),
      email: email.to_string(),
      is_super_admin,
      iat: now,
      exp: now + SESSION_TTL_SECS,
      jti: Uuid::new_v4().to_string(),
    };

    encode(
      &Header::default(),
      &claims,
      &EncodingKey::from_secret( self.secret.as_bytes() ),
    )
    .map_err( |e| GatewayError::Internal( format!( "jwt encode: {e}" ) ) )
  }

  /// Verify a session token and return its claims
  ///
  /// # Errors
  ///
  /// `unauthorized` for anything wrong with the token: bad signature,
  /// expiry, malformed claims.
  pub fn verify( &self, token: &str ) -> Result< SessionClaims >
  {
    decode::< SessionClaims >(
      token,
      &DecodingKey::from_secret( self.secret.as_bytes() ),
      &Validation::default(),
    )
    .map( |data| data.claims )
    .map_err( |_| GatewayError::Unauthorized )
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn test_session_round_trip()
  {
    let secret = JwtSecret::new( "test-secret".to_string() );
    let user_id = Uuid::new_v4();

    let token = secret.issue( user_id, "ops@example.com", true ).expect( "issue" );
    let claims = secret.verify( &token ).expect( "verify" );

    assert_eq!( claims.user_id().expect( "uuid" ), user_id );
    assert_eq!( claims.email, "ops@example.com" );
    assert!( claims.is_super_admin );
  }

  #[ test ]
  fn test_wrong_secret_is_unauthorized()
  {
    let signer = JwtSecret::new( "secret-a".to_string() );
    let verifier = JwtSecret::new( "secret-b".to_string() );

    let token = signer.issue( Uuid::new_v4(), "ops@example.com", false ).expect( "issue" );
    let err = verifier.verify( &token ).expect_err( "verify" );
    assert_eq!( err.kind(), "unauthorized" );
  }
}

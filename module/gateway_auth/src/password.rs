//! Password hashing for local sign-in
//!
//! User passwords are low-entropy input: bcrypt with its work factor is the
//! right tool here, unlike the high-entropy api-key secrets next door.

use gateway_types::{ GatewayError, Result };

/// Hash a password with bcrypt at the default cost
pub fn hash_password( password: &str ) -> Result< String >
{
  bcrypt::hash( password, bcrypt::DEFAULT_COST )
    .map_err( |e| GatewayError::Internal( format!( "bcrypt: {e}" ) ) )
}

/// Verify a password against a bcrypt hash
#[ must_use ]
pub fn verify_password( password: &str, hash: &str ) -> bool
{
  bcrypt::verify( password, hash ).unwrap_or( false )
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn test_password_round_trip()
  {
    let hash = hash_password( "hunter2" ).expect( "hash" );
    assert!( verify_password( "hunter2", &hash ) );
    assert!( !verify_password( "hunter3", &hash ) );
  }

  #[ test ]
  fn test_garbage_hash_never_verifies()
  {
    assert!( !verify_password( "anything", "not-a-bcrypt-hash" ) );
  }
}

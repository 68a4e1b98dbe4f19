//! In-memory rate limiter for the sign-in endpoint
//!
//! Per-IP sliding window to slow brute-force attempts against local
//! credentials. Distinct from the data-plane limits engine: sign-in happens
//! before any credential is known, so the only stable key is the peer IP.

use std::
{
  collections::HashMap,
  net::IpAddr,
  sync::{ Arc, Mutex },
  time::{ Duration, Instant },
};

const MAX_ATTEMPTS: usize = 5;
const WINDOW_DURATION: Duration = Duration::from_secs( 300 );

/// Per-IP sign-in attempt limiter
///
/// Thread-safe; cloned handles share one window map.
#[ derive( Debug, Clone, Default ) ]
pub struct LoginRateLimiter
{
  attempts: Arc< Mutex< HashMap< IpAddr, Vec< Instant > > > >,
}

impl LoginRateLimiter
{
  #[ must_use ]
  pub fn new() -> Self
  {
    Self::default()
  }

  /// Record an attempt and decide whether it may proceed
  ///
  /// Returns `Err(retry_after_seconds)` once an IP has burned its attempts
  /// for the current window.
  pub fn check_and_record( &self, ip: IpAddr ) -> core::result::Result< (), u64 >
  {
    let mut attempts = self.attempts.lock().expect( "login limiter poisoned" );
    let now = Instant::now();

    let ip_attempts = attempts.entry( ip ).or_default();
    ip_attempts.retain( |at| now.duration_since( *at ) < WINDOW_DURATION );

    if ip_attempts.len() >= MAX_ATTEMPTS
    {
      if let Some( oldest ) = ip_attempts.first()
      {
        let elapsed = now.duration_since( *oldest );
        let retry_after = WINDOW_DURATION.saturating_sub( elapsed ).as_secs();
        return Err( retry_after.max( 1 ) );
      }
    }

    ip_attempts.push( now );
    Ok( () )
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use std::net::Ipv4Addr;

  #[ test ]
  fn test_initial_attempts_are_allowed()
  {
    let limiter = LoginRateLimiter::new();
    let ip = IpAddr::V4( Ipv4Addr::new( 10, 0, 0, 1 ) );

    for attempt in 0..5
    {
      assert!( limiter.check_and_record( ip ).is_ok(), "attempt {} should pass", attempt + 1 );
    }
  }

  #[ test ]
  fn test_sixth_attempt_is_blocked_with_retry_after()
  {
    let limiter = LoginRateLimiter::new();
    let ip = IpAddr::V4( Ipv4Addr::new( 10, 0, 0, 2 ) );

    for _ in 0..5
    {
      limiter.check_and_record( ip ).expect( "warm-up attempts" );
    }

    let retry_after = limiter.check_and_record( ip ).expect_err( "sixth attempt" );
    assert!( retry_after >= 1 );
  }

  #[ test ]
  fn test_ips_are_isolated()
  {
    let limiter = LoginRateLimiter::new();
    let first = IpAddr::V4( Ipv4Addr::new( 10, 0, 0, 3 ) );
    let second = IpAddr::V4( Ipv4Addr::new( 10, 0, 0, 4 ) );

    for _ in 0..5
    {
      limiter.check_and_record( first ).expect( "first ip attempts" );
    }

    assert!( limiter.check_and_record( first ).is_err() );
    assert!( limiter.check_and_record( second ).is_ok() );
  }
}

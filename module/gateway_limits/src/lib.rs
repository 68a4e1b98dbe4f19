//! Limits engine
//!
//! Enforces, per api key and per tenant, the four counters: requests per
//! minute, tokens per minute and the two parallel-request semaphores.
//! Counters live in a fast store behind the [`FastStore`] trait; the
//! in-process backend serves tests and single-node deployments, the Redis
//! backend serves clustered ones.

pub mod engine;
pub mod fast;
pub mod login;
pub mod resolve;

pub use engine::{ LimitsEngine, Reservation };
pub use fast::{ FastStore, MemoryFastStore, RedisFastStore, WindowReserve };
pub use login::LoginRateLimiter;
pub use resolve::{ resolve_effective, EffectiveLimits };

/// One-minute window length used by the RPM / TPM buckets
pub const WINDOW_MS: i64 = 60_000;

/// Current time in milliseconds since the UNIX epoch
#[ allow( clippy::cast_possible_truncation ) ]
#[ must_use ]
pub fn now_ms() -> i64
{
  std::time::SystemTime::now()
    .duration_since( std::time::UNIX_EPOCH )
    .expect( "system clock before UNIX epoch" )
    .as_millis() as i64
}

/// Bucket index for a timestamp
#[ must_use ]
pub fn minute_bucket( ts_ms: i64 ) -> i64
{
  ts_ms / WINDOW_MS
}

/// Whole seconds remaining in the current window, rounded up, at least 1
#[ must_use ]
pub fn retry_after_secs( ts_ms: i64 ) -> u64
{
  let remaining_ms = WINDOW_MS - ( ts_ms % WINDOW_MS );
  ( ( remaining_ms + 999 ) / 1000 ).max( 1 ) as u64
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn minute_buckets_change_on_the_boundary()
  {
    assert_eq!( minute_bucket( 59_900 ), 0 );
    assert_eq!( minute_bucket( 60_050 ), 1 );
  }

  #[ test ]
  fn retry_after_counts_down_within_the_window()
  {
    assert_eq!( retry_after_secs( 0 ), 60 );
    assert_eq!( retry_after_secs( 59_000 ), 1 );
    // Rounded up, never zero
    assert_eq!( retry_after_secs( 59_999 ), 1 );
  }
}

//! Fast-store backends for counters and semaphores
//!
//! The engine only needs four primitives: bounded window increment, window
//! decrement, semaphore acquire/release, and an idle sweep. Both backends
//! implement every mutation atomically: the in-process one under a sharded
//! map entry, the Redis one inside server-side scripts.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use gateway_types::{ GatewayError, Result };

use crate::now_ms;

/// Outcome of a bounded window increment
#[ derive( Debug, Clone, Copy, PartialEq, Eq ) ]
pub struct WindowReserve
{
  /// Whether the reservation was committed
  pub granted: bool,
  /// Counter value after the operation (unchanged on refusal)
  pub current: i64,
}

/// Counter and semaphore storage
#[ async_trait ]
pub trait FastStore: Send + Sync + core::fmt::Debug
{
  /// Add `amount` to `key` iff the result stays within `limit`
  async fn try_incr_window( &self, key: &str, amount: i64, limit: i64, ttl_secs: u64 ) -> Result< WindowReserve >;

  /// Add `amount` to `key` unconditionally (TPM debt reconciliation)
  async fn incr_window_unchecked( &self, key: &str, amount: i64, ttl_secs: u64 ) -> Result< () >;

  /// Subtract `amount` from `key`, flooring at zero
  async fn decr_window( &self, key: &str, amount: i64 ) -> Result< () >;

  /// Compare-and-increment the semaphore at `key` against `limit`
  async fn try_acquire_semaphore( &self, key: &str, limit: i64 ) -> Result< bool >;

  /// Decrement the semaphore at `key`, flooring at zero
  async fn release_semaphore( &self, key: &str ) -> Result< () >;

  /// Current semaphore value (diagnostics and tests)
  async fn semaphore_value( &self, key: &str ) -> Result< i64 >;

  /// Reset semaphores whose keyset has been idle for at least `idle_secs`
  ///
  /// Recovers counter drift after a crash; returns how many were reset.
  async fn sweep_idle_semaphores( &self, idle_secs: u64 ) -> Result< u64 >;

  /// Store a one-time value (sign-in state); false when the key exists
  async fn put_one_time( &self, key: &str, value: &str, ttl_secs: u64 ) -> Result< bool >;

  /// Consume a one-time value
  async fn take_one_time( &self, key: &str ) -> Result< Option< String > >;
}

// ---------------------------------------------------------------------------
// In-process backend
// ---------------------------------------------------------------------------

#[ derive( Debug ) ]
struct CounterEntry
{
  value: i64,
  expires_at: i64,
}

#[ derive( Debug ) ]
struct SemaphoreEntry
{
  value: i64,
  last_activity: i64,
}

#[ derive( Debug ) ]
struct OneTimeEntry
{
  value: String,
  expires_at: i64,
}

/// DashMap-backed fast store for tests and single-node deployments
#[ derive( Debug, Default ) ]
pub struct MemoryFastStore
{
  counters: DashMap< String, CounterEntry >,
  semaphores: DashMap< String, SemaphoreEntry >,
  one_time: DashMap< String, OneTimeEntry >,
}

impl MemoryFastStore
{
  #[ must_use ]
  pub fn new() -> Self
  {
    Self::default()
  }

  /// Shared handle
  #[ must_use ]
  pub fn shared() -> Arc< Self >
  {
    Arc::new( Self::new() )
  }
}

#[ async_trait ]
impl FastStore for MemoryFastStore
{
  async fn try_incr_window( &self, key: &str, amount: i64, limit: i64, ttl_secs: u64 ) -> Result< WindowReserve >
  {
    let now = now_ms();
    let mut entry = self.counters.entry( key.to_string() ).or_insert( CounterEntry
    {
      value: 0,
      expires_at: now + ( ttl_secs as i64 ) * 1000,
    } );

    if entry.expires_at <= now
    {
      entry.value = 0;
      entry.expires_at = now + ( ttl_secs as i64 ) * 1000;
    }

    if entry.value + amount > limit
    {
      return Ok( WindowReserve { granted: false, current: entry.value } );
    }

    entry.value += amount;
    Ok( WindowReserve { granted: true, current: entry.value } )
  }

  async fn incr_window_unchecked( &self, key: &str, amount: i64, ttl_secs: u64 ) -> Result< () >
  {
    let now = now_ms();
    let mut entry = self.counters.entry( key.to_string() ).or_insert( CounterEntry
    {
      value: 0,
      expires_at: now + ( ttl_secs as i64 ) * 1000,
    } );
    entry.value += amount;
    Ok( () )
  }

  async fn decr_window( &self, key: &str, amount: i64 ) -> Result< () >
  {
    if let Some( mut entry ) = self.counters.get_mut( key )
    {
      entry.value = ( entry.value - amount ).max( 0 );
    }
    Ok( () )
  }

  async fn try_acquire_semaphore( &self, key: &str, limit: i64 ) -> Result< bool >
  {
    let now = now_ms();
    let mut entry = self.semaphores.entry( key.to_string() ).or_insert( SemaphoreEntry
    {
      value: 0,
      last_activity: now,
    } );

    entry.last_activity = now;

    if entry.value >= limit
    {
      return Ok( false );
    }

    entry.value += 1;
    Ok( true )
  }

  async fn release_semaphore( &self, key: &str ) -> Result< () >
  {
    if let Some( mut entry ) = self.semaphores.get_mut( key )
    {
      entry.value = ( entry.value - 1 ).max( 0 );
      entry.last_activity = now_ms();
    }
    Ok( () )
  }

  async fn semaphore_value( &self, key: &str ) -> Result< i64 >
  {
    Ok( self.semaphores.get( key ).map_or( 0, |e| e.value ) )
  }

  async fn sweep_idle_semaphores( &self, idle_secs: u64 ) -> Result< u64 >
  {
    let cutoff = now_ms() - ( idle_secs as i64 ) * 1000;
    let mut reset = 0;

    for mut entry in self.semaphores.iter_mut()
    {
      if entry.value > 0 && entry.last_activity < cutoff
      {
        entry.value = 0;
        reset += 1;
      }
    }

    // Drop expired window counters while we are here
    let now = now_ms();
    self.counters.retain( |_, entry| entry.expires_at > now );

    Ok( reset )
  }

  async fn put_one_time( &self, key: &str, value: &str, ttl_secs: u64 ) -> Result< bool >
  {
    let now = now_ms();
    self.one_time.retain( |_, entry| entry.expires_at > now );

    if self.one_time.contains_key( key )
    {
      return Ok( false );
    }

    self.one_time.insert( key.to_string(), OneTimeEntry
    {
      value: value.to_string(),
      expires_at: now + ( ttl_secs as i64 ) * 1000,
    } );
    Ok( true )
  }

  async fn take_one_time( &self, key: &str ) -> Result< Option< String > >
  {
    let now = now_ms();
    Ok(
      self.one_time.remove( key )
        .filter( |( _, entry )| entry.expires_at > now )
        .map( |( _, entry )| entry.value )
    )
  }
}

// ---------------------------------------------------------------------------
// Redis backend
// ---------------------------------------------------------------------------

/// Bounded increment: INCRBY, roll back when over limit, refresh TTL.
const SCRIPT_INCR_IF_WITHIN: &str = r"
local v = redis.call('INCRBY', KEYS[1], ARGV[1])
if v > tonumber(ARGV[2]) then
  redis.call('DECRBY', KEYS[1], ARGV[1])
  return {0, v - ARGV[1]}
end
redis.call('EXPIRE', KEYS[1], ARGV[3])
return {1, v}
";

/// Compare-and-increment semaphore with an activity stamp for the sweeper.
const SCRIPT_SEM_ACQUIRE: &str = r"
local v = tonumber(redis.call('GET', KEYS[1]) or '0')
redis.call('SET', KEYS[2], ARGV[2])
if v >= tonumber(ARGV[1]) then
  return 0
end
redis.call('INCR', KEYS[1])
return 1
";

/// Decrement flooring at zero.
const SCRIPT_DECR_FLOOR: &str = r"
local v = tonumber(redis.call('GET', KEYS[1]) or '0')
local amount = tonumber(ARGV[1])
if v <= amount then
  redis.call('SET', KEYS[1], '0')
else
  redis.call('DECRBY', KEYS[1], amount)
end
return 1
";

/// Reset semaphores whose activity stamp is older than the cutoff.
const SCRIPT_SEM_SWEEP: &str = r"
local reset = 0
local cursor = '0'
repeat
  local scan = redis.call('SCAN', cursor, 'MATCH', 'parallel:*', 'COUNT', 100)
  cursor = scan[1]
  for _, key in ipairs(scan[2]) do
    if string.sub(key, -9) ~= ':activity' then
      local activity = redis.call('GET', key .. ':activity')
      local v = tonumber(redis.call('GET', key) or '0')
      if v > 0 and (not activity or tonumber(activity) < tonumber(ARGV[1])) then
        redis.call('SET', key, '0')
        reset = reset + 1
      end
    end
  end
until cursor == '0'
return reset
";

/// Redis-backed fast store for clustered deployments
pub struct RedisFastStore
{
  conn: redis::aio::ConnectionManager,
}

impl core::fmt::Debug for RedisFastStore
{
  fn fmt( &self, f: &mut core::fmt::Formatter< '_ > ) -> core::fmt::Result
  {
    f.debug_struct( "RedisFastStore" ).finish_non_exhaustive()
  }
}

impl RedisFastStore
{
  /// Connect to a Redis instance
  pub async fn connect( url: &str ) -> Result< Self >
  {
    let client = redis::Client::open( url )
      .map_err( |e| GatewayError::Internal( format!( "redis client: {e}" ) ) )?;
    let conn = client.get_connection_manager()
      .await
      .map_err( |e| GatewayError::Internal( format!( "redis connect: {e}" ) ) )?;

    Ok( Self { conn } )
  }

  fn redis_err( e: redis::RedisError ) -> GatewayError
  {
    GatewayError::Internal( format!( "redis: {e}" ) )
  }
}

#[ async_trait ]
impl FastStore for RedisFastStore
{
  async fn try_incr_window( &self, key: &str, amount: i64, limit: i64, ttl_secs: u64 ) -> Result< WindowReserve >
  {
    let mut conn = self.conn.clone();
    let ( granted, current ): ( i64, i64 ) = redis::Script::new( SCRIPT_INCR_IF_WITHIN )
      .key( key )
      .arg( amount )
      .arg( limit )
      .arg( ttl_secs )
      .invoke_async( &mut conn )
      .await
      .map_err( Self::redis_err )?;

    Ok( WindowReserve { granted: granted == 1, current } )
  }

  async fn incr_window_unchecked( &self, key: &str, amount: i64, ttl_secs: u64 ) -> Result< () >
  {
    let mut conn = self.conn.clone();
    let _: () = redis::pipe()
      .cmd( "INCRBY" ).arg( key ).arg( amount ).ignore()
      .cmd( "EXPIRE" ).arg( key ).arg( ttl_secs ).ignore()
      .query_async( &mut conn )
      .await
      .map_err( Self::redis_err )?;

    Ok( () )
  }

  async fn decr_window( &self, key: &str, amount: i64 ) -> Result< () >
  {
    let mut conn = self.conn.clone();
    let _: i64 = redis::Script::new( SCRIPT_DECR_FLOOR )
      .key( key )
      .arg( amount )
      .invoke_async( &mut conn )
      .await
      .map_err( Self::redis_err )?;

    Ok( () )
  }

  async fn try_acquire_semaphore( &self, key: &str, limit: i64 ) -> Result< bool >
  {
    let mut conn = self.conn.clone();
    let activity_key = format!( "{key}:activity" );
    let granted: i64 = redis::Script::new( SCRIPT_SEM_ACQUIRE )
      .key( key )
      .key( activity_key )
      .arg( limit )
      .arg( now_ms() )
      .invoke_async( &mut conn )
      .await
      .map_err( Self::redis_err )?;

    Ok( granted == 1 )
  }

  async fn release_semaphore( &self, key: &str ) -> Result< () >
  {
    self.decr_window( key, 1 ).await
  }

  async fn semaphore_value( &self, key: &str ) -> Result< i64 >
  {
    let mut conn = self.conn.clone();
    let value: Option< i64 > = redis::AsyncCommands::get( &mut conn, key )
      .await
      .map_err( Self::redis_err )?;

    Ok( value.unwrap_or( 0 ) )
  }

  async fn sweep_idle_semaphores( &self, idle_secs: u64 ) -> Result< u64 >
  {
    let mut conn = self.conn.clone();
    let cutoff = now_ms() - ( idle_secs as i64 ) * 1000;
    let reset: i64 = redis::Script::new( SCRIPT_SEM_SWEEP )
      .arg( cutoff )
      .invoke_async( &mut conn )
      .await
      .map_err( Self::redis_err )?;

    Ok( reset.max( 0 ) as u64 )
  }

  async fn put_one_time( &self, key: &str, value: &str, ttl_secs: u64 ) -> Result< bool >
  {
    let mut conn = self.conn.clone();
    let set: Option< String > = redis::cmd( "SET" )
      .arg( key )
      .arg( value )
      .arg( "NX" )
      .arg( "EX" )
      .arg( ttl_secs )
      .query_async( &mut conn )
      .await
      .map_err( Self::redis_err )?;

    Ok( set.is_some() )
  }

  async fn take_one_time( &self, key: &str ) -> Result< Option< String > >
  {
    let mut conn = self.conn.clone();
    let value: Option< String > = redis::cmd( "GETDEL" )
      .arg( key )
      .query_async( &mut conn )
      .await
      .map_err( Self::redis_err )?;

    Ok( value )
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ tokio::test ]
  async fn test_window_increment_refuses_over_limit()
  {
    let fast = MemoryFastStore::new();

    let first = fast.try_incr_window( "rl:key:k1:rpm:1", 3, 5, 60 ).await.expect( "incr" );
    assert!( first.granted );
    assert_eq!( first.current, 3 );

    let second = fast.try_incr_window( "rl:key:k1:rpm:1", 3, 5, 60 ).await.expect( "incr" );
    assert!( !second.granted, "6 > 5 must be refused" );
    assert_eq!( second.current, 3, "refused increments leave the counter untouched" );

    let third = fast.try_incr_window( "rl:key:k1:rpm:1", 2, 5, 60 ).await.expect( "incr" );
    assert!( third.granted );
    assert_eq!( third.current, 5 );
  }

  #[ tokio::test ]
  async fn test_decr_floors_at_zero()
  {
    let fast = MemoryFastStore::new();
    fast.incr_window_unchecked( "rl:t:x:tpm:1", 4, 60 ).await.expect( "incr" );

    fast.decr_window( "rl:t:x:tpm:1", 10 ).await.expect( "decr" );
    let reserve = fast.try_incr_window( "rl:t:x:tpm:1", 1, 1, 60 ).await.expect( "incr" );
    assert!( reserve.granted, "counter must have floored at zero" );
  }

  #[ tokio::test ]
  async fn test_idle_semaphores_are_swept()
  {
    let fast = MemoryFastStore::new();

    assert!( fast.try_acquire_semaphore( "parallel:key:crashed", 4 ).await.expect( "acquire" ) );
    assert!( fast.try_acquire_semaphore( "parallel:key:crashed", 4 ).await.expect( "acquire" ) );
    assert_eq!( fast.semaphore_value( "parallel:key:crashed" ).await.expect( "value" ), 2 );

    // Give the activity stamp a moment to age past the zero-second cutoff
    tokio::time::sleep( std::time::Duration::from_millis( 20 ) ).await;

    let reset = fast.sweep_idle_semaphores( 0 ).await.expect( "sweep" );
    assert_eq!( reset, 1 );
    assert_eq!( fast.semaphore_value( "parallel:key:crashed" ).await.expect( "value" ), 0 );
  }

  #[ tokio::test ]
  async fn test_one_time_state_is_consumed_once()
  {
    let fast = MemoryFastStore::new();

    assert!( fast.put_one_time( "oidc:state:abc", "nonce-1", 60 ).await.expect( "put" ) );
    // Duplicate keys are refused while the first value lives
    assert!( !fast.put_one_time( "oidc:state:abc", "nonce-2", 60 ).await.expect( "put" ) );

    let taken = fast.take_one_time( "oidc:state:abc" ).await.expect( "take" );
    assert_eq!( taken.as_deref(), Some( "nonce-1" ) );

    assert!( fast.take_one_time( "oidc:state:abc" ).await.expect( "take" ).is_none() );
  }
}

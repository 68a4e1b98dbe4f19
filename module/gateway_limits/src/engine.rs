//! Reservation engine over the fast store
//!
//! Reserve order is tenant first, then key, for every axis; releases run in
//! reverse. A failed step rolls back everything taken before it, so a
//! rejected request never consumes quota.

use std::sync::Arc;

use gateway_types::{ GatewayError, RequestContext, Result };

use crate::fast::FastStore;
use crate::{ minute_bucket, now_ms, retry_after_secs };

/// Seconds a window counter key survives after its minute ends
const WINDOW_TTL_SECS: u64 = 120;

/// Idle threshold after which the sweeper resets a semaphore
pub const SEMAPHORE_IDLE_SECS: u64 = 300;

#[ derive( Debug, Clone ) ]
struct WindowDebit
{
  key: String,
  amount: i64,
}

/// Live reservation for one request
///
/// Holds everything needed to undo or settle the counters. Exactly one of
/// [`Reservation::settle`] or [`Reservation::cancel`] must run; dropping an
/// unsettled reservation releases the parallel slots on a detached task so a
/// disconnecting client cannot leak them.
#[ derive( Debug ) ]
pub struct Reservation
{
  fast: Arc< dyn FastStore >,
  window_debits: Vec< WindowDebit >,
  tpm_keys: Vec< String >,
  estimated_tokens: i64,
  parallel_keys: Vec< String >,
  settled: bool,
}

impl Reservation
{
  /// Reconcile TPM against actual usage and release the parallel slots
  ///
  /// RPM stays consumed; the request happened. TPM moves by the difference
  /// between the estimate and what the provider actually metered.
  pub async fn settle( mut self, actual_tokens: i64 )
  {
    self.settled = true;

    let diff = actual_tokens - self.estimated_tokens;
    for key in &self.tpm_keys
    {
      let outcome = if diff > 0
      {
        self.fast.incr_window_unchecked( key, diff, WINDOW_TTL_SECS ).await
      }
      else if diff < 0
      {
        self.fast.decr_window( key, -diff ).await
      }
      else
      {
        Ok( () )
      };

      if let Err( err ) = outcome
      {
        tracing::warn!( key = %key, error = %err, "tpm reconciliation failed" );
      }
    }

    self.release_parallel().await;
  }

  /// Undo the reservation entirely (request never dispatched)
  pub async fn cancel( mut self )
  {
    self.settled = true;

    for debit in self.window_debits.clone()
    {
      if let Err( err ) = self.fast.decr_window( &debit.key, debit.amount ).await
      {
        tracing::warn!( key = %debit.key, error = %err, "window rollback failed" );
      }
    }

    self.release_parallel().await;
  }

  async fn release_parallel( &mut self )
  {
    // Reverse acquisition order: key first, tenant last
    for key in self.parallel_keys.drain( .. ).rev().collect::< Vec< _ > >()
    {
      if let Err( err ) = self.fast.release_semaphore( &key ).await
      {
        tracing::warn!( key = %key, error = %err, "semaphore release failed" );
      }
    }
  }
}

impl Drop for Reservation
{
  fn drop( &mut self )
  {
    if self.settled || self.parallel_keys.is_empty()
    {
      return;
    }

    // The owning task was dropped (client disconnect); free the slots from
    // a detached task since Drop cannot await.
    let fast = Arc::clone( &self.fast );
    let keys: Vec< String > = self.parallel_keys.drain( .. ).rev().collect();

    if let Ok( handle ) = tokio::runtime::Handle::try_current()
    {
      handle.spawn( async move
      {
        for key in keys
        {
          let _ = fast.release_semaphore( &key ).await;
        }
      } );
    }
  }
}

/// The limits engine
#[ derive( Debug, Clone ) ]
pub struct LimitsEngine
{
  fast: Arc< dyn FastStore >,
}

impl LimitsEngine
{
  #[ must_use ]
  pub fn new( fast: Arc< dyn FastStore > ) -> Self
  {
    Self { fast }
  }

  /// The backing fast store
  #[ must_use ]
  pub fn fast( &self ) -> &Arc< dyn FastStore >
  {
    &self.fast
  }

  /// Reserve every axis for one request
  ///
  /// # Errors
  ///
  /// `rate_limited` with a `Retry-After` when an axis is exhausted; already
  /// taken axes are rolled back before the error returns.
  pub async fn reserve( &self, ctx: &RequestContext, estimated_tokens: i64 ) -> Result< Reservation >
  {
    let now = now_ms();
    let bucket = minute_bucket( now );

    let mut reservation = Reservation
    {
      fast: Arc::clone( &self.fast ),
      window_debits: Vec::new(),
      tpm_keys: Vec::new(),
      estimated_tokens,
      parallel_keys: Vec::new(),
      settled: false,
    };

    // RPM, tenant then key
    let rpm_axes = [
      ( "tenant", ctx.tenant_id.to_string(), ctx.tenant_limits.requests_per_minute ),
      ( "key", ctx.api_key_id.to_string(), ctx.key_limits.requests_per_minute ),
    ];

    for ( scope, id, limit ) in &rpm_axes
    {
      if *limit <= 0
      {
        continue;
      }

      let counter_key = format!( "rl:{scope}:{id}:rpm:{bucket}" );
      let reserve = self.fast.try_incr_window( &counter_key, 1, *limit, WINDOW_TTL_SECS ).await?;
      if !reserve.granted
      {
        reservation.cancel().await;
        return Err( GatewayError::RateLimited
        {
          scope: *scope,
          axis: "rpm",
          retry_after_secs: retry_after_secs( now ),
        } );
      }
      reservation.window_debits.push( WindowDebit { key: counter_key, amount: 1 } );
    }

    // TPM, tenant then key, with the estimated token cost
    let tpm_axes = [
      ( "tenant", ctx.tenant_id.to_string(), ctx.tenant_limits.tokens_per_minute ),
      ( "key", ctx.api_key_id.to_string(), ctx.key_limits.tokens_per_minute ),
    ];

    for ( scope, id, limit ) in &tpm_axes
    {
      if *limit <= 0 || estimated_tokens <= 0
      {
        continue;
      }

      let counter_key = format!( "rl:{scope}:{id}:tpm:{bucket}" );
      let reserve = self.fast.try_incr_window( &counter_key, estimated_tokens, *limit, WINDOW_TTL_SECS ).await?;
      if !reserve.granted
      {
        reservation.cancel().await;
        return Err( GatewayError::RateLimited
        {
          scope: *scope,
          axis: "tpm",
          retry_after_secs: retry_after_secs( now ),
        } );
      }
      reservation.window_debits.push( WindowDebit { key: counter_key.clone(), amount: estimated_tokens } );
      reservation.tpm_keys.push( counter_key );
    }

    // Parallel slots, tenant then key
    let parallel_axes = [
      ( "tenant", ctx.tenant_id.to_string(), ctx.tenant_limits.parallel_requests ),
      ( "key", ctx.api_key_id.to_string(), ctx.key_limits.parallel_requests ),
    ];

    for ( scope, id, limit ) in &parallel_axes
    {
      if *limit <= 0
      {
        continue;
      }

      let sem_key = format!( "parallel:{scope}:{id}" );
      let granted = self.fast.try_acquire_semaphore( &sem_key, *limit ).await?;
      if !granted
      {
        reservation.cancel().await;
        return Err( GatewayError::RateLimited
        {
          scope: *scope,
          axis: "parallel",
          retry_after_secs: 1,
        } );
      }
      reservation.parallel_keys.push( sem_key );
    }

    Ok( reservation )
  }

  /// Run the idle-semaphore sweep once
  pub async fn sweep_once( &self ) -> Result< u64 >
  {
    self.fast.sweep_idle_semaphores( SEMAPHORE_IDLE_SECS ).await
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use crate::fast::MemoryFastStore;
  use gateway_types::RateLimitSettings;
  use uuid::Uuid;

  fn ctx( rpm: i64, tpm: i64, parallel: i64 ) -> RequestContext
  {
    RequestContext
    {
      tenant_id: Uuid::new_v4(),
      api_key_id: Uuid::new_v4(),
      api_key_prefix: "omg-test".to_string(),
      owner_user_id: None,
      key_limits: RateLimitSettings { requests_per_minute: rpm, tokens_per_minute: tpm, parallel_requests: parallel },
      tenant_limits: RateLimitSettings { requests_per_minute: rpm * 2, tokens_per_minute: tpm * 2, parallel_requests: parallel * 2 },
      key_quota: None,
      request_id: "req-test".to_string(),
    }
  }

  #[ tokio::test ]
  async fn test_exactly_limit_requests_pass_per_minute()
  {
    let engine = LimitsEngine::new( MemoryFastStore::shared() );
    let ctx = ctx( 5, 0, 0 );

    let mut granted = 0;
    let mut rejected = 0;
    for _ in 0..8
    {
      match engine.reserve( &ctx, 0 ).await
      {
        Ok( reservation ) =>
        {
          granted += 1;
          reservation.settle( 0 ).await;
        }
        Err( err ) =>
        {
          rejected += 1;
          assert_eq!( err.kind(), "rate_limited" );
          assert!( err.retry_after().is_some() );
        }
      }
    }

    assert_eq!( granted, 5 );
    assert_eq!( rejected, 3 );
  }

  #[ tokio::test ]
  async fn test_parallel_counter_returns_to_zero()
  {
    let engine = LimitsEngine::new( MemoryFastStore::shared() );
    let ctx = ctx( 0, 0, 2 );
    let key_sem = format!( "parallel:key:{}", ctx.api_key_id );

    let first = engine.reserve( &ctx, 0 ).await.expect( "first slot" );
    let second = engine.reserve( &ctx, 0 ).await.expect( "second slot" );

    // Key limit is 2; a third concurrent request is refused
    let err = engine.reserve( &ctx, 0 ).await.expect_err( "third slot" );
    assert_eq!( err.kind(), "rate_limited" );

    assert_eq!( engine.fast().semaphore_value( &key_sem ).await.expect( "value" ), 2 );

    first.settle( 0 ).await;
    second.cancel().await;

    assert_eq!( engine.fast().semaphore_value( &key_sem ).await.expect( "value" ), 0 );
  }

  #[ tokio::test ]
  async fn test_tpm_rejection_rolls_back_the_tenant_reserve()
  {
    let engine = LimitsEngine::new( MemoryFastStore::shared() );
    let mut ctx = ctx( 0, 100, 0 );
    // Tight key limit under a loose tenant limit
    ctx.key_limits.tokens_per_minute = 10;

    let err = engine.reserve( &ctx, 50 ).await.expect_err( "key tpm too small" );
    assert_eq!( err.kind(), "rate_limited" );

    // The tenant-side reserve must have been rolled back, so a request that
    // fits the key limit still has the full tenant budget available
    let reservation = engine.reserve( &ctx, 10 ).await.expect( "fits both limits" );
    reservation.settle( 10 ).await;
  }

  #[ tokio::test ]
  async fn test_settle_reconciles_token_difference()
  {
    let engine = LimitsEngine::new( MemoryFastStore::shared() );
    let ctx = ctx( 0, 100, 0 );

    let reservation = engine.reserve( &ctx, 80 ).await.expect( "estimate fits" );
    // Actual usage was much smaller; reconciliation frees the difference
    reservation.settle( 20 ).await;

    let reservation = engine.reserve( &ctx, 60 ).await.expect( "freed capacity is available" );
    reservation.settle( 60 ).await;
  }
}

//! Deployment selection with per-deployment health windows
//!
//! Each deployment keeps a ring of its last 20 dispatch outcomes. Healthy
//! deployments are served round-robin; when none are healthy the least
//! unhealthy one gets a single probe in flight at a time. Selection happens
//! once per request and stays fixed for the life of a streaming response.

use std::sync::Mutex;
use std::sync::atomic::{ AtomicUsize, Ordering };
use std::time::Instant;

use dashmap::DashMap;
use uuid::Uuid;

use gateway_types::{ GatewayError, Result, RouteStatus };

use crate::snapshot::{ CatalogModel, DeploymentInfo };

/// Ring capacity for dispatch outcomes
const WINDOW_SIZE: usize = 20;
/// Seconds a deployment stays suspect after its last failure
const FAILURE_QUARANTINE_SECS: u64 = 15;

/// Moving window of one deployment's recent outcomes
#[ derive( Debug ) ]
struct HealthWindow
{
  outcomes: [ bool; WINDOW_SIZE ],
  cursor: usize,
  filled: usize,
  last_failure: Option< Instant >,
  probe_in_flight: bool,
}

impl HealthWindow
{
  fn new() -> Self
  {
    Self
    {
      outcomes: [ true; WINDOW_SIZE ],
      cursor: 0,
      filled: 0,
      last_failure: None,
      probe_in_flight: false,
    }
  }

  fn record( &mut self, success: bool )
  {
    self.outcomes[ self.cursor ] = success;
    self.cursor = ( self.cursor + 1 ) % WINDOW_SIZE;
    self.filled = ( self.filled + 1 ).min( WINDOW_SIZE );
    if !success
    {
      self.last_failure = Some( Instant::now() );
    }
    self.probe_in_flight = false;
  }

  fn failure_rate( &self ) -> f64
  {
    if self.filled == 0
    {
      return 0.0;
    }
    let failures = self.outcomes[ ..self.filled ].iter().filter( |ok| !**ok ).count();
    failures as f64 / self.filled as f64
  }

  fn is_healthy( &self ) -> bool
  {
    let quarantine_clear = self.last_failure
      .map_or( true, |at| at.elapsed().as_secs() > FAILURE_QUARANTINE_SECS );

    self.failure_rate() < 0.5 && quarantine_clear
  }
}

/// Aggregate health for one alias
#[ derive( Debug, Clone, Copy, PartialEq, Eq ) ]
pub struct RouteHealth
{
  pub total_routes: usize,
  pub healthy_routes: usize,
}

impl RouteHealth
{
  /// Derived catalog status label
  #[ must_use ]
  pub fn status( &self, enabled: bool ) -> RouteStatus
  {
    if !enabled
    {
      return RouteStatus::Disabled;
    }
    match ( self.total_routes, self.healthy_routes )
    {
      ( 0, _ ) => RouteStatus::Unknown,
      ( _, 0 ) => RouteStatus::Offline,
      ( total, healthy ) if healthy == total => RouteStatus::Online,
      _ => RouteStatus::Degraded,
    }
  }
}

/// Health view of one deployment (admin surface)
#[ derive( Debug, Clone, Copy ) ]
pub struct DeploymentHealth
{
  pub deployment_id: Uuid,
  pub healthy: bool,
  pub failure_rate: f64,
}

/// The deployment router
#[ derive( Debug, Default ) ]
pub struct Router
{
  windows: DashMap< Uuid, Mutex< HealthWindow > >,
  cursors: DashMap< String, AtomicUsize >,
}

impl Router
{
  #[ must_use ]
  pub fn new() -> Self
  {
    Self::default()
  }

  /// Pick a deployment for `model`
  ///
  /// Round-robin over healthy enabled deployments; with none healthy, the
  /// least-unhealthy one is probed, one probe in flight at a time.
  ///
  /// # Errors
  ///
  /// `upstream_unavailable` when the alias has no enabled deployment, or
  /// every unhealthy candidate already has a probe in flight.
  pub fn select( &self, model: &CatalogModel ) -> Result< DeploymentInfo >
  {
    let enabled: Vec< &DeploymentInfo > = model.deployments.iter().filter( |d| d.enabled ).collect();

    if enabled.is_empty()
    {
      return Err( GatewayError::UpstreamUnavailable(
        format!( "no deployments configured for {}", model.alias )
      ) );
    }

    let healthy: Vec< &DeploymentInfo > = enabled
      .iter()
      .copied()
      .filter( |d| self.is_healthy( d.id ) )
      .collect();

    if !healthy.is_empty()
    {
      let cursor = self.cursors.entry( model.alias.clone() ).or_insert_with( || AtomicUsize::new( 0 ) );
      let index = cursor.fetch_add( 1, Ordering::Relaxed ) % healthy.len();
      return Ok( healthy[ index ].clone() );
    }

    // Probe path: least failure rate first, one probe at a time
    let mut candidates: Vec< ( f64, &DeploymentInfo ) > = enabled
      .iter()
      .copied()
      .map( |d| ( self.failure_rate( d.id ), d ) )
      .collect();
    candidates.sort_by( |a, b| a.0.partial_cmp( &b.0 ).unwrap_or( core::cmp::Ordering::Equal ) );

    for ( _, deployment ) in candidates
    {
      if self.try_begin_probe( deployment.id )
      {
        tracing::debug!( alias = %model.alias, deployment = %deployment.id, "probing unhealthy deployment" );
        return Ok( deployment.clone() );
      }
    }

    Err( GatewayError::UpstreamUnavailable(
      format!( "all deployments for {} are unhealthy", model.alias )
    ) )
  }

  /// Record a dispatch outcome for a deployment
  pub fn report( &self, deployment_id: Uuid, success: bool )
  {
    let window = self.windows.entry( deployment_id ).or_insert_with( || Mutex::new( HealthWindow::new() ) );
    if let Ok( mut guard ) = window.lock()
    {
      guard.record( success );
    };
  }

  /// Aggregate route health for an alias
  #[ must_use ]
  pub fn health( &self, model: &CatalogModel ) -> RouteHealth
  {
    let enabled: Vec< &DeploymentInfo > = model.deployments.iter().filter( |d| d.enabled ).collect();
    let healthy = enabled.iter().filter( |d| self.is_healthy( d.id ) ).count();

    RouteHealth
    {
      total_routes: enabled.len(),
      healthy_routes: healthy,
    }
  }

  /// Per-deployment health rows for the admin surface
  #[ must_use ]
  pub fn deployment_health( &self, model: &CatalogModel ) -> Vec< DeploymentHealth >
  {
    model
      .deployments
      .iter()
      .map( |d| DeploymentHealth
      {
        deployment_id: d.id,
        healthy: self.is_healthy( d.id ),
        failure_rate: self.failure_rate( d.id ),
      } )
      .collect()
  }

  fn is_healthy( &self, deployment_id: Uuid ) -> bool
  {
    self.windows
      .get( &deployment_id )
      .map_or( true, |window| window.lock().map_or( false, |guard| guard.is_healthy() ) )
  }

  fn failure_rate( &self, deployment_id: Uuid ) -> f64
  {
    self.windows
      .get( &deployment_id )
      .map_or( 0.0, |window| window.lock().map_or( 1.0, |guard| guard.failure_rate() ) )
  }

  fn try_begin_probe( &self, deployment_id: Uuid ) -> bool
  {
    let window = self.windows.entry( deployment_id ).or_insert_with( || Mutex::new( HealthWindow::new() ) );
    let Ok( mut guard ) = window.lock() else
    {
      return false;
    };

    if guard.probe_in_flight
    {
      return false;
    }

    guard.probe_in_flight = true;
    true
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use gateway_types::{ ModelType, ProviderFamily };

  fn model( deployment_count: usize ) -> CatalogModel
  {
    CatalogModel
    {
      alias: "gpt-4o".to_string(),
      provider: ProviderFamily::Openai,
      provider_model: "gpt-4o-2024-08-06".to_string(),
      model_type: ModelType::Chat,
      enabled: true,
      price_input_per_mtoken_usd: 2.5,
      price_output_per_mtoken_usd: 10.0,
      credentials_ref: "openai-main".to_string(),
      deployments: ( 0..deployment_count )
        .map( |i| DeploymentInfo
        {
          id: Uuid::new_v4(),
          endpoint: format!( "https://upstream-{i}.example.com" ),
          region: None,
          credentials_ref: "openai-main".to_string(),
          enabled: true,
        } )
        .collect(),
    }
  }

  #[ test ]
  fn test_round_robin_is_roughly_uniform()
  {
    let router = Router::new();
    let model = model( 4 );

    let mut counts = std::collections::HashMap::new();
    let total = 1000;
    for _ in 0..total
    {
      let selected = router.select( &model ).expect( "select" );
      *counts.entry( selected.id ).or_insert( 0usize ) += 1;
    }

    assert_eq!( counts.len(), 4 );
    let expected = total / 4;
    let tolerance = total * 5 / 100;
    for ( _, count ) in counts
    {
      assert!(
        count.abs_diff( expected ) <= tolerance,
        "distribution outside ±5%: {count} vs {expected}"
      );
    }
  }

  #[ test ]
  fn test_failed_deployment_leaves_rotation()
  {
    let router = Router::new();
    let model = model( 2 );
    let bad = model.deployments[ 0 ].id;
    let good = model.deployments[ 1 ].id;

    // Drive the first deployment under 50% success within its window
    for _ in 0..WINDOW_SIZE
    {
      router.report( bad, false );
    }
    for _ in 0..WINDOW_SIZE
    {
      router.report( good, true );
    }

    for _ in 0..10
    {
      let selected = router.select( &model ).expect( "select" );
      assert_eq!( selected.id, good, "unhealthy deployment must not be selected" );
    }

    let health = router.health( &model );
    assert_eq!( health.total_routes, 2 );
    assert_eq!( health.healthy_routes, 1 );
    assert_eq!( health.status( true ), RouteStatus::Degraded );
  }

  #[ test ]
  fn test_probe_is_single_flight_when_all_unhealthy()
  {
    let router = Router::new();
    let model = model( 1 );
    let only = model.deployments[ 0 ].id;

    for _ in 0..WINDOW_SIZE
    {
      router.report( only, false );
    }

    // First selection probes; the second is refused while the probe is out
    let selected = router.select( &model ).expect( "probe" );
    assert_eq!( selected.id, only );

    let err = router.select( &model ).expect_err( "second probe refused" );
    assert_eq!( err.kind(), "upstream_unavailable" );

    // Outcome report clears the probe flag
    router.report( only, true );
    router.select( &model ).expect( "probe again after report" );
  }

  #[ test ]
  fn test_status_labels()
  {
    let health = RouteHealth { total_routes: 0, healthy_routes: 0 };
    assert_eq!( health.status( true ), RouteStatus::Unknown );
    assert_eq!( health.status( false ), RouteStatus::Disabled );

    let health = RouteHealth { total_routes: 3, healthy_routes: 3 };
    assert_eq!( health.status( true ), RouteStatus::Online );

    let health = RouteHealth { total_routes: 3, healthy_routes: 0 };
    assert_eq!( health.status( true ), RouteStatus::Offline );
  }
}

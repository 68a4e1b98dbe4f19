//! Telemetry for the model gateway
//!
//! Structured logging through `tracing` and a process-wide Prometheus
//! registry carrying the gateway's counters and histograms. Exporter
//! transport is out of scope; the HTTP layer serves the encoded registry
//! and anything beyond that is the operator's business.

use prometheus::{ Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder };

use gateway_types::{ GatewayError, Result };

/// Log verbosity
#[ derive( Debug, Clone, Copy ) ]
pub enum LogLevel
{
  Debug,
  Info,
  Warn,
  Error,
}

impl LogLevel
{
  fn as_filter( self ) -> &'static str
  {
    match self
    {
      Self::Debug => "debug",
      Self::Info => "info",
      Self::Warn => "warn",
      Self::Error => "error",
    }
  }
}

/// Initialize the tracing subscriber
///
/// `RUST_LOG` overrides the level when set. Call once at startup; a second
/// call fails because the global subscriber is already installed.
pub fn init_logging( level: LogLevel ) -> Result< () >
{
  use tracing_subscriber::EnvFilter;

  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else( |_| EnvFilter::new( level.as_filter() ) );

  tracing_subscriber::fmt()
    .with_env_filter( filter )
    .with_target( false )
    .try_init()
    .map_err( |e| GatewayError::Internal( format!( "tracing init: {e}" ) ) )
}

/// The gateway's metric families
#[ derive( Clone ) ]
pub struct Metrics
{
  registry: Registry,
  pub http_requests_total: IntCounterVec,
  pub http_request_duration_seconds: HistogramVec,
  pub api_request_duration_seconds: HistogramVec,
  pub api_tokens_total: IntCounterVec,
}

impl core::fmt::Debug for Metrics
{
  fn fmt( &self, f: &mut core::fmt::Formatter< '_ > ) -> core::fmt::Result
  {
    f.debug_struct( "Metrics" ).finish_non_exhaustive()
  }
}

impl Metrics
{
  /// Build and register every family
  pub fn new() -> Result< Self >
  {
    let registry = Registry::new();

    let http_requests_total = IntCounterVec::new(
      Opts::new( "open_model_gateway_http_requests_total", "HTTP requests by method, route and status" ),
      &[ "method", "route", "status" ],
    )
    .map_err( metric_err )?;

    let http_request_duration_seconds = HistogramVec::new(
      HistogramOpts::new( "open_model_gateway_http_request_duration_seconds", "HTTP request latency" ),
      &[ "method", "route" ],
    )
    .map_err( metric_err )?;

    let api_request_duration_seconds = HistogramVec::new(
      HistogramOpts::new( "open_model_gateway_api_request_duration_seconds", "Upstream dispatch latency" ),
      &[ "tenant", "model", "provider", "status" ],
    )
    .map_err( metric_err )?;

    let api_tokens_total = IntCounterVec::new(
      Opts::new( "open_model_gateway_api_tokens_total", "Tokens metered by tenant, model, provider and type" ),
      &[ "tenant", "model", "provider", "type" ],
    )
    .map_err( metric_err )?;

    registry.register( Box::new( http_requests_total.clone() ) ).map_err( metric_err )?;
    registry.register( Box::new( http_request_duration_seconds.clone() ) ).map_err( metric_err )?;
    registry.register( Box::new( api_request_duration_seconds.clone() ) ).map_err( metric_err )?;
    registry.register( Box::new( api_tokens_total.clone() ) ).map_err( metric_err )?;

    Ok( Self
    {
      registry,
      http_requests_total,
      http_request_duration_seconds,
      api_request_duration_seconds,
      api_tokens_total,
    } )
  }

  /// Record a finished upstream dispatch
  pub fn observe_api_request(
    &self,
    tenant: &str,
    model: &str,
    provider: &str,
    status: &str,
    latency_seconds: f64,
    prompt_tokens: i64,
    completion_tokens: i64,
  )
  {
    self.api_request_duration_seconds
      .with_label_values( &[ tenant, model, provider, status ] )
      .observe( latency_seconds );

    if prompt_tokens > 0
    {
      self.api_tokens_total
        .with_label_values( &[ tenant, model, provider, "prompt" ] )
        .inc_by( prompt_tokens as u64 );
    }
    if completion_tokens > 0
    {
      self.api_tokens_total
        .with_label_values( &[ tenant, model, provider, "completion" ] )
        .inc_by( completion_tokens as u64 );
    }
  }

  /// Encode the registry in the Prometheus text format
  pub fn export( &self ) -> Result< String >
  {
    let encoder = TextEncoder::new();
    let families = self.registry.gather();
    let mut buffer = Vec::new();
    encoder
      .encode( &families, &mut buffer )
      .map_err( metric_err )?;

    String::from_utf8( buffer )
      .map_err( |e| GatewayError::Internal( format!( "metrics encoding: {e}" ) ) )
  }
}

fn metric_err( e: prometheus::Error ) -> GatewayError
{
  GatewayError::Internal( format!( "metrics: {e}" ) )
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn test_families_register_and_export()
  {
    let metrics = Metrics::new().expect( "metrics" );

    metrics.http_requests_total
      .with_label_values( &[ "POST", "/v1/chat/completions", "200" ] )
      .inc();
    metrics.observe_api_request( "acme", "gpt-4o", "openai", "ok", 0.42, 120, 80 );

    let text = metrics.export().expect( "export" );
    assert!( text.contains( "open_model_gateway_http_requests_total" ) );
    assert!( text.contains( "open_model_gateway_api_tokens_total" ) );
  }
}

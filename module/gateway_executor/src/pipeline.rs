//! The data-plane pipeline
//!
//! Order per request: authorize alias → reserve limits → budget admission →
//! guardrail prompt → select deployment → dispatch → guardrail response →
//! account usage → debit → settle limits. The same path serves HTTP
//! handlers and batch workers; streaming responses run the tail of the
//! pipeline from the producer task so accounting still happens after the
//! client has its bytes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{ Duration, Instant };

use futures::StreamExt;
use serde_json::{ json, Value };
use tokio::sync::mpsc;
use uuid::Uuid;

use gateway_budget::BudgetEngine;
use gateway_catalog::{ authorize, CatalogModel, CatalogSnapshot, DeploymentInfo, Router };
use gateway_guardrail::{ prompt_text, response_text, scan_keywords, GuardrailEngine, SAFE_REFUSAL };
use gateway_limits::{ LimitsEngine, Reservation };
use gateway_store::{ now_ms, GuardrailPolicyRecord, Store, UsageEventRecord };
use gateway_telemetry::Metrics;
use gateway_types::{ GatewayError, GuardrailAction, GuardrailStage, RequestContext, Result };

use crate::cost::{ actual_cost_usd, estimated_cost_usd };
use crate::dispatch::{ self, extract_usage, SseParser, UsageTokens };
use crate::estimate::estimate_request_tokens;
use crate::translate::translate;
use crate::ApiEndpoint;

/// Initial attempt plus two retries against other deployments
const MAX_DISPATCH_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 100;
const BACKOFF_CAP_MS: u64 = 1_000;

const BUFFERED_TIMEOUT: Duration = Duration::from_secs( 120 );
const STREAM_TIMEOUT: Duration = Duration::from_secs( 600 );

/// One frame on the way to a streaming client
#[ derive( Debug, Clone, PartialEq, Eq ) ]
pub enum StreamFrame
{
  /// One SSE `data:` payload, verbatim from upstream
  Data( String ),
  /// Terminal marker; the HTTP layer renders `data: [DONE]`
  Done,
}

/// Buffered pipeline result
#[ derive( Debug, Clone ) ]
pub struct BufferedResponse
{
  pub body: Value,
  /// Fields the provider family could not express
  pub dropped_fields: Vec< String >,
}

/// Shared dependencies for the pipeline
#[ derive( Debug, Clone ) ]
pub struct PipelineDeps
{
  pub store: Store,
  pub limits: LimitsEngine,
  pub budget: BudgetEngine,
  pub guardrails: GuardrailEngine,
  pub router: Arc< Router >,
  pub metrics: Metrics,
  /// credentials_ref → secret, loaded from configuration
  pub credentials: Arc< HashMap< String, String > >,
}

/// The pipeline itself
#[ derive( Debug, Clone ) ]
pub struct Pipeline
{
  deps: PipelineDeps,
  http: reqwest::Client,
}

impl Pipeline
{
  #[ must_use ]
  pub fn new( deps: PipelineDeps ) -> Self
  {
    Self
    {
      deps,
      http: reqwest::Client::new(),
    }
  }

  /// Serve a buffered (non-streaming) request end to end
  #[ tracing::instrument( skip_all, fields( request_id = %ctx.request_id, endpoint = endpoint.path() ) ) ]
  pub async fn execute(
    &self,
    ctx: &RequestContext,
    snapshot: &CatalogSnapshot,
    endpoint: ApiEndpoint,
    body: Value,
  ) -> Result< BufferedResponse >
  {
    let ( model, estimated_tokens ) = self.admit_stage( ctx, snapshot, endpoint, &body ).await?;

    let reservation = self.deps.limits.reserve( ctx, estimated_tokens ).await?;

    match self
      .execute_after_reserve( ctx, snapshot, endpoint, body, &model, estimated_tokens )
      .await
    {
      Ok( ( response, usage ) ) =>
      {
        reservation.settle( usage.total_tokens ).await;
        Ok( response )
      }
      Err( err ) =>
      {
        reservation.cancel().await;
        Err( err )
      }
    }
  }

  /// Alias authorization plus the pure admission pre-checks
  async fn admit_stage(
    &self,
    ctx: &RequestContext,
    snapshot: &CatalogSnapshot,
    endpoint: ApiEndpoint,
    body: &Value,
  ) -> Result< ( CatalogModel, i64 ) >
  {
    let alias = body
      .get( "model" )
      .and_then( Value::as_str )
      .ok_or_else( || GatewayError::BadRequest( "missing `model` field".to_string() ) )?;

    let model = authorize( snapshot, ctx.tenant_id, alias )?.clone();

    if model.model_type != endpoint.model_type()
    {
      return Err( GatewayError::BadRequest( format!(
        "model {} does not serve {}",
        model.alias,
        endpoint.path()
      ) ) );
    }

    let estimated_tokens = estimate_request_tokens( endpoint.model_type(), body );

    Ok( ( model, estimated_tokens ) )
  }

  async fn execute_after_reserve(
    &self,
    ctx: &RequestContext,
    snapshot: &CatalogSnapshot,
    endpoint: ApiEndpoint,
    body: Value,
    model: &CatalogModel,
    estimated_tokens: i64,
  ) -> Result< ( BufferedResponse, UsageTokens ) >
  {
    self.deps.budget
      .admit( ctx.tenant_id, estimated_cost_usd( model, estimated_tokens ), &snapshot.defaults.budget )
      .await?;

    let policy = self.deps.guardrails.resolve_policy( ctx.tenant_id, ctx.api_key_id ).await?;
    if let Some( policy ) = &policy
    {
      let text = prompt_text( &body );
      self.deps.guardrails.enforce( ctx, policy, GuardrailStage::Prompt, &text ).await?;
    }

    let started = Instant::now();
    let ( mut outcome, deployment, dropped_fields ) =
      self.dispatch_with_retry( model, endpoint, &body ).await?;
    let latency_ms = started.elapsed().as_millis() as i64;

    let mut status = "ok";

    // Response stage runs before any byte reaches the caller; a block swaps
    // the content for the refusal instead of failing the whole request.
    if let Some( policy ) = &policy
    {
      let text = response_text( &outcome.body );
      let verdict = self.deps.guardrails
        .evaluate( ctx, policy, GuardrailStage::Response, &text )
        .await?;
      if verdict.action == GuardrailAction::Block
      {
        replace_assistant_content( &mut outcome.body, SAFE_REFUSAL );
        status = "guardrail_blocked";
      }
    }

    let usage = if outcome.usage == UsageTokens::default()
    {
      fallback_usage( &body, &outcome.body )
    }
    else
    {
      outcome.usage
    };

    self
      .account( ctx, model, &deployment, status, latency_ms, usage )
      .await;

    Ok( ( BufferedResponse { body: outcome.body, dropped_fields }, usage ) )
  }

  /// Streaming chat: returns the frame receiver; the spawned producer owns
  /// the upstream connection, the guardrail tap and all accounting.
  #[ tracing::instrument( skip_all, fields( request_id = %ctx.request_id ) ) ]
  pub async fn execute_stream(
    &self,
    ctx: RequestContext,
    snapshot: Arc< CatalogSnapshot >,
    mut body: Value,
  ) -> Result< mpsc::Receiver< StreamFrame > >
  {
    let ( model, estimated_tokens ) =
      self.admit_stage( &ctx, &snapshot, ApiEndpoint::ChatCompletions, &body ).await?;

    let reservation = self.deps.limits.reserve( &ctx, estimated_tokens ).await?;

    let setup = async
    {
      self.deps.budget
        .admit( ctx.tenant_id, estimated_cost_usd( &model, estimated_tokens ), &snapshot.defaults.budget )
        .await?;

      let policy = self.deps.guardrails.resolve_policy( ctx.tenant_id, ctx.api_key_id ).await?;
      if let Some( policy ) = &policy
      {
        let text = prompt_text( &body );
        self.deps.guardrails.enforce( &ctx, policy, GuardrailStage::Prompt, &text ).await?;
      }

      if let Some( map ) = body.as_object_mut()
      {
        map.insert( "stream".to_string(), json!( true ) );
        map.insert( "stream_options".to_string(), json!( { "include_usage": true } ) );
      }

      // Connection establishment may fail over; once bytes flow the
      // selection is pinned for the life of the stream.
      let mut attempt: u32 = 0;
      loop
      {
        let deployment = self.deps.router.select( &model )?;
        let secret = self.credential_for( &model, &deployment );
        let wire = translate( &model, &deployment, ApiEndpoint::ChatCompletions, &secret, &body )?;

        match dispatch::open_stream( &self.http, &wire, STREAM_TIMEOUT ).await
        {
          Ok( response ) => return Ok( ( response, deployment, policy ) ),
          Err( err @ GatewayError::UpstreamUnavailable( _ ) ) =>
          {
            self.deps.router.report( deployment.id, false );
            attempt += 1;
            if attempt >= MAX_DISPATCH_ATTEMPTS
            {
              return Err( err );
            }
            tokio::time::sleep( backoff_delay( attempt ) ).await;
          }
          Err( err ) =>
          {
            self.deps.router.report( deployment.id, true );
            return Err( err );
          }
        }
      }
    };

    let ( response, deployment, policy ) = match setup.await
    {
      Ok( parts ) => parts,
      Err( err ) =>
      {
        reservation.cancel().await;
        return Err( err );
      }
    };

    let ( tx, rx ) = mpsc::channel( 32 );
    let pipeline = self.clone();
    let request_body = body;

    tokio::spawn( async move
    {
      pipeline
        .pump_stream( ctx, model, deployment, policy, response, request_body, reservation, tx )
        .await;
    } );

    Ok( rx )
  }

  #[ allow( clippy::too_many_arguments ) ]
  async fn pump_stream(
    &self,
    ctx: RequestContext,
    model: CatalogModel,
    deployment: DeploymentInfo,
    policy: Option< GuardrailPolicyRecord >,
    response: reqwest::Response,
    request_body: Value,
    reservation: Reservation,
    tx: mpsc::Sender< StreamFrame >,
  )
  {
    let started = Instant::now();
    let mut parser = SseParser::new();
    let mut accumulated = String::new();
    let mut metered: Option< UsageTokens > = None;
    let mut status = "ok";
    let mut upstream_ok = true;

    let response_keywords: Vec< String > = policy
      .as_ref()
      .map( |p| p.response_blocked_keywords.clone() )
      .unwrap_or_default();

    let mut bytes = response.bytes_stream();

    'pump: while let Some( chunk ) = bytes.next().await
    {
      let chunk = match chunk
      {
        Ok( chunk ) => chunk,
        Err( err ) =>
        {
          tracing::warn!( request_id = %ctx.request_id, error = %err, "upstream stream broke" );
          status = "upstream_error";
          upstream_ok = false;
          let frame = error_frame( "upstream_unavailable", "the upstream connection was lost" );
          let _ = tx.send( StreamFrame::Data( frame ) ).await;
          break 'pump;
        }
      };

      for payload in parser.push( &chunk )
      {
        if payload == "[DONE]"
        {
          break 'pump;
        }

        if let Ok( value ) = serde_json::from_str::< Value >( &payload )
        {
          if value.get( "usage" ).map_or( false, |u| !u.is_null() )
          {
            metered = Some( extract_usage( &value ) );
          }
          if let Some( delta ) = value
            .pointer( "/choices/0/delta/content" )
            .and_then( Value::as_str )
          {
            accumulated.push_str( delta );
          }
        }

        // Side tap: the guardrail observes accumulated content without
        // gating per-chunk emission, until it decides to abort.
        if !response_keywords.is_empty()
        {
          let violations = scan_keywords( &accumulated, &response_keywords );
          if !violations.is_empty()
          {
            status = "guardrail_truncated";
            self.record_guardrail_truncation( &ctx, &violations ).await;
            let frame = error_frame( "guardrail_violation", "response terminated by content policy" );
            let _ = tx.send( StreamFrame::Data( frame ) ).await;
            break 'pump;
          }
        }

        if tx.send( StreamFrame::Data( payload ) ).await.is_err()
        {
          // Client went away; stop reading, bill what was produced
          status = "client_disconnected";
          break 'pump;
        }
      }
    }

    let _ = tx.send( StreamFrame::Done ).await;
    drop( bytes );

    self.deps.router.report( deployment.id, upstream_ok );

    // End-of-stream moderation pass (webhook policies cannot run per chunk)
    if status == "ok"
    {
      if let Some( policy ) = &policy
      {
        let verdict = self.deps.guardrails
          .evaluate( &ctx, policy, GuardrailStage::Response, &accumulated )
          .await;
        if let Ok( verdict ) = verdict
        {
          if verdict.action == GuardrailAction::Block
          {
            // Bytes are gone; record the violation for the audit trail
            status = "guardrail_flagged";
          }
        }
      }
    }

    let usage = metered.unwrap_or_else( || fallback_stream_usage( &request_body, &accumulated ) );
    let latency_ms = started.elapsed().as_millis() as i64;

    self
      .account( &ctx, &model, &deployment, status, latency_ms, usage )
      .await;

    reservation.settle( usage.total_tokens ).await;
  }

  async fn dispatch_with_retry(
    &self,
    model: &CatalogModel,
    endpoint: ApiEndpoint,
    body: &Value,
  ) -> Result< ( dispatch::DispatchOutcome, DeploymentInfo, Vec< String > ) >
  {
    let mut attempt: u32 = 0;

    loop
    {
      let deployment = self.deps.router.select( model )?;
      let secret = self.credential_for( model, &deployment );
      let wire = translate( model, &deployment, endpoint, &secret, body )?;

      match dispatch::send_json( &self.http, &wire, model.provider, BUFFERED_TIMEOUT ).await
      {
        Ok( outcome ) =>
        {
          self.deps.router.report( deployment.id, true );
          return Ok( ( outcome, deployment, wire.dropped_fields ) );
        }
        Err( err @ GatewayError::UpstreamUnavailable( _ ) ) =>
        {
          self.deps.router.report( deployment.id, false );
          attempt += 1;
          if attempt >= MAX_DISPATCH_ATTEMPTS
          {
            return Err( err );
          }
          tracing::debug!( alias = %model.alias, attempt, "retrying against another deployment" );
          tokio::time::sleep( backoff_delay( attempt ) ).await;
        }
        Err( err ) =>
        {
          // The deployment answered; a 4xx is not a health problem
          self.deps.router.report( deployment.id, true );
          return Err( err );
        }
      }
    }
  }

  fn credential_for( &self, model: &CatalogModel, deployment: &DeploymentInfo ) -> String
  {
    let reference = if deployment.credentials_ref.is_empty()
    {
      &model.credentials_ref
    }
    else
    {
      &deployment.credentials_ref
    };

    match self.deps.credentials.get( reference )
    {
      Some( secret ) => secret.clone(),
      None =>
      {
        tracing::warn!( reference = %reference, "no secret configured for credentials reference" );
        String::new()
      }
    }
  }

  async fn account(
    &self,
    ctx: &RequestContext,
    model: &CatalogModel,
    deployment: &DeploymentInfo,
    status: &str,
    latency_ms: i64,
    usage: UsageTokens,
  )
  {
    let cost = actual_cost_usd( model, usage.prompt_tokens, usage.completion_tokens );

    let event = UsageEventRecord
    {
      id: Uuid::new_v4(),
      tenant_id: ctx.tenant_id,
      api_key_id: ctx.api_key_id,
      user_id: ctx.owner_user_id,
      alias: model.alias.clone(),
      provider: model.provider.as_str().to_string(),
      model_type: model.model_type.as_str().to_string(),
      request_id: ctx.request_id.clone(),
      ts: now_ms(),
      latency_ms,
      status: status.to_string(),
      prompt_tokens: usage.prompt_tokens,
      completion_tokens: usage.completion_tokens,
      total_tokens: usage.total_tokens,
      cost_usd: cost,
    };

    if let Err( err ) = self.deps.store.insert_usage_event( &event ).await
    {
      tracing::error!( request_id = %ctx.request_id, error = %err, "usage event lost" );
    }

    self.deps.metrics.observe_api_request(
      &ctx.tenant_id.to_string(),
      &model.alias,
      model.provider.as_str(),
      status,
      latency_ms as f64 / 1000.0,
      usage.prompt_tokens,
      usage.completion_tokens,
    );

    tracing::debug!(
      request_id = %ctx.request_id,
      deployment = %deployment.id,
      status,
      tokens = usage.total_tokens,
      "request accounted"
    );

    let defaults = self.deps.store.budget_defaults().await.unwrap_or_default();
    if let Err( err ) = self.deps.budget.debit( ctx.tenant_id, cost, &defaults ).await
    {
      tracing::error!( tenant_id = %ctx.tenant_id, error = %err, "budget debit failed" );
    }
  }

  async fn record_guardrail_truncation( &self, ctx: &RequestContext, violations: &[ String ] )
  {
    let result = self.deps.store
      .insert_guardrail_event(
        ctx.tenant_id,
        Some( ctx.api_key_id ),
        GuardrailStage::Response,
        "block",
        Some( "keyword" ),
        violations,
      )
      .await;

    if let Err( err ) = result
    {
      tracing::warn!( error = %err, "guardrail truncation event not persisted" );
    }
  }
}

fn backoff_delay( attempt: u32 ) -> Duration
{
  let ms = ( BACKOFF_BASE_MS * 2u64.pow( attempt.saturating_sub( 1 ) ) ).min( BACKOFF_CAP_MS );
  Duration::from_millis( ms )
}

fn error_frame( kind: &str, message: &str ) -> String
{
  json!( { "error": { "type": kind, "message": message } } ).to_string()
}

/// Swap every assistant message for the refusal text
fn replace_assistant_content( body: &mut Value, replacement: &str )
{
  if let Some( choices ) = body.get_mut( "choices" ).and_then( Value::as_array_mut )
  {
    for choice in choices
    {
      if let Some( message ) = choice.get_mut( "message" )
      {
        message[ "content" ] = json!( replacement );
      }
      if choice.get( "text" ).is_some()
      {
        choice[ "text" ] = json!( replacement );
      }
    }
  }
}

/// Usage when the provider sent no usage block: the character heuristic
fn fallback_usage( request: &Value, response: &Value ) -> UsageTokens
{
  let prompt_chars = prompt_text( request ).chars().count() as i64;
  let completion_chars = response_text( response ).chars().count() as i64;
  UsageTokens::new( ( prompt_chars + 3 ) / 4, ( completion_chars + 3 ) / 4 )
}

fn fallback_stream_usage( request: &Value, accumulated: &str ) -> UsageTokens
{
  let prompt_chars = prompt_text( request ).chars().count() as i64;
  let completion_chars = accumulated.chars().count() as i64;
  UsageTokens::new( ( prompt_chars + 3 ) / 4, ( completion_chars + 3 ) / 4 )
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn test_backoff_doubles_and_caps()
  {
    assert_eq!( backoff_delay( 1 ), Duration::from_millis( 100 ) );
    assert_eq!( backoff_delay( 2 ), Duration::from_millis( 200 ) );
    assert_eq!( backoff_delay( 3 ), Duration::from_millis( 400 ) );
    assert_eq!( backoff_delay( 10 ), Duration::from_millis( 1_000 ) );
  }

  #[ test ]
  fn test_replace_assistant_content()
  {
    let mut body = json!( {
      "choices": [
        { "message": { "role": "assistant", "content": "something disallowed" } },
      ]
    } );

    replace_assistant_content( &mut body, SAFE_REFUSAL );
    assert_eq!( body[ "choices" ][ 0 ][ "message" ][ "content" ], json!( SAFE_REFUSAL ) );
  }
}

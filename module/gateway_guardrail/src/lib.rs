//! Guardrail engine
//!
//! Two evaluation stages per request: prompt text before dispatch, assistant
//! text after completion. Policy resolution prefers a non-empty api-key
//! policy over the tenant policy; an empty api-key policy inherits. Keyword
//! scanning is deterministic; webhook moderation is best-effort: a webhook
//! that times out or misbehaves never blocks traffic, it only leaves a
//! `guardrail_webhook_error` event behind.

pub mod extract;
pub mod scan;
pub mod webhook;

pub use extract::{ prompt_text, response_text };
pub use scan::scan_keywords;

use std::time::Duration;

use uuid::Uuid;

use gateway_store::{ GuardrailPolicyRecord, Store };
use gateway_types::{ GatewayError, GuardrailAction, GuardrailStage, RequestContext, Result };

/// Replacement content for a blocked response
pub const SAFE_REFUSAL: &str =
  "The response was withheld because it did not meet this gateway's content policy.";

/// Outcome of one stage evaluation
#[ derive( Debug, Clone, PartialEq, Eq ) ]
pub struct GuardrailOutcome
{
  pub action: GuardrailAction,
  pub category: Option< String >,
  pub violations: Vec< String >,
}

impl GuardrailOutcome
{
  fn allow() -> Self
  {
    Self { action: GuardrailAction::Allow, category: None, violations: Vec::new() }
  }
}

/// The guardrail engine
#[ derive( Debug, Clone ) ]
pub struct GuardrailEngine
{
  store: Store,
  http: reqwest::Client,
}

impl GuardrailEngine
{
  #[ must_use ]
  pub fn new( store: Store ) -> Self
  {
    Self
    {
      store,
      http: reqwest::Client::new(),
    }
  }

  /// Resolve the effective policy for a request
  ///
  /// A non-empty, enabled api-key policy fully replaces the tenant policy;
  /// an absent or empty api-key row inherits.
  pub async fn resolve_policy(
    &self,
    tenant_id: Uuid,
    api_key_id: Uuid,
  ) -> Result< Option< GuardrailPolicyRecord > >
  {
    if let Some( key_policy ) = self.store.get_guardrail_policy( "api_key", api_key_id ).await?
    {
      if key_policy.enabled && !key_policy.is_empty()
      {
        return Ok( Some( key_policy ) );
      }
    }

    let tenant_policy = self.store.get_guardrail_policy( "tenant", tenant_id ).await?;
    Ok( tenant_policy.filter( |policy| policy.enabled && !policy.is_empty() ) )
  }

  /// Evaluate one stage and enforce its verdict
  ///
  /// Emits a guardrail event for anything other than a clean allow. A
  /// blocking verdict surfaces as `guardrail_violation`.
  pub async fn enforce(
    &self,
    ctx: &RequestContext,
    policy: &GuardrailPolicyRecord,
    stage: GuardrailStage,
    text: &str,
  ) -> Result< GuardrailOutcome >
  {
    let outcome = self.evaluate( ctx, policy, stage, text ).await?;

    if outcome.action == GuardrailAction::Block
    {
      return Err( GatewayError::GuardrailViolation
      {
        category: outcome.category.clone().unwrap_or_else( || "keyword".to_string() ),
      } );
    }

    Ok( outcome )
  }

  /// Evaluate one stage without enforcing
  pub async fn evaluate(
    &self,
    ctx: &RequestContext,
    policy: &GuardrailPolicyRecord,
    stage: GuardrailStage,
    text: &str,
  ) -> Result< GuardrailOutcome >
  {
    let keywords = match stage
    {
      GuardrailStage::Prompt => &policy.prompt_blocked_keywords,
      GuardrailStage::Response => &policy.response_blocked_keywords,
    };

    let violations = scan_keywords( text, keywords );
    if !violations.is_empty()
    {
      // Keyword hits always block
      let outcome = GuardrailOutcome
      {
        action: GuardrailAction::Block,
        category: Some( "keyword".to_string() ),
        violations,
      };
      self.record_event( ctx, stage, &outcome ).await;
      return Ok( outcome );
    }

    if let Some( moderation ) = &policy.moderation
    {
      if moderation.enabled && moderation.provider == "webhook"
      {
        return self.moderate_via_webhook( ctx, moderation, stage, text ).await;
      }
    }

    Ok( GuardrailOutcome::allow() )
  }

  async fn moderate_via_webhook(
    &self,
    ctx: &RequestContext,
    moderation: &gateway_store::ModerationConfig,
    stage: GuardrailStage,
    text: &str,
  ) -> Result< GuardrailOutcome >
  {
    let Some( url ) = moderation.webhook_url.as_deref() else
    {
      return Ok( GuardrailOutcome::allow() );
    };

    let timeout = Duration::from_secs( moderation.timeout_seconds.max( 1 ) );

    match webhook::classify(
      &self.http,
      url,
      moderation.webhook_auth_header.as_deref(),
      moderation.webhook_auth_value.as_deref(),
      timeout,
      stage,
      text,
    )
    .await
    {
      Ok( verdict ) =>
      {
        let action = match verdict.action
        {
          GuardrailAction::Block if moderation.action == GuardrailAction::Warn => GuardrailAction::Warn,
          other => other,
        };

        let outcome = GuardrailOutcome
        {
          action,
          category: verdict.category.or_else( || Some( "moderation".to_string() ) ),
          violations: verdict.violations,
        };

        if outcome.action != GuardrailAction::Allow
        {
          self.record_event( ctx, stage, &outcome ).await;
        }

        Ok( outcome )
      }
      Err( err ) =>
      {
        // Fail open; keep the evidence
        tracing::warn!( stage = stage.as_str(), error = %err, "moderation webhook failed" );
        let event = GuardrailOutcome
        {
          action: GuardrailAction::Allow,
          category: Some( "guardrail_webhook_error".to_string() ),
          violations: Vec::new(),
        };
        self.record_webhook_error( ctx, stage, &event ).await;
        Ok( GuardrailOutcome::allow() )
      }
    }
  }

  async fn record_event( &self, ctx: &RequestContext, stage: GuardrailStage, outcome: &GuardrailOutcome )
  {
    let result = self.store
      .insert_guardrail_event(
        ctx.tenant_id,
        Some( ctx.api_key_id ),
        stage,
        outcome.action.as_str(),
        outcome.category.as_deref(),
        &outcome.violations,
      )
      .await;

    if let Err( err ) = result
    {
      tracing::warn!( error = %err, "guardrail event not persisted" );
    }
  }

  async fn record_webhook_error( &self, ctx: &RequestContext, stage: GuardrailStage, outcome: &GuardrailOutcome )
  {
    let result = self.store
      .insert_guardrail_event(
        ctx.tenant_id,
        Some( ctx.api_key_id ),
        stage,
        "allow",
        outcome.category.as_deref(),
        &outcome.violations,
      )
      .await;

    if let Err( err ) = result
    {
      tracing::warn!( error = %err, "guardrail webhook-error event not persisted" );
    }
  }
}

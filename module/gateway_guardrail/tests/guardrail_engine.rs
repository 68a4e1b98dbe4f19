//! Integration tests for policy resolution and webhook moderation

use std::time::Duration;

use wiremock::matchers::{ method, path };
use wiremock::{ Mock, MockServer, ResponseTemplate };

use gateway_guardrail::GuardrailEngine;
use gateway_store::{ GuardrailPolicyRecord, ModerationConfig };
use gateway_test_db::TestDatabaseBuilder;
use gateway_types::{ GuardrailAction, GuardrailStage, RateLimitSettings, RequestContext };
use uuid::Uuid;

fn ctx( tenant_id: Uuid, api_key_id: Uuid ) -> RequestContext
{
  RequestContext
  {
    tenant_id,
    api_key_id,
    api_key_prefix: "omg-test".to_string(),
    owner_user_id: None,
    key_limits: RateLimitSettings::unlimited(),
    tenant_limits: RateLimitSettings::unlimited(),
    key_quota: None,
    request_id: "req-guardrail".to_string(),
  }
}

fn policy( scope: &str, scope_id: Uuid, prompt_keywords: &[ &str ] ) -> GuardrailPolicyRecord
{
  GuardrailPolicyRecord
  {
    scope: scope.to_string(),
    scope_id,
    enabled: true,
    prompt_blocked_keywords: prompt_keywords.iter().map( |s| ( *s ).to_string() ).collect(),
    response_blocked_keywords: vec![],
    moderation: None,
    version: 1,
    created_at: 0,
    updated_at: 0,
  }
}

#[ tokio::test ]
async fn test_key_policy_replaces_tenant_policy()
{
  let db = TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();
  let engine = GuardrailEngine::new( store.clone() );

  let tenant = store.create_tenant( "acme", false ).await.expect( "tenant" );
  let api_key_id = Uuid::new_v4();

  store
    .upsert_guardrail_policy( &policy( "tenant", tenant.id, &[ "tenant-word" ] ) )
    .await
    .expect( "tenant policy" );
  store
    .upsert_guardrail_policy( &policy( "api_key", api_key_id, &[ "key-word" ] ) )
    .await
    .expect( "key policy" );

  let resolved = engine
    .resolve_policy( tenant.id, api_key_id )
    .await
    .expect( "resolve" )
    .expect( "policy present" );

  assert_eq!( resolved.scope, "api_key" );
  assert_eq!( resolved.prompt_blocked_keywords, vec![ "key-word".to_string() ] );
}

#[ tokio::test ]
async fn test_empty_key_policy_inherits_tenant_policy()
{
  let db = TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();
  let engine = GuardrailEngine::new( store.clone() );

  let tenant = store.create_tenant( "acme", false ).await.expect( "tenant" );
  let api_key_id = Uuid::new_v4();

  store
    .upsert_guardrail_policy( &policy( "tenant", tenant.id, &[ "tenant-word" ] ) )
    .await
    .expect( "tenant policy" );
  // Empty api-key row: no keywords, no moderation
  store
    .upsert_guardrail_policy( &policy( "api_key", api_key_id, &[] ) )
    .await
    .expect( "empty key policy" );

  let resolved = engine
    .resolve_policy( tenant.id, api_key_id )
    .await
    .expect( "resolve" )
    .expect( "tenant policy inherited" );

  assert_eq!( resolved.scope, "tenant" );
}

#[ tokio::test ]
async fn test_keyword_block_emits_event_and_violation()
{
  let db = TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();
  let engine = GuardrailEngine::new( store.clone() );

  let tenant = store.create_tenant( "acme", false ).await.expect( "tenant" );
  let request = ctx( tenant.id, Uuid::new_v4() );
  let rules = policy( "tenant", tenant.id, &[ "forbidden" ] );

  let err = engine
    .enforce( &request, &rules, GuardrailStage::Prompt, "a Forbidden question" )
    .await
    .expect_err( "blocked" );
  assert_eq!( err.kind(), "guardrail_violation" );

  let events = store.list_guardrail_events( tenant.id, 10 ).await.expect( "events" );
  assert_eq!( events.len(), 1 );
  assert_eq!( events[ 0 ].action, "block" );
  assert_eq!( events[ 0 ].violations, vec![ "forbidden".to_string() ] );
}

#[ tokio::test ]
async fn test_webhook_block_verdict_is_enforced()
{
  let server = MockServer::start().await;
  Mock::given( method( "POST" ) )
    .and( path( "/moderate" ) )
    .respond_with( ResponseTemplate::new( 200 ).set_body_json( serde_json::json!( {
      "action": "block",
      "violations": [ "policy.category.x" ],
      "category": "moderation"
    } ) ) )
    .mount( &server )
    .await;

  let db = TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();
  let engine = GuardrailEngine::new( store.clone() );
  let tenant = store.create_tenant( "acme", false ).await.expect( "tenant" );
  let request = ctx( tenant.id, Uuid::new_v4() );

  let mut rules = policy( "tenant", tenant.id, &[] );
  rules.moderation = Some( ModerationConfig
  {
    enabled: true,
    provider: "webhook".to_string(),
    action: GuardrailAction::Block,
    webhook_url: Some( format!( "{}/moderate", server.uri() ) ),
    webhook_auth_header: Some( "x-auth".to_string() ),
    webhook_auth_value: Some( "secret".to_string() ),
    timeout_seconds: 2,
  } );

  let err = engine
    .enforce( &request, &rules, GuardrailStage::Prompt, "borderline content" )
    .await
    .expect_err( "webhook block" );
  assert_eq!( err.kind(), "guardrail_violation" );
}

#[ tokio::test ]
async fn test_webhook_timeout_is_treated_as_allow()
{
  let server = MockServer::start().await;
  Mock::given( method( "POST" ) )
    .respond_with(
      ResponseTemplate::new( 200 )
        .set_body_json( serde_json::json!( { "action": "block" } ) )
        .set_delay( Duration::from_secs( 3 ) ),
    )
    .mount( &server )
    .await;

  let db = TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();
  let engine = GuardrailEngine::new( store.clone() );
  let tenant = store.create_tenant( "acme", false ).await.expect( "tenant" );
  let request = ctx( tenant.id, Uuid::new_v4() );

  let mut rules = policy( "tenant", tenant.id, &[] );
  rules.moderation = Some( ModerationConfig
  {
    enabled: true,
    provider: "webhook".to_string(),
    action: GuardrailAction::Block,
    webhook_url: Some( server.uri() ),
    webhook_auth_header: None,
    webhook_auth_value: None,
    timeout_seconds: 1,
  } );

  let outcome = engine
    .enforce( &request, &rules, GuardrailStage::Prompt, "slow webhook" )
    .await
    .expect( "allowed despite webhook" );
  assert_eq!( outcome.action, GuardrailAction::Allow );

  // The failure left a webhook-error event behind
  let events = store.list_guardrail_events( tenant.id, 10 ).await.expect( "events" );
  assert_eq!( events.len(), 1 );
  assert_eq!( events[ 0 ].category.as_deref(), Some( "guardrail_webhook_error" ) );
}

#[ tokio::test ]
async fn test_prompt_stage_is_idempotent()
{
  let db = TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();
  let engine = GuardrailEngine::new( store.clone() );
  let tenant = store.create_tenant( "acme", false ).await.expect( "tenant" );
  let request = ctx( tenant.id, Uuid::new_v4() );
  let rules = policy( "tenant", tenant.id, &[ "blocked" ] );

  let first = engine
    .evaluate( &request, &rules, GuardrailStage::Prompt, "with blocked words" )
    .await
    .expect( "first run" );
  let second = engine
    .evaluate( &request, &rules, GuardrailStage::Prompt, "with blocked words" )
    .await
    .expect( "second run" );

  assert_eq!( first, second );
}

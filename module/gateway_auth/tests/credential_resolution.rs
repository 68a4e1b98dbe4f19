//! Integration tests for the credential resolver

use gateway_auth::keys::KeyMaterial;
use gateway_auth::CredentialResolver;
use gateway_store::api_keys::NewApiKey;
use gateway_test_db::TestDatabaseBuilder;
use gateway_types::{ ApiKeyKind, RateLimitDefaults, RateLimitSettings, TenantStatus };

struct Fixture
{
  _db: gateway_test_db::TestDatabase,
  store: gateway_store::Store,
  resolver: CredentialResolver,
  tenant: gateway_store::TenantRecord,
  wire_token: String,
  api_key_id: uuid::Uuid,
}

async fn fixture() -> Fixture
{
  let db = TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();

  let tenant = store.create_tenant( "acme", false ).await.expect( "tenant" );
  let generated = KeyMaterial::new().generate().expect( "key material" );

  let key = store
    .create_api_key( NewApiKey
    {
      tenant_id: tenant.id,
      kind: ApiKeyKind::Tenant,
      owner_user_id: None,
      prefix: generated.prefix.clone(),
      secret_hash: generated.secret_hash.clone(),
      name: "ci".to_string(),
      scopes: vec![],
      quota: None,
    } )
    .await
    .expect( "key row" );

  Fixture
  {
    resolver: CredentialResolver::new( store.clone() ),
    store,
    tenant,
    wire_token: generated.wire_token,
    api_key_id: key.id,
    _db: db,
  }
}

fn defaults() -> RateLimitDefaults
{
  RateLimitDefaults
  {
    requests_per_minute: 60,
    tokens_per_minute: 10_000,
    parallel_requests_key: 4,
    parallel_requests_tenant: 16,
  }
}

#[ tokio::test ]
async fn test_valid_token_resolves_to_context()
{
  let fx = fixture().await;

  let resolved = fx.resolver
    .resolve( &fx.wire_token, &defaults(), "req-1".to_string() )
    .await
    .expect( "resolve" );

  assert_eq!( resolved.context.tenant_id, fx.tenant.id );
  assert_eq!( resolved.context.api_key_id, fx.api_key_id );
  assert_eq!( resolved.context.key_limits.requests_per_minute, 60 );
  assert_eq!( resolved.context.key_limits.parallel_requests, 4 );
  assert_eq!( resolved.context.tenant_limits.parallel_requests, 16 );
}

#[ tokio::test ]
async fn test_bad_secret_and_unknown_prefix_read_the_same()
{
  let fx = fixture().await;

  // Same prefix, wrong secret
  let prefix = fx.wire_token.split( '_' ).next().expect( "prefix" );
  let wrong_secret = format!( "{prefix}_AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA" );
  let err = fx.resolver
    .resolve( &wrong_secret, &defaults(), "req-2".to_string() )
    .await
    .expect_err( "wrong secret" );
  assert_eq!( err.kind(), "unauthorized" );

  // Prefix that matches no row
  let err = fx.resolver
    .resolve( "omg-nosuchprefix_AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA", &defaults(), "req-3".to_string() )
    .await
    .expect_err( "unknown prefix" );
  assert_eq!( err.kind(), "unauthorized" );

  // Garbage without a separator
  let err = fx.resolver
    .resolve( "garbage", &defaults(), "req-4".to_string() )
    .await
    .expect_err( "malformed" );
  assert_eq!( err.kind(), "unauthorized" );
}

#[ tokio::test ]
async fn test_suspended_tenant_is_surfaced_distinctly()
{
  let fx = fixture().await;

  fx.store
    .update_tenant( fx.tenant.id, None, Some( TenantStatus::Suspended ), fx.tenant.version )
    .await
    .expect( "suspend" );

  let err = fx.resolver
    .resolve( &fx.wire_token, &defaults(), "req-5".to_string() )
    .await
    .expect_err( "suspended tenant" );
  assert_eq!( err.kind(), "tenant_suspended" );
}

#[ tokio::test ]
async fn test_revoked_key_is_unauthorized()
{
  let fx = fixture().await;

  fx.store.revoke_api_key( fx.api_key_id ).await.expect( "revoke" );

  let err = fx.resolver
    .resolve( &fx.wire_token, &defaults(), "req-6".to_string() )
    .await
    .expect_err( "revoked" );
  assert_eq!( err.kind(), "unauthorized" );
}

#[ tokio::test ]
async fn test_key_override_clamped_by_tenant_limits()
{
  let fx = fixture().await;

  fx.store
    .upsert_tenant_rate_limit(
      fx.tenant.id,
      RateLimitSettings { requests_per_minute: 30, tokens_per_minute: 5_000, parallel_requests: 2 },
    )
    .await
    .expect( "tenant override" );
  fx.store
    .upsert_api_key_rate_limit(
      fx.api_key_id,
      RateLimitSettings { requests_per_minute: 100, tokens_per_minute: 1_000, parallel_requests: 8 },
    )
    .await
    .expect( "key override" );

  let resolved = fx.resolver
    .resolve( &fx.wire_token, &defaults(), "req-7".to_string() )
    .await
    .expect( "resolve" );

  assert_eq!( resolved.context.key_limits.requests_per_minute, 30 );
  assert_eq!( resolved.context.key_limits.tokens_per_minute, 1_000 );
  assert_eq!( resolved.context.key_limits.parallel_requests, 2 );
}

//! Integration tests for api key storage

use gateway_store::api_keys::NewApiKey;
use gateway_test_db::TestDatabaseBuilder;
use gateway_types::ApiKeyKind;

fn new_key( tenant_id: uuid::Uuid, prefix: &str ) -> NewApiKey
{
  NewApiKey
  {
    tenant_id,
    kind: ApiKeyKind::Tenant,
    owner_user_id: None,
    prefix: prefix.to_string(),
    secret_hash: "argon2-hash-placeholder".to_string(),
    name: "ci key".to_string(),
    scopes: vec![],
    quota: None,
  }
}

#[ tokio::test ]
async fn test_lookup_by_prefix_ignores_revoked_keys()
{
  let db = TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();

  let tenant = store.create_tenant( "acme", false ).await.expect( "tenant" );
  let key = store.create_api_key( new_key( tenant.id, "omg-abc123" ) ).await.expect( "key" );

  let found = store
    .find_active_api_key_by_prefix( "omg-abc123" )
    .await
    .expect( "lookup" )
    .expect( "present" );
  assert_eq!( found.id, key.id );
  assert!( found.is_active() );

  store.revoke_api_key( key.id ).await.expect( "revoke" );

  let found = store.find_active_api_key_by_prefix( "omg-abc123" ).await.expect( "lookup" );
  assert!( found.is_none(), "revoked key must be invisible to the resolver" );

  // Revocation is not reversible; a second revoke finds nothing active
  let err = store.revoke_api_key( key.id ).await.expect_err( "double revoke" );
  assert_eq!( err.kind(), "not_found" );
}

#[ tokio::test ]
async fn test_personal_key_requires_owner()
{
  let db = TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();

  let tenant = store.create_tenant( "personal-jane", true ).await.expect( "tenant" );

  let mut key = new_key( tenant.id, "omg-personal1" );
  key.kind = ApiKeyKind::Personal;

  let err = store.create_api_key( key ).await.expect_err( "ownerless personal key" );
  assert_eq!( err.kind(), "bad_request" );
}

#[ tokio::test ]
async fn test_deleting_user_revokes_their_personal_keys()
{
  let db = TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();

  let tenant = store.create_tenant( "personal-jane", true ).await.expect( "tenant" );
  let user = store.create_user( "jane@example.com", "Jane", None, false ).await.expect( "user" );

  let mut key = new_key( tenant.id, "omg-jane1" );
  key.kind = ApiKeyKind::Personal;
  key.owner_user_id = Some( user.id );
  let created = store.create_api_key( key ).await.expect( "personal key" );

  store.delete_user( user.id ).await.expect( "delete user" );

  let after = store.get_api_key( created.id ).await.expect( "key row survives" );
  assert!( !after.is_active(), "personal key must be revoked with its owner" );
  assert!(
    store.find_active_api_key_by_prefix( "omg-jane1" ).await.expect( "lookup" ).is_none()
  );
}

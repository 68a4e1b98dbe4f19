//! Integration tests for tenant and membership storage
//!
//! Covers name uniqueness, optimistic concurrency on tenant updates, and the
//! single-owner invariant for non-personal tenants.

use gateway_store::Store;
use gateway_test_db::TestDatabaseBuilder;
use gateway_types::{ GatewayError, MembershipRole, TenantStatus };

async fn store() -> ( gateway_test_db::TestDatabase, Store )
{
  let db = TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();
  ( db, store )
}

#[ tokio::test ]
async fn test_tenant_name_is_unique()
{
  let ( _db, store ) = store().await;

  store.create_tenant( "acme", false ).await.expect( "first create" );
  let err = store.create_tenant( "acme", false ).await.expect_err( "duplicate name" );

  assert_eq!( err.kind(), "conflict" );
}

#[ tokio::test ]
async fn test_tenant_update_requires_matching_version()
{
  let ( _db, store ) = store().await;

  let tenant = store.create_tenant( "acme", false ).await.expect( "create" );
  assert_eq!( tenant.version, 1 );

  let updated = store
    .update_tenant( tenant.id, None, Some( TenantStatus::Suspended ), 1 )
    .await
    .expect( "update with fresh version" );
  assert_eq!( updated.status, TenantStatus::Suspended );
  assert_eq!( updated.version, 2 );

  // Stale version collides
  let err = store
    .update_tenant( tenant.id, Some( "acme-renamed" ), None, 1 )
    .await
    .expect_err( "stale version" );
  assert_eq!( err.kind(), "conflict" );
}

#[ tokio::test ]
async fn test_last_owner_cannot_be_removed()
{
  let ( _db, store ) = store().await;

  let tenant = store.create_tenant( "team", false ).await.expect( "tenant" );
  let owner = store.create_user( "owner@example.com", "Owner", None, false ).await.expect( "owner" );
  let member = store.create_user( "member@example.com", "Member", None, false ).await.expect( "member" );

  store.add_membership( tenant.id, owner.id, MembershipRole::Owner ).await.expect( "add owner" );
  store.add_membership( tenant.id, member.id, MembershipRole::Viewer ).await.expect( "add viewer" );

  // The sole owner cannot leave or be demoted
  let err = store.remove_membership( tenant.id, owner.id ).await.expect_err( "remove last owner" );
  assert_eq!( err.kind(), "conflict" );

  let err = store
    .update_membership_role( tenant.id, owner.id, MembershipRole::Admin )
    .await
    .expect_err( "demote last owner" );
  assert_eq!( err.kind(), "conflict" );

  // Promote the viewer, then the original owner may step down
  store
    .update_membership_role( tenant.id, member.id, MembershipRole::Owner )
    .await
    .expect( "promote second owner" );
  store.remove_membership( tenant.id, owner.id ).await.expect( "remove one of two owners" );

  let remaining = store.list_memberships( tenant.id ).await.expect( "list" );
  assert_eq!( remaining.len(), 1 );
  assert_eq!( remaining[ 0 ].role, MembershipRole::Owner );
}

#[ tokio::test ]
async fn test_get_missing_tenant_is_not_found()
{
  let ( _db, store ) = store().await;

  let err = store.get_tenant( uuid::Uuid::new_v4() ).await.expect_err( "missing" );
  assert!( matches!( err, GatewayError::NotFound( _ ) ) );
}

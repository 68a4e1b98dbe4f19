//! Snapshot construction and alias authorization against a real store

use gateway_catalog::{ authorize, SnapshotCache };
use gateway_store::catalog::NewCatalogEntry;
use gateway_test_db::TestDatabaseBuilder;
use gateway_types::{ ModelType, ProviderFamily };

async fn seeded() -> ( gateway_test_db::TestDatabase, gateway_store::Store, uuid::Uuid )
{
  let db = TestDatabaseBuilder::new().build().await.expect( "test db" );
  let store = db.store();
  let tenant = store.create_tenant( "acme", false ).await.expect( "tenant" );

  for ( alias, enabled ) in [ ( "gpt-4o", true ), ( "legacy-model", false ) ]
  {
    store
      .create_catalog_entry( NewCatalogEntry
      {
        alias: alias.to_string(),
        provider: ProviderFamily::Openai,
        provider_model: format!( "{alias}-upstream" ),
        deployment: "primary".to_string(),
        enabled,
        price_input_per_mtoken_usd: 1.0,
        price_output_per_mtoken_usd: 2.0,
        model_type: ModelType::Chat,
        credentials_ref: "openai-main".to_string(),
      } )
      .await
      .expect( "entry" );
  }

  store
    .create_deployment( "gpt-4o", "https://a.example.com", Some( "us-east" ), "openai-main", true )
    .await
    .expect( "deployment a" );
  store
    .create_deployment( "gpt-4o", "https://b.example.com", None, "openai-main", true )
    .await
    .expect( "deployment b" );

  let tenant_id = tenant.id;
  ( db, store, tenant_id )
}

#[ tokio::test ]
async fn test_snapshot_carries_models_deployments_and_grants()
{
  let ( _db, store, tenant_id ) = seeded().await;
  store.add_tenant_model( tenant_id, "GPT-4o" ).await.expect( "grant (mixed case)" );

  let cache = SnapshotCache::new( store.clone() ).await.expect( "cache" );
  let snapshot = cache.load();

  let model = snapshot.models.get( "gpt-4o" ).expect( "model" );
  assert_eq!( model.deployments.len(), 2 );
  assert_eq!( model.provider, ProviderFamily::Openai );

  let visible = snapshot.aliases_for_tenant( tenant_id );
  assert_eq!( visible.len(), 1, "disabled aliases are hidden" );
  assert_eq!( visible[ 0 ].alias, "gpt-4o" );
}

#[ tokio::test ]
async fn test_authorization_distinguishes_grant_default_and_disabled()
{
  let ( _db, store, tenant_id ) = seeded().await;
  let cache = SnapshotCache::new( store.clone() ).await.expect( "cache" );

  // No grant, no default: reads as not found
  let snapshot = cache.load();
  let err = authorize( &snapshot, tenant_id, "gpt-4o" ).expect_err( "ungranted" );
  assert_eq!( err.kind(), "model_not_allowed" );

  // Default-model set admits every tenant
  store.set_default_models( &[ "gpt-4o".to_string() ] ).await.expect( "defaults" );
  cache.refresh().await.expect( "refresh" );
  let snapshot = cache.load();
  let model = authorize( &snapshot, tenant_id, "GPT-4O" ).expect( "case-insensitive alias" );
  assert_eq!( model.alias, "gpt-4o" );

  // A granted but disabled alias surfaces as disabled, not missing
  store.add_tenant_model( tenant_id, "legacy-model" ).await.expect( "grant" );
  cache.refresh().await.expect( "refresh" );
  let snapshot = cache.load();
  let err = authorize( &snapshot, tenant_id, "legacy-model" ).expect_err( "disabled" );
  assert_eq!( err.kind(), "model_disabled" );
}

#[ tokio::test ]
async fn test_push_refresh_publishes_admin_changes()
{
  let ( _db, store, _tenant_id ) = seeded().await;
  let cache = SnapshotCache::new( store.clone() ).await.expect( "cache" );

  let before = cache.load();
  assert!( !before.models.contains_key( "new-model" ) );

  store
    .create_catalog_entry( NewCatalogEntry
    {
      alias: "new-model".to_string(),
      provider: ProviderFamily::Anthropic,
      provider_model: "claude-3-5-sonnet".to_string(),
      deployment: "primary".to_string(),
      enabled: true,
      price_input_per_mtoken_usd: 3.0,
      price_output_per_mtoken_usd: 15.0,
      model_type: ModelType::Chat,
      credentials_ref: "anthropic-main".to_string(),
    } )
    .await
    .expect( "entry" );

  // The old pointer still serves the old world until refresh publishes
  assert!( !cache.load().models.contains_key( "new-model" ) );
  cache.refresh().await.expect( "refresh" );
  assert!( cache.load().models.contains_key( "new-model" ) );

  // Retained pointers from before the swap are unchanged
  assert!( !before.models.contains_key( "new-model" ) );
}

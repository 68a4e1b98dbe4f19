//! Versioned catalog snapshot
//!
//! Built from the store in one pass and published through `ArcSwap`. Reads
//! are lock-free pointer loads; admin mutations call `refresh` right after
//! committing, and a background task refreshes on a timer as a fallback.

use std::collections::{ HashMap, HashSet };
use std::sync::Arc;
use std::sync::atomic::{ AtomicI64, Ordering };

use arc_swap::ArcSwap;
use uuid::Uuid;

use gateway_store::{ now_ms, Store };
use gateway_types::{ GatewayDefaults, ModelType, ProviderFamily, Result };

/// Fallback refresh interval when no push invalidation arrives
pub const SNAPSHOT_TTL_MS: i64 = 30_000;

/// One upstream deployment binding inside the snapshot
#[ derive( Debug, Clone, PartialEq, Eq ) ]
pub struct DeploymentInfo
{
  pub id: Uuid,
  pub endpoint: String,
  pub region: Option< String >,
  pub credentials_ref: String,
  pub enabled: bool,
}

/// One catalog entry with its ordered deployments
#[ derive( Debug, Clone ) ]
pub struct CatalogModel
{
  pub alias: String,
  pub provider: ProviderFamily,
  pub provider_model: String,
  pub model_type: ModelType,
  pub enabled: bool,
  pub price_input_per_mtoken_usd: f64,
  pub price_output_per_mtoken_usd: f64,
  pub credentials_ref: String,
  pub deployments: Vec< DeploymentInfo >,
}

/// The complete immutable snapshot
#[ derive( Debug, Clone, Default ) ]
pub struct CatalogSnapshot
{
  pub models: HashMap< String, CatalogModel >,
  pub tenant_models: HashMap< Uuid, HashSet< String > >,
  pub defaults: GatewayDefaults,
  /// Millisecond timestamp the snapshot was built at
  pub built_at: i64,
}

impl CatalogSnapshot
{
  /// Aliases a tenant may use, for `/v1/models`
  #[ must_use ]
  pub fn aliases_for_tenant( &self, tenant_id: Uuid ) -> Vec< &CatalogModel >
  {
    let granted = self.tenant_models.get( &tenant_id );

    let mut aliases: Vec< &CatalogModel > = self
      .models
      .values()
      .filter( |model| model.enabled )
      .filter( |model|
      {
        self.defaults.default_models.iter().any( |a| a == &model.alias )
          || granted.is_some_and( |set| set.contains( &model.alias ) )
      } )
      .collect();

    aliases.sort_by( |a, b| a.alias.cmp( &b.alias ) );
    aliases
  }
}

/// Snapshot holder with push and timed refresh
#[ derive( Debug ) ]
pub struct SnapshotCache
{
  store: Store,
  current: ArcSwap< CatalogSnapshot >,
  last_refresh_ms: AtomicI64,
}

impl SnapshotCache
{
  /// Build the initial snapshot
  pub async fn new( store: Store ) -> Result< Arc< Self > >
  {
    let cache = Arc::new( Self
    {
      store,
      current: ArcSwap::from_pointee( CatalogSnapshot::default() ),
      last_refresh_ms: AtomicI64::new( 0 ),
    } );
    cache.refresh().await?;
    Ok( cache )
  }

  /// Current snapshot; a lock-free pointer load
  #[ must_use ]
  pub fn load( &self ) -> Arc< CatalogSnapshot >
  {
    self.current.load_full()
  }

  /// Rebuild from the store and publish atomically
  pub async fn refresh( &self ) -> Result< () >
  {
    let entries = self.store.list_catalog_entries().await?;
    let deployments = self.store.list_all_deployments().await?;
    let grants = self.store.list_all_tenant_models().await?;

    let defaults = GatewayDefaults
    {
      budget: self.store.budget_defaults().await?,
      rate_limit: self.store.rate_limit_defaults().await?,
      files: self.store.file_settings().await?,
      batch: self.store.batch_settings().await?,
      default_models: self.store.default_models().await?,
    };

    let mut by_alias: HashMap< String, Vec< DeploymentInfo > > = HashMap::new();
    for dep in deployments
    {
      by_alias.entry( dep.alias.clone() ).or_default().push( DeploymentInfo
      {
        id: dep.id,
        endpoint: dep.endpoint,
        region: dep.region,
        credentials_ref: dep.credentials_ref,
        enabled: dep.enabled,
      } );
    }

    let mut models = HashMap::new();
    for entry in entries
    {
      let deployments = by_alias.remove( &entry.alias ).unwrap_or_default();
      models.insert( entry.alias.clone(), CatalogModel
      {
        alias: entry.alias,
        provider: entry.provider,
        provider_model: entry.provider_model,
        model_type: entry.model_type,
        enabled: entry.enabled,
        price_input_per_mtoken_usd: entry.price_input_per_mtoken_usd,
        price_output_per_mtoken_usd: entry.price_output_per_mtoken_usd,
        credentials_ref: entry.credentials_ref,
        deployments,
      } );
    }

    let mut tenant_models: HashMap< Uuid, HashSet< String > > = HashMap::new();
    for ( tenant_id, alias ) in grants
    {
      tenant_models.entry( tenant_id ).or_default().insert( alias );
    }

    let snapshot = CatalogSnapshot
    {
      models,
      tenant_models,
      defaults,
      built_at: now_ms(),
    };

    self.current.store( Arc::new( snapshot ) );
    self.last_refresh_ms.store( now_ms(), Ordering::Relaxed );

    Ok( () )
  }

  /// Refresh when the timed fallback has elapsed
  pub async fn refresh_if_stale( &self ) -> Result< () >
  {
    let last = self.last_refresh_ms.load( Ordering::Relaxed );
    if now_ms() - last >= SNAPSHOT_TTL_MS
    {
      self.refresh().await?;
    }
    Ok( () )
  }
}

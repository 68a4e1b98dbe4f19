//! Model catalog, deployments and tenant allowlist access
//!
//! Aliases are case-insensitive and stored lowercased. A catalog entry names
//! the default deployment; the `deployments` table carries the full ordered
//! set the router selects from.

use sqlx::Row;
use uuid::Uuid;

use gateway_types::{ GatewayError, ModelType, ProviderFamily, Result };

use crate::{ db_err, now_ms, Store };

/// One row of the `model_catalog` table
#[ derive( Debug, Clone ) ]
pub struct CatalogEntryRecord
{
  pub alias: String,
  pub provider: ProviderFamily,
  pub provider_model: String,
  pub deployment: String,
  pub enabled: bool,
  pub price_input_per_mtoken_usd: f64,
  pub price_output_per_mtoken_usd: f64,
  pub model_type: ModelType,
  pub credentials_ref: String,
  pub version: i64,
  pub created_at: i64,
  pub updated_at: i64,
}

/// One row of the `deployments` table
#[ derive( Debug, Clone ) ]
pub struct DeploymentRecord
{
  pub id: Uuid,
  pub alias: String,
  pub endpoint: String,
  pub region: Option< String >,
  pub credentials_ref: String,
  pub enabled: bool,
  pub created_at: i64,
  pub updated_at: i64,
}

fn decode_entry( row: &sqlx::sqlite::SqliteRow ) -> Result< CatalogEntryRecord >
{
  let provider_raw: String = row.get( "provider" );
  let type_raw: String = row.get( "model_type" );

  Ok( CatalogEntryRecord
  {
    alias: row.get( "alias" ),
    provider: ProviderFamily::parse( &provider_raw )
      .ok_or_else( || GatewayError::Internal( format!( "bad provider {provider_raw}" ) ) )?,
    provider_model: row.get( "provider_model" ),
    deployment: row.get( "deployment" ),
    enabled: row.get::< i64, _ >( "enabled" ) != 0,
    price_input_per_mtoken_usd: row.get( "price_input_per_mtoken_usd" ),
    price_output_per_mtoken_usd: row.get( "price_output_per_mtoken_usd" ),
    model_type: ModelType::parse( &type_raw )
      .ok_or_else( || GatewayError::Internal( format!( "bad model type {type_raw}" ) ) )?,
    credentials_ref: row.get( "credentials_ref" ),
    version: row.get( "version" ),
    created_at: row.get( "created_at" ),
    updated_at: row.get( "updated_at" ),
  } )
}

fn decode_deployment( row: &sqlx::sqlite::SqliteRow ) -> DeploymentRecord
{
  DeploymentRecord
  {
    id: row.get( "id" ),
    alias: row.get( "alias" ),
    endpoint: row.get( "endpoint" ),
    region: row.get( "region" ),
    credentials_ref: row.get( "credentials_ref" ),
    enabled: row.get::< i64, _ >( "enabled" ) != 0,
    created_at: row.get( "created_at" ),
    updated_at: row.get( "updated_at" ),
  }
}

/// Fields for inserting or replacing a catalog entry
#[ derive( Debug, Clone ) ]
pub struct NewCatalogEntry
{
  pub alias: String,
  pub provider: ProviderFamily,
  pub provider_model: String,
  pub deployment: String,
  pub enabled: bool,
  pub price_input_per_mtoken_usd: f64,
  pub price_output_per_mtoken_usd: f64,
  pub model_type: ModelType,
  pub credentials_ref: String,
}

impl Store
{
  /// Insert a catalog entry
  pub async fn create_catalog_entry( &self, new: NewCatalogEntry ) -> Result< CatalogEntryRecord >
  {
    let alias = new.alias.to_lowercase();
    let now = now_ms();

    sqlx::query(
      "INSERT INTO model_catalog \
       (alias, provider, provider_model, deployment, enabled, \
        price_input_per_mtoken_usd, price_output_per_mtoken_usd, model_type, credentials_ref, \
        created_at, updated_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)"
    )
    .bind( &alias )
    .bind( new.provider.as_str() )
    .bind( &new.provider_model )
    .bind( &new.deployment )
    .bind( i64::from( new.enabled ) )
    .bind( new.price_input_per_mtoken_usd )
    .bind( new.price_output_per_mtoken_usd )
    .bind( new.model_type.as_str() )
    .bind( &new.credentials_ref )
    .bind( now )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    self.get_catalog_entry( &alias ).await?
      .ok_or_else( || GatewayError::Internal( "catalog entry vanished after insert".to_string() ) )
  }

  /// Fetch a catalog entry by alias (case-insensitive)
  pub async fn get_catalog_entry( &self, alias: &str ) -> Result< Option< CatalogEntryRecord > >
  {
    let row = sqlx::query( "SELECT * FROM model_catalog WHERE alias = $1" )
      .bind( alias.to_lowercase() )
      .fetch_optional( &self.pool )
      .await
      .map_err( db_err )?;

    row.as_ref().map( decode_entry ).transpose()
  }

  /// All catalog entries
  pub async fn list_catalog_entries( &self ) -> Result< Vec< CatalogEntryRecord > >
  {
    let rows = sqlx::query( "SELECT * FROM model_catalog ORDER BY alias" )
      .fetch_all( &self.pool )
      .await
      .map_err( db_err )?;

    rows.iter().map( decode_entry ).collect()
  }

  /// Update a catalog entry with optimistic concurrency
  pub async fn update_catalog_entry(
    &self,
    alias: &str,
    new: NewCatalogEntry,
    expected_version: i64,
  ) -> Result< CatalogEntryRecord >
  {
    let alias = alias.to_lowercase();

    let result = sqlx::query(
      "UPDATE model_catalog SET provider = $1, provider_model = $2, deployment = $3, enabled = $4, \
       price_input_per_mtoken_usd = $5, price_output_per_mtoken_usd = $6, model_type = $7, \
       credentials_ref = $8, version = version + 1, updated_at = $9 \
       WHERE alias = $10 AND version = $11"
    )
    .bind( new.provider.as_str() )
    .bind( &new.provider_model )
    .bind( &new.deployment )
    .bind( i64::from( new.enabled ) )
    .bind( new.price_input_per_mtoken_usd )
    .bind( new.price_output_per_mtoken_usd )
    .bind( new.model_type.as_str() )
    .bind( &new.credentials_ref )
    .bind( now_ms() )
    .bind( &alias )
    .bind( expected_version )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    if result.rows_affected() == 0
    {
      return Err( GatewayError::Conflict( "catalog entry was modified concurrently".to_string() ) );
    }

    self.get_catalog_entry( &alias ).await?
      .ok_or_else( || GatewayError::NotFound( "catalog entry".to_string() ) )
  }

  /// Remove a catalog entry and its deployments (FK cascade)
  pub async fn delete_catalog_entry( &self, alias: &str ) -> Result< () >
  {
    let result = sqlx::query( "DELETE FROM model_catalog WHERE alias = $1" )
      .bind( alias.to_lowercase() )
      .execute( &self.pool )
      .await
      .map_err( db_err )?;

    if result.rows_affected() == 0
    {
      return Err( GatewayError::NotFound( "catalog entry".to_string() ) );
    }

    Ok( () )
  }

  /// Add a deployment binding for an alias
  pub async fn create_deployment(
    &self,
    alias: &str,
    endpoint: &str,
    region: Option< &str >,
    credentials_ref: &str,
    enabled: bool,
  ) -> Result< DeploymentRecord >
  {
    let id = Uuid::new_v4();
    let now = now_ms();

    sqlx::query(
      "INSERT INTO deployments (id, alias, endpoint, region, credentials_ref, enabled, created_at, updated_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $7)"
    )
    .bind( id )
    .bind( alias.to_lowercase() )
    .bind( endpoint )
    .bind( region )
    .bind( credentials_ref )
    .bind( i64::from( enabled ) )
    .bind( now )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    let row = sqlx::query( "SELECT * FROM deployments WHERE id = $1" )
      .bind( id )
      .fetch_one( &self.pool )
      .await
      .map_err( db_err )?;

    Ok( decode_deployment( &row ) )
  }

  /// Ordered deployments for an alias
  pub async fn list_deployments( &self, alias: &str ) -> Result< Vec< DeploymentRecord > >
  {
    let rows = sqlx::query( "SELECT * FROM deployments WHERE alias = $1 ORDER BY created_at" )
      .bind( alias.to_lowercase() )
      .fetch_all( &self.pool )
      .await
      .map_err( db_err )?;

    Ok( rows.iter().map( decode_deployment ).collect() )
  }

  /// Every deployment row, for snapshot builds
  pub async fn list_all_deployments( &self ) -> Result< Vec< DeploymentRecord > >
  {
    let rows = sqlx::query( "SELECT * FROM deployments ORDER BY alias, created_at" )
      .fetch_all( &self.pool )
      .await
      .map_err( db_err )?;

    Ok( rows.iter().map( decode_deployment ).collect() )
  }

  /// Remove a deployment binding
  pub async fn delete_deployment( &self, id: Uuid ) -> Result< () >
  {
    let result = sqlx::query( "DELETE FROM deployments WHERE id = $1" )
      .bind( id )
      .execute( &self.pool )
      .await
      .map_err( db_err )?;

    if result.rows_affected() == 0
    {
      return Err( GatewayError::NotFound( "deployment".to_string() ) );
    }

    Ok( () )
  }

  /// Grant an alias to a tenant
  pub async fn add_tenant_model( &self, tenant_id: Uuid, alias: &str ) -> Result< () >
  {
    sqlx::query(
      "INSERT OR IGNORE INTO tenant_models (tenant_id, alias, created_at) VALUES ($1, $2, $3)"
    )
    .bind( tenant_id )
    .bind( alias.to_lowercase() )
    .bind( now_ms() )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    Ok( () )
  }

  /// Revoke an alias from a tenant
  pub async fn remove_tenant_model( &self, tenant_id: Uuid, alias: &str ) -> Result< () >
  {
    sqlx::query( "DELETE FROM tenant_models WHERE tenant_id = $1 AND alias = $2" )
      .bind( tenant_id )
      .bind( alias.to_lowercase() )
      .execute( &self.pool )
      .await
      .map_err( db_err )?;

    Ok( () )
  }

  /// Aliases explicitly granted to a tenant
  pub async fn list_tenant_models( &self, tenant_id: Uuid ) -> Result< Vec< String > >
  {
    let rows = sqlx::query( "SELECT alias FROM tenant_models WHERE tenant_id = $1 ORDER BY alias" )
      .bind( tenant_id )
      .fetch_all( &self.pool )
      .await
      .map_err( db_err )?;

    Ok( rows.iter().map( |r| r.get( "alias" ) ).collect() )
  }

  /// The whole allowlist, for snapshot builds
  pub async fn list_all_tenant_models( &self ) -> Result< Vec< ( Uuid, String ) > >
  {
    let rows = sqlx::query( "SELECT tenant_id, alias FROM tenant_models" )
      .fetch_all( &self.pool )
      .await
      .map_err( db_err )?;

    Ok( rows.iter().map( |r| ( r.get( "tenant_id" ), r.get( "alias" ) ) ).collect() )
  }
}

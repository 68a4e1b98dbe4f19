//! API key table access
//!
//! The wire token is `prefix + "_" + secret`; only the Argon2id hash of the
//! secret is stored. Lookups go by the public prefix.

use sqlx::Row;
use uuid::Uuid;

use gateway_types::{ ApiKeyKind, GatewayError, Result };
use gateway_types::context::KeyQuota;

use crate::{ db_err, decode_string_list, encode_string_list, now_ms, Store };

/// One row of the `api_keys` table
#[ derive( Debug, Clone ) ]
pub struct ApiKeyRecord
{
  pub id: Uuid,
  pub tenant_id: Uuid,
  pub kind: ApiKeyKind,
  pub owner_user_id: Option< Uuid >,
  pub prefix: String,
  pub secret_hash: String,
  pub name: String,
  pub scopes: Vec< String >,
  pub quota: Option< KeyQuota >,
  pub created_at: i64,
  pub updated_at: i64,
  pub revoked_at: Option< i64 >,
  pub last_used_at: Option< i64 >,
}

impl ApiKeyRecord
{
  /// A key is usable while it has no revocation stamp
  #[ must_use ]
  pub fn is_active( &self ) -> bool
  {
    self.revoked_at.is_none()
  }
}

fn decode( row: &sqlx::sqlite::SqliteRow ) -> Result< ApiKeyRecord >
{
  let kind_raw: String = row.get( "kind" );
  let budget: Option< f64 > = row.get( "quota_budget_usd" );
  let warning: Option< f64 > = row.get( "quota_warning_threshold" );

  let quota = if budget.is_some() || warning.is_some()
  {
    Some( KeyQuota { budget_usd: budget, warning_threshold: warning } )
  }
  else
  {
    None
  };

  Ok( ApiKeyRecord
  {
    id: row.get( "id" ),
    tenant_id: row.get( "tenant_id" ),
    kind: ApiKeyKind::parse( &kind_raw )
      .ok_or_else( || GatewayError::Internal( format!( "bad key kind {kind_raw}" ) ) )?,
    owner_user_id: row.get( "owner_user_id" ),
    prefix: row.get( "prefix" ),
    secret_hash: row.get( "secret_hash" ),
    name: row.get( "name" ),
    scopes: decode_string_list( row.get( "scopes" ) ),
    quota,
    created_at: row.get( "created_at" ),
    updated_at: row.get( "updated_at" ),
    revoked_at: row.get( "revoked_at" ),
    last_used_at: row.get( "last_used_at" ),
  } )
}

/// Fields for inserting a new key
#[ derive( Debug, Clone ) ]
pub struct NewApiKey
{
  pub tenant_id: Uuid,
  pub kind: ApiKeyKind,
  pub owner_user_id: Option< Uuid >,
  pub prefix: String,
  pub secret_hash: String,
  pub name: String,
  pub scopes: Vec< String >,
  pub quota: Option< KeyQuota >,
}

impl Store
{
  /// Insert a key row
  ///
  /// # Errors
  ///
  /// `bad_request` when a personal key carries no owner; `conflict` on a
  /// duplicate prefix.
  pub async fn create_api_key( &self, new: NewApiKey ) -> Result< ApiKeyRecord >
  {
    if new.kind == ApiKeyKind::Personal && new.owner_user_id.is_none()
    {
      return Err( GatewayError::BadRequest( "personal key requires an owner".to_string() ) );
    }

    let id = Uuid::new_v4();
    let now = now_ms();

    sqlx::query(
      "INSERT INTO api_keys \
       (id, tenant_id, kind, owner_user_id, prefix, secret_hash, name, scopes, \
        quota_budget_usd, quota_warning_threshold, created_at, updated_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)"
    )
    .bind( id )
    .bind( new.tenant_id )
    .bind( new.kind.as_str() )
    .bind( new.owner_user_id )
    .bind( &new.prefix )
    .bind( &new.secret_hash )
    .bind( &new.name )
    .bind( encode_string_list( &new.scopes ) )
    .bind( new.quota.and_then( |q| q.budget_usd ) )
    .bind( new.quota.and_then( |q| q.warning_threshold ) )
    .bind( now )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    self.get_api_key( id ).await
  }

  /// Fetch a key by id
  pub async fn get_api_key( &self, id: Uuid ) -> Result< ApiKeyRecord >
  {
    let row = sqlx::query( "SELECT * FROM api_keys WHERE id = $1" )
      .bind( id )
      .fetch_optional( &self.pool )
      .await
      .map_err( db_err )?
      .ok_or_else( || GatewayError::NotFound( "api key".to_string() ) )?;

    decode( &row )
  }

  /// Fetch the active key carrying a wire prefix
  ///
  /// Revoked keys are invisible here; the resolver treats absence and a bad
  /// secret identically.
  pub async fn find_active_api_key_by_prefix( &self, prefix: &str ) -> Result< Option< ApiKeyRecord > >
  {
    let row = sqlx::query( "SELECT * FROM api_keys WHERE prefix = $1 AND revoked_at IS NULL" )
      .bind( prefix )
      .fetch_optional( &self.pool )
      .await
      .map_err( db_err )?;

    row.as_ref().map( decode ).transpose()
  }

  /// Keys of a tenant, newest first
  pub async fn list_api_keys_for_tenant( &self, tenant_id: Uuid ) -> Result< Vec< ApiKeyRecord > >
  {
    let rows = sqlx::query( "SELECT * FROM api_keys WHERE tenant_id = $1 ORDER BY created_at DESC" )
      .bind( tenant_id )
      .fetch_all( &self.pool )
      .await
      .map_err( db_err )?;

    rows.iter().map( decode ).collect()
  }

  /// Personal keys owned by a user
  pub async fn list_personal_api_keys( &self, user_id: Uuid ) -> Result< Vec< ApiKeyRecord > >
  {
    let rows = sqlx::query(
      "SELECT * FROM api_keys WHERE owner_user_id = $1 AND kind = 'personal' ORDER BY created_at DESC"
    )
    .bind( user_id )
    .fetch_all( &self.pool )
    .await
    .map_err( db_err )?;

    rows.iter().map( decode ).collect()
  }

  /// Revoke a key; irreversible
  pub async fn revoke_api_key( &self, id: Uuid ) -> Result< () >
  {
    let now = now_ms();
    let result = sqlx::query(
      "UPDATE api_keys SET revoked_at = $1, updated_at = $1 WHERE id = $2 AND revoked_at IS NULL"
    )
    .bind( now )
    .bind( id )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    if result.rows_affected() == 0
    {
      return Err( GatewayError::NotFound( "active api key".to_string() ) );
    }

    Ok( () )
  }

  /// Best-effort last-used stamp; the resolver coalesces calls
  pub async fn touch_api_key_last_used( &self, id: Uuid ) -> Result< () >
  {
    sqlx::query( "UPDATE api_keys SET last_used_at = $1 WHERE id = $2" )
      .bind( now_ms() )
      .bind( id )
      .execute( &self.pool )
      .await
      .map_err( db_err )?;

    Ok( () )
  }
}

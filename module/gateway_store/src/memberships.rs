//! Membership table access
//!
//! Non-personal tenants must keep exactly one owner; demoting or removing
//! the last owner is rejected with `conflict`.

use sqlx::Row;
use uuid::Uuid;

use gateway_types::{ GatewayError, MembershipRole, Result };

use crate::{ db_err, now_ms, Store };

/// One row of the `memberships` table
#[ derive( Debug, Clone ) ]
pub struct MembershipRecord
{
  pub tenant_id: Uuid,
  pub user_id: Uuid,
  pub role: MembershipRole,
  pub created_at: i64,
}

fn decode( row: &sqlx::sqlite::SqliteRow ) -> Result< MembershipRecord >
{
  let role_raw: String = row.get( "role" );
  Ok( MembershipRecord
  {
    tenant_id: row.get( "tenant_id" ),
    user_id: row.get( "user_id" ),
    role: MembershipRole::parse( &role_raw )
      .ok_or_else( || GatewayError::Internal( format!( "bad role {role_raw}" ) ) )?,
    created_at: row.get( "created_at" ),
  } )
}

impl Store
{
  /// Add a member to a tenant
  pub async fn add_membership( &self, tenant_id: Uuid, user_id: Uuid, role: MembershipRole ) -> Result< MembershipRecord >
  {
    sqlx::query(
      "INSERT INTO memberships (tenant_id, user_id, role, created_at) VALUES ($1, $2, $3, $4)"
    )
    .bind( tenant_id )
    .bind( user_id )
    .bind( role.as_str() )
    .bind( now_ms() )
    .execute( &self.pool )
    .await
    .map_err( db_err )?;

    Ok( MembershipRecord { tenant_id, user_id, role, created_at: now_ms() } )
  }

  /// Role of a user within a tenant, if a membership exists
  pub async fn membership_role( &self, tenant_id: Uuid, user_id: Uuid ) -> Result< Option< MembershipRole > >
  {
    let row = sqlx::query( "SELECT role FROM memberships WHERE tenant_id = $1 AND user_id = $2" )
      .bind( tenant_id )
      .bind( user_id )
      .fetch_optional( &self.pool )
      .await
      .map_err( db_err )?;

    Ok( row.and_then( |r| MembershipRole::parse( &r.get::< String, _ >( "role" ) ) ) )
  }

  /// Members of a tenant
  pub async fn list_memberships( &self, tenant_id: Uuid ) -> Result< Vec< MembershipRecord > >
  {
    let rows = sqlx::query( "SELECT * FROM memberships WHERE tenant_id = $1 ORDER BY created_at" )
      .bind( tenant_id )
      .fetch_all( &self.pool )
      .await
      .map_err( db_err )?;

    rows.iter().map( decode ).collect()
  }

  /// Tenants a user belongs to
  pub async fn list_memberships_for_user( &self, user_id: Uuid ) -> Result< Vec< MembershipRecord > >
  {
    let rows = sqlx::query( "SELECT * FROM memberships WHERE user_id = $1 ORDER BY created_at" )
      .bind( user_id )
      .fetch_all( &self.pool )
      .await
      .map_err( db_err )?;

    rows.iter().map( decode ).collect()
  }

  /// Change a member's role, preserving the single-owner invariant
  pub async fn update_membership_role( &self, tenant_id: Uuid, user_id: Uuid, role: MembershipRole ) -> Result< () >
  {
    let mut tx = self.pool.begin().await.map_err( db_err )?;

    let current: Option< String > = sqlx::query_scalar(
      "SELECT role FROM memberships WHERE tenant_id = $1 AND user_id = $2"
    )
    .bind( tenant_id )
    .bind( user_id )
    .fetch_optional( &mut *tx )
    .await
    .map_err( db_err )?;

    let Some( current ) = current else
    {
      return Err( GatewayError::NotFound( "membership".to_string() ) );
    };

    if current == "owner" && role != MembershipRole::Owner
    {
      let owners: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM memberships WHERE tenant_id = $1 AND role = 'owner'"
      )
      .bind( tenant_id )
      .fetch_one( &mut *tx )
      .await
      .map_err( db_err )?;

      if owners <= 1
      {
        return Err( GatewayError::Conflict( "cannot demote the last owner".to_string() ) );
      }
    }

    sqlx::query( "UPDATE memberships SET role = $1 WHERE tenant_id = $2 AND user_id = $3" )
      .bind( role.as_str() )
      .bind( tenant_id )
      .bind( user_id )
      .execute( &mut *tx )
      .await
      .map_err( db_err )?;

    tx.commit().await.map_err( db_err )?;

    Ok( () )
  }

  /// Remove a member, preserving the single-owner invariant
  pub async fn remove_membership( &self, tenant_id: Uuid, user_id: Uuid ) -> Result< () >
  {
    let mut tx = self.pool.begin().await.map_err( db_err )?;

    let current: Option< String > = sqlx::query_scalar(
      "SELECT role FROM memberships WHERE tenant_id = $1 AND user_id = $2"
    )
    .bind( tenant_id )
    .bind( user_id )
    .fetch_optional( &mut *tx )
    .await
    .map_err( db_err )?;

    let Some( current ) = current else
    {
      return Err( GatewayError::NotFound( "membership".to_string() ) );
    };

    if current == "owner"
    {
      let owners: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM memberships WHERE tenant_id = $1 AND role = 'owner'"
      )
      .bind( tenant_id )
      .fetch_one( &mut *tx )
      .await
      .map_err( db_err )?;

      if owners <= 1
      {
        return Err( GatewayError::Conflict( "cannot remove the last owner".to_string() ) );
      }
    }

    sqlx::query( "DELETE FROM memberships WHERE tenant_id = $1 AND user_id = $2" )
      .bind( tenant_id )
      .bind( user_id )
      .execute( &mut *tx )
      .await
      .map_err( db_err )?;

    tx.commit().await.map_err( db_err )?;

    Ok( () )
  }
}

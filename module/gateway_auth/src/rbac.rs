//! Role checks for the admin and user planes
//!
//! `owner > admin > viewer > user`; super admins bypass tenant scoping
//! entirely.

use uuid::Uuid;

use gateway_store::{ Store, UserRecord };
use gateway_types::{ GatewayError, MembershipRole, Result };

/// Require `user` to hold at least `required` within `tenant_id`
///
/// Returns the user's actual role (owner for super admins) so callers can
/// make finer-grained decisions without a second query.
///
/// # Errors
///
/// `forbidden` when the user has no membership or an insufficient role.
pub async fn ensure_tenant_role(
  store: &Store,
  user: &UserRecord,
  tenant_id: Uuid,
  required: MembershipRole,
) -> Result< MembershipRole >
{
  if user.is_super_admin
  {
    return Ok( MembershipRole::Owner );
  }

  let role = store
    .membership_role( tenant_id, user.id )
    .await?
    .ok_or_else( || GatewayError::Forbidden( "not a member of this tenant".to_string() ) )?;

  if !role.at_least( required )
  {
    return Err( GatewayError::Forbidden( format!(
      "requires {} role or better",
      required.as_str()
    ) ) );
  }

  Ok( role )
}

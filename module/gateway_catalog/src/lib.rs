//! Catalog snapshot and deployment router
//!
//! The catalog, tenant allowlist and admin defaults are served from one
//! immutable snapshot swapped atomically on mutation (push invalidation)
//! with a timed fallback refresh. Requests read the snapshot pointer once
//! at ingress and keep it for their lifetime, so no reader ever sees a
//! half-applied admin change.

pub mod router;
pub mod snapshot;

pub use router::{ DeploymentHealth, Router, RouteHealth };
pub use snapshot::{ CatalogModel, CatalogSnapshot, DeploymentInfo, SnapshotCache };

use gateway_types::{ GatewayError, Result };
use uuid::Uuid;

/// Authorize `tenant_id` to use `alias` and resolve the catalog entry
///
/// The failure message never distinguishes "alias not in the catalog" from
/// "alias not granted to this tenant".
pub fn authorize< 'snap >(
  snapshot: &'snap CatalogSnapshot,
  tenant_id: Uuid,
  alias: &str,
) -> Result< &'snap CatalogModel >
{
  let alias = alias.to_lowercase();

  let allowed = snapshot.defaults.default_models.iter().any( |a| a == &alias )
    || snapshot
      .tenant_models
      .get( &tenant_id )
      .is_some_and( |granted| granted.contains( &alias ) );

  if !allowed
  {
    return Err( GatewayError::ModelNotAllowed );
  }

  let model = snapshot.models.get( &alias ).ok_or( GatewayError::ModelNotAllowed )?;

  if !model.enabled
  {
    return Err( GatewayError::ModelDisabled );
  }

  Ok( model )
}

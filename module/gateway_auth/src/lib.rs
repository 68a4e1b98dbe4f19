//! Authentication for the model gateway
//!
//! Bearer-credential resolution for the data plane, session JWTs for the
//! control planes, password hashing for local sign-in, and the RBAC helper
//! shared by the admin and user surfaces.

pub mod keys;
pub mod password;
pub mod rbac;
pub mod resolver;
pub mod session;

pub use keys::{ GeneratedKey, KeyMaterial };
pub use rbac::ensure_tenant_role;
pub use resolver::{ CredentialResolver, ResolvedCredential };
pub use session::{ JwtSecret, SessionClaims };

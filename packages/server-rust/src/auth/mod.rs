//! Bearer-token authentication and permission checks.
//!
//! [`AuthenticateLayer`] runs on every request inside admission control and
//! attaches a [`Principal`]. Routes that need more than that are wrapped in
//! a [`RequirePermissionLayer`].

pub mod guard;
pub mod layer;
pub mod principal;
pub mod secret;

pub use guard::{
    check_permission, require_permission, RequirePermissionLayer, RequirePermissionService,
};
pub use layer::{resolve_principal, AuthenticateLayer, AuthenticateService};
pub use principal::Principal;
pub use secret::{digest, digest_matches, generate_token, SecretDigest};

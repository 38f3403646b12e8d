//! Static role lookup.

/// Role names that grant administrative access.
pub const ADMIN_ROLES: &[&str] = &["admin", "super_admin"];

/// The role granted to the bootstrap administrator.
pub const ADMIN: &str = "admin";

/// Whether any of `roles` is an administrative role.
pub fn is_admin(roles: &[String]) -> bool {
    roles.iter().any(|r| ADMIN_ROLES.contains(&r.as_str()))
}

/// Whether `roles` satisfies at least one of `required`.
///
/// An empty `required` list means any authenticated principal is allowed.
pub fn is_authorized(roles: &[String], required: &[&str]) -> bool {
    required.is_empty() || roles.iter().any(|r| required.contains(&r.as_str()))
}

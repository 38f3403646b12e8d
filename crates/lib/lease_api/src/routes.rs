//! Route paths.

pub const POST_AUTH_LOGIN: &str = "/auth/login";
pub const POST_AUTH_REFRESH: &str = "/auth/refresh";
pub const POST_AUTH_IMPERSONATE: &str = "/auth/impersonate";
pub const POST_AUTH_STOP_IMPERSONATION: &str = "/auth/stop-impersonation";
pub const POST_AUTH_PASSWORD_RESET_REQUEST: &str = "/auth/password-reset/request";
pub const POST_AUTH_PASSWORD_RESET: &str = "/auth/password-reset";
pub const POST_AUTH_LOGOUT: &str = "/auth/logout";
pub const POST_AUTH_LOGOUT_ALL: &str = "/auth/logout-all";
pub const GET_AUTH_ME: &str = "/auth/me";

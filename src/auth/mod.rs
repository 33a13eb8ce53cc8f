// =============================================================================
// AUTH MODULE
// =============================================================================
// Bearer-token authentication for the API.
//
//   password.rs  - argon2 hashing of stored passwords
//   jwt.rs       - HS256 access tokens (sub = user id)
//   extractor.rs - CurrentUser / AdminUser request extractors
// =============================================================================

pub mod extractor;
pub mod jwt;
pub mod password;

pub use extractor::{bearer_token, AdminUser, CurrentUser};
pub use jwt::JwtService;
pub use password::{hash_password, verify_password};

//! Secret storage the trampoline reads from and writes to.
//!
//! Two concerns live here and nothing else:
//!
//! - [`TokenStore`]: the persisted secret store keyed by `(key, login)`.
//!   HTTP tokens are stored under [`key_for_endpoint`]; SSH passphrases the
//!   user asked to remember are stored under [`SSH_PASSPHRASE_STORE_KEY`]
//!   with the key path as the login.
//! - [`CredentialCache`]: the process-wide host trust allowlist and SSH key
//!   passphrase cache, owned by whoever builds the resolver and shared by
//!   reference.
//!
//! No policy is applied here; deciding *when* to read or write belongs to the
//! resolver in `trampoline-core`.

mod cache;
mod store;

pub use cache::CredentialCache;
pub use store::{CredentialError, FileTokenStore, MemoryTokenStore, TokenStore};

/// Token store key under which remembered SSH key passphrases are kept.
pub const SSH_PASSPHRASE_STORE_KEY: &str = "Trampoline - SSH key passphrases";

/// Token store key for the HTTP credentials of `endpoint`.
///
/// Trailing slashes are dropped so `https://api.github.com` and
/// `https://api.github.com/` share one entry.
pub fn key_for_endpoint(prefix: &str, endpoint: &str) -> String {
    format!("{prefix} - {}", endpoint.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_key_uses_prefix() {
        assert_eq!(
            key_for_endpoint("Trampoline", "https://api.github.com"),
            "Trampoline - https://api.github.com"
        );
    }

    #[test]
    fn endpoint_key_ignores_trailing_slash() {
        assert_eq!(
            key_for_endpoint("Trampoline", "https://ghe.example.com/api/v3/"),
            key_for_endpoint("Trampoline", "https://ghe.example.com/api/v3")
        );
    }
}

//! The Auth Gate: MD5 challenge/response, bootstrap account creation, and
//! loopback auto-authorization.

use std::collections::BTreeMap;

use media_api::config::Account;
use serde::Serialize;
use utils::auth::{compute_challenge, hash_password, verify};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthStatus {
    /// No account exists yet; client may bootstrap one.
    #[serde(rename = "NOACC")]
    NoAccount,
    /// A bootstrap account was just created from this request.
    #[serde(rename = "ACC_MADE")]
    AccountMade,
    /// Challenge/response matched.
    Ok,
    /// Challenge/response did not match (or none was supplied); here is a
    /// fresh challenge to retry with.
    #[serde(rename = "CHALL")]
    Challenge,
}

#[derive(Debug, Serialize)]
pub struct AuthResult {
    pub status: AuthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,
    pub authorized: bool,
}

#[derive(Debug, Default)]
pub struct AuthorizeRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub new_username: Option<String>,
    pub new_password: Option<String>,
}

/// Loopback requests with no `X-Real-IP` header are treated as already
/// authorized, bypassing the challenge/response protocol entirely.
pub fn loopback_auto_auth(peer_is_loopback: bool, has_real_ip_header: bool) -> bool {
    peer_is_loopback && !has_real_ip_header
}

/// Run one step of the auth protocol against the name-keyed account map.
/// `accounts` is empty until a bootstrap account exists. Returns the result
/// and, if a bootstrap account was just created, its username and record to
/// persist.
pub fn authorize(
    accounts: &BTreeMap<String, Account>,
    peer_host: &str,
    request: &AuthorizeRequest,
) -> (AuthResult, Option<(String, Account)>) {
    let challenge = compute_challenge(peer_host);

    if accounts.is_empty() {
        if let (Some(new_username), Some(new_password)) = (&request.new_username, &request.new_password) {
            let created = Account {
                password_hash: hash_password(new_password),
            };
            return (
                AuthResult {
                    status: AuthStatus::AccountMade,
                    challenge: None,
                    authorized: true,
                },
                Some((new_username.clone(), created)),
            );
        }
        return (
            AuthResult {
                status: AuthStatus::NoAccount,
                challenge: None,
                authorized: false,
            },
            None,
        );
    }

    let account = request.username.as_deref().and_then(|name| accounts.get(name));
    let Some(account) = account else {
        return (
            AuthResult {
                status: AuthStatus::Challenge,
                challenge: Some(challenge),
                authorized: false,
            },
            None,
        );
    };

    let submitted = request.password.as_deref().unwrap_or_default();
    if !submitted.is_empty() && verify(&account.password_hash, &challenge, submitted) {
        (
            AuthResult {
                status: AuthStatus::Ok,
                challenge: None,
                authorized: true,
            },
            None,
        )
    } else {
        (
            AuthResult {
                status: AuthStatus::Challenge,
                challenge: Some(challenge),
                authorized: false,
            },
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_account_yields_noacc_without_challenge() {
        let accounts = BTreeMap::new();
        let (result, created) = authorize(&accounts, "127.0.0.1", &AuthorizeRequest::default());
        assert_eq!(result.status, AuthStatus::NoAccount);
        assert!(result.challenge.is_none());
        assert!(created.is_none());
    }

    #[test]
    fn bootstrap_request_creates_an_account() {
        let accounts = BTreeMap::new();
        let request = AuthorizeRequest {
            new_username: Some("admin".to_string()),
            new_password: Some("hunter2".to_string()),
            ..Default::default()
        };
        let (result, created) = authorize(&accounts, "127.0.0.1", &request);
        assert_eq!(result.status, AuthStatus::AccountMade);
        assert!(result.authorized);
        let (name, account) = created.unwrap();
        assert_eq!(name, "admin");
        assert_eq!(account.password_hash, hash_password("hunter2"));
    }

    #[test]
    fn correct_challenge_response_authorizes() {
        let account = Account { password_hash: hash_password("hunter2") };
        let challenge = compute_challenge("127.0.0.1");
        let response = utils::auth::expected_response(&account.password_hash, &challenge);
        let mut accounts = BTreeMap::new();
        accounts.insert("admin".to_string(), account);
        let request = AuthorizeRequest {
            username: Some("admin".to_string()),
            password: Some(response),
            ..Default::default()
        };
        let (result, _) = authorize(&accounts, "127.0.0.1", &request);
        assert_eq!(result.status, AuthStatus::Ok);
        assert!(result.authorized);
    }

    #[test]
    fn wrong_password_yields_a_fresh_challenge() {
        let mut accounts = BTreeMap::new();
        accounts.insert("admin".to_string(), Account { password_hash: hash_password("hunter2") });
        let request = AuthorizeRequest {
            username: Some("admin".to_string()),
            password: Some("garbage".to_string()),
            ..Default::default()
        };
        let (result, _) = authorize(&accounts, "127.0.0.1", &request);
        assert_eq!(result.status, AuthStatus::Challenge);
        assert!(result.challenge.is_some());
        assert!(!result.authorized);
    }

    #[test]
    fn unknown_username_yields_a_fresh_challenge_rather_than_panicking() {
        let mut accounts = BTreeMap::new();
        accounts.insert("admin".to_string(), Account { password_hash: hash_password("hunter2") });
        let request = AuthorizeRequest {
            username: Some("someone-else".to_string()),
            password: Some("whatever".to_string()),
            ..Default::default()
        };
        let (result, _) = authorize(&accounts, "127.0.0.1", &request);
        assert_eq!(result.status, AuthStatus::Challenge);
        assert!(!result.authorized);
    }

    #[test]
    fn loopback_without_real_ip_header_is_auto_authorized() {
        assert!(loopback_auto_auth(true, false));
        assert!(!loopback_auto_auth(true, true));
        assert!(!loopback_auto_auth(false, false));
    }
}

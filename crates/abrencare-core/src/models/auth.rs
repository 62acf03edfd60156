//! Request and response payloads for the account endpoints.

use serde::{Deserialize, Serialize};

use super::User;

/// Body returned by `POST login/`.
///
/// The backend flattens the user's identity next to the token pair.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
    #[serde(flatten)]
    pub user: User,
}

/// Body returned by `POST token/refresh/`.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
    /// Present only when the backend rotates refresh tokens.
    #[serde(default)]
    pub refresh: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<&'a str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_login_response() {
        let json = r#"{
            "refresh": "r-token",
            "access": "a-token",
            "is_superuser": false,
            "id": 3,
            "username": "alice",
            "profile_picture": null
        }"#;
        let resp: LoginResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.access, "a-token");
        assert_eq!(resp.refresh.as_deref(), Some("r-token"));
        assert_eq!(resp.user.id, "3");
        assert_eq!(resp.user.username, "alice");
        assert_eq!(resp.user.profile_picture, None);
    }

    #[test]
    fn test_parse_login_response_without_refresh() {
        let resp: LoginResponse =
            serde_json::from_str(r#"{"access": "a", "id": "9", "username": "bob"}"#).unwrap();
        assert!(resp.refresh.is_none());
    }

    #[test]
    fn test_register_request_omits_missing_email() {
        let req = RegisterRequest { username: "bob", password: "pw", email: None };
        let encoded = serde_json::to_value(&req).unwrap();
        assert!(encoded.get("email").is_none());
    }
}

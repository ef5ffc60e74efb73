#[cfg(test)]
mod tests {
    use super::super::*;
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn hash_password_salts_each_call_differently() {
        let a = hash_password("correct horse battery staple");
        let b = hash_password("correct horse battery staple");
        assert_ne!(a, b, "two hashes of the same password must not collide");
    }

    #[test]
    fn verify_password_round_trips_through_hash_password() {
        let hash = hash_password("correct horse battery staple");
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong password", &hash));
    }

    #[test]
    fn verify_password_rejects_malformed_stored_hash() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn extract_token_prefers_bearer_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Bearer bearer-token"));
        headers.insert("cookie", HeaderValue::from_static("session_token=cookie-token"));
        assert_eq!(extract_token(&headers), Some("bearer-token".to_string()));
    }

    #[test]
    fn extract_token_falls_back_to_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert("cookie", HeaderValue::from_static("other=1; session_token=cookie-token; more=2"));
        assert_eq!(extract_token(&headers), Some("cookie-token".to_string()));
    }

    #[test]
    fn extract_token_missing_is_none() {
        let headers = HeaderMap::new();
        assert_eq!(extract_token(&headers), None);
    }
}

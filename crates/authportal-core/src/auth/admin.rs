//! Admin user management.
//!
//! Every call goes through the authenticated wrapper, so an expired access
//! token is refreshed once before the call fails. Mutations return the
//! re-fetched user list.

use tracing::info;

use crate::api::ApiError;
use crate::models::{Role, User};

use super::manager::SessionManager;

impl SessionManager {
    pub async fn list_users(&self) -> Result<Vec<User>, ApiError> {
        self.authorized(|api, token| async move { api.list_users(&token).await })
            .await
    }

    pub async fn set_user_role(&self, user_id: &str, role: Role) -> Result<Vec<User>, ApiError> {
        self.authorized(|api, token| async move { api.set_user_role(&token, user_id, role).await })
            .await?;
        info!(user_id = %user_id, role = %role, "User role updated");
        self.list_users().await
    }

    /// Delete a user. Callers confirm with the user first.
    pub async fn delete_user(&self, user_id: &str) -> Result<Vec<User>, ApiError> {
        self.authorized(|api, token| async move { api.delete_user(&token, user_id).await })
            .await?;
        info!(user_id = %user_id, "User deleted");
        self.list_users().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::auth::manager::tests::{
        manager_for, store_tokens, stored, tokens_json, user_json, UNREACHABLE_URL,
    };
    use crate::auth::SessionState;
    use crate::models::Role;
    use crate::storage::MemoryStorage;
    use crate::ApiError;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn users_body() -> serde_json::Value {
        serde_json::json!({ "users": [user_json("a1", "admin"), user_json("u2", "user")] })
    }

    #[tokio::test]
    async fn test_list_users_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/users"))
            .and(header("authorization", "Bearer AT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(users_body()))
            .expect(1)
            .mount(&server)
            .await;

        let storage = Arc::new(MemoryStorage::new());
        store_tokens(&storage, "AT", "RT");
        let manager = manager_for(&server.uri(), &storage);

        let users = manager.list_users().await.unwrap();
        assert_eq!(users.len(), 2);
        assert!(users[0].is_admin());
    }

    #[tokio::test]
    async fn test_list_users_without_tokens() {
        let storage = Arc::new(MemoryStorage::new());
        let manager = manager_for(UNREACHABLE_URL, &storage);

        let err = manager.list_users().await.unwrap_err();
        assert!(matches!(err, ApiError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_concurrent_expired_calls_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/users"))
            .and(header("authorization", "Bearer OLD"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(tokens_json("NEW", "RT_NEW"))
                    .set_delay(Duration::from_millis(300)),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/users"))
            .and(header("authorization", "Bearer NEW"))
            .respond_with(ResponseTemplate::new(200).set_body_json(users_body()))
            .expect(2)
            .mount(&server)
            .await;

        let storage = Arc::new(MemoryStorage::new());
        store_tokens(&storage, "OLD", "RT_OLD");
        let manager = manager_for(&server.uri(), &storage);

        let (a, b) = tokio::join!(manager.list_users(), manager.list_users());

        assert_eq!(a.unwrap().len(), 2);
        assert_eq!(b.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_dead_refresh_token_evicts_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/users"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh-token"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let storage = Arc::new(MemoryStorage::new());
        store_tokens(&storage, "OLD", "DEAD");
        let manager = manager_for(&server.uri(), &storage);

        let err = manager.list_users().await.unwrap_err();

        assert!(err.is_token_expired());
        assert_eq!(stored(&storage), (None, None));
        assert_eq!(manager.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_second_401_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/users"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(tokens_json("NEW", "RT_NEW")))
            .expect(1)
            .mount(&server)
            .await;

        let storage = Arc::new(MemoryStorage::new());
        store_tokens(&storage, "OLD", "RT_OLD");
        let manager = manager_for(&server.uri(), &storage);

        assert!(manager.list_users().await.unwrap_err().is_token_expired());
    }

    #[tokio::test]
    async fn test_set_user_role_refetches_list() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/users/u2/role"))
            .and(body_json(serde_json::json!({ "role": "admin" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(users_body()))
            .expect(1)
            .mount(&server)
            .await;

        let storage = Arc::new(MemoryStorage::new());
        store_tokens(&storage, "AT", "RT");
        let manager = manager_for(&server.uri(), &storage);

        let users = manager.set_user_role("u2", Role::Admin).await.unwrap();
        assert_eq!(users.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_user_error_leaves_session_alone() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/users/me"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "user": user_json("a1", "admin") })),
            )
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/users/a1"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({ "message": "Cannot delete yourself" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let storage = Arc::new(MemoryStorage::new());
        store_tokens(&storage, "AT", "RT");
        let manager = manager_for(&server.uri(), &storage);
        manager.bootstrap().await.unwrap();

        let err = manager.delete_user("a1").await.unwrap_err();

        assert_eq!(err.user_message(), "Cannot delete yourself");
        assert!(manager.is_authenticated());
        assert_eq!(stored(&storage), (Some("AT".to_string()), Some("RT".to_string())));
    }

    #[tokio::test]
    async fn test_delete_user_fallback_message() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/users/u2"))
            .respond_with(ResponseTemplate::new(500).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let storage = Arc::new(MemoryStorage::new());
        store_tokens(&storage, "AT", "RT");
        let manager = manager_for(&server.uri(), &storage);

        let err = manager.delete_user("u2").await.unwrap_err();
        assert_eq!(err.user_message(), "Failed to delete user");
    }
}

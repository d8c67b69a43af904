//! Session helpers over the `/auth/*` endpoints.

use tracing::{debug, info, warn};

use crate::{
    ApiClient, Error, Method, MultipartBody, RequestOptions,
    types::{
        AvatarUpload, ChangePasswordInput, LoginInput, LoginResponse, ProfileUpdate,
        RefreshResponse, User, UserRole,
    },
};

const LOGIN_PATH: &str = "/auth/login";
const LOGOUT_PATH: &str = "/auth/logout";
const ME_PATH: &str = "/auth/me";
const PROFILE_PATH: &str = "/auth/profile";
const CHANGE_PASSWORD_PATH: &str = "/auth/change-password";
const AVATAR_PATH: &str = "/users/me/avatar";

/// The admin panel is reserved for instructors.
pub fn is_admin_panel_role(role: UserRole) -> bool {
    role == UserRole::Instructor
}

/// Drives the client's token lifecycle from login to logout.
#[derive(Clone)]
pub struct AuthSession {
    client: ApiClient,
}

impl AuthSession {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Logs in and installs the returned token. Any failure leaves the client without a token.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, Error> {
        let result = self.try_login(email, password).await;
        if result.is_err() {
            self.client.clear_access_token();
        }
        result
    }

    async fn try_login(&self, email: &str, password: &str) -> Result<User, Error> {
        let resp: LoginResponse = self
            .client
            .post(
                LOGIN_PATH,
                &LoginInput { email, password },
                RequestOptions::default(),
            )
            .await?;
        let (token, user) = match (resp.access_token, resp.user) {
            (Some(token), Some(user)) if !token.is_empty() => (token, user),
            _ => {
                return Err(Error::Auth(
                    "login failed: invalid response structure".into(),
                ));
            }
        };
        ensure_admin_panel_role(&user)?;

        self.client.set_access_token(token);
        self.client.reset_refresh_state();
        info!("login ok: user='{}' role={:?}", user.id, user.role);
        Ok(user)
    }

    /// Re-establishes a session from the refresh cookie, e.g. at startup.
    ///
    /// Returns `Ok(None)` when the backend issued no token. A failed refresh call
    /// marks refresh as failed so later 401s are not retried.
    pub async fn restore(&self) -> Result<Option<User>, Error> {
        let refreshed: Option<RefreshResponse> = match self
            .client
            .post(
                self.client.refresh_path(),
                &serde_json::json!({}),
                RequestOptions::default(),
            )
            .await
        {
            Ok(refreshed) => refreshed,
            Err(err) => {
                warn!("session restore failed: {}", err);
                self.client.mark_refresh_failed();
                return Err(err);
            }
        };
        let Some(token) = refreshed
            .map(|r| r.access_token)
            .filter(|t| !t.is_empty())
        else {
            return Ok(None);
        };

        self.client.set_access_token(token);
        self.client.reset_refresh_state();
        match self.me().await.and_then(|user| {
            ensure_admin_panel_role(&user)?;
            Ok(user)
        }) {
            Ok(user) => {
                info!("session restored: user='{}'", user.id);
                Ok(Some(user))
            }
            Err(err) => {
                self.client.clear_access_token();
                Err(err)
            }
        }
    }

    /// Tells the backend to end the session, then always drops the local token.
    pub async fn logout(&self) {
        let result = self
            .client
            .post::<serde_json::Value, _>(
                LOGOUT_PATH,
                &serde_json::json!({}),
                RequestOptions::default(),
            )
            .await;
        if let Err(err) = result {
            warn!("logout request failed: {}", err);
        }
        self.client.clear_access_token();
    }

    pub async fn me(&self) -> Result<User, Error> {
        self.client.get(ME_PATH, RequestOptions::default()).await
    }

    pub async fn update_profile(&self, update: &ProfileUpdate<'_>) -> Result<User, Error> {
        let user: User = self
            .client
            .put(PROFILE_PATH, update, RequestOptions::default())
            .await?;
        debug!("profile updated: user='{}'", user.id);
        Ok(user)
    }

    pub async fn change_password(&self, input: &ChangePasswordInput<'_>) -> Result<(), Error> {
        if input.new_password != input.confirm_password {
            return Err(Error::Auth("passwords don't match".into()));
        }
        let _: Option<serde_json::Value> = self
            .client
            .post(CHANGE_PASSWORD_PATH, input, RequestOptions::default())
            .await?;
        info!("password changed");
        Ok(())
    }

    /// Uploads a new avatar image and returns the URL the backend stored it under.
    pub async fn upload_avatar(
        &self,
        file_name: &str,
        mime: Option<&str>,
        bytes: impl Into<bytes::Bytes>,
    ) -> Result<String, Error> {
        let form = MultipartBody::new().file("file", file_name, mime, bytes);
        let uploaded: AvatarUpload = self
            .client
            .send(
                Method::POST,
                AVATAR_PATH,
                form.into(),
                RequestOptions::new().abort_key("avatar-upload"),
            )
            .await?;
        Ok(uploaded.url)
    }
}

fn ensure_admin_panel_role(user: &User) -> Result<(), Error> {
    if is_admin_panel_role(user.role) {
        Ok(())
    } else {
        warn!("role {:?} is not allowed in the admin panel", user.role);
        Err(Error::Forbidden(
            "this panel requires the INSTRUCTOR role".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_instructors_reach_the_panel() {
        assert!(is_admin_panel_role(UserRole::Instructor));
        assert!(!is_admin_panel_role(UserRole::Admin));
        assert!(!is_admin_panel_role(UserRole::Student));
    }
}

use std::fmt;

use tracing::debug;

use super::locators::{
    LOGIN_ERROR, LOGIN_PATH, PASSWORD_HINT, PASSWORD_INPUT, SUBMIT_BUTTON, USERNAME_HINT,
    USERNAME_INPUT,
};
use super::{click, current_path, fill, press, visible_text, wait_until, wait_visible, MainPage};
use crate::error::E2eResult;
use crate::playwright::PlaywrightContext;

pub const EMPTY_USERNAME_HINT: &str = "Username or email is required";
pub const EMPTY_PASSWORD_HINT: &str = "Password is required";
pub const INVALID_CREDENTIALS_HINT: &str = "Invalid username or password";
/// Fragment of the general error shown for a locked account
pub const ACCOUNT_LOCKED_HINT: &str = "locked";
/// Failed attempts after which the application locks an account
pub const LOCKOUT_THRESHOLD: usize = 5;

/// How the login form is submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMethod {
    Click,
    Enter,
}

impl fmt::Display for SubmitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitMethod::Click => f.write_str("click"),
            SubmitMethod::Enter => f.write_str("enter"),
        }
    }
}

/// The `/login` page
pub struct LoginPage<'a> {
    ctx: &'a PlaywrightContext,
    base_url: &'a str,
}

impl<'a> LoginPage<'a> {
    pub fn new(ctx: &'a PlaywrightContext, base_url: &'a str) -> Self {
        Self { ctx, base_url }
    }

    pub async fn open(&self) -> E2eResult<()> {
        super::navigate(self.ctx, &format!("{}{}", self.base_url, LOGIN_PATH)).await?;
        wait_visible(self.ctx, USERNAME_INPUT).await
    }

    pub async fn fill_credentials(&self, username: &str, password: &str) -> E2eResult<()> {
        fill(self.ctx, USERNAME_INPUT, username).await?;
        fill(self.ctx, PASSWORD_INPUT, password).await
    }

    pub async fn submit(&self, method: SubmitMethod) -> E2eResult<()> {
        match method {
            SubmitMethod::Click => click(self.ctx, SUBMIT_BUTTON).await,
            SubmitMethod::Enter => press(self.ctx, PASSWORD_INPUT, "Enter").await,
        }
    }

    /// Log in and hand over the main page. Whether the login worked is left
    /// to the caller to assert.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        method: SubmitMethod,
    ) -> E2eResult<MainPage<'a>> {
        debug!("Logging in as '{}' ({})", username, method);
        self.fill_credentials(username, password).await?;
        self.submit(method).await?;
        Ok(MainPage::new(self.ctx, self.base_url))
    }

    /// Submit credentials expected to be rejected. Covers incorrect
    /// passwords, unknown users and malformed emails.
    pub async fn attempt(&self, username: &str, password: &str) -> E2eResult<()> {
        self.fill_credentials(username, password).await?;
        self.submit(SubmitMethod::Click).await
    }

    pub async fn attempt_with_empty_username(&self, password: &str) -> E2eResult<()> {
        self.attempt("", password).await
    }

    pub async fn attempt_with_empty_password(&self, username: &str) -> E2eResult<()> {
        self.attempt(username, "").await
    }

    pub async fn attempt_with_empty_fields(&self) -> E2eResult<()> {
        self.attempt("", "").await
    }

    /// Submit an injection payload and wait for the general error
    pub async fn attempt_injection(&self, username: &str, password: &str) -> E2eResult<()> {
        self.attempt(username, password).await?;
        wait_visible(self.ctx, LOGIN_ERROR).await
    }

    /// Fail `attempts` logins in a row for `username`
    pub async fn fail_repeatedly(&self, username: &str, attempts: usize) -> E2eResult<()> {
        for attempt in 1..=attempts {
            debug!("Failed login {}/{} for '{}'", attempt, attempts, username);
            self.attempt(username, "definitely-not-the-password").await?;
            wait_visible(self.ctx, LOGIN_ERROR).await?;
        }
        Ok(())
    }

    pub async fn username_hint(&self) -> E2eResult<String> {
        visible_text(self.ctx, USERNAME_HINT).await
    }

    pub async fn password_hint(&self) -> E2eResult<String> {
        visible_text(self.ctx, PASSWORD_HINT).await
    }

    /// General error under the form (invalid credentials, locked account)
    pub async fn error_message(&self) -> E2eResult<String> {
        visible_text(self.ctx, LOGIN_ERROR).await
    }

    /// Wait until the general error mentions `fragment`, case-insensitively
    pub async fn wait_for_error_containing(&self, fragment: &str) -> E2eResult<String> {
        let needle = fragment.to_lowercase();
        let needle = needle.as_str();
        wait_until(
            &format!("{LOGIN_ERROR} containing '{fragment}'"),
            self.ctx.action_timeout(),
            move || async move {
                Ok(self.error_message().await?.to_lowercase().contains(needle))
            },
        )
        .await?;
        self.error_message().await
    }

    pub async fn is_current(&self) -> E2eResult<bool> {
        Ok(current_path(self.ctx).await?.contains(LOGIN_PATH))
    }
}

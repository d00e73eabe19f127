//! Test account fixtures: registration and deletion through the HTTP API,
//! lock reset through the database client

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::DbSettings;
use crate::error::{E2eError, E2eResult};

const REGISTER_PATH: &str = "/api/auth/register";
const DELETE_PATH: &str = "/api/auth/delete";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DB_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the mysql client is looked for before `PATH`
const MYSQL_CANDIDATES: &[&str] = &[
    "/usr/bin/mysql",
    "/usr/local/bin/mysql",
    "/opt/homebrew/bin/mysql",
    "/snap/bin/mysql",
];

#[derive(Debug, Clone, Serialize)]
pub struct TestUser {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl TestUser {
    /// Fresh user named after the current time in milliseconds
    pub fn unique() -> Self {
        let username = format!("testlockuser{}", Utc::now().timestamp_millis());
        Self {
            email: format!("{username}@test.com"),
            username,
            password: "testpass123".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created,
    AlreadyTaken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    Deleted,
    NotFound,
}

#[derive(Serialize)]
struct DeleteRequest<'a> {
    username: &'a str,
}

/// Client for the account endpoints of the application
pub struct AccountsApi {
    client: reqwest::Client,
    base_url: String,
}

impl AccountsApi {
    pub fn new(base_url: &str) -> E2eResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn register(&self, user: &TestUser) -> E2eResult<Registration> {
        let endpoint = format!("{}{}", self.base_url, REGISTER_PATH);
        let response = self.client.post(&endpoint).json(user).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        match status {
            201 => {
                info!("Registered test user '{}'", user.username);
                Ok(Registration::Created)
            }
            400 if body.contains("already taken") => {
                warn!("Username '{}' is already taken", user.username);
                Ok(Registration::AlreadyTaken)
            }
            _ => Err(E2eError::Api {
                endpoint,
                status,
                body,
            }),
        }
    }

    /// Register a [`TestUser::unique`] user
    pub async fn register_unique(&self) -> E2eResult<TestUser> {
        let user = TestUser::unique();
        match self.register(&user).await? {
            Registration::Created => Ok(user),
            Registration::AlreadyTaken => Err(E2eError::Api {
                endpoint: format!("{}{}", self.base_url, REGISTER_PATH),
                status: 400,
                body: format!("username '{}' already taken", user.username),
            }),
        }
    }

    pub async fn delete(&self, username: &str) -> E2eResult<Deletion> {
        let endpoint = format!("{}{}", self.base_url, DELETE_PATH);
        let response = self
            .client
            .delete(&endpoint)
            .json(&DeleteRequest { username })
            .send()
            .await?;
        let status = response.status().as_u16();

        match status {
            200 | 204 => {
                info!("Deleted test user '{}'", username);
                Ok(Deletion::Deleted)
            }
            404 => {
                info!("Test user '{}' was already gone", username);
                Ok(Deletion::NotFound)
            }
            _ => Err(E2eError::Api {
                endpoint,
                status,
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

/// Direct database access for resetting account locks
pub struct DbAdmin {
    settings: DbSettings,
    client: Option<PathBuf>,
}

impl DbAdmin {
    pub fn new(settings: DbSettings) -> Self {
        let client = locate_mysql(MYSQL_CANDIDATES, std::env::var_os("PATH"));
        Self { settings, client }
    }

    pub fn client(&self) -> Option<&Path> {
        self.client.as_deref()
    }

    /// Clear the lock state of `username`. Returns whether it worked;
    /// failures are only logged.
    pub async fn unlock_user(&self, username: &str) -> bool {
        let Some(mysql) = &self.client else {
            warn!("mysql client not found, not unlocking '{}'", username);
            return false;
        };

        let mut cmd = Command::new(mysql);
        cmd.arg("-u")
            .arg(&self.settings.user)
            .arg(&self.settings.name)
            .arg("-e")
            .arg(unlock_statement(username))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if !self.settings.password.is_empty() {
            cmd.env("MYSQL_PWD", &self.settings.password);
        }

        match tokio::time::timeout(DB_COMMAND_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                info!("Unlocked user '{}'", username);
                true
            }
            Ok(Ok(output)) => {
                warn!(
                    "Unlocking '{}' failed ({}): {}",
                    username,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                false
            }
            Ok(Err(e)) => {
                warn!("Failed to run {}: {}", mysql.display(), e);
                false
            }
            Err(_) => {
                warn!("Unlocking '{}' timed out", username);
                false
            }
        }
    }
}

fn unlock_statement(username: &str) -> String {
    format!(
        "UPDATE users SET account_locked = FALSE, failed_login_attempts = 0, \
         lock_expiration_time = NULL WHERE username = '{}';",
        username.replace('\\', "\\\\").replace('\'', "''")
    )
}

/// First executable `mysql` among `candidates`, then the entries of `path_var`
fn locate_mysql(candidates: &[&str], path_var: Option<OsString>) -> Option<PathBuf> {
    let fixed = candidates.iter().map(PathBuf::from);
    let searched = path_var
        .map(|p| std::env::split_paths(&p).map(|dir| dir.join("mysql")).collect::<Vec<_>>())
        .unwrap_or_default();

    fixed.chain(searched).find(|p| is_executable(p))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_unique_user_shape() {
        let user = TestUser::unique();
        assert!(user.username.starts_with("testlockuser"));
        assert!(user.username["testlockuser".len()..]
            .chars()
            .all(|c| c.is_ascii_digit()));
        assert_eq!(user.email, format!("{}@test.com", user.username));
    }

    #[test]
    fn test_unlock_statement_escapes_quotes() {
        let sql = unlock_statement("o'brien");
        assert!(sql.contains("username = 'o''brien'"));
        assert!(sql.contains("failed_login_attempts = 0"));
        assert!(sql.contains("lock_expiration_time = NULL"));
    }

    #[test]
    fn test_locate_mysql_prefers_candidates_then_path() {
        let fixed = tempfile::tempdir().unwrap();
        let on_path = tempfile::tempdir().unwrap();

        let path_bin = on_path.path().join("mysql");
        std::fs::write(&path_bin, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path_bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let fixed_bin = fixed.path().join("mysql");
        let fixed_str = fixed_bin.to_string_lossy().to_string();
        let path_var = Some(OsString::from(on_path.path()));

        // Candidate missing: fall back to PATH
        assert_eq!(
            locate_mysql(&[fixed_str.as_str()], path_var.clone()),
            Some(path_bin.clone())
        );

        // Not executable: skipped
        std::fs::write(&fixed_bin, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&fixed_bin, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert_eq!(
            locate_mysql(&[fixed_str.as_str()], path_var.clone()),
            Some(path_bin)
        );

        std::fs::set_permissions(&fixed_bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(
            locate_mysql(&[fixed_str.as_str()], path_var),
            Some(fixed_bin)
        );

        assert_eq!(locate_mysql(&[], None), None);
    }
}

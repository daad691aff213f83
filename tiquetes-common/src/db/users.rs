//! User accounts
//!
//! Passwords are stored as `sha256(salt || password)` in hex with a random
//! 32-character salt per user.

use crate::db::models::User;
use crate::time::utc_timestamp_str;
use crate::{Error, Result};
use rand::{distributions::Alphanumeric, Rng};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::info;

const USER_COLUMNS: &str =
    "id, username, email, password_hash, password_salt, is_active, is_admin, created_at";

/// Random alphanumeric salt
pub fn generate_salt() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Hex SHA-256 of salt followed by password
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl User {
    pub fn verify_password(&self, password: &str) -> bool {
        hash_password(password, &self.password_salt) == self.password_hash
    }
}

/// Create an account
///
/// The first account becomes an active administrator; later accounts start
/// inactive until an administrator activates them. Duplicate username or
/// email yields `Duplicate`.
pub async fn create_user(pool: &SqlitePool, username: &str, email: &str, password: &str) -> Result<User> {
    let mut tx = pool.begin().await?;

    let duplicate: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM users WHERE username = ? OR email = ?)",
    )
    .bind(username)
    .bind(email)
    .fetch_one(&mut *tx)
    .await?;
    if duplicate {
        return Err(Error::Duplicate("Username or email already registered".to_string()));
    }

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&mut *tx)
        .await?;
    let first = existing == 0;

    let salt = generate_salt();
    let hash = hash_password(password, &salt);

    let id = sqlx::query(
        "INSERT INTO users (username, email, password_hash, password_salt, is_active, is_admin, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(username)
    .bind(email)
    .bind(&hash)
    .bind(&salt)
    .bind(first)
    .bind(first)
    .bind(utc_timestamp_str())
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    let user = sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    info!(username, admin = first, "Created user account");
    Ok(user)
}

pub async fn get_user_by_username(pool: &SqlitePool, username: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE username = ?", USER_COLUMNS))
        .bind(username)
        .fetch_optional(pool)
        .await?;

    Ok(user)
}

/// Mark an account active; `NotFound` if the id is unknown
pub async fn activate_user(pool: &SqlitePool, id: i64) -> Result<()> {
    let result = sqlx::query("UPDATE users SET is_active = 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("User {}", id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_depends_on_salt() {
        let a = hash_password("secreto", "salt-a");
        let b = hash_password("secreto", "salt-b");
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(a, hash_password("secreto", "salt-a"));
    }

    #[test]
    fn test_salt_is_random_alphanumeric() {
        let s1 = generate_salt();
        let s2 = generate_salt();
        assert_eq!(s1.len(), 32);
        assert!(s1.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(s1, s2);
    }
}

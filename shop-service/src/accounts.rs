//! Account helpers shared by the auth and user endpoints.

use tracing::info;

use crate::config::AdminAccount;
use crate::error::{AppError, AppResult};
use crate::models::{NewUser, UserChanges};
use crate::repository::ShopStore;

/// Hashing runs on the blocking pool.
pub async fn hash_password(password: String) -> AppResult<String> {
    tokio::task::spawn_blocking(move || shared::auth::hash_password(&password))
        .await?
        .map_err(|e| AppError::internal(format!("password hashing failed: {e}")))
}

pub async fn verify_password(password: String, hash: String) -> AppResult<bool> {
    Ok(tokio::task::spawn_blocking(move || shared::auth::verify_password(&password, &hash)).await?)
}

/// Create the configured superuser if no user with that name exists yet,
/// or promote an existing one.
pub async fn ensure_admin(store: &dyn ShopStore, account: AdminAccount) -> AppResult<()> {
    if let Some(existing) = store.get_user_by_username(&account.username).await? {
        if !existing.is_superuser || !existing.is_active {
            let changes = UserChanges {
                is_superuser: Some(true),
                is_active: Some(true),
                updated_at: Some(chrono::Utc::now()),
                ..UserChanges::default()
            };
            store.update_user(existing.id, changes).await?;
            info!(user_id = existing.id, "promoted bootstrap administrator");
        }
        return Ok(());
    }

    let hashed_password = hash_password(account.password).await?;
    let admin = store
        .create_user(NewUser {
            username: account.username,
            email: account.email,
            hashed_password,
            is_active: true,
            is_superuser: true,
        })
        .await?;
    info!(user_id = admin.id, username = %admin.username, "created bootstrap administrator");
    Ok(())
}

use anyhow::{Context, Result};
use sqlx::{MySqlPool, mysql::MySqlPoolOptions};
use tracing::{info, warn};

use crate::{auth::password::hash_password, config::Config, model::role::Role};

pub async fn init_db(config: &Config) -> Result<MySqlPool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    if config.run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;
        info!("Migrations applied");
    }

    if let Some((email, password)) = &config.bootstrap_admin {
        ensure_admin(&pool, email, password).await?;
    }

    Ok(pool)
}

/// Creates the first admin account unless an admin already exists.
async fn ensure_admin(pool: &MySqlPool, email: &str, password: &str) -> Result<()> {
    let admins: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = ?")
        .bind(Role::Admin)
        .fetch_one(pool)
        .await?;
    if admins > 0 {
        return Ok(());
    }

    let hashed = hash_password(password)
        .map_err(|e| anyhow::anyhow!("Failed to hash bootstrap admin password: {e}"))?;

    sqlx::query("INSERT INTO users (name, email, password, role, status) VALUES (?, ?, ?, ?, 'active')")
        .bind("Administrator")
        .bind(email.trim().to_lowercase())
        .bind(hashed)
        .bind(Role::Admin)
        .execute(pool)
        .await
        .context("Failed to create bootstrap admin")?;

    warn!(%email, "No admin found, bootstrap admin created; change its password");
    Ok(())
}

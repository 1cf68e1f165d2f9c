//! Database commands for `lms migrate` and `lms bootstrap`.

use anyhow::{Context, Result};
use lms::auth;
use lms::config::LmsConfig;
use lms::context::Ctx;
use lms::db::LmsDb;
use lms::notifications::Notifier;

fn open(config: &LmsConfig) -> Result<LmsDb> {
    let path = &config.database.path;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    LmsDb::new(path).with_context(|| format!("Failed to open database at {}", path.display()))
}

pub fn cmd_migrate(config: &LmsConfig) -> Result<()> {
    open(config)?;
    println!("Database ready at {}", config.database.path.display());
    Ok(())
}

pub fn cmd_bootstrap(config: &LmsConfig, email: &str, name: &str, password: &str) -> Result<()> {
    let db = open(config)?;
    let notifier = Notifier::new();
    let ctx = Ctx::new(&db, &notifier, config);
    match auth::bootstrap_admin(ctx, email, name, password)? {
        Some(user) => println!("Created admin {} (id {})", user.email, user.id),
        None => println!("Users already exist; nothing to bootstrap."),
    }
    Ok(())
}

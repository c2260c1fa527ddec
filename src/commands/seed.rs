//! Seed command - bootstrap an empty installation.
//!
//! Safe to run repeatedly: existing records are found by name or email and
//! reused, and the sample key is only issued while the admin has no keys.

use std::sync::Arc;

use anyhow::{Context, Result};
use auditor_accounting::KeyRegistry;
use auditor_config::AuditorConfig;
use auditor_core::{
    AuditStore, NewProject, NewTeam, NewUser, Principal, User, VirtualKeyCreate,
};
use clap::Args;
use tracing::{info, warn};

/// Password the admin gets when none is given
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin123";

/// Arguments for the seed command.
#[derive(Args, Debug)]
pub struct SeedArgs {
    /// Admin login email
    #[arg(long, default_value = "admin@local")]
    pub admin_email: String,

    /// Admin password
    #[arg(long, env = "AUDITOR_ADMIN_PASSWORD", default_value = DEFAULT_ADMIN_PASSWORD, hide_env_values = true)]
    pub admin_password: String,

    /// Organization name
    #[arg(long, default_value = "Default Organization")]
    pub organization: String,

    /// Team name
    #[arg(long, default_value = "Engineering")]
    pub team: String,

    /// Project name
    #[arg(long, default_value = "Default Project")]
    pub project: String,

    /// Do not issue a sample virtual key
    #[arg(long)]
    pub skip_sample_key: bool,
}

/// What a seed run created
#[derive(Debug, Default)]
pub struct SeedReport {
    /// Admin user id
    pub admin_id: i64,
    /// Whether the admin was created by this run
    pub admin_created: bool,
    /// Plaintext of the sample key, when one was issued
    pub sample_key: Option<String>,
}

/// Execute the seed command.
pub async fn execute(config: AuditorConfig, args: &SeedArgs) -> Result<()> {
    let store = auditor_storage::open_store(&config.database)
        .await
        .context("Failed to open the store")?;
    let report = seed(store, args).await?;

    if report.admin_created {
        println!("Created admin user {}", args.admin_email);
    } else {
        println!("Admin user {} already exists", args.admin_email);
    }
    if let Some(key) = report.sample_key {
        println!("Sample virtual key (shown once): {key}");
    }
    Ok(())
}

/// Create whatever is missing
pub async fn seed(store: Arc<dyn AuditStore>, args: &SeedArgs) -> Result<SeedReport> {
    let (admin, admin_created) = ensure_admin(store.as_ref(), args).await?;

    let organization = match store.find_organization_by_name(&args.organization).await? {
        Some(organization) => organization,
        None => store.insert_organization(&args.organization).await?,
    };

    let teams = store.list_teams().await?;
    let team = match teams.into_iter().find(|t| t.name == args.team) {
        Some(team) => team,
        None => {
            store
                .insert_team(NewTeam {
                    name: args.team.clone(),
                    organization_id: organization.id,
                })
                .await?
        }
    };

    let projects = store.list_projects().await?;
    let project = match projects.into_iter().find(|p| p.name == args.project) {
        Some(project) => project,
        None => {
            store
                .insert_project(NewProject {
                    name: args.project.clone(),
                    organization_id: organization.id,
                    team_id: Some(team.id),
                })
                .await?
        }
    };

    info!(
        organization_id = organization.id,
        team_id = team.id,
        project_id = project.id,
        "Directory seeded"
    );

    let mut report = SeedReport {
        admin_id: admin.id,
        admin_created,
        sample_key: None,
    };

    if args.skip_sample_key {
        return Ok(report);
    }

    let principal = Principal::from(&admin);
    let registry = KeyRegistry::new(Arc::clone(&store));
    if registry.list(&principal).await?.is_empty() {
        let mut spec = VirtualKeyCreate::new("Sample key")
            .with_user_email(admin.email.clone())
            .with_project(project.id)
            .with_budget_cap(100.0);
        spec.team_id = Some(team.id);
        spec.environment = Some("dev".to_string());

        let key = registry.create(&principal, spec).await?;
        report.sample_key = Some(key.key);
    }

    Ok(report)
}

async fn ensure_admin(store: &dyn AuditStore, args: &SeedArgs) -> Result<(User, bool)> {
    if let Some(user) = store.find_user_by_email(&args.admin_email).await? {
        return Ok((user, false));
    }

    if args.admin_password == DEFAULT_ADMIN_PASSWORD {
        warn!(email = %args.admin_email, "Seeding admin with the default password");
    }

    let user = store
        .insert_user(NewUser {
            email: args.admin_email.clone(),
            password_hash: auditor_server::hash_password(&args.admin_password)?,
            full_name: Some("Administrator".to_string()),
            is_admin: true,
        })
        .await?;
    info!(user_id = user.id, email = %user.email, "Admin user created");
    Ok((user, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditor_server::verify_password;
    use auditor_storage::MemoryStore;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        seed: SeedArgs,
    }

    fn args() -> SeedArgs {
        Harness::parse_from(["seed"]).seed
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let store: Arc<dyn AuditStore> = Arc::new(MemoryStore::new());

        let first = seed(Arc::clone(&store), &args()).await.unwrap();
        assert!(first.admin_created);
        let key = first.sample_key.unwrap();
        assert!(key.starts_with("vk_"));

        let second = seed(Arc::clone(&store), &args()).await.unwrap();
        assert!(!second.admin_created);
        assert_eq!(second.admin_id, first.admin_id);
        assert!(second.sample_key.is_none());

        assert_eq!(store.list_teams().await.unwrap().len(), 1);
        assert_eq!(store.list_projects().await.unwrap().len(), 1);
        assert_eq!(store.list_keys(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_seeded_admin_can_log_in() {
        let store: Arc<dyn AuditStore> = Arc::new(MemoryStore::new());
        seed(Arc::clone(&store), &args()).await.unwrap();

        let admin = store
            .find_user_by_email("admin@local")
            .await
            .unwrap()
            .unwrap();
        assert!(admin.is_admin);
        assert!(verify_password(DEFAULT_ADMIN_PASSWORD, &admin.password_hash));
    }
}

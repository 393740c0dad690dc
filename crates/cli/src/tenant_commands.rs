use {
    anyhow::{Context, Result},
    clap::Subcommand,
    wagate_common::{EventSet, TenantId},
    wagate_config::WagateConfig,
    wagate_tenants::{NewTenant, SqliteTenantStore, TenantStore, TenantSummary},
};

#[derive(Subcommand)]
pub enum TenantAction {
    /// List every tenant.
    List {
        /// Print as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Create a tenant and print its token.
    Add {
        #[arg(long)]
        name: String,
        /// Token to assign; generated when omitted.
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        webhook: Option<String>,
        /// Comma-separated event kinds, or "All".
        #[arg(long, value_delimiter = ',')]
        events: Vec<String>,
        /// Account expiry in unix seconds.
        #[arg(long)]
        expiration: Option<i64>,
    },
    /// Delete a tenant. Its session, if any, ends on the next gateway restart.
    Remove {
        #[arg(long)]
        id: TenantId,
    },
}

pub async fn handle_tenants(action: TenantAction, config: &WagateConfig) -> Result<()> {
    let path = config.storage.database_path();
    let store = SqliteTenantStore::open(&path)
        .await
        .with_context(|| format!("opening tenant database {}", path.display()))?;

    match action {
        TenantAction::List { json } => {
            let tenants = list(&store).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tenants)?);
                return Ok(());
            }
            if tenants.is_empty() {
                println!("No tenants.");
            }
            for t in tenants {
                println!(
                    "  {:>4}  {:<20} {}  connected={} events={}",
                    t.id,
                    t.name,
                    t.token,
                    t.connected,
                    t.events.join(",")
                );
            }
        },
        TenantAction::Add {
            name,
            token,
            webhook,
            events,
            expiration,
        } => {
            let mut tenant = NewTenant::named(name);
            if let Some(token) = token {
                tenant = tenant.with_token(token);
            }
            if let Some(webhook) = webhook {
                tenant = tenant.with_webhook(webhook);
            }
            tenant = tenant.with_events(EventSet::from_tags(&events)?);
            tenant.expiration = expiration;
            let created = add(&store, tenant).await?;
            println!("Created tenant {} ({})", created.id, created.name);
            println!("token: {}", created.token);
        },
        TenantAction::Remove { id } => {
            if remove(&store, id).await? {
                println!("Removed tenant {id}.");
            } else {
                anyhow::bail!("tenant {id} not found");
            }
        },
    }
    Ok(())
}

async fn list(store: &dyn TenantStore) -> Result<Vec<TenantSummary>> {
    Ok(store.list().await?.iter().map(|r| r.summary()).collect())
}

async fn add(store: &dyn TenantStore, tenant: NewTenant) -> Result<TenantSummary> {
    Ok(store.create(tenant).await?.summary())
}

async fn remove(store: &dyn TenantStore, id: TenantId) -> Result<bool> {
    Ok(store.delete(id).await?.is_some())
}

//! Lease auth API server binary.
//!
//! Runs against PostgreSQL by default; `--in-memory` keeps every store in
//! process for local development.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use lease_api::config::ApiConfig;
use lease_core::auth::notify::LogDispatcher;
use lease_core::auth::password::hash_password;
use lease_core::auth::principals::{InMemoryPrincipalRepository, PrincipalRepository};
use lease_core::auth::queries::{
    PgPrincipalRepository, PgRefreshTokenRegistry, PgResetTicketStore, any_user_with_role,
    create_user, grant_role,
};
use lease_core::auth::registry::{InMemoryRefreshTokenRegistry, RefreshTokenRegistry};
use lease_core::auth::reset::{InMemoryResetTicketStore, ResetTicketStore};
use lease_core::auth::roles::{ADMIN, ADMIN_ROLES};
use lease_core::auth::session::SessionService;
use lease_core::auth::AuthConfig;
use lease_core::models::auth::Principal;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

/// How often expired refresh tokens and reset tickets are swept.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "lease_api_server", about = "Lease auth API server")]
struct Args {
    /// Port to listen on. Overrides the port in `BIND_ADDR`.
    #[arg(long)]
    port: Option<u16>,

    /// PostgreSQL connection URL.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// Keep users, refresh tokens and reset tickets in memory (no database).
    #[arg(long, default_value_t = false)]
    in_memory: bool,

    /// Email of an admin account to create when no admin exists yet.
    #[arg(long, env = "BOOTSTRAP_ADMIN_EMAIL")]
    bootstrap_admin_email: Option<String>,

    /// Password for the bootstrap admin.
    #[arg(long, env = "BOOTSTRAP_ADMIN_PASSWORD", hide_env_values = true)]
    bootstrap_admin_password: Option<String>,
}

impl Args {
    fn bootstrap_admin(&self) -> Option<(&str, &str)> {
        match (&self.bootstrap_admin_email, &self.bootstrap_admin_password) {
            (Some(email), Some(password)) => Some((email.as_str(), password.as_str())),
            (Some(_), None) | (None, Some(_)) => {
                warn!("bootstrap admin needs both an email and a password, skipping");
                None
            }
            (None, None) => None,
        }
    }
}

struct Stores {
    principals: Arc<dyn PrincipalRepository>,
    registry: Arc<dyn RefreshTokenRegistry>,
    tickets: Arc<dyn ResetTicketStore>,
}

fn in_memory_stores(args: &Args, config: &AuthConfig) -> Result<Stores, Box<dyn std::error::Error>> {
    let principals = Arc::new(InMemoryPrincipalRepository::new());
    if let Some((email, password)) = args.bootstrap_admin() {
        principals.insert(Principal {
            id: lease_core::uuid::uuidv7().to_string(),
            email: email.to_string(),
            name: None,
            roles: vec![ADMIN.to_string()],
            is_active: true,
            password_hash: Some(hash_password(password, config.bcrypt_cost)?),
        });
        info!(%email, "created in-memory bootstrap admin");
    }

    let registry = Arc::new(InMemoryRefreshTokenRegistry::new());
    registry.spawn_cleanup_task(CLEANUP_INTERVAL);

    let tickets = Arc::new(InMemoryResetTicketStore::new());
    tickets.spawn_cleanup_task(CLEANUP_INTERVAL);

    Ok(Stores {
        principals,
        registry,
        tickets,
    })
}

async fn postgres_stores(
    args: &Args,
    database_url: &str,
    config: &AuthConfig,
) -> Result<Stores, Box<dyn std::error::Error>> {
    info!(max_connections = args.max_connections, "configuring connection pool");
    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await?;

    info!("running database migrations");
    lease_core::migrate::migrate(&pool).await?;

    if let Some((email, password)) = args.bootstrap_admin()
        && !any_user_with_role(&pool, ADMIN_ROLES).await?
    {
        let hash = hash_password(password, config.bcrypt_cost)?;
        let user_id = create_user(&pool, email, None, &hash).await?;
        grant_role(&pool, &user_id, ADMIN).await?;
        info!(%email, %user_id, "created bootstrap admin");
    }

    let registry = Arc::new(PgRefreshTokenRegistry::new(pool.clone()));
    tokio::spawn({
        let registry = registry.clone();
        async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                match registry.purge_expired().await {
                    Ok(n) if n > 0 => info!(evicted = n, "purged expired refresh tokens"),
                    Ok(_) => {}
                    Err(e) => warn!("refresh token cleanup failed: {e}"),
                }
            }
        }
    });

    Ok(Stores {
        principals: Arc::new(PgPrincipalRepository::new(pool.clone())),
        registry,
        tickets: Arc::new(PgResetTicketStore::new(pool)),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,lease_api=debug,lease_core=debug".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = ApiConfig::from_env();
    if let Some(url) = &args.database_url {
        config.pg_connection_url = url.clone();
    }
    if let Some(port) = args.port {
        let host = config
            .bind_addr
            .rsplit_once(':')
            .map_or("127.0.0.1", |(host, _)| host);
        config.bind_addr = format!("{host}:{port}");
    }

    let auth_config = AuthConfig {
        reset_link_base_url: config.reset_link_base_url.clone(),
        ..AuthConfig::default()
    };

    let stores = if args.in_memory {
        info!("using in-memory stores");
        in_memory_stores(&args, &auth_config)?
    } else {
        info!(database_url = %config.pg_connection_url, "using PostgreSQL stores");
        postgres_stores(&args, &config.pg_connection_url, &auth_config).await?
    };

    let sessions = SessionService::new(
        config.jwt_secret.as_bytes(),
        auth_config,
        stores.principals,
        stores.registry,
        stores.tickets,
        Arc::new(LogDispatcher),
    );

    let state = lease_api::AppState {
        sessions: Arc::new(sessions),
        config: config.clone(),
    };
    let app = lease_api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "REST API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
            }
        })
        .await?;

    Ok(())
}

use postgresql_embedded::PostgreSQL;
use tracing::info;

use super::super::SHARED_RUNTIME;
use crate::config::Config;
use crate::connection::Connection;
use crate::types::DriverKind;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A running embedded `PostgreSQL` server and settings that reach it.
pub struct EmbeddedPostgres {
    pub postgresql: PostgreSQL,
    pub port: u16,
    /// Settings for the test database, with the server's host, port and
    /// credentials filled in.
    pub config: Config,
}

impl std::fmt::Debug for EmbeddedPostgres {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedPostgres")
            .field("port", &self.port)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Start an embedded server and create `database` on it.
///
/// When `cfg` names a user other than the server's own, that user is created
/// as a superuser with `cfg`'s password.
///
/// # Errors
/// Returns an error if the server cannot be set up or started, if provisioning
/// the database or user fails, or if the post-start connectivity check fails.
pub fn setup_postgres_embedded(cfg: &Config) -> Result<EmbeddedPostgres, BoxError> {
    let runtime = SHARED_RUNTIME.as_ref().map_err(|e| e.clone())?;
    runtime.block_on(async {
        if cfg.driver != DriverKind::Postgres {
            return Err(format!("embedded server needs a postgres config, got {}", cfg.driver).into());
        }
        let mut postgresql = PostgreSQL::default();
        postgresql.setup().await?;
        postgresql.start().await?;

        let settings = postgresql.settings();
        let port = settings.port;
        let host = settings.host.clone();
        let server_user = settings.username.clone();
        let server_password = settings.password.clone();

        postgresql.create_database(&cfg.database).await?;

        let admin = Config::builder(DriverKind::Postgres)
            .host(host.clone())
            .port(port)
            .user(server_user.clone())
            .password(server_password.clone())
            .database("postgres")
            .max_connections(1)
            .build()?;

        let (user, password) = match (&cfg.user, &cfg.password) {
            (Some(user), Some(password)) if *user != server_user => {
                let conn = Connection::connect(&admin).await?;
                let quoted = conn.formatter().quote_identifier(user)?;
                let literal = conn.formatter().quote_string_literal(password);
                conn.batch_execute(&format!(
                    "CREATE USER {quoted} WITH PASSWORD {literal} CREATEDB SUPERUSER"
                ))
                .await?;
                conn.close().await?;
                info!(user = %user, "created embedded postgres user");
                (user.clone(), password.clone())
            }
            _ => (server_user, server_password),
        };

        let mut config = cfg.clone();
        config.host = Some(host);
        config.port = Some(port);
        config.user = Some(user);
        config.password = Some(password);

        let check = Connection::connect(&config).await?;
        check.query_value::<i64>("SELECT 1", &[]).await?;
        check.close().await?;
        info!(port, "embedded postgres ready");

        Ok::<_, BoxError>(EmbeddedPostgres {
            postgresql,
            port,
            config,
        })
    })
}

/// Stop a server started by [`setup_postgres_embedded`].
pub fn stop_postgres_embedded(postgres: EmbeddedPostgres) {
    let EmbeddedPostgres { postgresql, .. } = postgres;
    if let Ok(runtime) = SHARED_RUNTIME.as_ref() {
        runtime.block_on(async move {
            let _ = postgresql.stop().await;
        });
    }
}

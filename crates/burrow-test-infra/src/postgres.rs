use crate::Result;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use testcontainers::{ContainerAsync, GenericImage};
use typed_builder::TypedBuilder;

const POSTGRES_PORT: u16 = 5432;

#[derive(TypedBuilder)]
pub struct PostgresConfig {
    #[builder(default = "burrow".to_string())]
    database: String,
    #[builder(default = "burrow".to_string())]
    username: String,
    #[builder(default = "burrow".to_string())]
    password: String,
    #[builder(default = "17-alpine".to_string())]
    tag: String,
}

/// Test fixture for a disposable PostgreSQL server.
pub struct PostgresServer {
    container: ContainerAsync<GenericImage>,
    config: PostgresConfig,
}

impl PostgresServer {
    /// Starts a PostgreSQL container suitable for integration tests.
    pub async fn new(config: PostgresConfig) -> Result<Self> {
        // the entrypoint restarts the server once after init; callers retry their first connect
        let container = GenericImage::new("postgres", config.tag.as_str())
            .with_exposed_port(POSTGRES_PORT.tcp())
            .with_wait_for(WaitFor::message_on_stderr(
                "database system is ready to accept connections",
            ))
            .with_env_var("POSTGRES_DB", config.database.as_str())
            .with_env_var("POSTGRES_USER", config.username.as_str())
            .with_env_var("POSTGRES_PASSWORD", config.password.as_str())
            .start()
            .await?;

        Ok(Self { container, config })
    }

    pub async fn host(&self) -> Result<String> {
        Ok(self.container.get_host().await?.to_string())
    }

    pub async fn port(&self) -> Result<u16> {
        Ok(self.container.get_host_port_ipv4(POSTGRES_PORT).await?)
    }

    pub async fn database_url(&self) -> Result<String> {
        let host = self.host().await?;
        let port = self.port().await?;
        Ok(format!(
            "postgres://{}:{}@{}:{}/{}",
            self.config.username, self.config.password, host, port, self.config.database
        ))
    }
}

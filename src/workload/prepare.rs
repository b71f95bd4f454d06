//! Database preparation step
//!
//! Keycloak does not create its own database. When the cluster talks to a
//! shared database server, a short-lived container runs first and issues a
//! conditional `CREATE DATABASE`; the Keycloak container waits for it to
//! complete.

use tracing::debug;

use super::{
    ContainerDefinition, ContainerDependencyCondition, DatabaseVendor, KeycloakContainer,
    LogConfiguration, TaskDefinition,
};
use crate::provider::SecretRef;
use crate::{Error, Result};

const MYSQL_CONTAINER_NAME: &str = "ensure-mysql-database";
const POSTGRES_CONTAINER_NAME: &str = "ensure-postgresql-database";

const MYSQL_CREATE_DATABASE: &str = r#"mysql -u"$DB_USER" -p"$DB_PASSWORD" -h"$DB_ADDR" -P"$DB_PORT" -e "CREATE DATABASE IF NOT EXISTS \`$DB_NAME\`""#;
const POSTGRES_CREATE_DATABASE: &str = r#"echo "SELECT 'CREATE DATABASE \"$DB_NAME\"' WHERE NOT EXISTS (SELECT FROM pg_database WHERE datname = '$DB_NAME')\gexec" | psql"#;

/// SQL dialect of the preparation step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Dialect {
    Mysql,
    Postgres,
}

/// Non-essential container that creates the Keycloak database if missing
#[derive(Clone, Debug, PartialEq)]
pub struct EnsureDatabase {
    dialect: Dialect,
    database_name: String,
    credentials: SecretRef,
}

impl EnsureDatabase {
    /// The preparation step a Keycloak container needs, if any
    ///
    /// h2 keeps its data in memory and needs none. MySQL and MariaDB share
    /// the `mysql` client.
    pub fn for_container(keycloak: &KeycloakContainer) -> Result<Option<Self>> {
        let Some(credentials) = keycloak.credentials() else {
            return Ok(None);
        };
        let dialect = match keycloak.vendor() {
            DatabaseVendor::H2 => return Ok(None),
            DatabaseVendor::Mysql | DatabaseVendor::Mariadb => Dialect::Mysql,
            DatabaseVendor::Postgres => Dialect::Postgres,
            other => {
                return Err(Error::unsupported(format!(
                    "no database preparation step for the {other} database vendor"
                )))
            }
        };
        Ok(Some(Self {
            dialect,
            database_name: keycloak.database_name().to_string(),
            credentials: credentials.clone(),
        }))
    }

    /// Name of the preparation container
    pub fn container_name(&self) -> &str {
        match self.dialect {
            Dialect::Mysql => MYSQL_CONTAINER_NAME,
            Dialect::Postgres => POSTGRES_CONTAINER_NAME,
        }
    }

    /// Build the preparation container definition
    pub fn container_definition(&self, logging: &LogConfiguration) -> ContainerDefinition {
        let mut container = match self.dialect {
            Dialect::Mysql => ContainerDefinition::new(MYSQL_CONTAINER_NAME, "mysql")
                .with_env("DB_NAME", self.database_name.as_str())
                .with_env("JDBC_PARAMS", "useSSL=false")
                .with_secret("DB_ADDR", &self.credentials, "host")
                .with_secret("DB_PORT", &self.credentials, "port")
                .with_secret("DB_USER", &self.credentials, "username")
                .with_secret("DB_PASSWORD", &self.credentials, "password"),
            Dialect::Postgres => {
                let mut container = ContainerDefinition::new(POSTGRES_CONTAINER_NAME, "postgres")
                    .with_env("DB_NAME", self.database_name.as_str())
                    .with_secret("PGHOST", &self.credentials, "host")
                    .with_secret("PGPORT", &self.credentials, "port")
                    .with_secret("PGUSER", &self.credentials, "username")
                    .with_secret("PGPASSWORD", &self.credentials, "password");
                // Keycloak's hard limit already spans the whole task
                container.memory_reservation = Some(32);
                container
            }
        };
        let script = match self.dialect {
            Dialect::Mysql => MYSQL_CREATE_DATABASE,
            Dialect::Postgres => POSTGRES_CREATE_DATABASE,
        };
        container.command = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        container.essential = false;
        container.log_configuration = Some(logging.clone());
        container
    }

    /// Add the preparation container to `task` and make the default
    /// container wait for it to complete
    pub fn extend(&self, task: &mut TaskDefinition, logging: &LogConfiguration) -> Result<()> {
        let default_container = task
            .default_container()
            .map(|c| c.name.clone())
            .ok_or_else(|| {
                Error::missing_dependency(format!(
                    "task definition '{}' has no default container to prepare for",
                    task.id()
                ))
            })?;

        task.add_container(self.container_definition(logging))?;
        task.add_container_dependency(
            &default_container,
            self.container_name(),
            ContainerDependencyCondition::Complete,
        )?;
        debug!(
            task = %task.id(),
            container = %self.container_name(),
            database = %self.database_name,
            "added database preparation step"
        );
        Ok(())
    }
}

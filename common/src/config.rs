use std::env;
use std::fmt::{Display, Formatter};

#[derive(clap::Args, Debug, Clone)]
#[command(next_help_heading = "Database")]
#[group(id = "database")]
pub struct Database {
    /// A full database URL, taking precedence over the individual connection options
    #[arg(id = "db-url", long, env = "OPENLCS_DB_URL")]
    pub url: Option<String>,
    #[arg(id = "db-user", long, env = "OPENLCS_DB_USER", default_value = "openlcs")]
    pub username: String,
    #[arg(
        id = "db-password",
        long,
        env = "OPENLCS_DB_PASSWORD",
        default_value = "openlcs"
    )]
    pub password: String,
    #[arg(id = "db-host", long, env = "OPENLCS_DB_HOST", default_value = "localhost")]
    pub host: String,
    #[arg(id = "db-port", long, env = "OPENLCS_DB_PORT", default_value_t = 5432)]
    pub port: u16,
    #[arg(id = "db-name", long, env = "OPENLCS_DB_NAME", default_value = "openlcs")]
    pub name: String,
    #[arg(id = "db-max-conn", long, env = "OPENLCS_DB_MAX_CONN", default_value_t = 25)]
    pub max_conn: u32,
    #[arg(id = "db-min-conn", long, env = "OPENLCS_DB_MIN_CONN", default_value_t = 1)]
    pub min_conn: u32,
    /// Timeout (in seconds) for establishing a connection
    #[arg(
        id = "db-connect-timeout",
        long,
        env = "OPENLCS_DB_CONNECT_TIMEOUT",
        default_value_t = 8
    )]
    pub connect_timeout: u64,
    /// Timeout (in seconds) for acquiring a connection from the pool
    #[arg(
        id = "db-acquire-timeout",
        long,
        env = "OPENLCS_DB_ACQUIRE_TIMEOUT",
        default_value_t = 30
    )]
    pub acquire_timeout: u64,
}

impl Database {
    /// Build the configuration from `OPENLCS_DB_*` environment variables, falling back to
    /// the defaults.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        fn var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, anyhow::Error>
        where
            T::Err: Display,
        {
            match env::var(name) {
                Ok(value) => value
                    .parse()
                    .map_err(|err| anyhow::anyhow!("invalid value for {name}: {err}")),
                Err(_) => Ok(default),
            }
        }

        Ok(Self {
            url: env::var("OPENLCS_DB_URL").ok(),
            username: var("OPENLCS_DB_USER", "openlcs".to_string())?,
            password: var("OPENLCS_DB_PASSWORD", "openlcs".to_string())?,
            host: var("OPENLCS_DB_HOST", "localhost".to_string())?,
            port: var("OPENLCS_DB_PORT", 5432)?,
            name: var("OPENLCS_DB_NAME", "openlcs".to_string())?,
            max_conn: var("OPENLCS_DB_MAX_CONN", 25)?,
            min_conn: var("OPENLCS_DB_MIN_CONN", 1)?,
            connect_timeout: var("OPENLCS_DB_CONNECT_TIMEOUT", 8)?,
            acquire_timeout: var("OPENLCS_DB_ACQUIRE_TIMEOUT", 30)?,
        })
    }

    /// A configuration pointing to an SQLite file, mostly useful for testing
    pub fn sqlite(path: impl Display) -> Self {
        Self {
            url: Some(format!("sqlite://{path}?mode=rwc")),
            username: Default::default(),
            password: Default::default(),
            host: Default::default(),
            port: 0,
            name: "openlcs".into(),
            max_conn: 5,
            min_conn: 1,
            connect_timeout: 8,
            acquire_timeout: 30,
        }
    }

    pub fn to_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.username, self.password, self.host, self.port, self.name
            ),
        }
    }
}

impl Display for Database {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.url {
            Some(_) => write!(f, "<url>"),
            None => write!(f, "{}@{}:{}/{}", self.username, self.host, self.port, self.name),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn url_from_parts() {
        let mut config = Database::sqlite("/tmp/db");
        config.url = None;
        config.username = "user".into();
        config.password = "pass".into();
        config.host = "db".into();
        config.port = 5432;

        assert_eq!(config.to_url(), "postgres://user:pass@db:5432/openlcs");
    }

    #[test]
    fn url_takes_precedence() {
        let config = Database::sqlite("/tmp/db");
        assert_eq!(config.to_url(), "sqlite:///tmp/db?mode=rwc");
    }
}

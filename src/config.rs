use std::{
    env::{self, VarError},
    fmt::Display,
    str::FromStr,
};

use rearch::{CData, CapsuleHandle, Container};
use sea_orm::{ConnectOptions, Database, DbConn};
use tracing::{info, instrument, warn};

use crate::short_code;

/// # Errors
/// Will return [`Err`] if the connection to the database fails.
#[instrument]
pub async fn init_container() -> anyhow::Result<Container> {
    info!("Initializing container");
    let container = Container::new();

    let (db_connection_options, set_db_conn) =
        container.read((db_connection_options_capsule, db_conn_init_action));

    info!(?db_connection_options, "Connecting to database");
    set_db_conn(Database::connect(db_connection_options).await?);

    info!("Container initialized");
    Ok(container)
}

/// # Panics
/// Panics when environment variable is not set or is invalid.
#[must_use]
pub fn db_connection_options_capsule(_: CapsuleHandle) -> ConnectOptions {
    const ENV_VAR_NAME: &str = "DB_URL";
    env::var(ENV_VAR_NAME)
        .unwrap_or_else(|err| match err {
            VarError::NotPresent => panic!("{ENV_VAR_NAME} is not set"),
            VarError::NotUnicode(actual) => {
                panic!("{ENV_VAR_NAME} is invalid unicode: {}", actual.display());
            }
        })
        .into()
}

fn db_conn_manager(
    CapsuleHandle { register, .. }: CapsuleHandle,
) -> (Option<DbConn>, impl use<> + CData + Fn(Option<DbConn>)) {
    register.register(rearch_effects::state::<rearch_effects::Cloned<_>>(None))
}

pub fn db_conn_init_action(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> impl use<> + CData + Fn(DbConn) {
    let set_db_conn = get.as_ref(db_conn_manager).1.clone();
    move |db| set_db_conn(Some(db))
}

/// # Panics
/// Panics when the [`DbConn`] was not set via [`db_conn_init_action`].
pub fn db_conn_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> DbConn {
    let db_conn = get.as_ref(db_conn_manager).0.clone();
    db_conn.expect("DbConn should've been set via db_conn_init_action!")
}

/// # Panics
/// Panics when environment variable is invalid.
pub fn addr_capsule(_: CapsuleHandle) -> String {
    setting_from_env("ADDR", "127.0.0.1:0".to_owned())
}

/// Prefix prepended to a code to form the short URL handed back to clients.
///
/// # Panics
/// Panics when environment variable is invalid.
pub fn base_url_capsule(_: CapsuleHandle) -> String {
    let base_url: String = setting_from_env("BASE_URL", "http://localhost:8080".to_owned());
    base_url.trim_end_matches('/').to_owned()
}

/// How short codes are generated for new links.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodeGenerationSettings {
    pub code_length: usize,
    pub max_attempts: usize,
}

impl Default for CodeGenerationSettings {
    fn default() -> Self {
        Self {
            code_length: 8,
            max_attempts: 10,
        }
    }
}

/// # Panics
/// Panics when an environment variable is invalid or out of range.
pub fn code_generation_settings_capsule(_: CapsuleHandle) -> CodeGenerationSettings {
    let defaults = CodeGenerationSettings::default();
    let settings = CodeGenerationSettings {
        code_length: setting_from_env("SHORT_CODE_LENGTH", defaults.code_length),
        max_attempts: setting_from_env("SHORT_CODE_MAX_ATTEMPTS", defaults.max_attempts),
    };
    if let Err(msg) = settings.validate() {
        panic!("{msg}");
    }
    settings
}

impl CodeGenerationSettings {
    fn validate(self) -> Result<(), String> {
        if !(1..=short_code::MAX_LEN).contains(&self.code_length) {
            return Err(format!(
                "SHORT_CODE_LENGTH must be between 1 and {}, got {}",
                short_code::MAX_LEN,
                self.code_length
            ));
        }
        if self.max_attempts == 0 {
            return Err("SHORT_CODE_MAX_ATTEMPTS must be at least 1".to_owned());
        }
        Ok(())
    }
}

fn setting_from_env<T>(name: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match parse_setting(name, env::var(name), default) {
        Ok(value) => value,
        Err(msg) => panic!("{msg}"),
    }
}

fn parse_setting<T>(name: &str, raw: Result<String, VarError>, default: T) -> Result<T, String>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match raw {
        Ok(raw) => {
            info!(var = name, value = %raw, "Environment variable set");
            raw.parse()
                .map_err(|err| format!("{name} environment variable is invalid: {err}"))
        }
        Err(VarError::NotPresent) => {
            warn!(var = name, %default, "Environment variable not set; using default");
            Ok(default)
        }
        Err(VarError::NotUnicode(actual)) => Err(format!(
            "{name} environment variable is invalid: {}",
            actual.display()
        )),
    }
}

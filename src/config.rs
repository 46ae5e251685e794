use crate::{
    models::{action::ActionKind, execution::TriggerContext, listing::ListingType},
    services::{
        poll_service::DEFAULT_CONCURRENCY,
        remote_store::{DEFAULT_SCOPE, GcpAuth},
    },
};
use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr, time::Duration};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Trigger definition: what to watch and what to do with what is found.
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    pub from: String,
    pub action: ActionKind,
    pub move_directory: Option<String>,
    pub listing_type: ListingType,
    pub reg_exp: Option<String>,
    pub interval: Duration,
    pub concurrency: usize,
    pub cycle_timeout: Option<Duration>,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub staging_dir: String,
    pub database_url: String,
    pub trigger: TriggerConfig,
    pub context: TriggerContext,
    pub auth: GcpAuth,
    pub once: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Watch a Google Cloud Storage location and start executions for new objects")]
pub struct Args {
    /// Host for the health endpoints (overrides GCS_WATCH_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port for the health endpoints (overrides GCS_WATCH_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where detected objects are staged (overrides GCS_WATCH_STAGING_DIR)
    #[arg(long)]
    pub staging_dir: Option<String>,

    /// Database URL for emitted executions (overrides GCS_WATCH_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Location to watch, e.g. gs://my-bucket/listen/ (overrides GCS_WATCH_FROM)
    #[arg(long)]
    pub from: Option<String>,

    /// What to do with detected objects (overrides GCS_WATCH_ACTION)
    #[arg(long, value_enum)]
    pub action: Option<ActionKind>,

    /// Destination for MOVE, e.g. gs://my-bucket/archive/ (overrides GCS_WATCH_MOVE_DIRECTORY)
    #[arg(long)]
    pub move_directory: Option<String>,

    /// Listing depth (overrides GCS_WATCH_LISTING_TYPE)
    #[arg(long, value_enum)]
    pub listing_type: Option<ListingType>,

    /// Regular expression the full object name must match (overrides GCS_WATCH_REG_EXP)
    #[arg(long)]
    pub reg_exp: Option<String>,

    /// Poll interval such as `60s` or `5m` (overrides GCS_WATCH_INTERVAL)
    #[arg(long)]
    pub interval: Option<String>,

    /// Maximum concurrent downloads and actions (overrides GCS_WATCH_CONCURRENCY)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Abort a cycle running longer than this (overrides GCS_WATCH_CYCLE_TIMEOUT)
    #[arg(long)]
    pub cycle_timeout: Option<String>,

    /// Namespace of the triggered flow (overrides GCS_WATCH_NAMESPACE)
    #[arg(long)]
    pub namespace: Option<String>,

    /// Id of the triggered flow (overrides GCS_WATCH_FLOW_ID)
    #[arg(long)]
    pub flow_id: Option<String>,

    /// Revision of the triggered flow (overrides GCS_WATCH_FLOW_REVISION)
    #[arg(long)]
    pub flow_revision: Option<i64>,

    /// Id of this trigger within the flow (overrides GCS_WATCH_TRIGGER_ID)
    #[arg(long)]
    pub trigger_id: Option<String>,

    /// GCP project id (overrides GCS_WATCH_PROJECT_ID)
    #[arg(long)]
    pub project_id: Option<String>,

    /// Service account key JSON or key file path (overrides GOOGLE_APPLICATION_CREDENTIALS)
    #[arg(long)]
    pub service_account: Option<String>,

    /// OAuth scopes, comma separated (overrides GCS_WATCH_SCOPES)
    #[arg(long, value_delimiter = ',')]
    pub scopes: Option<Vec<String>>,

    /// Run a single poll cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

type EnvLookup<'a> = &'a dyn Fn(&str) -> Result<String, env::VarError>;

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        Self::merge(args, &|key| env::var(key))
    }

    fn merge(args: Args, env: EnvLookup<'_>) -> Result<(Self, bool)> {
        // --- Environment fallback ---
        let env_host = env_or(env, "GCS_WATCH_HOST", "0.0.0.0")?;
        let env_port = env_parsed(env, "GCS_WATCH_PORT")?.unwrap_or(3000);
        let env_staging = env_or(env, "GCS_WATCH_STAGING_DIR", "./data/staging")?;
        let env_db = env_or(
            env,
            "GCS_WATCH_DATABASE_URL",
            "sqlite://./data/meta/gcs_watch.db",
        )?;

        let from = match args.from {
            Some(from) => from,
            None => env_opt(env, "GCS_WATCH_FROM")?
                .ok_or_else(|| anyhow!("missing `--from` (or GCS_WATCH_FROM)"))?,
        };
        let action = match args.action {
            Some(action) => action,
            None => match env_opt(env, "GCS_WATCH_ACTION")? {
                Some(raw) => parse_value_enum(&raw).context("parsing GCS_WATCH_ACTION")?,
                None => bail!("missing `--action` (or GCS_WATCH_ACTION)"),
            },
        };
        let listing_type = match args.listing_type {
            Some(listing_type) => listing_type,
            None => match env_opt(env, "GCS_WATCH_LISTING_TYPE")? {
                Some(raw) => {
                    parse_value_enum(&raw).context("parsing GCS_WATCH_LISTING_TYPE")?
                }
                None => ListingType::default(),
            },
        };
        let interval = match args.interval.or(env_opt(env, "GCS_WATCH_INTERVAL")?) {
            Some(raw) => parse_duration(&raw).context("parsing interval")?,
            None => DEFAULT_INTERVAL,
        };
        if interval.is_zero() {
            bail!("interval must be greater than zero");
        }
        let cycle_timeout = match args
            .cycle_timeout
            .or(env_opt(env, "GCS_WATCH_CYCLE_TIMEOUT")?)
        {
            Some(raw) => Some(parse_duration(&raw).context("parsing cycle timeout")?),
            None => None,
        };
        let concurrency = match args.concurrency {
            Some(n) => n,
            None => env_parsed(env, "GCS_WATCH_CONCURRENCY")?.unwrap_or(DEFAULT_CONCURRENCY),
        };

        let trigger = TriggerConfig {
            from,
            action,
            move_directory: args
                .move_directory
                .or(env_opt(env, "GCS_WATCH_MOVE_DIRECTORY")?),
            listing_type,
            reg_exp: args.reg_exp.or(env_opt(env, "GCS_WATCH_REG_EXP")?),
            interval,
            concurrency,
            cycle_timeout,
        };

        let context = TriggerContext {
            namespace: args
                .namespace
                .unwrap_or(env_or(env, "GCS_WATCH_NAMESPACE", "default")?),
            flow_id: args
                .flow_id
                .unwrap_or(env_or(env, "GCS_WATCH_FLOW_ID", "gcs-watch")?),
            flow_revision: match args.flow_revision {
                Some(rev) => rev,
                None => env_parsed(env, "GCS_WATCH_FLOW_REVISION")?.unwrap_or(1),
            },
            trigger_id: args
                .trigger_id
                .unwrap_or(env_or(env, "GCS_WATCH_TRIGGER_ID", "watch")?),
        };

        let scopes = match args.scopes {
            Some(scopes) => scopes,
            None => env_or(env, "GCS_WATCH_SCOPES", DEFAULT_SCOPE)?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        };
        let auth = GcpAuth {
            project_id: args.project_id.or(env_opt(env, "GCS_WATCH_PROJECT_ID")?),
            service_account: args
                .service_account
                .or(env_opt(env, "GOOGLE_APPLICATION_CREDENTIALS")?),
            scopes,
        };

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            staging_dir: args.staging_dir.unwrap_or(env_staging),
            database_url: args.database_url.unwrap_or(env_db),
            trigger,
            context,
            auth,
            once: args.once,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_opt(env: EnvLookup<'_>, key: &str) -> Result<Option<String>> {
    match env(key) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

fn env_or(env: EnvLookup<'_>, key: &str, default: &str) -> Result<String> {
    Ok(env_opt(env, key)?.unwrap_or_else(|| default.into()))
}

fn env_parsed<T>(env: EnvLookup<'_>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_opt(env, key)? {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        None => Ok(None),
    }
}

fn parse_value_enum<T: ValueEnum>(raw: &str) -> Result<T> {
    <T as ValueEnum>::from_str(raw.trim(), true).map_err(|err| anyhow!(err))
}

fn parse_duration(raw: &str) -> Result<Duration> {
    humantime::parse_duration(raw.trim()).with_context(|| format!("invalid duration `{}`", raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn merge(argv: &[&str], vars: &[(&str, &str)]) -> Result<(AppConfig, bool)> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut full = vec!["gcs-watch"];
        full.extend_from_slice(argv);
        let args = Args::try_parse_from(full)?;
        AppConfig::merge(args, &|key| {
            vars.get(key).cloned().ok_or(env::VarError::NotPresent)
        })
    }

    #[test]
    fn defaults_follow_trigger_conventions() {
        let (cfg, migrate) =
            merge(&["--from", "gs://b/in/", "--action", "delete"], &[]).unwrap();

        assert!(!migrate);
        assert_eq!(cfg.trigger.interval, Duration::from_secs(60));
        assert_eq!(cfg.trigger.listing_type, ListingType::Directory);
        assert_eq!(cfg.trigger.action, ActionKind::Delete);
        assert_eq!(cfg.trigger.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(cfg.auth.scopes, vec![DEFAULT_SCOPE.to_string()]);
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
    }

    #[test]
    fn args_override_environment() {
        let (cfg, _) = merge(
            &["--from", "gs://b/cli/", "--interval", "5m", "--port", "8080"],
            &[
                ("GCS_WATCH_FROM", "gs://b/env/"),
                ("GCS_WATCH_ACTION", "MOVE"),
                ("GCS_WATCH_MOVE_DIRECTORY", "gs://b/archive/"),
                ("GCS_WATCH_INTERVAL", "10s"),
                ("GCS_WATCH_PORT", "9000"),
                ("GCS_WATCH_LISTING_TYPE", "recursive"),
            ],
        )
        .unwrap();

        assert_eq!(cfg.trigger.from, "gs://b/cli/");
        assert_eq!(cfg.trigger.action, ActionKind::Move);
        assert_eq!(cfg.trigger.move_directory.as_deref(), Some("gs://b/archive/"));
        assert_eq!(cfg.trigger.interval, Duration::from_secs(300));
        assert_eq!(cfg.trigger.listing_type, ListingType::Recursive);
        assert_eq!(cfg.port, 8080);
    }

    #[test]
    fn from_and_action_are_required() {
        let err = merge(&["--action", "none"], &[]).unwrap_err();
        assert!(err.to_string().contains("--from"));

        let err = merge(&["--from", "gs://b/in/"], &[]).unwrap_err();
        assert!(err.to_string().contains("--action"));
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = merge(
            &["--from", "gs://b/in/"],
            &[("GCS_WATCH_ACTION", "archive")],
        )
        .unwrap_err();
        assert!(err.to_string().contains("GCS_WATCH_ACTION"));

        let err = merge(
            &["--from", "gs://b/in/", "--action", "none", "--interval", "0s"],
            &[],
        )
        .unwrap_err();
        assert!(err.to_string().contains("interval"));

        let err = merge(
            &["--from", "gs://b/in/", "--action", "none"],
            &[("GCS_WATCH_PORT", "not-a-port")],
        )
        .unwrap_err();
        assert!(err.to_string().contains("GCS_WATCH_PORT"));
    }

    #[test]
    fn auth_and_identity_pass_through() {
        let (cfg, migrate) = merge(
            &[
                "--from",
                "gs://b/in/",
                "--action",
                "none",
                "--scopes",
                "a,b",
                "--flow-revision",
                "7",
                "--cycle-timeout",
                "30s",
                "--migrate",
            ],
            &[
                ("GCS_WATCH_PROJECT_ID", "my-project"),
                ("GOOGLE_APPLICATION_CREDENTIALS", "/keys/sa.json"),
                ("GCS_WATCH_NAMESPACE", "io.example"),
            ],
        )
        .unwrap();

        assert!(migrate);
        assert_eq!(cfg.auth.project_id.as_deref(), Some("my-project"));
        assert_eq!(cfg.auth.service_account.as_deref(), Some("/keys/sa.json"));
        assert_eq!(cfg.auth.scopes, vec!["a", "b"]);
        assert_eq!(cfg.context.namespace, "io.example");
        assert_eq!(cfg.context.flow_revision, 7);
        assert_eq!(cfg.trigger.cycle_timeout, Some(Duration::from_secs(30)));
    }
}

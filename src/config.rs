use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Root of the path-keyed store (`files/` and `metadata/` live here).
    pub storage_dir: PathBuf,
    /// Root of the staged store (`s3_files/` and `s3_temp/` live here).
    pub s3_storage_dir: PathBuf,
    pub database_url: String,
    /// Where `GET /` redirects to.
    pub client_url: String,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "File storage gateway")]
pub struct Args {
    /// Host to bind to (overrides FILE_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory of the path-keyed store (overrides FILE_GATEWAY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Directory of the staged store (overrides FILE_GATEWAY_S3_STORAGE_DIR)
    #[arg(long)]
    pub s3_storage_dir: Option<PathBuf>,

    /// Database URL (overrides FILE_GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Client UI URL (overrides FILE_GATEWAY_CLIENT_URL)
    #[arg(long)]
    pub client_url: Option<String>,

    /// Request body limit in bytes (overrides FILE_GATEWAY_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args, |name: &str| env::var(name))?, migrate))
    }

    /// Merge CLI args over values looked up through `var`, then defaults.
    fn merge(
        args: Args,
        var: impl Fn(&str) -> Result<String, env::VarError>,
    ) -> Result<Self> {
        let env_host = var("FILE_GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_var(&var, "FILE_GATEWAY_PORT", 5000u16)?;
        let env_max_upload =
            parse_var(&var, "FILE_GATEWAY_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;

        let storage_dir = args
            .storage_dir
            .or_else(|| var("FILE_GATEWAY_STORAGE_DIR").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("./storage"));
        let s3_storage_dir = args
            .s3_storage_dir
            .or_else(|| var("FILE_GATEWAY_S3_STORAGE_DIR").ok().map(PathBuf::from))
            .unwrap_or_else(|| storage_dir.clone());
        let database_url = args
            .database_url
            .or_else(|| var("FILE_GATEWAY_DATABASE_URL").ok())
            .unwrap_or_else(|| {
                format!("sqlite://{}", storage_dir.join("s3_metadata.db").display())
            });
        let client_url = args
            .client_url
            .or_else(|| var("FILE_GATEWAY_CLIENT_URL").ok())
            .unwrap_or_else(|| "http://localhost:3000".into());

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir,
            s3_storage_dir,
            database_url,
            client_url,
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(
    var: &impl Fn(&str) -> Result<String, env::VarError>,
    name: &str,
    default: T,
) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

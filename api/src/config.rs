#[derive(Clone, Debug)]
pub enum Env {
    Dev,
    Staging,
    Production,
}

pub struct ServerConfig {
    pub env: Env,
    pub port: u16,

    /// Postgres DSN of the article/user store. The hosted deployment points
    /// this at the managed database's pooled connection string.
    pub database_url: String,

    /// Cloudflare Workers AI credentials for the embedding endpoint. Absent
    /// means the collector stores articles without vectors and a worker (or a
    /// later run with credentials) fills them in.
    pub embedder: Option<EmbedderCredentials>,

    /// Embedding model the deployment is pinned to. Changing this requires a
    /// re-embed backfill of the whole article table.
    pub embedding_model: String,

    /// Dimension of the pinned embedding model's output vectors.
    pub embedding_dim: usize,

    pub groq_api_key: Option<String>,
}

pub struct EmbedderCredentials {
    pub account_id: String,
    pub api_token: String,
}

const DEFAULT_EMBEDDING_MODEL: &str = "@cf/baai/bge-m3";
const DEFAULT_EMBEDDING_DIM: usize = 1024;

fn var(key: &str) -> Result<Option<String>, String> {
    match std::env::var(key) {
        Ok(env) => Ok(Some(env)),
        Err(e) => {
            tracing::warn!("Mising environment variable `{key}`");
            match e {
                std::env::VarError::NotPresent => Ok(None),
                std::env::VarError::NotUnicode(_) => Err(format!(
                    "Could not get the environment variable `{key}` due to unicode error"
                )),
            }
        }
    }
}

fn required_var(key: &str) -> String {
    let val = var(key);
    match val {
        Ok(val) => match val {
            Some(val) => val,
            None => {
                tracing::error!("Environment variable `{key}` is required");
                std::process::exit(1)
            }
        },
        Err(e) => {
            tracing::error!(
                "Environment variable `{key}` is required, but could not retrieve: {e}"
            );
            std::process::exit(1)
        }
    }
}

/// Either all or none variables are set, otherwise panics
fn all_or_none_vars(keys: Vec<&str>) -> Option<Vec<String>> {
    keys.iter().fold(None, |accum, k| match var(k) {
        Ok(Some(val)) => match accum {
            Some(mut l) => {
                l.push(val);
                Some(l)
            }
            None => Some(vec![val]),
        },
        _ => match accum {
            Some(_) => {
                let mut rest = keys.clone();
                rest.retain(|_k| _k != k);
                tracing::error!(
                    "Environment variable `{k}` is required if variables {rest:?} are present"
                );
                std::process::exit(1);
            }
            None => None,
        },
    })
}

impl ServerConfig {
    pub fn new_from_env() -> Self {
        let database_url = required_var("DATABASE_URL");

        let embedder =
            all_or_none_vars(vec!["CF_ACCOUNT_ID", "CF_API_TOKEN"]).map(|mut vars| {
                EmbedderCredentials {
                    account_id: vars.remove(0),
                    api_token: vars.remove(0),
                }
            });

        let embedding_model = var("CF_MODEL")
            .ok()
            .flatten()
            .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string());

        let embedding_dim = var("EMBEDDING_DIM")
            .ok()
            .flatten()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(DEFAULT_EMBEDDING_DIM);

        let groq_api_key = var("GROQ_API_KEY").ok().flatten();

        let env = match var("ENVIRONMENT") {
            Ok(Some(env)) => match env.as_str() {
                "dev" => Env::Dev,
                "staging" => Env::Staging,
                "production" => Env::Production,
                _ => Env::Dev,
            },
            _ => Env::Dev,
        };

        let port = var("PORT")
            .ok()
            .flatten()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(3000);

        ServerConfig {
            env,
            port,
            database_url,
            embedder,
            embedding_model,
            embedding_dim,
            groq_api_key,
        }
    }
}

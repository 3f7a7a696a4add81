use chrono::Duration as TokenLifetime;
use chrono::Utc;
use dotenv::dotenv;
use std::env;
use std::time::Duration;

error_chain! {
    errors {
        MissingSetting(key: &'static str) {
            description("missing setting")
            display("missing setting: {}", key)
        }
        InvalidSetting(key: &'static str, value: String) {
            description("invalid setting")
            display("invalid value for {}: {:?}", key, value)
        }
    }
}

const DEFAULT_ISSUER: &str = "conduit";
const DEFAULT_DB_TIMEOUT_SECS: u64 = 10;
const DEFAULT_POOL_SIZE: u32 = 10;

/// Process configuration. Read once at startup; the pool and the token
/// issuer are built from it and handed to Rocket as managed state.
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub token_ttl: TokenLifetime,
    pub db_timeout: Duration,
    pub pool_size: u32,
}

impl Config {
    pub fn from_env() -> Result<Config> {
        dotenv().ok();
        Config::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| -> Result<String> {
            match lookup(key) {
                Some(ref value) if !value.trim().is_empty() => Ok(value.clone()),
                _ => Err(ErrorKind::MissingSetting(key).into()),
            }
        };

        let database_url = required("DATABASE_URL")?;
        let jwt_secret = required("JWT_SECRET")?;
        let ttl_secs = positive::<i64>("TOKEN_TTL_SECS", required("TOKEN_TTL_SECS")?)?;
        let token_ttl = token_lifetime(ttl_secs)
            .ok_or_else(|| ErrorKind::InvalidSetting("TOKEN_TTL_SECS", ttl_secs.to_string()))?;
        let jwt_issuer = lookup("JWT_ISSUER").unwrap_or_else(|| DEFAULT_ISSUER.to_string());
        let db_timeout = match lookup("DB_TIMEOUT_SECS") {
            Some(value) => positive::<u64>("DB_TIMEOUT_SECS", value)?,
            None => DEFAULT_DB_TIMEOUT_SECS,
        };
        let pool_size = match lookup("DB_POOL_SIZE") {
            Some(value) => positive::<u32>("DB_POOL_SIZE", value)?,
            None => DEFAULT_POOL_SIZE,
        };

        Ok(Config {
            database_url,
            jwt_secret,
            jwt_issuer,
            token_ttl,
            db_timeout: Duration::from_secs(db_timeout),
            pool_size,
        })
    }
}

// Every token issued from now on must still have a representable expiry.
fn token_lifetime(secs: i64) -> Option<TokenLifetime> {
    TokenLifetime::try_seconds(secs).filter(|ttl| Utc::now().checked_add_signed(*ttl).is_some())
}

fn positive<T>(key: &'static str, value: String) -> Result<T>
where
    T: ::std::str::FromStr + PartialOrd + Default,
{
    match value.trim().parse::<T>() {
        Ok(parsed) if parsed > T::default() => Ok(parsed),
        _ => Err(ErrorKind::InvalidSetting(key, value).into()),
    }
}

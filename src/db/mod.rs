use crate::config::Config;
use crate::types::ApiError;
use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Error as ManagerError};
use rocket::http::Status;
use rocket::outcome::Outcome;
use rocket::request::{self, FromRequest};
use rocket::tokio::task;
use rocket::Request;
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tracing::error;

pub mod schema;

// An alias to the type for a pool of Diesel Postgres connections.
pub type Pool = r2d2::Pool<ConnectionManager<PgConnection>>;

pub struct DbConnection(pub r2d2::PooledConnection<ConnectionManager<PgConnection>>);

error_chain! {
    foreign_links {
        R2D2(r2d2::Error);
    }
}

/// Bounds every statement on a pooled connection. Applied once when the pool
/// opens the connection; the setting lives for the whole session.
#[derive(Debug)]
struct StatementTimeout(Duration);

impl r2d2::CustomizeConnection<PgConnection, ManagerError> for StatementTimeout {
    fn on_acquire(&self, conn: &mut PgConnection) -> ::std::result::Result<(), ManagerError> {
        conn.batch_execute(&format!("SET statement_timeout = {}", self.0.as_millis()))
            .map_err(ManagerError::QueryError)
    }
}

/// Attempts to retrieve a single connection from the managed database pool.
/// The checkout happens on the blocking thread pool; a missing pool or an
/// exhausted one fails the request.
#[rocket::async_trait]
impl<'r> FromRequest<'r> for DbConnection {
    type Error = ApiError;

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let pool = match request.rocket().state::<Pool>() {
            Some(pool) => pool.clone(),
            None => {
                error!("database pool is not managed");
                return Outcome::Error((Status::InternalServerError, ApiError::Internal));
            }
        };
        match task::spawn_blocking(move || pool.get()).await {
            Ok(Ok(conn)) => Outcome::Success(DbConnection(conn)),
            Ok(Err(e)) => {
                error!(error = %e, "no database connection available");
                Outcome::Error((Status::ServiceUnavailable, ApiError::Internal))
            }
            Err(e) => {
                error!(error = %e, "connection checkout task failed");
                Outcome::Error((Status::InternalServerError, ApiError::Internal))
            }
        }
    }
}

impl DbConnection {
    /// Runs blocking Diesel work on the blocking thread pool and hands the
    /// connection back to the pool when done.
    pub async fn run<F, T>(self, f: F) -> ::std::result::Result<T, ApiError>
    where
        F: FnOnce(&mut PgConnection) -> ::std::result::Result<T, ApiError> + Send + 'static,
        T: Send + 'static,
    {
        let mut connection = self;
        task::spawn_blocking(move || f(&mut *connection))
            .await
            .map_err(|e| {
                error!(error = %e, "database task failed");
                ApiError::Internal
            })?
    }
}

// For the convenience of using an &DbConnection as an &PgConnection.
impl Deref for DbConnection {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for DbConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

pub fn init_pool(config: &Config) -> Result<Pool> {
    let manager = ConnectionManager::<PgConnection>::new(config.database_url.as_str());
    let pool = Pool::builder()
        .max_size(config.pool_size)
        .connection_timeout(config.db_timeout)
        .connection_customizer(Box::new(StatementTimeout(config.db_timeout)))
        .build(manager)?;
    Ok(pool)
}

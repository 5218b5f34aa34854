//! Postgres storage
//!
//! Capsule changes are announced by a trigger (see the migrations) and forwarded from
//! `LISTEN` onto the change feed, so live queries also see writes from other instances.

use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgListener;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::capsules::Capsule;
use crate::users::User;

use super::ChangeFeed;
use super::ChangePasswordValues;
use super::CreateCapsuleValues;
use super::CreateUserValues;
use super::Error;
use super::Result;
use super::Storage;
use super::UpdateCapsuleValues;

/// Migrator to run migrations on startup
static MIGRATOR: Migrator = sqlx::migrate!();

/// Channel the capsule trigger notifies on
const CAPSULE_CHANGES_CHANNEL: &str = "capsule_changes";

/// Postgres storage
#[derive(Clone, Debug)]
pub struct Postgres {
    /// Pool of connections
    connection_pool: PgPool,

    /// Announces capsule changes, fed by `LISTEN`
    changes: ChangeFeed,
}

impl Postgres {
    /// Create Postgres storage
    ///
    /// Use the `DATABASE_URL` environment variable
    ///
    /// Migrations will be run
    pub async fn new() -> Self {
        let database_connection_string = std::env::var("DATABASE_URL").expect("Valid DATABASE_URL");

        let connection_pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&database_connection_string)
            .await
            .expect("Valid connection");

        Self::new_with_pool(connection_pool).await
    }

    /// Create Postgres storage with existing pool
    ///
    /// Migrations will be run, the change listener is started
    pub async fn new_with_pool(connection_pool: PgPool) -> Self {
        let migration_result = MIGRATOR.run(&connection_pool).await;

        if let Err(err) = migration_result {
            panic!("Migrations could not run: {err}");
        }

        let changes = ChangeFeed::new();

        tokio::spawn(forward_changes(connection_pool.clone(), changes.clone()));

        Self {
            connection_pool,
            changes,
        }
    }
}

/// Forward notifications of the capsule trigger onto the change feed
///
/// Whenever the listener (re)connects, live queries read again to pick up the changes that were
/// written while nobody was listening
async fn forward_changes(connection_pool: PgPool, changes: ChangeFeed) {
    loop {
        match listen(&connection_pool).await {
            Ok(listener) => {
                changes.resync();

                forward(listener, &changes).await;
            }
            Err(err) => tracing::error!("Could not listen to capsule changes: {err}"),
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

/// Connect a listener to the capsule changes channel
async fn listen(connection_pool: &PgPool) -> sqlx::Result<PgListener> {
    let mut listener = PgListener::connect_with(connection_pool).await?;

    listener.listen(CAPSULE_CHANGES_CHANNEL).await?;

    Ok(listener)
}

/// Forward notifications until the connection is lost
async fn forward(mut listener: PgListener, changes: &ChangeFeed) {
    loop {
        match listener.try_recv().await {
            Ok(Some(notification)) => match notification.payload().parse::<Uuid>() {
                Ok(owner_id) => changes.notify(owner_id),
                Err(err) => tracing::warn!(
                    "Ignoring capsule change with invalid owner {:?}: {err}",
                    notification.payload()
                ),
            },
            Ok(None) => {
                tracing::warn!("Capsule change listener lost its connection");
                return;
            }
            Err(err) => {
                tracing::error!("Capsule change listener failed: {err}");
                return;
            }
        }
    }
}

/// Postgres version of user
#[derive(sqlx::FromRow)]
struct PostgresUser {
    /// User ID
    id: Uuid,

    /// Sessions ID
    session_id: Uuid,

    /// Email address
    email: String,

    /// Hashed password
    hashed_password: String,

    /// Creation date
    created_at: DateTime<Utc>,

    /// Last updated at
    updated_at: DateTime<Utc>,
}

impl User {
    /// Create user from postgres version
    fn from_postgres_user(user: PostgresUser) -> Self {
        Self {
            id: user.id,
            session_id: user.session_id,
            email: user.email,
            hashed_password: user.hashed_password,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Postgres version of capsule
#[derive(sqlx::FromRow)]
struct PostgresCapsule {
    id: Uuid,
    owner_id: Uuid,
    title: String,
    message: String,
    open_date: DateTime<Utc>,
    image_url: Option<String>,
    created_at: DateTime<Utc>,
    opened: bool,
}

impl Capsule {
    /// Create capsule from postgres version
    fn from_postgres_capsule(capsule: PostgresCapsule) -> Self {
        Self {
            id: capsule.id,
            owner_id: capsule.owner_id,
            title: capsule.title,
            message: capsule.message,
            open_date: capsule.open_date,
            image_url: capsule.image_url,
            created_at: capsule.created_at,
            opened: capsule.opened,
        }
    }
}

const USER_COLUMNS: &str = "id, session_id, email, hashed_password, created_at, updated_at";

const CAPSULE_COLUMNS: &str =
    "id, owner_id, title, message, open_date, image_url, created_at, opened";

impl Storage for Postgres {
    fn changes(&self) -> &ChangeFeed {
        &self.changes
    }

    async fn find_single_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, PostgresUser>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 LIMIT 1"
        ))
        .bind(email)
        .fetch_optional(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(user.map(User::from_postgres_user))
    }

    async fn find_single_user_by_id(&self, id: &Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, PostgresUser>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 LIMIT 1"
        ))
        .bind(id)
        .fetch_optional(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(user.map(User::from_postgres_user))
    }

    async fn create_user(&self, values: &CreateUserValues<'_>) -> Result<User> {
        let user = sqlx::query_as::<_, PostgresUser>(&format!(
            r"
            INSERT INTO users (id, session_id, email, hashed_password)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "
        ))
        .bind(Uuid::new_v4())
        .bind(values.session_id)
        .bind(values.email)
        .bind(values.hashed_password)
        .fetch_one(&self.connection_pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(err) if err.is_unique_violation() => {
                Error::Duplicate(values.email.to_string())
            }
            err => connection_error(err),
        })?;

        Ok(User::from_postgres_user(user))
    }

    async fn change_session(&self, user: &User, session_id: &Uuid) -> Result<User> {
        let user = sqlx::query_as::<_, PostgresUser>(&format!(
            r"
            UPDATE users
            SET session_id = $1, updated_at = CURRENT_TIMESTAMP
            WHERE id = $2
            RETURNING {USER_COLUMNS}
            "
        ))
        .bind(session_id)
        .bind(user.id)
        .fetch_one(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(User::from_postgres_user(user))
    }

    async fn change_password(
        &self,
        user: &User,
        values: &ChangePasswordValues<'_>,
    ) -> Result<User> {
        let user = sqlx::query_as::<_, PostgresUser>(&format!(
            r"
            UPDATE users
            SET session_id = $1, hashed_password = $2, updated_at = CURRENT_TIMESTAMP
            WHERE id = $3
            RETURNING {USER_COLUMNS}
            "
        ))
        .bind(values.session_id)
        .bind(values.hashed_password)
        .bind(user.id)
        .fetch_one(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(User::from_postgres_user(user))
    }

    async fn find_all_capsules_by_owner(&self, owner_id: &Uuid) -> Result<Vec<Capsule>> {
        let capsules = sqlx::query_as::<_, PostgresCapsule>(&format!(
            "SELECT {CAPSULE_COLUMNS} FROM capsules WHERE owner_id = $1 ORDER BY created_at, id"
        ))
        .bind(owner_id)
        .fetch_all(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(capsules
            .into_iter()
            .map(Capsule::from_postgres_capsule)
            .collect())
    }

    async fn find_single_capsule_by_id(&self, id: &Uuid) -> Result<Option<Capsule>> {
        let capsule = sqlx::query_as::<_, PostgresCapsule>(&format!(
            "SELECT {CAPSULE_COLUMNS} FROM capsules WHERE id = $1 LIMIT 1"
        ))
        .bind(id)
        .fetch_optional(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(capsule.map(Capsule::from_postgres_capsule))
    }

    async fn create_capsule(&self, values: &CreateCapsuleValues<'_>) -> Result<Capsule> {
        let capsule = sqlx::query_as::<_, PostgresCapsule>(&format!(
            r"
            INSERT INTO capsules (id, owner_id, title, message, open_date, image_url)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {CAPSULE_COLUMNS}
            "
        ))
        .bind(Uuid::new_v4())
        .bind(values.owner_id)
        .bind(values.title)
        .bind(values.message)
        .bind(values.open_date)
        .bind(values.image_url)
        .fetch_one(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(Capsule::from_postgres_capsule(capsule))
    }

    async fn update_capsule(
        &self,
        id: &Uuid,
        values: &UpdateCapsuleValues<'_>,
    ) -> Result<Option<Capsule>> {
        let capsule = sqlx::query_as::<_, PostgresCapsule>(&format!(
            r"
            UPDATE capsules
            SET title = $1, message = $2, open_date = $3, image_url = $4
            WHERE id = $5
            RETURNING {CAPSULE_COLUMNS}
            "
        ))
        .bind(values.title)
        .bind(values.message)
        .bind(values.open_date)
        .bind(values.image_url)
        .bind(id)
        .fetch_optional(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(capsule.map(Capsule::from_postgres_capsule))
    }

    async fn delete_capsule(&self, id: &Uuid) -> Result<()> {
        sqlx::query("DELETE FROM capsules WHERE id = $1")
            .bind(id)
            .execute(&self.connection_pool)
            .await
            .map_err(connection_error)?;

        Ok(())
    }
}

/// Map any error into a connection error
fn connection_error<E>(err: E) -> Error
where
    E: std::error::Error,
{
    Error::Connection(err.to_string())
}

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rearch::CapsuleHandle;
use sea_orm::{
    ActiveModelTrait,
    ActiveValue::{NotSet, Set},
    ColumnTrait, DbConn, DbErr, EntityTrait, QueryFilter, SqlErr,
    sea_query::{Expr, ExprTrait},
};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, instrument};

use crate::{config::db_conn_capsule, orm::short_url, short_code::ShortCode};

pub fn link_repository_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn LinkRepository> {
    let db = get.as_ref(db_conn_capsule).clone();
    Arc::new(LinkRepositoryImpl { db })
}

/// A link that has not been persisted yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewLink {
    pub code: ShortCode,
    pub original_url: String,
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub code: ShortCode,
    pub original_url: String,
    pub created_at: OffsetDateTime,
    pub visits: u64,
}

#[derive(Debug, Error)]
pub enum InsertLinkError {
    #[error("short code is already in use")]
    CodeCollision,
    #[error("database is unavailable: {0}")]
    Unavailable(anyhow::Error),
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum FindLinkError {
    #[error("database is unavailable: {0}")]
    Unavailable(anyhow::Error),
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error),
}

#[async_trait]
pub trait LinkRepository: Send + Sync {
    async fn find_link(&self, code: &ShortCode) -> Result<Option<Link>, FindLinkError>;

    /// Persists `link`, relying on the unique constraint on `short_code`
    /// to report [`InsertLinkError::CodeCollision`].
    async fn insert_link(&self, link: NewLink) -> Result<Link, InsertLinkError>;

    /// Bumps the visit counter of `code` in a single statement.
    async fn record_visit(&self, code: &ShortCode) -> anyhow::Result<()>;

    async fn ping(&self) -> anyhow::Result<()>;
}

struct LinkRepositoryImpl {
    db: DbConn,
}

#[async_trait]
impl LinkRepository for LinkRepositoryImpl {
    #[instrument(skip(self))]
    async fn find_link(&self, code: &ShortCode) -> Result<Option<Link>, FindLinkError> {
        let model = short_url::Entity::find()
            .filter(short_url::Column::ShortCode.eq(code.as_str()))
            .one(&self.db)
            .await
            .map_err(|err| {
                let unavailable = is_connection_error(&err);
                let err = anyhow::Error::from(err).context("Failed to query link by short code");
                if unavailable {
                    FindLinkError::Unavailable(err)
                } else {
                    FindLinkError::Internal(err)
                }
            })?;

        model
            .map(Link::try_from)
            .transpose()
            .map_err(FindLinkError::Internal)
    }

    #[instrument(skip(self))]
    async fn insert_link(&self, link: NewLink) -> Result<Link, InsertLinkError> {
        let to_insert = short_url::ActiveModel {
            id: NotSet,
            short_code: Set(link.code.into_inner()),
            original_url: Set(link.original_url),
            created_at: Set(link.created_at),
            visits: Set(0),
        };

        match to_insert.insert(&self.db).await {
            Ok(model) => Link::try_from(model).map_err(InsertLinkError::Internal),
            Err(err) if is_code_collision(&err) => {
                debug!(?err, "Insert rejected by unique constraint");
                Err(InsertLinkError::CodeCollision)
            }
            Err(err) if is_connection_error(&err) => Err(InsertLinkError::Unavailable(
                anyhow::Error::from(err).context("Failed to insert link"),
            )),
            Err(err) => Err(InsertLinkError::Internal(
                anyhow::Error::from(err).context("Failed to insert link"),
            )),
        }
    }

    #[instrument(skip(self))]
    async fn record_visit(&self, code: &ShortCode) -> anyhow::Result<()> {
        short_url::Entity::update_many()
            .col_expr(
                short_url::Column::Visits,
                Expr::col(short_url::Column::Visits).add(1),
            )
            .filter(short_url::Column::ShortCode.eq(code.as_str()))
            .exec(&self.db)
            .await
            .context("Failed to increment visit counter")?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn ping(&self) -> anyhow::Result<()> {
        self.db.ping().await.context("Database did not respond to ping")
    }
}

/// Whether `err` is the database rejecting a duplicate `short_code`.
///
/// Only a driver error carrying the backend's unique-violation code (`23505`
/// on Postgres) qualifies, so `MockDatabase` errors never match; the
/// positive case is covered by `tests/postgres_link_repo.rs`.
fn is_code_collision(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn is_connection_error(err: &DbErr) -> bool {
    matches!(err, DbErr::ConnectionAcquire(_) | DbErr::Conn(_))
}

impl TryFrom<short_url::Model> for Link {
    type Error = anyhow::Error;

    fn try_from(
        short_url::Model {
            short_code,
            original_url,
            created_at,
            visits,
            ..
        }: short_url::Model,
    ) -> Result<Self, Self::Error> {
        Ok(Self {
            code: ShortCode::new(short_code).context("Stored short code is invalid")?,
            original_url,
            created_at,
            visits: u64::try_from(visits).context("Stored visit count is negative")?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, RuntimeErr};

    use super::*;

    fn model(code: &str, url: &str, visits: i32) -> short_url::Model {
        short_url::Model {
            id: 1,
            short_code: code.to_owned(),
            original_url: url.to_owned(),
            created_at: OffsetDateTime::UNIX_EPOCH,
            visits,
        }
    }

    fn code(code: &str) -> ShortCode {
        ShortCode::new(code.to_owned()).unwrap()
    }

    #[tokio::test]
    async fn test_find_link_found() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![model("abc123", "https://example.com/a", 7)]])
            .into_connection();
        let repo = LinkRepositoryImpl { db };

        let link = repo.find_link(&code("abc123")).await.unwrap().unwrap();
        assert_eq!(
            link,
            Link {
                code: code("abc123"),
                original_url: "https://example.com/a".to_owned(),
                created_at: OffsetDateTime::UNIX_EPOCH,
                visits: 7,
            }
        );
    }

    #[tokio::test]
    async fn test_find_link_missing() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<short_url::Model>::new()])
            .into_connection();
        let repo = LinkRepositoryImpl { db };

        assert!(repo.find_link(&code("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_link_db_error() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_errors([DbErr::Custom("connection reset".to_owned())])
            .into_connection();
        let repo = LinkRepositoryImpl { db };

        assert!(matches!(
            repo.find_link(&code("abc123")).await,
            Err(FindLinkError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_find_link_connection_error_is_unavailable() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_errors([DbErr::Conn(RuntimeErr::Internal(
                "connection refused".to_owned(),
            ))])
            .into_connection();
        let repo = LinkRepositoryImpl { db };

        assert!(matches!(
            repo.find_link(&code("abc123")).await,
            Err(FindLinkError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_find_link_negative_visits_is_an_error() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![model("abc123", "https://example.com/a", -1)]])
            .into_connection();
        let repo = LinkRepositoryImpl { db };

        assert!(repo.find_link(&code("abc123")).await.is_err());
    }

    #[tokio::test]
    async fn test_insert_link_returns_stored_link() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![model("xyz789", "https://example.com/b", 0)]])
            .into_connection();
        let repo = LinkRepositoryImpl { db };

        let link = repo
            .insert_link(NewLink {
                code: code("xyz789"),
                original_url: "https://example.com/b".to_owned(),
                created_at: OffsetDateTime::UNIX_EPOCH,
            })
            .await
            .unwrap();
        assert_eq!(link.code, code("xyz789"));
        assert_eq!(link.original_url, "https://example.com/b");
        assert_eq!(link.visits, 0);
    }

    #[tokio::test]
    async fn test_insert_link_db_error_is_internal() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_errors([DbErr::Custom("disk full".to_owned())])
            .into_connection();
        let repo = LinkRepositoryImpl { db };

        let err = repo
            .insert_link(NewLink {
                code: code("xyz789"),
                original_url: "https://example.com/b".to_owned(),
                created_at: OffsetDateTime::UNIX_EPOCH,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, InsertLinkError::Internal(_)));
    }

    #[tokio::test]
    async fn test_insert_link_connection_error_is_unavailable() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_errors([DbErr::Conn(RuntimeErr::Internal(
                "connection refused".to_owned(),
            ))])
            .into_connection();
        let repo = LinkRepositoryImpl { db };

        let err = repo
            .insert_link(NewLink {
                code: code("xyz789"),
                original_url: "https://example.com/b".to_owned(),
                created_at: OffsetDateTime::UNIX_EPOCH,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, InsertLinkError::Unavailable(_)));
    }

    #[test]
    fn test_only_unique_violations_count_as_collisions() {
        assert!(!is_code_collision(&DbErr::Custom("disk full".to_owned())));
        assert!(!is_code_collision(&DbErr::RecordNotInserted));
        assert!(!is_code_collision(&DbErr::Conn(RuntimeErr::Internal(
            "connection refused".to_owned()
        ))));
    }

    #[tokio::test]
    async fn test_record_visit() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();
        let repo = LinkRepositoryImpl { db };

        repo.record_visit(&code("abc123")).await.unwrap();
    }
}

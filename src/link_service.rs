use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rearch::CapsuleHandle;
use serde::Serialize;
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::{
    config::{CodeGenerationSettings, code_generation_settings_capsule},
    link_repo::{
        FindLinkError, InsertLinkError, Link, LinkRepository, NewLink, link_repository_capsule,
    },
    short_code::ShortCode,
};

/// Longest URL accepted for shortening.
pub const MAX_URL_LEN: usize = 2083;

#[derive(Debug)]
pub struct ShortenedLink {
    pub code: String,
    pub original_url: String,
    /// Timestamp in RFC 3339 format
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct LinkStats {
    pub short_code: String,
    pub original_url: String,
    pub visits: u64,
    /// Timestamp in RFC 3339 format
    pub created: String,
}

pub fn link_service_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn LinkService> {
    let link_repo = Arc::clone(get.as_ref(link_repository_capsule));
    let settings = *get.as_ref(code_generation_settings_capsule);
    Arc::new(LinkServiceImpl {
        link_repo,
        settings,
    })
}

#[async_trait]
pub trait LinkService: Send + Sync {
    /// Stores `url`, exactly as given, under a freshly generated short code.
    async fn shorten(&self, url: &str) -> Result<ShortenedLink, ShortenError>;

    /// Looks up the URL behind `code` and counts the visit.
    async fn resolve(&self, code: &str) -> Result<String, ResolveError>;

    async fn stats(&self, code: &str) -> Result<LinkStats, ResolveError>;

    async fn check_health(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
pub enum ShortenError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported URL scheme `{0}`; only http and https URLs can be shortened")]
    UnsupportedScheme(String),
    #[error("URL is {len} characters long; the maximum is {max}")]
    UrlTooLong { len: usize, max: usize },
    #[error("URL must not contain control characters or surrounding whitespace")]
    UnsafeCharacters,
    #[error("failed to generate a unique short code after {attempts} attempts")]
    GenerationExhausted { attempts: usize },
    #[error("database is unavailable: {0}")]
    Unavailable(anyhow::Error),
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error), // NOTE: no #[from] so we have to be explicit
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("short code not found")]
    NotFound,
    #[error("database is unavailable: {0}")]
    Unavailable(anyhow::Error),
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error),
}

struct LinkServiceImpl {
    link_repo: Arc<dyn LinkRepository>,
    settings: CodeGenerationSettings,
}

impl LinkServiceImpl {
    async fn find(&self, code: &str) -> Result<Link, ResolveError> {
        // NOTE: a malformed code can never have been issued, so skip the round trip
        let code = match ShortCode::new(code.to_owned()) {
            Ok(code) => code,
            Err(err) => {
                debug!(?err, "Rejected malformed short code");
                return Err(ResolveError::NotFound);
            }
        };

        match self.link_repo.find_link(&code).await {
            Ok(Some(link)) => Ok(link),
            Ok(None) => Err(ResolveError::NotFound),
            Err(FindLinkError::Unavailable(err)) => Err(ResolveError::Unavailable(err)),
            Err(FindLinkError::Internal(err)) => Err(ResolveError::Internal(err)),
        }
    }
}

#[async_trait]
impl LinkService for LinkServiceImpl {
    #[instrument(skip(self))]
    async fn shorten(&self, url: &str) -> Result<ShortenedLink, ShortenError> {
        validate_url(url)?;
        let CodeGenerationSettings {
            code_length,
            max_attempts,
        } = self.settings;

        for attempt in 1..=max_attempts {
            let candidate = ShortCode::generate(code_length);
            let new_link = NewLink {
                code: candidate.clone(),
                original_url: url.to_owned(),
                created_at: OffsetDateTime::now_utc(),
            };

            match self.link_repo.insert_link(new_link).await {
                Ok(link) => {
                    info!(code = %link.code, attempt, "Created link");
                    return ShortenedLink::try_from(link)
                        .context("Failed to convert new Link into external format")
                        .map_err(ShortenError::Internal);
                }
                Err(InsertLinkError::CodeCollision) => {
                    warn!(%candidate, attempt, "Generated short code that was already taken");
                }
                Err(InsertLinkError::Unavailable(err)) => {
                    error!(?err, "Database unavailable while storing link");
                    return Err(ShortenError::Unavailable(err));
                }
                Err(InsertLinkError::Internal(err)) => {
                    error!(?err, "Failed to store link");
                    return Err(ShortenError::Internal(err.context("Failed to store link")));
                }
            }
        }

        Err(ShortenError::GenerationExhausted {
            attempts: max_attempts,
        })
    }

    #[instrument(skip(self))]
    async fn resolve(&self, code: &str) -> Result<String, ResolveError> {
        let link = self.find(code).await?;

        // NOTE: the redirect must still succeed when the counter cannot be bumped
        if let Err(err) = self.link_repo.record_visit(&link.code).await {
            warn!(?err, code = %link.code, "Failed to record visit");
        }

        Ok(link.original_url)
    }

    #[instrument(skip(self))]
    async fn stats(&self, code: &str) -> Result<LinkStats, ResolveError> {
        LinkStats::try_from(self.find(code).await?)
            .context("Failed to convert Link into external format")
            .map_err(ResolveError::Internal)
    }

    #[instrument(skip(self))]
    async fn check_health(&self) -> anyhow::Result<()> {
        self.link_repo.ping().await
    }
}

/// Checks `url` without rewriting it; the caller's string is what gets stored.
///
/// Control characters and surrounding whitespace are rejected up front since
/// [`Url::parse`] would silently strip them, and the stored value has to be
/// usable as a `Location` header as is.
fn validate_url(url: &str) -> Result<(), ShortenError> {
    if url.len() > MAX_URL_LEN {
        return Err(ShortenError::UrlTooLong {
            len: url.len(),
            max: MAX_URL_LEN,
        });
    }

    if url.chars().any(char::is_control) || url.trim() != url {
        return Err(ShortenError::UnsafeCharacters);
    }

    match Url::parse(url)?.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ShortenError::UnsupportedScheme(other.to_owned())),
    }
}

fn format_timestamp(timestamp: OffsetDateTime) -> anyhow::Result<String> {
    timestamp
        .format(&Rfc3339)
        .context("Failed to format creation timestamp")
}

impl TryFrom<Link> for ShortenedLink {
    type Error = anyhow::Error;

    fn try_from(
        Link {
            code,
            original_url,
            created_at,
            ..
        }: Link,
    ) -> Result<Self, Self::Error> {
        Ok(Self {
            code: code.into_inner(),
            original_url,
            created_at: format_timestamp(created_at)?,
        })
    }
}

impl TryFrom<Link> for LinkStats {
    type Error = anyhow::Error;

    fn try_from(
        Link {
            code,
            original_url,
            created_at,
            visits,
        }: Link,
    ) -> Result<Self, Self::Error> {
        Ok(Self {
            short_code: code.into_inner(),
            original_url,
            visits,
            created: format_timestamp(created_at)?,
        })
    }
}

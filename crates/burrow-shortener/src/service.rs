use crate::config::Settings;
use crate::deleter::{DeleteQueue, DeleteRequest, DeletionDaemon, DeletionHandle, DeletionStats};
use crate::error::{Result, ShortenerError};
use crate::shortener::{BatchItem, BatchShortened, ShortenOutcome, Shortener};
use async_trait::async_trait;
use burrow_core::{Repository, ShortCode, Stats, StorageError, UserId, UserUrl};
use burrow_identity::{CookieSigner, Identity, IdentityError};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// How many times a batch is retried when another writer claims its block.
const MAX_BATCH_ATTEMPTS: usize = 5;

/// The [`Shortener`] backed by a [`Repository`].
///
/// Owns the producer side of the deletion daemon, so the daemon only stops
/// once the service has been shut down.
pub struct ShortenerService<R> {
    repository: Arc<R>,
    signer: CookieSigner,
    settings: Settings,
    deletions: DeleteQueue,
}

impl<R: Repository> ShortenerService<R> {
    /// Creates the service and starts its deletion daemon on the current runtime.
    ///
    /// Fails without starting anything if the cookie key in `settings` is
    /// unusable.
    pub fn spawn(
        repository: R,
        settings: Settings,
    ) -> std::result::Result<(Self, DeletionHandle), IdentityError> {
        let signer = CookieSigner::new(settings.cookie_key())?;
        let repository = Arc::new(repository);
        let (deletions, handle) =
            DeletionDaemon::spawn(repository.clone(), settings.delete_queue_capacity());

        let service = Self {
            repository,
            signer,
            settings,
            deletions,
        };
        Ok((service, handle))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Stops the service: closes the deletion queue, waits for the daemon to
    /// drain it, then shuts the repository down.
    pub async fn shutdown(self, deletions: DeletionHandle) -> Result<DeletionStats> {
        let Self {
            repository,
            deletions: queue,
            ..
        } = self;

        drop(queue);
        let stats = deletions.join().await;
        info!(
            applied = stats.applied,
            failed = stats.failed,
            skipped_codes = stats.skipped_codes,
            "deletion queue drained"
        );

        repository.shutdown().await?;
        Ok(stats)
    }

    /// Stores `values` under consecutive ids and returns the first one.
    ///
    /// Another writer may take the next index between the read and the
    /// insert; the repository then rejects the block untouched and it is
    /// retried from a fresh index.
    async fn insert_block(&self, values: &[String], user: UserId) -> Result<u64> {
        let mut attempt = 1;
        loop {
            let start_index = self.repository.get_next_index().await?;
            match self
                .repository
                .insert_batch_values(values, start_index, user)
                .await
            {
                Ok(()) => return Ok(start_index),
                Err(StorageError::StaleIndex { next_index, .. })
                    if attempt < MAX_BATCH_ATTEMPTS =>
                {
                    debug!(start_index, next_index, attempt, "batch block was taken, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn short_url(&self, id: u64) -> String {
        ShortCode::from_id(id).to_url(self.settings.base_url())
    }

    /// Validates that the URL has a valid format (has a scheme and host).
    fn validate_url(url: &str) -> Result<()> {
        if url.is_empty() {
            return Err(ShortenerError::InvalidUrl(
                "URL cannot be empty".to_string(),
            ));
        }

        let Some((scheme, rest)) = url.split_once("://") else {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must have a valid scheme and host: {}",
                url
            )));
        };

        let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
        if scheme.is_empty() || host.is_empty() {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must have a valid scheme and host: {}",
                url
            )));
        }

        let scheme = scheme.to_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL scheme must be http or https: {}",
                scheme
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl<R: Repository> Shortener for ShortenerService<R> {
    fn authenticate(&self, cookie: Option<&str>) -> Identity {
        let identity = self.signer.resolve(cookie);
        if identity.is_new() {
            debug!(user = %identity.user_id, "minted new identity");
        }
        identity
    }

    async fn shorten(&self, original_url: &str, user: UserId) -> Result<ShortenOutcome> {
        Self::validate_url(original_url)?;

        match self.repository.insert_value(original_url, user).await {
            Ok(id) => Ok(ShortenOutcome::Created(self.short_url(id))),
            Err(StorageError::Conflict { id }) => Ok(ShortenOutcome::Existing(self.short_url(id))),
            Err(err) => Err(err.into()),
        }
    }

    async fn shorten_batch(
        &self,
        items: Vec<BatchItem>,
        user: UserId,
    ) -> Result<Vec<BatchShortened>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        for item in &items {
            Self::validate_url(&item.original_url)?;
        }

        let values: Vec<String> = items.iter().map(|item| item.original_url.clone()).collect();
        let start_index = self.insert_block(&values, user).await?;

        Ok(items
            .into_iter()
            .zip(start_index..)
            .map(|(item, id)| BatchShortened {
                correlation_id: item.correlation_id,
                short_url: self.short_url(id),
            })
            .collect())
    }

    async fn resolve(&self, short_code: &str, user: UserId) -> Result<String> {
        let code = ShortCode::parse(short_code)?;

        match self.repository.get_value(code.id(), user).await {
            Ok(url) => Ok(url),
            Err(StorageError::NotFound(_)) => Err(ShortenerError::NotFound(code.to_string())),
            Err(StorageError::Gone(_)) => Err(ShortenerError::Gone(code.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    async fn user_urls(&self, user: UserId) -> Result<Vec<UserUrl>> {
        Ok(self
            .repository
            .get_user_urls(user, self.settings.base_url())
            .await?)
    }

    async fn delete_urls(&self, short_codes: Vec<String>, user: UserId) -> Result<()> {
        if short_codes.is_empty() {
            return Ok(());
        }
        self.deletions
            .enqueue(DeleteRequest { short_codes, user })
            .await
    }

    async fn ping(&self) -> Result<()> {
        Ok(self.repository.ping().await?)
    }

    async fn stats(&self, client_ip: Option<IpAddr>) -> Result<Stats> {
        let trusted = match (self.settings.trusted_subnet(), client_ip) {
            (Some(subnet), Some(ip)) => subnet.contains(ip),
            _ => false,
        };
        if !trusted {
            debug!(client_ip = ?client_ip, "stats request outside trusted subnet");
            return Err(ShortenerError::Forbidden);
        }

        Ok(self.repository.get_stats().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrustedSubnet;
    use burrow_core::error::Result as StorageResult;
    use burrow_storage::InMemoryRepository;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const KEY: &str = "test-cookie-key";

    fn settings() -> Settings {
        Settings::builder()
            .cookie_key(KEY)
            .trusted_subnet(Some("10.0.0.0/8".parse::<TrustedSubnet>().unwrap()))
            .build()
    }

    fn test_service() -> (
        ShortenerService<Arc<InMemoryRepository>>,
        DeletionHandle,
        Arc<InMemoryRepository>,
    ) {
        let repository = Arc::new(InMemoryRepository::new());
        let (service, handle) = ShortenerService::spawn(repository.clone(), settings()).unwrap();
        (service, handle, repository)
    }

    /// Lets another writer take the next index right after each of the first
    /// `races` reads of it.
    struct RacingRepository {
        inner: InMemoryRepository,
        races: usize,
        reads: AtomicUsize,
    }

    impl RacingRepository {
        fn new(races: usize) -> Self {
            Self {
                inner: InMemoryRepository::new(),
                races,
                reads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Repository for RacingRepository {
        async fn get_next_index(&self) -> StorageResult<u64> {
            let next = self.inner.get_next_index().await?;
            let read = self.reads.fetch_add(1, Ordering::SeqCst);
            if read < self.races {
                self.inner
                    .insert_value(&format!("http://other-{read}.example"), UserId::new(99))
                    .await?;
            }
            Ok(next)
        }

        async fn insert_value(&self, value: &str, user: UserId) -> StorageResult<u64> {
            self.inner.insert_value(value, user).await
        }

        async fn insert_batch_values(
            &self,
            values: &[String],
            start_index: u64,
            user: UserId,
        ) -> StorageResult<()> {
            self.inner
                .insert_batch_values(values, start_index, user)
                .await
        }

        async fn get_value(&self, id: u64, user: UserId) -> StorageResult<String> {
            self.inner.get_value(id, user).await
        }

        async fn get_user_urls(&self, user: UserId, base_url: &str) -> StorageResult<Vec<UserUrl>> {
            self.inner.get_user_urls(user, base_url).await
        }

        async fn mark_batch_as_deleted(&self, ids: &[u64], user: UserId) -> StorageResult<()> {
            self.inner.mark_batch_as_deleted(ids, user).await
        }

        async fn get_stats(&self) -> StorageResult<Stats> {
            self.inner.get_stats().await
        }

        async fn ping(&self) -> StorageResult<()> {
            self.inner.ping().await
        }

        async fn shutdown(&self) -> StorageResult<()> {
            self.inner.shutdown().await
        }
    }

    fn batch(urls: &[(&str, &str)]) -> Vec<BatchItem> {
        urls.iter()
            .map(|(correlation_id, original_url)| BatchItem {
                correlation_id: correlation_id.to_string(),
                original_url: original_url.to_string(),
            })
            .collect()
    }

    fn user(id: u64) -> UserId {
        UserId::new(id)
    }

    async fn wait_until_gone<R: Repository>(service: &ShortenerService<R>, code: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match service.resolve(code, user(1)).await {
                    Err(ShortenerError::Gone(_)) => break,
                    _ => tokio::task::yield_now().await,
                }
            }
        })
        .await
        .expect("delete was never applied");
    }

    #[tokio::test]
    async fn shorten_then_resolve() {
        let (service, _handle, _repository) = test_service();

        let outcome = service.shorten("http://a.example", user(1)).await.unwrap();
        assert_eq!(
            outcome,
            ShortenOutcome::Created("http://localhost:8080/b".to_string())
        );

        let url = service.resolve("b", user(1)).await.unwrap();
        assert_eq!(url, "http://a.example");
    }

    #[tokio::test]
    async fn shorten_twice_returns_existing() {
        let (service, _handle, _repository) = test_service();

        let first = service.shorten("http://a.example", user(1)).await.unwrap();
        let second = service.shorten("http://a.example", user(2)).await.unwrap();

        assert!(first.is_created());
        assert_eq!(
            second,
            ShortenOutcome::Existing("http://localhost:8080/b".to_string())
        );
    }

    #[tokio::test]
    async fn shorten_rejects_invalid_urls() {
        let (service, _handle, _repository) = test_service();

        for url in ["", "not-a-valid-url", "ftp://example.com", "http://", "://host"] {
            let err = service.shorten(url, user(1)).await.unwrap_err();
            assert!(matches!(err, ShortenerError::InvalidUrl(_)), "{url}");
        }
    }

    #[tokio::test]
    async fn shorten_insert_delete_scenario() {
        let (service, handle, repository) = test_service();

        let created = service.shorten("http://a.example", user(1)).await.unwrap();
        assert_eq!(created.short_url(), "http://localhost:8080/b");
        let again = service.shorten("http://a.example", user(1)).await.unwrap();
        assert!(!again.is_created());

        service
            .delete_urls(vec!["b".to_string()], user(1))
            .await
            .unwrap();
        wait_until_gone(&service, "b").await;

        let stats = service.shutdown(handle).await.unwrap();
        assert_eq!(stats.applied, 1);
        assert!(matches!(
            repository.get_value(1, user(1)).await,
            Err(StorageError::Gone(1))
        ));
    }

    #[tokio::test]
    async fn shutdown_drains_pending_deletes() {
        let (service, handle, repository) = test_service();

        for n in 0..5 {
            service
                .shorten(&format!("http://{n}.example"), user(1))
                .await
                .unwrap();
        }
        for code in ["b", "c", "d"] {
            service
                .delete_urls(vec![code.to_string()], user(1))
                .await
                .unwrap();
        }

        let stats = service.shutdown(handle).await.unwrap();
        assert_eq!(stats.applied, 3);
        assert_eq!(repository.get_stats().await.unwrap().urls, 2);
    }

    #[tokio::test]
    async fn delete_of_foreign_urls_is_ignored() {
        let (service, handle, repository) = test_service();

        service.shorten("http://a.example", user(1)).await.unwrap();
        service
            .delete_urls(vec!["b".to_string()], user(2))
            .await
            .unwrap();

        service.shutdown(handle).await.unwrap();
        assert_eq!(
            repository.get_value(1, user(1)).await.unwrap(),
            "http://a.example"
        );
    }

    #[tokio::test]
    async fn resolve_errors() {
        let (service, _handle, _repository) = test_service();

        assert!(matches!(
            service.resolve("zz", user(1)).await,
            Err(ShortenerError::NotFound(_))
        ));
        assert!(matches!(
            service.resolve("no-such!", user(1)).await,
            Err(ShortenerError::InvalidShortCode(_))
        ));
    }

    #[tokio::test]
    async fn batch_echoes_correlation_ids() {
        let (service, _handle, _repository) = test_service();
        service.shorten("http://first.example", user(1)).await.unwrap();

        let items = vec![
            BatchItem {
                correlation_id: "x".to_string(),
                original_url: "http://a.example".to_string(),
            },
            BatchItem {
                correlation_id: "y".to_string(),
                original_url: "http://b.example".to_string(),
            },
        ];
        let shortened = service.shorten_batch(items, user(1)).await.unwrap();

        assert_eq!(
            shortened,
            vec![
                BatchShortened {
                    correlation_id: "x".to_string(),
                    short_url: "http://localhost:8080/c".to_string(),
                },
                BatchShortened {
                    correlation_id: "y".to_string(),
                    short_url: "http://localhost:8080/d".to_string(),
                },
            ]
        );
        assert_eq!(service.resolve("d", user(1)).await.unwrap(), "http://b.example");
    }

    #[tokio::test]
    async fn batch_retries_when_block_is_taken() {
        let (service, _handle) = ShortenerService::spawn(RacingRepository::new(2), settings()).unwrap();

        let items = batch(&[("x", "http://a.example"), ("y", "http://b.example")]);
        let shortened = service.shorten_batch(items, user(1)).await.unwrap();

        // Two racing writers took ids 1 and 2.
        assert_eq!(
            shortened,
            vec![
                BatchShortened {
                    correlation_id: "x".to_string(),
                    short_url: "http://localhost:8080/d".to_string(),
                },
                BatchShortened {
                    correlation_id: "y".to_string(),
                    short_url: "http://localhost:8080/e".to_string(),
                },
            ]
        );
        assert_eq!(service.resolve("d", user(1)).await.unwrap(), "http://a.example");
        assert_eq!(service.resolve("e", user(1)).await.unwrap(), "http://b.example");
        assert_eq!(
            service.resolve("b", user(1)).await.unwrap(),
            "http://other-0.example"
        );
    }

    #[tokio::test]
    async fn batch_gives_up_after_repeated_races() {
        let (service, _handle) =
            ShortenerService::spawn(RacingRepository::new(usize::MAX), settings()).unwrap();

        let items = batch(&[("x", "http://a.example")]);
        let err = service.shorten_batch(items, user(1)).await.unwrap_err();

        assert!(matches!(
            err,
            ShortenerError::Storage(StorageError::StaleIndex { .. })
        ));
        assert!(matches!(
            service.user_urls(user(1)).await,
            Err(ShortenerError::NoContent(_))
        ));
    }

    #[tokio::test]
    async fn batch_with_invalid_url_stores_nothing() {
        let (service, _handle, repository) = test_service();

        let items = vec![
            BatchItem {
                correlation_id: "x".to_string(),
                original_url: "http://a.example".to_string(),
            },
            BatchItem {
                correlation_id: "y".to_string(),
                original_url: "mailto:someone".to_string(),
            },
        ];
        let err = service.shorten_batch(items, user(1)).await.unwrap_err();

        assert!(matches!(err, ShortenerError::InvalidUrl(_)));
        assert_eq!(repository.get_stats().await.unwrap(), Stats::default());
    }

    #[tokio::test]
    async fn user_urls_lists_only_callers_urls() {
        let (service, _handle, _repository) = test_service();

        service.shorten("http://a.example", user(1)).await.unwrap();
        service.shorten("http://b.example", user(2)).await.unwrap();

        let urls = service.user_urls(user(1)).await.unwrap();
        assert_eq!(
            urls,
            vec![UserUrl {
                short_url: "http://localhost:8080/b".to_string(),
                original_url: "http://a.example".to_string(),
            }]
        );

        assert!(matches!(
            service.user_urls(user(3)).await,
            Err(ShortenerError::NoContent(_))
        ));
    }

    #[tokio::test]
    async fn stats_require_trusted_caller() {
        let (service, _handle, _repository) = test_service();
        service.shorten("http://a.example", user(1)).await.unwrap();

        let stats = service
            .stats(Some("10.1.2.3".parse().unwrap()))
            .await
            .unwrap();
        assert_eq!(stats, Stats { urls: 1, users: 1 });

        assert!(matches!(
            service.stats(Some("192.168.0.1".parse().unwrap())).await,
            Err(ShortenerError::Forbidden)
        ));
        assert!(matches!(
            service.stats(None).await,
            Err(ShortenerError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn stats_forbidden_without_trusted_subnet() {
        let repository = InMemoryRepository::new();
        let settings = Settings::builder().cookie_key(KEY).build();
        let (service, _handle) = ShortenerService::spawn(repository, settings).unwrap();

        assert!(matches!(
            service.stats(Some("127.0.0.1".parse().unwrap())).await,
            Err(ShortenerError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn authenticate_round_trip() {
        let (service, _handle, _repository) = test_service();

        let fresh = service.authenticate(None);
        assert!(fresh.is_new());
        let cookie = fresh.fresh_cookie.clone().unwrap();

        let known = service.authenticate(Some(&cookie));
        assert!(!known.is_new());
        assert_eq!(known.user_id, fresh.user_id);
    }

    #[tokio::test]
    async fn spawn_refuses_empty_cookie_key() {
        let settings = Settings::builder().cookie_key("").build();

        let result = ShortenerService::spawn(InMemoryRepository::new(), settings);
        assert!(matches!(result, Err(IdentityError::EmptyKey)));
    }

    #[tokio::test]
    async fn cookies_are_signed_with_configured_key() {
        let (service, _handle, _repository) = test_service();
        let cookie = service.authenticate(None).fresh_cookie.unwrap();

        let same_key = CookieSigner::new(KEY).unwrap();
        assert!(same_key.verify(&cookie).is_ok());
        let other_key = CookieSigner::new("another-key").unwrap();
        assert!(other_key.verify(&cookie).is_err());
    }

    #[tokio::test]
    async fn ping_reaches_repository() {
        let (service, _handle, _repository) = test_service();
        service.ping().await.unwrap();
    }
}

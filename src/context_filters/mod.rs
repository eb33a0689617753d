//! Context-access policy driven by backend-published repository filters.
//!
//! Repository names are tested against the `include` and `exclude` regular
//! expressions of the active rule document. Matching uses unanchored search:
//! `internal` matches `github.com/acme/internal-tools`. Pattern authors who
//! need whole-name matches must anchor with `^` and `$`.
//!
//! Any uncertainty denies: nothing fetched yet, a failed fetch, a malformed
//! document, or an invalid pattern all make every repository ignored. Two
//! cases allow everything: the backend reports no filters (`raw: null`), or
//! it predates the filters query.

mod collaborators;
mod decision;
mod error;
mod graphql;
mod refresh;
mod rules;
mod snapshot;

pub use collaborators::{
    ContextFiltersFetcher, ExcludePatternProvider, ExcludePatterns, FetchOutcome,
    NoExcludePatterns, RepoNameResolver,
};
pub use decision::IgnoreReason;
pub use error::ContextFiltersError;
pub use graphql::{CONTEXT_FILTERS_QUERY, GraphqlContextFiltersFetcher};
pub use refresh::{RefetchHintKind, RefetchIntervalHint, RefreshSchedule};
pub use rules::{CompiledRules, ContextFilterItem, FilterRules, RawContextFilters};
pub use snapshot::{FilterSnapshot, SnapshotView};

use crate::cache::{CacheOptions, ResultCache};
use ctxwire_config::ContextFiltersConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

const FILE_SCHEME: &str = "file";

pub struct ContextFiltersProviderBuilder {
    endpoint: Url,
    config: ContextFiltersConfig,
    fetcher: Arc<dyn ContextFiltersFetcher>,
    repo_resolver: Arc<dyn RepoNameResolver>,
    exclude_patterns: Arc<dyn ExcludePatternProvider>,
}

impl ContextFiltersProviderBuilder {
    pub fn config(mut self, config: ContextFiltersConfig) -> Self {
        self.config = config;
        self
    }

    pub fn exclude_patterns(mut self, provider: Arc<dyn ExcludePatternProvider>) -> Self {
        self.exclude_patterns = provider;
        self
    }

    pub fn build(self) -> ContextFiltersProvider {
        let is_public_instance = self
            .endpoint
            .host_str()
            .is_some_and(|host| self.config.is_public_instance_host(host));
        let (active, _) = watch::channel(Arc::new(FilterSnapshot::uninitialized(
            self.config.cache_capacity,
        )));

        ContextFiltersProvider {
            inner: Arc::new(ProviderInner {
                schedule: Mutex::new(RefreshSchedule::new(&self.config)),
                document: ResultCache::new(CacheOptions::default().never_expire()),
                endpoint: self.endpoint,
                is_public_instance,
                config: self.config,
                fetcher: self.fetcher,
                repo_resolver: self.repo_resolver,
                exclude_patterns: self.exclude_patterns,
                active,
                disposed: AtomicBool::new(false),
            }),
        }
    }
}

struct ProviderInner {
    endpoint: Url,
    is_public_instance: bool,
    config: ContextFiltersConfig,
    fetcher: Arc<dyn ContextFiltersFetcher>,
    repo_resolver: Arc<dyn RepoNameResolver>,
    exclude_patterns: Arc<dyn ExcludePatternProvider>,
    /// Coalesces refreshes; holds the snapshot produced by the last one.
    document: ResultCache<Arc<FilterSnapshot>>,
    schedule: Mutex<RefreshSchedule>,
    active: watch::Sender<Arc<FilterSnapshot>>,
    disposed: AtomicBool,
}

impl ProviderInner {
    fn current(&self) -> Arc<FilterSnapshot> {
        self.active.borrow().clone()
    }

    async fn refresh(&self, cancel: CancellationToken) -> Arc<FilterSnapshot> {
        let outcome = self.fetcher.fetch_context_filters(cancel).await;
        if self.disposed.load(Ordering::Acquire) {
            return self.current();
        }

        let rules = FilterRules::from_fetch(outcome.filters);
        let snapshot = self.publish(rules);
        self.schedule.lock().complete(outcome.hint, Instant::now());
        snapshot
    }

    /// Swap in `rules` with a fresh decision cache. Identical rules keep the
    /// current snapshot and its warm cache.
    fn publish(&self, rules: FilterRules) -> Arc<FilterSnapshot> {
        let capacity = self.config.cache_capacity;
        let changed = self.active.send_if_modified(|current| {
            if current.rules().same_as(&rules) {
                return false;
            }
            info!(
                endpoint = %self.endpoint,
                state = rules.kind(),
                previous = current.rules().kind(),
                "context filters changed"
            );
            *current = Arc::new(FilterSnapshot::new(rules, capacity));
            true
        });
        if !changed {
            debug!(endpoint = %self.endpoint, "context filters unchanged");
        }
        self.current()
    }

    fn replace_with_uninitialized(&self) {
        self.active.send_replace(Arc::new(FilterSnapshot::uninitialized(
            self.config.cache_capacity,
        )));
    }
}

/// Answers whether repositories and documents may be sent to the backend as
/// context.
///
/// Cloning yields another handle to the same provider.
#[derive(Clone)]
pub struct ContextFiltersProvider {
    inner: Arc<ProviderInner>,
}

impl ContextFiltersProvider {
    /// `endpoint` identifies the backend instance the filters belong to.
    pub fn builder(
        endpoint: Url,
        fetcher: Arc<dyn ContextFiltersFetcher>,
        repo_resolver: Arc<dyn RepoNameResolver>,
    ) -> ContextFiltersProviderBuilder {
        ContextFiltersProviderBuilder {
            endpoint,
            config: ContextFiltersConfig::default(),
            fetcher,
            repo_resolver,
            exclude_patterns: Arc::new(NoExcludePatterns),
        }
    }

    /// Provider backed by the instance's GraphQL API.
    pub fn for_instance(
        instance_url: Url,
        access_token: Option<String>,
        config: ContextFiltersConfig,
        repo_resolver: Arc<dyn RepoNameResolver>,
    ) -> Result<Self, url::ParseError> {
        let fetcher = GraphqlContextFiltersFetcher::new(
            reqwest::Client::new(),
            &instance_url,
            access_token,
            config.clone(),
        )?;
        Ok(Self::builder(instance_url, Arc::new(fetcher), repo_resolver)
            .config(config)
            .build())
    }

    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    pub fn is_public_instance(&self) -> bool {
        self.inner.is_public_instance
    }

    /// The active snapshot, refreshed first when the schedule allows.
    async fn fresh_snapshot(&self, cancel: Option<&CancellationToken>) -> Arc<FilterSnapshot> {
        let inner = &self.inner;
        if inner.disposed.load(Ordering::Acquire) {
            return inner.current();
        }

        let refresh_inner = Arc::clone(inner);
        let result = inner
            .document
            .get_or_refresh_if(
                cancel,
                || inner.schedule.lock().is_due(Instant::now()),
                move |token| async move { Ok(refresh_inner.refresh(token).await) },
            )
            .await;

        match result {
            Ok(snapshot) => snapshot,
            Err(error) => {
                debug!(error = %error, "context filters refresh did not finish; using active rules");
                inner.current()
            }
        }
    }

    /// Whether `repo_name` is filtered out. Never true on a public instance.
    pub async fn is_repo_name_ignored(&self, repo_name: &str) -> bool {
        if self.inner.is_public_instance {
            return false;
        }
        self.fresh_snapshot(None)
            .await
            .is_repo_name_ignored(repo_name)
    }

    /// Why `uri` must not be used as context, or `None` when it may.
    pub async fn is_uri_ignored(
        &self,
        uri: &Url,
        cancel: Option<&CancellationToken>,
    ) -> Option<IgnoreReason> {
        let inner = &self.inner;
        if inner.is_public_instance || inner.config.is_always_allowed_scheme(uri.scheme()) {
            return None;
        }

        let snapshot = self.fresh_snapshot(cancel).await;

        if let Some(excludes) = inner.exclude_patterns.exclude_patterns(uri)
            && let Ok(path) = uri.to_file_path()
            && excludes.matches(&path)
        {
            return Some(IgnoreReason::ExcludePatternMatch);
        }

        match snapshot.rules() {
            FilterRules::Unrestricted => return None,
            FilterRules::DenyAll => return Some(IgnoreReason::HasIgnoreEverythingFilters),
            FilterRules::Failed(error) => return Some(IgnoreReason::FetchFailed(error.clone())),
            FilterRules::Uninitialized => {
                return Some(IgnoreReason::FetchFailed(ContextFiltersError::NotLoaded));
            }
            FilterRules::Restricted(_) => {}
        }

        if uri.scheme() != FILE_SCHEME {
            return Some(IgnoreReason::NonFileUri);
        }

        let token = cancel.cloned().unwrap_or_default();
        let repo_names = match inner.repo_resolver.repo_names_for_uri(uri, &token).await {
            Ok(names) => names,
            Err(err) => {
                warn!(uri = %uri, error = %err, "failed to resolve repositories for uri");
                return Some(IgnoreReason::NoRepoFound);
            }
        };
        if repo_names.is_empty() {
            return Some(IgnoreReason::NoRepoFound);
        }

        repo_names
            .into_iter()
            .find(|name| snapshot.is_repo_name_ignored(name))
            .map(IgnoreReason::Repo)
    }

    /// Whether the active rules allow every repository.
    pub fn has_allow_everything_filters(&self) -> bool {
        self.inner.is_public_instance
            || matches!(self.inner.current().rules(), FilterRules::Unrestricted)
    }

    /// Whether the active rules deny every repository because of the backend
    /// document or a failed fetch.
    pub fn has_ignore_everything_filters(&self) -> bool {
        !self.inner.is_public_instance
            && matches!(
                self.inner.current().rules(),
                FilterRules::DenyAll | FilterRules::Failed(_)
            )
    }

    /// Receiver notified whenever the active rules change.
    pub fn subscribe(&self) -> watch::Receiver<Arc<FilterSnapshot>> {
        self.inner.active.subscribe()
    }

    pub fn snapshot(&self) -> SnapshotView {
        self.inner.current().view()
    }

    /// Forget the active rules and any pending refresh. The next decision
    /// fetches again.
    pub fn reset(&self) {
        let inner = &self.inner;
        *inner.schedule.lock() = RefreshSchedule::new(&inner.config);
        inner.document.invalidate();
        inner.replace_with_uninitialized();
    }

    /// Stop refreshing for good. Every later decision denies.
    pub fn dispose(&self) {
        let inner = &self.inner;
        inner.disposed.store(true, Ordering::Release);
        inner.document.invalidate();
        inner.replace_with_uninitialized();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct ScriptedFetcher {
        outcomes: Mutex<VecDeque<Result<Option<RawContextFilters>, ContextFiltersError>>>,
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedFetcher {
        fn new(
            outcomes: impl IntoIterator<Item = Result<Option<RawContextFilters>, ContextFiltersError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into_iter().collect()),
                ..Self::default()
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ContextFiltersFetcher for ScriptedFetcher {
        async fn fetch_context_filters(&self, _cancel: CancellationToken) -> FetchOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let filters = self
                .outcomes
                .lock()
                .pop_front()
                .unwrap_or(Err(ContextFiltersError::Backend("script exhausted".into())));
            let kind = match &filters {
                Ok(_) => RefetchHintKind::Success,
                Err(_) => RefetchHintKind::Transient,
            };
            FetchOutcome {
                filters,
                hint: RefetchIntervalHint::from_config(kind, &ContextFiltersConfig::default()),
            }
        }
    }

    #[derive(Default)]
    struct MapResolver(HashMap<String, Vec<String>>);

    #[async_trait]
    impl RepoNameResolver for MapResolver {
        async fn repo_names_for_uri(
            &self,
            uri: &Url,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<Vec<String>> {
            Ok(self.0.get(uri.as_str()).cloned().unwrap_or_default())
        }
    }

    struct StaticExcludes(Arc<ExcludePatterns>);

    impl ExcludePatternProvider for StaticExcludes {
        fn exclude_patterns(&self, _uri: &Url) -> Option<Arc<ExcludePatterns>> {
            Some(Arc::clone(&self.0))
        }
    }

    fn endpoint() -> Url {
        Url::parse("https://sourcegraph.example.com/").expect("valid url")
    }

    fn filters(include: Option<Vec<&str>>, exclude: Option<Vec<&str>>) -> RawContextFilters {
        RawContextFilters::new(include, exclude)
    }

    fn provider(fetcher: Arc<ScriptedFetcher>) -> ContextFiltersProvider {
        let resolver = MapResolver(HashMap::from([
            (
                "file:///work/cody/src/lib.rs".to_string(),
                vec!["github.com/sourcegraph/cody".to_string()],
            ),
            (
                "file:///work/secret/main.rs".to_string(),
                vec![
                    "github.com/sourcegraph/non-sensitive".to_string(),
                    "github.com/acme/secret".to_string(),
                ],
            ),
        ]));
        ContextFiltersProvider::builder(endpoint(), fetcher, Arc::new(resolver)).build()
    }

    #[tokio::test(start_paused = true)]
    async fn include_rules_gate_repo_names() {
        let fetcher = ScriptedFetcher::new([Ok(Some(filters(
            Some(vec![".*non-sensitive.*"]),
            Some(vec![]),
        )))]);
        let provider = provider(Arc::clone(&fetcher));

        assert!(!provider.is_repo_name_ignored("github.com/sourcegraph/non-sensitive").await);
        assert!(provider.is_repo_name_ignored("github.com/sensitive/whatever").await);
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(provider.snapshot().cached_decisions, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn public_instance_is_never_filtered() {
        let fetcher = ScriptedFetcher::new([]);
        let provider = ContextFiltersProvider::builder(
            Url::parse("https://sourcegraph.com/").expect("valid url"),
            Arc::clone(&fetcher) as Arc<dyn ContextFiltersFetcher>,
            Arc::new(MapResolver::default()),
        )
        .build();

        assert!(provider.is_public_instance());
        assert!(!provider.is_repo_name_ignored("github.com/anything").await);
        let uri = Url::parse("file:///tmp/a.rs").expect("valid url");
        assert_eq!(provider.is_uri_ignored(&uri, None).await, None);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_denies_everything() {
        let fetcher = ScriptedFetcher::new([Err(ContextFiltersError::Http { status: 500 })]);
        let provider = provider(fetcher);
        let uri = Url::parse("file:///work/cody/src/lib.rs").expect("valid url");

        assert_eq!(
            provider.is_uri_ignored(&uri, None).await,
            Some(IgnoreReason::FetchFailed(ContextFiltersError::Http { status: 500 }))
        );
        assert!(provider.is_repo_name_ignored("github.com/sourcegraph/cody").await);
        assert!(provider.has_ignore_everything_filters());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_or_unsupported_filters_allow_everything() {
        for outcome in [Ok(None), Err(ContextFiltersError::UnsupportedBackend)] {
            let provider = provider(ScriptedFetcher::new([outcome]));
            let uri = Url::parse("file:///work/unknown.rs").expect("valid url");

            assert_eq!(provider.is_uri_ignored(&uri, None).await, None);
            assert!(!provider.is_repo_name_ignored("github.com/acme/secret").await);
            assert!(provider.has_allow_everything_filters());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn uri_decisions_follow_documented_order() {
        let fetcher = ScriptedFetcher::new([Ok(Some(filters(None, Some(vec!["secret"]))))]);
        let resolver = MapResolver(HashMap::from([(
            "file:///work/secret/main.rs".to_string(),
            vec![
                "github.com/acme/public".to_string(),
                "github.com/acme/secret".to_string(),
            ],
        )]));
        let provider = ContextFiltersProvider::builder(
            endpoint(),
            Arc::clone(&fetcher) as Arc<dyn ContextFiltersFetcher>,
            Arc::new(resolver),
        )
        .exclude_patterns(Arc::new(StaticExcludes(Arc::new(ExcludePatterns::new(
            "/work",
            ["**/generated"],
        )))))
        .build();

        let http = Url::parse("https://example.com/page").expect("valid url");
        assert_eq!(provider.is_uri_ignored(&http, None).await, None);
        assert_eq!(fetcher.calls(), 0);

        let generated = Url::parse("file:///work/app/generated/out.rs").expect("valid url");
        assert_eq!(
            provider.is_uri_ignored(&generated, None).await,
            Some(IgnoreReason::ExcludePatternMatch)
        );

        let untitled = Url::parse("untitled:Untitled-1").expect("valid url");
        assert_eq!(
            provider.is_uri_ignored(&untitled, None).await,
            Some(IgnoreReason::NonFileUri)
        );

        let orphan = Url::parse("file:///tmp/scratch.rs").expect("valid url");
        assert_eq!(
            provider.is_uri_ignored(&orphan, None).await,
            Some(IgnoreReason::NoRepoFound)
        );

        let secret = Url::parse("file:///work/secret/main.rs").expect("valid url");
        assert_eq!(
            provider.is_uri_ignored(&secret, None).await,
            Some(IgnoreReason::Repo("github.com/acme/secret".into()))
        );
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deny_all_document_is_reported() {
        let provider = provider(ScriptedFetcher::new([Ok(Some(filters(
            Some(vec!["(broken"]),
            None,
        )))]));
        let uri = Url::parse("file:///work/cody/src/lib.rs").expect("valid url");

        assert_eq!(
            provider.is_uri_ignored(&uri, None).await,
            Some(IgnoreReason::HasIgnoreEverythingFilters)
        );
        assert!(provider.has_ignore_everything_filters());
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_only_when_schedule_allows() {
        let first = filters(Some(vec!["^github\\.com/sourcegraph/"]), None);
        let second = filters(Some(vec!["^github\\.com/acme/"]), None);
        let fetcher = ScriptedFetcher::new([Ok(Some(first.clone())), Ok(Some(first)), Ok(Some(second))]);
        let provider = provider(Arc::clone(&fetcher));
        let mut updates = provider.subscribe();

        assert!(!provider.is_repo_name_ignored("github.com/sourcegraph/cody").await);
        assert!(updates.has_changed().expect("sender alive"));
        let warm = updates.borrow_and_update().clone();

        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        assert!(!provider.is_repo_name_ignored("github.com/sourcegraph/cody").await);
        assert_eq!(fetcher.calls(), 1);

        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        assert!(!provider.is_repo_name_ignored("github.com/sourcegraph/cody").await);
        assert_eq!(fetcher.calls(), 2);
        assert!(!updates.has_changed().expect("sender alive"));
        assert!(Arc::ptr_eq(&warm, &*provider.subscribe().borrow()));

        tokio::time::advance(Duration::from_secs(60 * 60)).await;
        assert!(provider.is_repo_name_ignored("github.com/sourcegraph/cody").await);
        assert_eq!(fetcher.calls(), 3);
        assert!(updates.has_changed().expect("sender alive"));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_decisions_share_one_fetch() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(ScriptedFetcher {
            outcomes: Mutex::new(VecDeque::from([Ok(Some(filters(
                None,
                Some(vec!["secret"]),
            )))])),
            calls: AtomicUsize::new(0),
            gate: Some(Arc::clone(&gate)),
        });
        let provider = provider(Arc::clone(&fetcher));

        let tasks: Vec<_> = ["a", "b-secret", "c"]
            .into_iter()
            .map(|name| {
                let provider = provider.clone();
                tokio::spawn(async move { provider.is_repo_name_ignored(name).await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(5)).await;
        gate.notify_one();

        let mut decisions = Vec::new();
        for task in tasks {
            decisions.push(task.await.expect("task joins"));
        }
        assert_eq!(decisions, vec![false, true, false]);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn due_refresh_is_shared_by_concurrent_decisions() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(ScriptedFetcher {
            outcomes: Mutex::new(VecDeque::from([
                Ok(Some(filters(None, Some(vec!["secret"])))),
                Ok(Some(filters(None, Some(vec!["private"])))),
            ])),
            calls: AtomicUsize::new(0),
            gate: Some(Arc::clone(&gate)),
        });
        let provider = provider(Arc::clone(&fetcher));

        gate.notify_one();
        assert!(provider.is_repo_name_ignored("acme/secret").await);

        tokio::time::advance(Duration::from_secs(60 * 60)).await;
        let tasks: Vec<_> = ["acme/private", "acme/secret", "acme/private-docs"]
            .into_iter()
            .map(|name| {
                let provider = provider.clone();
                tokio::spawn(async move { provider.is_repo_name_ignored(name).await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(fetcher.calls(), 2);
        gate.notify_one();

        let mut decisions = Vec::new();
        for task in tasks {
            decisions.push(task.await.expect("task joins"));
        }
        assert_eq!(decisions, vec![true, false, true]);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_and_dispose() {
        let fetcher = ScriptedFetcher::new([Ok(None), Ok(None)]);
        let provider = provider(Arc::clone(&fetcher));

        assert!(!provider.is_repo_name_ignored("x").await);
        provider.reset();
        assert_eq!(provider.snapshot().state, "uninitialized");
        assert!(!provider.is_repo_name_ignored("x").await);
        assert_eq!(fetcher.calls(), 2);

        provider.dispose();
        assert!(provider.is_repo_name_ignored("x").await);
        let uri = Url::parse("file:///work/cody/src/lib.rs").expect("valid url");
        assert_eq!(
            provider.is_uri_ignored(&uri, None).await,
            Some(IgnoreReason::FetchFailed(ContextFiltersError::NotLoaded))
        );
        assert_eq!(fetcher.calls(), 2);
    }
}

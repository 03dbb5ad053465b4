use crate::error::PollError;
use async_trait::async_trait;
use reelshelf_config::{PollerConfig, RoutesConfig};
use reelshelf_models::{ReleaseReport, ReleasedContent};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Collaborator that moves scheduled content from pending to available.
#[async_trait]
pub trait ReleaseEndpoint: Send + Sync {
    /// Content released by this check, possibly none
    async fn check_releases(&self) -> Result<ReleasedContent, PollError>;
}

/// Receives the side effects of a poll that released content.
pub trait RefreshSink: Send + Sync {
    /// Tell the user new content is available
    fn notify(&self, released: &ReleasedContent);
    /// Re-fetch whatever the page is currently displaying
    fn refresh(&self);
}

/// Auto-release endpoint reached over HTTP.
#[derive(Clone)]
pub struct HttpReleaseEndpoint {
    client: Client,
    url: String,
    trigger: Option<String>,
}

impl HttpReleaseEndpoint {
    pub fn new(url: impl Into<String>, trigger: Option<String>, timeout: Duration) -> Result<Self, PollError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            trigger,
        })
    }

    pub fn from_config(config: &PollerConfig) -> Result<Self, PollError> {
        Self::new(
            config.endpoint.clone(),
            Some(config.trigger.clone()).filter(|t| !t.is_empty()),
            Duration::from_secs(config.timeout_seconds),
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ReleaseEndpoint for HttpReleaseEndpoint {
    async fn check_releases(&self) -> Result<ReleasedContent, PollError> {
        let mut request = self.client.post(&self.url);
        if let Some(trigger) = &self.trigger {
            request = request.json(&serde_json::json!({ "trigger": trigger }));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let report: ReleaseReport = serde_json::from_str(&body)?;
        if !report.success {
            return Err(PollError::Rejected(report.message));
        }
        report
            .released
            .ok_or_else(|| PollError::Decode(<serde_json::Error as serde::de::Error>::missing_field("released")))
    }
}

/// Whether the hosting page may poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Public,
    /// Admin pages trigger releases themselves
    Admin,
}

impl PageKind {
    pub fn for_route(route: &str, routes: &RoutesConfig) -> Self {
        if routes.is_admin(route) {
            PageKind::Admin
        } else {
            PageKind::Public
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// This many items became available; notify and refresh fired once
    Released(usize),
    NothingNew,
    Failed,
}

/// Periodic auto-release check bound to the lifetime of one page.
pub struct RefreshPoller {
    endpoint: Arc<dyn ReleaseEndpoint>,
    sink: Arc<dyn RefreshSink>,
    interval: Duration,
}

impl RefreshPoller {
    pub fn new(endpoint: Arc<dyn ReleaseEndpoint>, sink: Arc<dyn RefreshSink>) -> Self {
        Self {
            endpoint,
            sink,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one check. Failures are logged and reported as `Failed`, never raised.
    pub async fn poll_once(&self) -> PollOutcome {
        match self.endpoint.check_releases().await {
            Ok(released) if released.is_empty() => {
                debug!(operation = "release_poll", "No newly released content");
                PollOutcome::NothingNew
            }
            Ok(released) => {
                info!(
                    operation = "release_poll",
                    movies = released.movies.len(),
                    tv_shows = released.tv_shows.len(),
                    "New content released, refreshing"
                );
                self.sink.notify(&released);
                self.sink.refresh();
                PollOutcome::Released(released.total())
            }
            Err(e) => {
                warn!(
                    operation = "release_poll_error",
                    error = %e,
                    "Release check failed, will retry next tick"
                );
                PollOutcome::Failed
            }
        }
    }

    /// Start polling for a page. Returns `None` on admin pages, which never poll.
    ///
    /// The first check happens one interval after start. The returned handle
    /// owns the timer: stopping or dropping it cancels polling, including a
    /// request still in flight.
    pub fn start(self: Arc<Self>, page: PageKind) -> Option<PollerHandle> {
        if page == PageKind::Admin {
            debug!(operation = "release_poller_suspended", "Admin page, release polling suspended");
            return None;
        }

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let interval = self.interval;

        let task = tokio::spawn(async move {
            info!(
                operation = "release_poller_started",
                interval_secs = interval.as_secs_f64(),
                "Release poller started"
            );
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = self.poll_once() => {}
                        }
                    }
                }
            }
            info!(operation = "release_poller_stopped", "Release poller stopped");
        });

        Some(PollerHandle {
            shutdown,
            task: Some(task),
        })
    }
}

/// Scoped ownership of a running poller. Dropping it cancels the timer.
pub struct PollerHandle {
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Cancel polling and wait for the task to wind down
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Release poller task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelshelf_models::ReleasedItem;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Replays canned results, then reports nothing new
    #[derive(Default)]
    struct ScriptedEndpoint {
        script: Mutex<VecDeque<Result<ReleasedContent, PollError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedEndpoint {
        fn with(results: Vec<Result<ReleasedContent, PollError>>) -> Self {
            Self {
                script: Mutex::new(results.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ReleaseEndpoint for ScriptedEndpoint {
        async fn check_releases(&self) -> Result<ReleasedContent, PollError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(content(0, 0)))
        }
    }

    /// Never answers
    struct HangingEndpoint;

    #[async_trait]
    impl ReleaseEndpoint for HangingEndpoint {
        async fn check_releases(&self) -> Result<ReleasedContent, PollError> {
            std::future::pending().await
        }
    }

    #[derive(Default)]
    struct CountingSink {
        notified: AtomicUsize,
        refreshed: AtomicUsize,
    }

    impl RefreshSink for CountingSink {
        fn notify(&self, _released: &ReleasedContent) {
            self.notified.fetch_add(1, Ordering::SeqCst);
        }

        fn refresh(&self) {
            self.refreshed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn item(id: &str) -> ReleasedItem {
        ReleasedItem { id: id.to_string(), title: None }
    }

    fn content(movies: usize, tv_shows: usize) -> ReleasedContent {
        ReleasedContent {
            movies: (0..movies).map(|i| item(&format!("m{}", i))).collect(),
            tv_shows: (0..tv_shows).map(|i| item(&format!("t{}", i))).collect(),
        }
    }

    #[tokio::test]
    async fn test_release_fires_notify_and_refresh_once() {
        let sink = Arc::new(CountingSink::default());
        let endpoint = Arc::new(ScriptedEndpoint::with(vec![Ok(content(1, 0))]));
        let poller = RefreshPoller::new(endpoint, sink.clone());

        assert_eq!(poller.poll_once().await, PollOutcome::Released(1));
        assert_eq!(sink.notified.load(Ordering::SeqCst), 1);
        assert_eq!(sink.refreshed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_release_fires_nothing() {
        let sink = Arc::new(CountingSink::default());
        let endpoint = Arc::new(ScriptedEndpoint::with(vec![Ok(content(0, 0))]));
        let poller = RefreshPoller::new(endpoint, sink.clone());

        assert_eq!(poller.poll_once().await, PollOutcome::NothingNew);
        assert_eq!(sink.notified.load(Ordering::SeqCst), 0);
        assert_eq!(sink.refreshed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let sink = Arc::new(CountingSink::default());
        let endpoint = Arc::new(ScriptedEndpoint::with(vec![
            Err(PollError::Status(500)),
            Err(PollError::Rejected(Some("cron disabled".to_string()))),
        ]));
        let poller = RefreshPoller::new(endpoint, sink.clone());

        assert_eq!(poller.poll_once().await, PollOutcome::Failed);
        assert_eq!(poller.poll_once().await, PollOutcome::Failed);
        assert_eq!(sink.notified.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_admin_page_does_not_poll() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        let poller = Arc::new(
            RefreshPoller::new(endpoint.clone(), Arc::new(CountingSink::default()))
                .with_interval(Duration::from_millis(5)),
        );

        let page = PageKind::for_route("/admin/releases", &RoutesConfig::default());
        assert_eq!(page, PageKind::Admin);
        assert!(poller.start(page).is_none());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timer_keeps_running_through_failures_and_stops_on_teardown() {
        let endpoint = Arc::new(ScriptedEndpoint::with(vec![
            Err(PollError::Status(502)),
            Err(PollError::Status(503)),
            Ok(content(0, 1)),
        ]));
        let sink = Arc::new(CountingSink::default());
        let poller = Arc::new(
            RefreshPoller::new(endpoint.clone(), sink.clone()).with_interval(Duration::from_millis(10)),
        );

        let handle = poller.start(PageKind::Public).expect("public pages poll");
        assert!(handle.is_running());

        let deadline = Instant::now() + Duration::from_secs(2);
        while sink.refreshed.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(sink.refreshed.load(Ordering::SeqCst), 1);
        assert!(endpoint.calls.load(Ordering::SeqCst) >= 3);

        handle.stop().await;
        let calls_at_stop = endpoint.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), calls_at_stop);
    }

    #[tokio::test]
    async fn test_first_check_waits_one_interval() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        let poller = Arc::new(
            RefreshPoller::new(endpoint.clone(), Arc::new(CountingSink::default()))
                .with_interval(Duration::from_secs(3600)),
        );

        let handle = poller.start(PageKind::Public).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_cancels_in_flight_request() {
        let poller = Arc::new(
            RefreshPoller::new(Arc::new(HangingEndpoint), Arc::new(CountingSink::default()))
                .with_interval(Duration::from_millis(5)),
        );
        let handle = poller.start(PageKind::Public).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .expect("stop must not wait for the hanging request");
    }

    #[tokio::test]
    async fn test_drop_cancels_poller() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        let poller = Arc::new(
            RefreshPoller::new(endpoint.clone(), Arc::new(CountingSink::default()))
                .with_interval(Duration::from_millis(5)),
        );

        drop(poller.start(PageKind::Public));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
    }

    /// Serve one canned HTTP response and hand back the request it answered
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api/auto-release", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });

        (url, server)
    }

    #[tokio::test]
    async fn test_http_endpoint_posts_trigger_and_decodes_report() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"success":true,"released":{"movies":[{"id":1,"title":"Dune"}],"tvShows":[]}}"#,
        )
        .await;
        let endpoint = HttpReleaseEndpoint::new(url, Some("client-poll".to_string()), Duration::from_secs(5)).unwrap();

        let released = endpoint.check_releases().await.unwrap();
        assert_eq!(released.movies[0].id, "1");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/auto-release"));
        assert!(request.contains(r#""trigger":"client-poll""#));
    }

    #[tokio::test]
    async fn test_http_endpoint_error_status_is_failure() {
        let (url, _server) = serve_once("500 Internal Server Error", r#"{"error":"boom"}"#).await;
        let endpoint = HttpReleaseEndpoint::new(url, None, Duration::from_secs(5)).unwrap();

        let err = endpoint.check_releases().await.unwrap_err();
        assert!(matches!(err, PollError::Status(500)));
    }

    #[tokio::test]
    async fn test_http_endpoint_malformed_body_is_failure() {
        let (url, _server) = serve_once("200 OK", "<html>oops</html>").await;
        let endpoint = HttpReleaseEndpoint::new(url, None, Duration::from_secs(5)).unwrap();

        let err = endpoint.check_releases().await.unwrap_err();
        assert!(matches!(err, PollError::Decode(_)));
    }

    #[tokio::test]
    async fn test_http_endpoint_unsuccessful_report_is_failure() {
        let (url, _server) = serve_once("200 OK", r#"{"success":false,"message":"not authorised"}"#).await;
        let endpoint = HttpReleaseEndpoint::new(url, None, Duration::from_secs(5)).unwrap();

        let err = endpoint.check_releases().await.unwrap_err();
        assert!(matches!(err, PollError::Rejected(Some(ref m)) if m == "not authorised"));
    }

    #[tokio::test]
    async fn test_http_endpoint_success_without_released_is_failure() {
        let (url, _server) = serve_once("200 OK", r#"{"success":true}"#).await;
        let endpoint = HttpReleaseEndpoint::new(url, None, Duration::from_secs(5)).unwrap();

        let err = endpoint.check_releases().await.unwrap_err();
        assert!(matches!(err, PollError::Decode(_)));
    }

    #[tokio::test]
    async fn test_missing_released_polls_as_failure_without_side_effects() {
        let (url, _server) = serve_once("200 OK", r#"{"success":true}"#).await;
        let endpoint = HttpReleaseEndpoint::new(url, None, Duration::from_secs(5)).unwrap();
        let sink = Arc::new(CountingSink::default());
        let poller = RefreshPoller::new(Arc::new(endpoint), sink.clone());

        assert_eq!(poller.poll_once().await, PollOutcome::Failed);
        assert_eq!(sink.notified.load(Ordering::SeqCst), 0);
        assert_eq!(sink.refreshed.load(Ordering::SeqCst), 0);
    }
}

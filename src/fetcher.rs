use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures_util::stream::{self, Stream};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use tracing::{debug, error, info, warn};

use crate::config::{Config, DEFAULT_RETRY_AFTER_SECS, HTTP_TIMEOUT_SECS, REQUEST_LIMIT};
use crate::error::{AppError, Result};
use crate::symbol::{is_funding, pair_std_to_exchange};
use crate::types::{RawTrade, RawTradeRecord, Trade};

/// Retry budget for timed-out page requests. `None` re-issues the identical
/// request forever; the endpoint is idempotent and stateless per request,
/// so the historical default is fail-open.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    pub max_timeout_retries: Option<u32>,
}

/// Injection point for the rate-limit wait, so tests can observe sleeps
/// without real delays.
pub trait Sleeper: Clone + Send + Sync + 'static {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

/// Client for the public historical-trades endpoint.
///
/// One call to [`trades`](TradesClient::trades) runs the whole
/// fetch/dedup/normalize protocol for a time window as a lazy pull-driven
/// stream of pages: nothing is requested until the caller asks for the next
/// page, and dropping the stream issues no further requests. Clones are
/// independent; concurrent calls never share cursor state.
#[derive(Debug, Clone)]
pub struct TradesClient<S: Sleeper = TokioSleeper> {
    http: reqwest::Client,
    base_url: String,
    limit: u32,
    retry: RetryPolicy,
    use_local_time: bool,
    sleeper: S,
}

impl TradesClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            base_url: cfg.api_url.trim_end_matches('/').to_string(),
            limit: cfg.request_limit,
            retry: RetryPolicy {
                max_timeout_retries: cfg.max_timeout_retries,
            },
            use_local_time: cfg.use_local_time,
            sleeper: TokioSleeper,
        })
    }

    /// Client against a custom base URL, e.g. a mock server in tests.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limit: REQUEST_LIMIT,
            retry: RetryPolicy::default(),
            use_local_time: false,
            sleeper: TokioSleeper,
        }
    }
}

impl<S: Sleeper> TradesClient<S> {
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the page size. Short pages terminate pagination, so tests
    /// exercise multi-page windows with small limits.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Override the per-request timeout, e.g. to force the timeout-retry
    /// path against a slow server.
    pub fn with_http_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    pub fn with_sleeper<T: Sleeper>(self, sleeper: T) -> TradesClient<T> {
        TradesClient {
            http: self.http,
            base_url: self.base_url,
            limit: self.limit,
            retry: self.retry,
            use_local_time: self.use_local_time,
            sleeper,
        }
    }

    /// Stream pages of normalized trades for `symbol` executed within
    /// `[start, end)`.
    ///
    /// Standard pairs are translated to the exchange-native symbol; funding
    /// symbols (leading `f`) pass through untranslated. If either bound is
    /// absent the stream is empty. The exclusive `end` is applied by
    /// shaving one nanosecond before converting both bounds to epoch
    /// milliseconds.
    ///
    /// The endpoint has no pagination cursor, so the window is advanced to
    /// the timestamp of the last trade of each page. That lower bound is
    /// re-queried on purpose (trades sharing the boundary timestamp would
    /// otherwise be lost) and the resulting overlap is filtered by ID
    /// against the previous page only. A page that dedupes to nothing is
    /// still yielded; continuation is decided by the pre-dedup length.
    pub fn trades(
        &self,
        symbol: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> impl Stream<Item = Result<Vec<Trade>>> + Send {
        let symbol = if is_funding(symbol) {
            symbol.to_string()
        } else {
            pair_std_to_exchange(symbol)
        };

        let window = start.zip(end).map(|(start, end)| {
            (
                start.timestamp_millis(),
                (end - TimeDelta::nanoseconds(1)).timestamp_millis(),
            )
        });

        let state = match window {
            Some((start_ms, end_ms)) => PaginationState {
                client: self.clone(),
                symbol,
                cursor_ms: start_ms,
                end_ms,
                last_ids: HashSet::new(),
                done: start_ms > end_ms,
            },
            None => PaginationState {
                client: self.clone(),
                symbol,
                cursor_ms: 0,
                end_ms: 0,
                last_ids: HashSet::new(),
                done: true,
            },
        };

        stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }

            debug!(
                symbol = %state.symbol,
                cursor_ms = state.cursor_ms,
                end_ms = state.end_ms,
                "fetching trades page"
            );

            let raw = match state
                .client
                .fetch_page(&state.symbol, state.cursor_ms, state.end_ms)
                .await
            {
                Ok(raw) => raw,
                Err(err) => {
                    state.done = true;
                    return Some((Err(err), state));
                }
            };

            let Some(last) = raw.last() else {
                debug!(symbol = %state.symbol, "empty page, window exhausted");
                return None;
            };

            let previous_cursor = state.cursor_ms;
            state.cursor_ms = last.timestamp_ms;

            // A full page that fails to advance the window would re-issue the
            // same request forever (more same-timestamp trades than fit in one
            // page). Fail fast instead of spinning or re-emitting.
            if raw.len() >= state.client.limit as usize && state.cursor_ms == previous_cursor {
                state.done = true;
                return Some((
                    Err(AppError::CursorStalled {
                        cursor_ms: state.cursor_ms,
                    }),
                    state,
                ));
            }

            if raw.len() < state.client.limit as usize || state.cursor_ms > state.end_ms {
                state.done = true;
            }

            let page_ids = raw.iter().map(|trade| trade.id).collect();
            let deduped = dedupe(raw, &state.last_ids);
            state.last_ids = page_ids;

            let page = deduped
                .into_iter()
                .map(|record| {
                    let raw = RawTrade::classify(&state.symbol, record)?;
                    Trade::from_raw(&state.symbol, &raw, state.client.use_local_time)
                })
                .collect::<Result<Vec<Trade>>>();

            match page {
                Ok(page) => {
                    info!(
                        symbol = %state.symbol,
                        trades = page.len(),
                        cursor_ms = state.cursor_ms,
                        "yielding trades page"
                    );
                    Some((Ok(page), state))
                }
                Err(err) => {
                    state.done = true;
                    Some((Err(err), state))
                }
            }
        })
    }

    /// Fetch one raw page, absorbing retryable conditions: timeouts are
    /// re-issued within the retry budget and 429s wait out the advertised
    /// `Retry-After` before repeating the identical request. Anything else
    /// non-2xx is fatal.
    async fn fetch_page(
        &self,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<RawTradeRecord>> {
        let url = format!(
            "{}/v2/trades/{}/hist?limit={}&start={}&end={}&sort=1",
            self.base_url, symbol, self.limit, start_ms, end_ms
        );

        let mut timeouts = 0u32;
        loop {
            let response = match self.http.get(&url).send().await {
                Ok(response) => response,
                Err(err) if err.is_timeout() => {
                    timeouts += 1;
                    if let Some(max) = self.retry.max_timeout_retries {
                        if timeouts > max {
                            return Err(AppError::Timeout { attempts: timeouts });
                        }
                    }
                    debug!(%url, timeouts, "request timed out, retrying");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                let wait = retry_after(response.headers())
                    .unwrap_or(Duration::from_secs(DEFAULT_RETRY_AFTER_SECS));
                warn!(
                    symbol,
                    wait_secs = wait.as_secs(),
                    "rate limited, honoring Retry-After"
                );
                self.sleeper.sleep(wait).await;
                continue;
            }

            if !response.status().is_success() {
                let status = response.status();
                let headers = response.headers().clone();
                let body = response.text().await.unwrap_or_default();
                error!(%status, ?headers, body = %body, "trades request failed");
                return Err(AppError::Api { status, body });
            }

            return Ok(response.json::<Vec<RawTradeRecord>>().await?);
        }
    }
}

/// Pagination state threaded through [`stream::unfold`] between pages.
struct PaginationState<S: Sleeper> {
    client: TradesClient<S>,
    symbol: String,
    cursor_ms: i64,
    end_ms: i64,
    /// IDs of the previous page before dedup. Bounded by the page limit.
    last_ids: HashSet<i64>,
    done: bool,
}

/// Drop records whose ID appeared in the previous page's raw output (the
/// overlap produced by re-querying the boundary timestamp) as well as
/// repeats within this page.
fn dedupe(page: Vec<RawTradeRecord>, last_ids: &HashSet<i64>) -> Vec<RawTradeRecord> {
    if last_ids.is_empty() {
        return page;
    }

    let mut seen = last_ids.clone();
    page.into_iter().filter(|trade| seen.insert(trade.id)).collect()
}

/// `Retry-After` is specified in whole seconds by the exchange.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

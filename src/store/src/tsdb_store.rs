//! Store API served from a local TSDB.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures::{FutureExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tonic::{Request, Response, Status};
use tracing::Instrument;

use common::StoreConfig;

use crate::chunkenc;
use crate::error::StoreError;
use crate::labels::{Labels, Matcher, match_external_labels};
use crate::storepb::{
    AggrChunk, InfoRequest, InfoResponse, LabelMatcher, LabelNamesRequest, LabelNamesResponse,
    LabelValuesRequest, LabelValuesResponse, PartialResponseStrategy, Series, SeriesRequest,
    SeriesResponse, Store, StoreType, labels_to_proto,
};
use crate::tsdb::{LabelQueryResult, Queryable, SampleIter, TsdbError};

/// Series responses buffered between the producer task and the caller.
const SERIES_BUFFER: usize = 8;

/// Exposes a local TSDB through the store API.
///
/// Immutable after construction and shared freely between concurrent calls.
/// A caller may attach a [`CancellationToken`] to a request's extensions to
/// abort the call.
///
/// External labels override engine labels of the same name, so distinct
/// engine series can end up with identical label sets. Series reports each
/// such set with a warning and still sends every series.
#[derive(Clone)]
pub struct TsdbStore {
    db: Arc<dyn Queryable>,
    external_labels: Labels,
    store_type: StoreType,
    min_time: i64,
    max_time: i64,
}

impl fmt::Debug for TsdbStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TsdbStore")
            .field("external_labels", &self.external_labels)
            .field("store_type", &self.store_type)
            .field("min_time", &self.min_time)
            .field("max_time", &self.max_time)
            .finish_non_exhaustive()
    }
}

impl TsdbStore {
    /// Store advertising the whole `[0, i64::MAX]` time range.
    pub fn new(db: Arc<dyn Queryable>, store_type: StoreType, external_labels: Labels) -> Self {
        Self {
            db,
            external_labels,
            store_type,
            min_time: 0,
            max_time: i64::MAX,
        }
    }

    pub fn with_time_range(mut self, min_time: i64, max_time: i64) -> Self {
        self.min_time = min_time;
        self.max_time = max_time;
        self
    }

    pub fn from_config(db: Arc<dyn Queryable>, config: &StoreConfig) -> Self {
        Self::new(
            db,
            config.store_type.into(),
            Labels::from_map(&config.external_labels),
        )
        .with_time_range(
            config.min_time.unwrap_or(0),
            config.max_time.unwrap_or(i64::MAX),
        )
    }

    pub fn external_labels(&self) -> &Labels {
        &self.external_labels
    }

    /// Intersect a requested range with the advertised one.
    fn clamp(&self, mint: i64, maxt: i64) -> Option<(i64, i64)> {
        let mint = mint.max(self.min_time);
        let maxt = maxt.min(self.max_time);
        (mint <= maxt).then_some((mint, maxt))
    }

    fn plan_series(&self, req: &SeriesRequest) -> Result<Option<SeriesPlan>, StoreError> {
        let strategy = parse_strategy(req.partial_response_strategy)?;
        let matchers = parse_matchers(&req.matchers)?;
        if req.min_time > req.max_time {
            return Err(StoreError::InvalidArgument(format!(
                "min_time {} is after max_time {}",
                req.min_time, req.max_time
            )));
        }
        if req.max_resolution_window < 0 {
            return Err(StoreError::InvalidArgument(format!(
                "negative max_resolution_window {}",
                req.max_resolution_window
            )));
        }

        let Some(matchers) = match_external_labels(&matchers, &self.external_labels) else {
            tracing::debug!("matchers exclude external labels {}", self.external_labels);
            return Ok(None);
        };
        let Some((mint, maxt)) = self.clamp(req.min_time, req.max_time) else {
            tracing::debug!("requested range outside of store range");
            return Ok(None);
        };

        Ok(Some(SeriesPlan {
            mint,
            maxt,
            matchers,
            strategy,
        }))
    }

    async fn query_labels(
        &self,
        cancel: CancellationToken,
        query: LabelQuery<'_>,
        range: (Option<i64>, Option<i64>),
        matchers: &[LabelMatcher],
        strategy: i32,
    ) -> Result<LabelQueryResult, StoreError> {
        let strategy = parse_strategy(strategy)?;
        let matchers = parse_matchers(matchers)?;
        let start = range.0.unwrap_or(self.min_time);
        let end = range.1.unwrap_or(self.max_time);
        if start > end {
            return Err(StoreError::InvalidArgument(format!(
                "start {start} is after end {end}"
            )));
        }

        let Some(matchers) = match_external_labels(&matchers, &self.external_labels) else {
            return Ok(LabelQueryResult::default());
        };
        let Some((mint, maxt)) = self.clamp(start, end) else {
            return Ok(LabelQueryResult::default());
        };

        let result = match self.db.querier(cancel, mint, maxt).await {
            Ok(querier) => match query {
                LabelQuery::Names => querier.label_names(&matchers).await,
                LabelQuery::Values(name) => querier.label_values(name, &matchers).await,
            },
            Err(e) => Err(e),
        };

        let mut result = match result {
            Ok(result) => result,
            Err(e) if e.is_partial() && strategy == PartialResponseStrategy::Warn => {
                LabelQueryResult {
                    values: Vec::new(),
                    warnings: vec![e.to_string()],
                }
            }
            Err(e) => return Err(e.into()),
        };

        if strategy == PartialResponseStrategy::Abort && !result.warnings.is_empty() {
            return Err(StoreError::PartialFailure(result.warnings.join("; ")));
        }
        for warning in &result.warnings {
            tracing::warn!(%warning, "label query returned partial results");
        }

        result.values.sort();
        result.values.dedup();
        Ok(result)
    }
}

#[derive(Debug, Clone, Copy)]
enum LabelQuery<'a> {
    Names,
    Values(&'a str),
}

#[derive(Debug)]
struct SeriesPlan {
    mint: i64,
    maxt: i64,
    matchers: Vec<Matcher>,
    strategy: PartialResponseStrategy,
}

fn parse_strategy(raw: i32) -> Result<PartialResponseStrategy, StoreError> {
    match PartialResponseStrategy::try_from(raw) {
        Ok(s @ (PartialResponseStrategy::Warn | PartialResponseStrategy::Abort)) => Ok(s),
        _ => Err(StoreError::InvalidArgument(format!(
            "partial response strategy must be WARN or ABORT, got {raw}"
        ))),
    }
}

fn parse_matchers(matchers: &[LabelMatcher]) -> Result<Vec<Matcher>, StoreError> {
    matchers
        .iter()
        .map(|m| {
            if m.name.is_empty() {
                return Err(StoreError::InvalidArgument(
                    "matcher with empty label name".to_string(),
                ));
            }
            Matcher::try_from(m).map_err(StoreError::InvalidArgument)
        })
        .collect()
}

/// Token for one call, detached from the caller's token so that cancelling
/// the call does not cancel the caller.
fn call_token<T>(request: &Request<T>) -> CancellationToken {
    request
        .extensions()
        .get::<CancellationToken>()
        .map(CancellationToken::child_token)
        .unwrap_or_default()
}

#[tonic::async_trait]
impl Store for TsdbStore {
    type SeriesStream = SeriesStream;

    #[tracing::instrument(skip_all)]
    async fn info(
        &self,
        _request: Request<InfoRequest>,
    ) -> Result<Response<InfoResponse>, Status> {
        if self.db.is_closed() {
            return Err(StoreError::Unavailable("local database is closed".to_string()).into());
        }

        Ok(Response::new(InfoResponse {
            labels: labels_to_proto(&self.external_labels),
            min_time: self.min_time,
            max_time: self.max_time,
            store_type: self.store_type as i32,
        }))
    }

    #[tracing::instrument(skip_all, fields(
        min_time = request.get_ref().min_time,
        max_time = request.get_ref().max_time,
    ))]
    async fn series(
        &self,
        request: Request<SeriesRequest>,
    ) -> Result<Response<Self::SeriesStream>, Status> {
        let cancel = call_token(&request);
        let req = request.into_inner();
        let plan = self.plan_series(&req)?;
        if self.db.is_closed() {
            return Err(StoreError::Unavailable("local database is closed".to_string()).into());
        }

        let (tx, rx) = mpsc::channel(SERIES_BUFFER);
        let (terminal_tx, terminal_rx) = oneshot::channel();
        match plan {
            Some(plan) => {
                let producer = SeriesProducer {
                    db: self.db.clone(),
                    plan,
                    external_labels: self.external_labels.clone(),
                    tx,
                    cancel: cancel.clone(),
                };
                tokio::spawn(producer.run(terminal_tx).in_current_span());
            }
            None => {
                let _ = terminal_tx.send(Terminal::Completed);
            }
        }

        Ok(Response::new(SeriesStream::new(rx, terminal_rx, cancel)))
    }

    #[tracing::instrument(skip_all)]
    async fn label_names(
        &self,
        request: Request<LabelNamesRequest>,
    ) -> Result<Response<LabelNamesResponse>, Status> {
        let cancel = call_token(&request);
        let req = request.into_inner();
        let result = self
            .query_labels(
                cancel,
                LabelQuery::Names,
                (req.start, req.end),
                &req.matchers,
                req.partial_response_strategy,
            )
            .await?;

        Ok(Response::new(LabelNamesResponse {
            names: result.values,
            warnings: result.warnings,
        }))
    }

    #[tracing::instrument(skip_all, fields(label = %request.get_ref().label))]
    async fn label_values(
        &self,
        request: Request<LabelValuesRequest>,
    ) -> Result<Response<LabelValuesResponse>, Status> {
        let cancel = call_token(&request);
        let req = request.into_inner();
        if req.label.is_empty() {
            return Err(StoreError::InvalidArgument("label name is empty".to_string()).into());
        }

        let result = self
            .query_labels(
                cancel,
                LabelQuery::Values(&req.label),
                (req.start, req.end),
                &req.matchers,
                req.partial_response_strategy,
            )
            .await?;

        Ok(Response::new(LabelValuesResponse {
            values: result.values,
            warnings: result.warnings,
        }))
    }
}

/// How a series stream ended.
#[derive(Debug)]
enum Terminal {
    Completed,
    Cancelled,
    Failed(Status),
}

/// Drains the local database for one Series call.
struct SeriesProducer {
    db: Arc<dyn Queryable>,
    plan: SeriesPlan,
    external_labels: Labels,
    tx: mpsc::Sender<SeriesResponse>,
    cancel: CancellationToken,
}

impl SeriesProducer {
    async fn run(self, terminal: oneshot::Sender<Terminal>) {
        // Losing the race drops the producing future, releasing the querier
        // and every series iterator before the terminal state is published.
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StoreError::Cancelled),
            res = self.produce() => res,
        };

        let state = match outcome {
            Ok(sent) => {
                tracing::debug!(series = sent, "series stream completed");
                Terminal::Completed
            }
            Err(StoreError::Cancelled) => {
                tracing::debug!("series stream cancelled");
                Terminal::Cancelled
            }
            Err(e) => {
                tracing::warn!(error = %e, "series stream failed");
                Terminal::Failed(e.into())
            }
        };
        // The receiver is gone when the caller dropped the stream.
        let _ = terminal.send(state);
    }

    async fn produce(&self) -> Result<usize, StoreError> {
        let SeriesPlan {
            mint,
            maxt,
            ref matchers,
            ..
        } = self.plan;

        let querier = match self.db.querier(self.cancel.clone(), mint, maxt).await {
            Ok(querier) => querier,
            Err(e) => return self.partial(e).await.map(|()| 0),
        };
        let set = match querier.select(matchers).await {
            Ok(set) => set,
            Err(e) => return self.partial(e).await.map(|()| 0),
        };

        for warning in set.warnings {
            self.warn(warning).await?;
        }

        let mut series: Vec<(Labels, SampleIter)> = set
            .series
            .into_iter()
            .map(|s| (s.labels.merged_with(&self.external_labels), s.samples))
            .collect();
        series.sort_by(|a, b| a.0.cmp(&b.0));

        let mut collisions: Vec<&Labels> = series
            .windows(2)
            .filter(|pair| pair[0].0 == pair[1].0)
            .map(|pair| &pair[0].0)
            .collect();
        collisions.dedup();
        for labels in collisions {
            let warning = format!("duplicate series {labels} after adding external labels");
            self.warn(warning).await?;
        }

        let mut sent = 0;
        for (labels, mut samples) in series {
            match self.encode(&mut samples).await {
                Ok(chunks) if chunks.is_empty() => {}
                Ok(chunks) => {
                    let series = Series {
                        labels: labels_to_proto(&labels),
                        chunks,
                    };
                    self.send(SeriesResponse::series(series)).await?;
                    sent += 1;
                }
                // The series is dropped as a whole, never emitted partially.
                Err(e) => self.partial(e).await?,
            }
        }
        Ok(sent)
    }

    /// Drain one series into chunks, checking for cancellation between chunks.
    async fn encode(&self, samples: &mut SampleIter) -> Result<Vec<AggrChunk>, TsdbError> {
        let mut chunks = Vec::new();
        loop {
            if self.cancel.is_cancelled() {
                return Err(TsdbError::Cancelled);
            }
            match chunkenc::next_chunk(samples)? {
                Some(chunk) => chunks.push(AggrChunk::from(chunk)),
                None => return Ok(chunks),
            }
            tokio::task::yield_now().await;
        }
    }

    async fn send(&self, response: SeriesResponse) -> Result<(), StoreError> {
        self.tx
            .send(response)
            .await
            .map_err(|_| StoreError::Cancelled)
    }

    async fn warn(&self, warning: String) -> Result<(), StoreError> {
        match self.plan.strategy {
            PartialResponseStrategy::Abort => Err(StoreError::PartialFailure(warning)),
            _ => {
                tracing::warn!(%warning, "series stream continues with partial data");
                self.send(SeriesResponse::warning(warning)).await
            }
        }
    }

    /// Turn an engine error into a warning when it affects only part of the
    /// data, otherwise into a failure.
    async fn partial(&self, err: TsdbError) -> Result<(), StoreError> {
        if err.is_partial() {
            self.warn(err.to_string()).await
        } else {
            Err(err.into())
        }
    }
}

/// Responses of one Series call.
///
/// Ends with `None` only when the call completed. Cancellation and failures
/// end with an error status. Dropping the stream cancels the call.
pub struct SeriesStream {
    responses: ReceiverStream<SeriesResponse>,
    terminal: Option<oneshot::Receiver<Terminal>>,
    _cancel_on_drop: DropGuard,
}

impl SeriesStream {
    fn new(
        rx: mpsc::Receiver<SeriesResponse>,
        terminal: oneshot::Receiver<Terminal>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            responses: ReceiverStream::new(rx),
            terminal: Some(terminal),
            _cancel_on_drop: cancel.drop_guard(),
        }
    }
}

impl fmt::Debug for SeriesStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeriesStream")
            .field("finished", &self.terminal.is_none())
            .finish_non_exhaustive()
    }
}

impl Stream for SeriesStream {
    type Item = Result<SeriesResponse, Status>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(response) = ready!(this.responses.poll_next_unpin(cx)) {
            return Poll::Ready(Some(Ok(response)));
        }

        let Some(terminal) = this.terminal.as_mut() else {
            return Poll::Ready(None);
        };
        let state = ready!(terminal.poll_unpin(cx));
        this.terminal = None;

        Poll::Ready(match state {
            Ok(Terminal::Completed) => None,
            Ok(Terminal::Cancelled) => Some(Err(Status::cancelled("series request cancelled"))),
            Ok(Terminal::Failed(status)) => Some(Err(status)),
            Err(_) => Some(Err(Status::internal("series producer stopped unexpectedly"))),
        })
    }
}

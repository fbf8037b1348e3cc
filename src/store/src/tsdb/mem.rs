//! In-memory database for tests, with fault injection and resource counters.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{
    LabelQueryResult, Querier, Queryable, SampleIter, SelectedSeries, SeriesSet, TsdbError,
};
use crate::chunkenc::Sample;
use crate::labels::{Labels, Matcher};

#[derive(Debug, Clone, Default)]
struct Faults {
    // Series whose iterator fails after yielding this many samples.
    failing_series: HashMap<Labels, usize>,
    warnings: Vec<String>,
    label_error: Option<TsdbError>,
}

/// Tracks live resources; the count drops when the guard is dropped.
#[derive(Debug)]
struct Counted(Arc<AtomicUsize>);

impl Counted {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for Counted {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct MemTsdb {
    series: RwLock<BTreeMap<Labels, Arc<Vec<Sample>>>>,
    faults: Mutex<Faults>,
    closed: AtomicBool,
    open_queriers: Arc<AtomicUsize>,
    open_iterators: Arc<AtomicUsize>,
}

impl MemTsdb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn appender(&self) -> Appender<'_> {
        Appender { db: self }
    }

    /// Append one sample. Samples of a series must have increasing timestamps.
    pub fn add(&self, labels: Labels, t: i64, v: f64) -> Result<(), TsdbError> {
        if self.is_closed() {
            return Err(TsdbError::Closed);
        }

        let mut series = self.series.write().unwrap_or_else(|e| e.into_inner());
        let samples = series.entry(labels.clone()).or_default();
        if samples.last().is_some_and(|last| t <= last.t) {
            return Err(TsdbError::OutOfOrder {
                series: labels.to_string(),
                t,
            });
        }
        Arc::make_mut(samples).push(Sample::new(t, v));
        Ok(())
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Make iteration of `labels` fail after `after` samples.
    pub fn fail_series_after(&self, labels: Labels, after: usize) {
        self.faults().failing_series.insert(labels, after);
    }

    /// Report `warning` from every select and label query.
    pub fn add_warning(&self, warning: impl Into<String>) {
        self.faults().warnings.push(warning.into());
    }

    /// Fail every label name and label value query with `err`.
    pub fn fail_label_queries(&self, err: TsdbError) {
        self.faults().label_error = Some(err);
    }

    pub fn open_queriers(&self) -> usize {
        self.open_queriers.load(Ordering::SeqCst)
    }

    pub fn open_iterators(&self) -> usize {
        self.open_iterators.load(Ordering::SeqCst)
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Batches appends against a [`MemTsdb`].
#[derive(Debug)]
pub struct Appender<'a> {
    db: &'a MemTsdb,
}

impl Appender<'_> {
    pub fn add(&mut self, labels: Labels, t: i64, v: f64) -> Result<(), TsdbError> {
        self.db.add(labels, t, v)
    }
}

#[async_trait]
impl Queryable for MemTsdb {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn querier(
        &self,
        cancel: CancellationToken,
        mint: i64,
        maxt: i64,
    ) -> Result<Box<dyn Querier>, TsdbError> {
        if self.is_closed() {
            return Err(TsdbError::Closed);
        }
        if cancel.is_cancelled() {
            return Err(TsdbError::Cancelled);
        }

        let series = self
            .series
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, samples)| samples.iter().any(|s| s.t >= mint && s.t <= maxt))
            .map(|(labels, samples)| (labels.clone(), samples.clone()))
            .collect();

        Ok(Box::new(MemQuerier {
            series,
            mint,
            maxt,
            faults: self.faults().clone(),
            cancel,
            open_iterators: self.open_iterators.clone(),
            _open: Counted::new(&self.open_queriers),
        }))
    }
}

#[derive(Debug)]
struct MemQuerier {
    series: Vec<(Labels, Arc<Vec<Sample>>)>,
    mint: i64,
    maxt: i64,
    faults: Faults,
    cancel: CancellationToken,
    open_iterators: Arc<AtomicUsize>,
    _open: Counted,
}

impl MemQuerier {
    fn check_cancelled(&self) -> Result<(), TsdbError> {
        if self.cancel.is_cancelled() {
            Err(TsdbError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn matching<'a>(&'a self, matchers: &'a [Matcher]) -> impl Iterator<Item = &'a Labels> + 'a {
        self.series
            .iter()
            .map(|(labels, _)| labels)
            .filter(|labels| labels.matches_all(matchers))
    }

    fn label_query(&self, values: BTreeSet<String>) -> Result<LabelQueryResult, TsdbError> {
        if let Some(err) = &self.faults.label_error {
            return Err(err.clone());
        }
        Ok(LabelQueryResult {
            values: values.into_iter().collect(),
            warnings: self.faults.warnings.clone(),
        })
    }
}

#[async_trait]
impl Querier for MemQuerier {
    async fn select(&self, matchers: &[Matcher]) -> Result<SeriesSet, TsdbError> {
        self.check_cancelled()?;

        let series = self
            .series
            .iter()
            .filter(|(labels, _)| labels.matches_all(matchers))
            .map(|(labels, samples)| {
                let start = samples.partition_point(|s| s.t < self.mint);
                let iter = MemSeriesIter {
                    samples: samples.clone(),
                    pos: start,
                    maxt: self.maxt,
                    yielded: 0,
                    fail_after: self.faults.failing_series.get(labels).copied(),
                    done: false,
                    _open: Counted::new(&self.open_iterators),
                };
                SelectedSeries {
                    labels: labels.clone(),
                    samples: Box::new(iter) as SampleIter,
                }
            })
            .collect();

        Ok(SeriesSet {
            series,
            warnings: self.faults.warnings.clone(),
        })
    }

    async fn label_names(&self, matchers: &[Matcher]) -> Result<LabelQueryResult, TsdbError> {
        self.check_cancelled()?;
        let names = self
            .matching(matchers)
            .flat_map(|labels| labels.names().map(str::to_string).collect::<Vec<_>>())
            .collect();
        self.label_query(names)
    }

    async fn label_values(
        &self,
        name: &str,
        matchers: &[Matcher],
    ) -> Result<LabelQueryResult, TsdbError> {
        self.check_cancelled()?;
        let values = self
            .matching(matchers)
            .filter_map(|labels| labels.find(name).map(str::to_string))
            .collect();
        self.label_query(values)
    }
}

#[derive(Debug)]
struct MemSeriesIter {
    samples: Arc<Vec<Sample>>,
    pos: usize,
    maxt: i64,
    yielded: usize,
    fail_after: Option<usize>,
    done: bool,
    _open: Counted,
}

impl Iterator for MemSeriesIter {
    type Item = Result<Sample, TsdbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.fail_after == Some(self.yielded) {
            self.done = true;
            return Some(Err(TsdbError::BlockUnreadable {
                block: "head".to_string(),
                reason: "injected read failure".to_string(),
            }));
        }

        match self.samples.get(self.pos) {
            Some(sample) if sample.t <= self.maxt => {
                self.pos += 1;
                self.yielded += 1;
                Some(Ok(*sample))
            }
            _ => {
                self.done = true;
                None
            }
        }
    }
}

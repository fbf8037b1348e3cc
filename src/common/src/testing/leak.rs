use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::bail;
use tokio::runtime::Handle;
use tokio::time::{Instant, sleep};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

struct TrackedHandle {
    name: String,
    strong_count: Box<dyn Fn() -> usize + Send + Sync>,
}

/// Detects tasks and shared handles that outlive a test body.
///
/// A check is started before the code under test runs; it records how many
/// tokio tasks are alive on the current runtime. After the test body
/// finished, [`LeakCheck::check_timeout`] waits until the number of alive
/// tasks dropped back to that baseline and every tracked `Arc` lost all of
/// its strong references. Anything still alive when the timeout elapses is
/// reported as a leak.
///
/// ```rust,ignore
/// let mut leaks = LeakCheck::start();
/// let bucket = provider.create_named("test").await?;
/// leaks.track("bucket", &bucket);
/// run_suite(bucket).await?;
/// leaks.check_timeout(Duration::from_secs(10)).await?;
/// ```
pub struct LeakCheck {
    baseline_tasks: usize,
    handles: Vec<TrackedHandle>,
}

impl LeakCheck {
    /// Must be called from within a tokio runtime.
    pub fn start() -> Self {
        Self {
            baseline_tasks: alive_tasks(),
            handles: Vec::new(),
        }
    }

    /// Expect every strong reference of `handle` to be gone once the check runs.
    pub fn track<T>(&mut self, name: impl Into<String>, handle: &Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let weak: Weak<T> = Arc::downgrade(handle);
        self.handles.push(TrackedHandle {
            name: name.into(),
            strong_count: Box::new(move || weak.strong_count()),
        });
    }

    pub fn baseline_tasks(&self) -> usize {
        self.baseline_tasks
    }

    pub async fn check_timeout(self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let tasks = alive_tasks();
            let leaked: Vec<&str> = self
                .handles
                .iter()
                .filter(|h| (h.strong_count)() > 0)
                .map(|h| h.name.as_str())
                .collect();

            if tasks <= self.baseline_tasks && leaked.is_empty() {
                return Ok(());
            }

            if Instant::now() >= deadline {
                let baseline = self.baseline_tasks;
                bail!("leaked: {tasks} tasks alive (baseline {baseline}), held {leaked:?}");
            }

            sleep(POLL_INTERVAL).await;
        }
    }
}

fn alive_tasks() -> usize {
    Handle::current().metrics().num_alive_tasks()
}

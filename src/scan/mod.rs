use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::{Category, CheckResult, CheckStatus, HostInfo, ProbeMeta, Report};
use crate::registry::Registry;
use crate::system::SystemProbe;

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const MAX_CONCURRENCY: usize = 32;

/// How long past its deadline a probe may take to report before the runner gives up on it.
const REPORT_GRACE: Duration = Duration::from_millis(200);
const CANCEL_POLL: Duration = Duration::from_millis(25);

/// Shared cancellation flag. Cloning yields a handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub categories: Vec<Category>,
    pub concurrency: usize,
    pub per_probe_timeout: Duration,
    /// Glob patterns over probe ids.
    pub exclude: Vec<String>,
    pub cancel: CancelToken,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            categories: Category::DEFAULT.to_vec(),
            concurrency: DEFAULT_CONCURRENCY,
            per_probe_timeout: Duration::from_secs(10),
            exclude: Vec::new(),
            cancel: CancelToken::new(),
        }
    }
}

pub fn validate_excludes(excludes: &[String]) -> Result<()> {
    let _ = build_exclude_set(excludes)?;
    Ok(())
}

fn build_exclude_set(excludes: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in excludes {
        builder.add(Glob::new(pat).with_context(|| format!("invalid exclude glob: {pat}"))?);
    }
    builder.build().context("failed to build exclude globs")
}

pub struct ScanRunner {
    registry: Arc<Registry>,
    system: Arc<dyn SystemProbe>,
    host: HostInfo,
}

impl ScanRunner {
    pub fn new(registry: Arc<Registry>, system: Arc<dyn SystemProbe>) -> Self {
        Self {
            registry,
            system,
            host: HostInfo::unknown(),
        }
    }

    pub fn with_host(mut self, host: HostInfo) -> Self {
        self.host = host;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn system(&self) -> &Arc<dyn SystemProbe> {
        &self.system
    }

    /// Probes a request selects, in report order.
    pub fn resolve(&self, req: &ScanRequest) -> Vec<ProbeMeta> {
        let exclude = match build_exclude_set(&req.exclude) {
            Ok(set) => Some(set),
            Err(err) => {
                tracing::warn!("ignoring exclude patterns: {err:#}");
                None
            }
        };
        Category::ALL
            .into_iter()
            .filter(|c| req.categories.contains(c))
            .flat_map(|c| self.registry.probes_in(c))
            .filter(|p| exclude.as_ref().is_none_or(|set| !set.is_match(p.id())))
            .map(|p| p.meta().clone())
            .collect()
    }

    pub fn run(&self, req: &ScanRequest) -> Report {
        self.run_observed(req, &mut |_| {})
    }

    /// Like [`ScanRunner::run`], calling `observer` as each result is settled (completion order).
    ///
    /// At most `concurrency` evaluations run at once. A probe that overruns its deadline is
    /// settled as a timeout but keeps its worker until it returns; when every worker is held
    /// by such a probe for a further timeout period, the probes still queued are settled as
    /// timeouts too.
    pub fn run_observed(&self, req: &ScanRequest, observer: &mut dyn FnMut(&CheckResult)) -> Report {
        let started = Instant::now();
        let generated_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string());
        let probes = self.resolve(req);
        let concurrency = req.concurrency.clamp(1, MAX_CONCURRENCY).min(probes.len().max(1));
        tracing::info!(
            probes = probes.len(),
            concurrency,
            timeout = ?req.per_probe_timeout,
            "scan started"
        );

        let mut results: Vec<Option<CheckResult>> = vec![None; probes.len()];
        let queue: Arc<Mutex<VecDeque<usize>>> = Arc::new(Mutex::new((0..probes.len()).collect()));
        let (tx, rx) = mpsc::channel::<WorkerEvent>();

        let mut workers = 0;
        if !probes.is_empty() {
            let ids: Arc<Vec<String>> = Arc::new(probes.iter().map(|p| p.id.clone()).collect());
            for n in 0..concurrency {
                match self.spawn_worker(n, &ids, &queue, req, tx.clone()) {
                    Ok(()) => workers += 1,
                    Err(err) => tracing::warn!("failed to start scan worker: {err}"),
                }
            }
        }
        drop(tx);

        if workers == 0 {
            for idx in drain(&queue) {
                let r = CheckResult::new(&probes[idx], CheckStatus::Error, "internal: no scan worker available")
                    .with_detail("error_kind", "internal");
                observer(&r);
                results[idx] = Some(r);
            }
        }

        // running evaluations that are still within their deadline, by probe index
        let mut in_flight: HashMap<usize, Instant> = HashMap::new();
        // workers still busy with an evaluation that was already settled as a timeout
        let mut overdue = 0usize;
        let mut stalled_since: Option<Instant> = None;

        while workers > 0 && results.iter().any(Option::is_none) {
            if req.cancel.is_cancelled() {
                tracing::warn!(pending = results.iter().filter(|r| r.is_none()).count(), "scan cancelled");
                break;
            }

            let now = Instant::now();
            let next_expiry = in_flight.values().min().copied().unwrap_or(now + CANCEL_POLL);
            let wait = next_expiry.saturating_duration_since(now).min(CANCEL_POLL);
            match rx.recv_timeout(wait) {
                Ok(WorkerEvent::Started { idx, deadline }) => {
                    in_flight.insert(idx, deadline + REPORT_GRACE);
                }
                Ok(WorkerEvent::Finished { idx, result }) => {
                    if in_flight.remove(&idx).is_some() {
                        observer(&result);
                        results[idx] = Some(result);
                    } else {
                        // late arrival, already settled as a timeout
                        overdue = overdue.saturating_sub(1);
                    }
                }
                Ok(WorkerEvent::Exited) => workers -= 1,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            let now = Instant::now();
            let expired: Vec<usize> = in_flight
                .iter()
                .filter(|&(_, &limit)| limit <= now)
                .map(|(&idx, _)| idx)
                .collect();
            for idx in expired {
                in_flight.remove(&idx);
                overdue += 1;
                tracing::warn!(probe = %probes[idx].id, "probe abandoned after deadline");
                let r = timeout_result(&probes[idx]);
                observer(&r);
                results[idx] = Some(r);
            }

            if overdue >= workers {
                let since = *stalled_since.get_or_insert(now);
                if now.duration_since(since) >= req.per_probe_timeout {
                    let starved = drain(&queue);
                    if !starved.is_empty() {
                        tracing::warn!(probes = starved.len(), "every scan worker is stuck; giving up on queued probes");
                    }
                    for idx in starved {
                        let r = timeout_result(&probes[idx]).with_detail("reason", "no free worker");
                        observer(&r);
                        results[idx] = Some(r);
                    }
                }
            } else {
                stalled_since = None;
            }
        }

        // stop idle workers from picking up more work
        let _ = drain(&queue);

        let results: Vec<CheckResult> = results
            .into_iter()
            .zip(&probes)
            .map(|(r, meta)| {
                r.unwrap_or_else(|| {
                    if req.cancel.is_cancelled() {
                        CheckResult::new(meta, CheckStatus::Error, "cancelled")
                            .with_detail("error_kind", "cancelled")
                    } else {
                        CheckResult::new(meta, CheckStatus::Error, "internal: scan worker stopped")
                            .with_detail("error_kind", "internal")
                    }
                })
            })
            .collect();

        tracing::info!(elapsed = ?started.elapsed(), "scan finished");
        Report::new(generated_at, self.host.clone(), results)
    }

    fn spawn_worker(
        &self,
        n: usize,
        ids: &Arc<Vec<String>>,
        queue: &Arc<Mutex<VecDeque<usize>>>,
        req: &ScanRequest,
        tx: mpsc::Sender<WorkerEvent>,
    ) -> std::io::Result<()> {
        let registry = Arc::clone(&self.registry);
        let system = Arc::clone(&self.system);
        let ids = Arc::clone(ids);
        let queue = Arc::clone(queue);
        let cancel = req.cancel.clone();
        let timeout = req.per_probe_timeout;
        thread::Builder::new()
            .name(format!("scan-worker-{n}"))
            .spawn(move || {
                while !cancel.is_cancelled() {
                    let Some(idx) = lock(&queue).pop_front() else {
                        break;
                    };
                    let deadline = Instant::now() + timeout;
                    if tx.send(WorkerEvent::Started { idx, deadline }).is_err() {
                        break;
                    }
                    let Some(probe) = registry.probe(&ids[idx]) else {
                        continue;
                    };
                    let result = probe.evaluate(system.as_ref(), deadline);
                    if tx.send(WorkerEvent::Finished { idx, result }).is_err() {
                        break;
                    }
                }
                let _ = tx.send(WorkerEvent::Exited);
            })?;
        Ok(())
    }
}

enum WorkerEvent {
    Started { idx: usize, deadline: Instant },
    Finished { idx: usize, result: CheckResult },
    Exited,
}

fn timeout_result(meta: &ProbeMeta) -> CheckResult {
    CheckResult::new(meta, CheckStatus::Error, "timeout").with_detail("error_kind", "timeout")
}

fn lock(queue: &Mutex<VecDeque<usize>>) -> MutexGuard<'_, VecDeque<usize>> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

fn drain(queue: &Mutex<VecDeque<usize>>) -> Vec<usize> {
    lock(queue).drain(..).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::Probe;
    use crate::registry::RegistryBuilder;
    use crate::system::fake::FakeSystem;
    use std::sync::atomic::AtomicUsize;

    fn sleeping(id: &str, category: Category, millis: u64) -> Probe {
        Probe::new(id, category, id, 1, move |ctx| {
            thread::sleep(Duration::from_millis(millis));
            Ok(ctx.pass("ok"))
        })
    }

    fn runner(registry: Registry) -> ScanRunner {
        ScanRunner::new(Arc::new(registry), Arc::new(FakeSystem::new()))
    }

    fn request(concurrency: usize, timeout_ms: u64) -> ScanRequest {
        ScanRequest {
            concurrency,
            per_probe_timeout: Duration::from_millis(timeout_ms),
            ..ScanRequest::default()
        }
    }

    #[test]
    fn results_follow_registry_order_regardless_of_completion_order() {
        let registry = RegistryBuilder::new()
            .probe(sleeping("desktop.a", Category::Desktop, 1))
            .probe(sleeping("health.slow", Category::Health, 80))
            .probe(sleeping("health.fast", Category::Health, 1))
            .probe(sleeping("drivers.mid", Category::Drivers, 30))
            .build()
            .expect("valid");
        let runner = runner(registry);

        for concurrency in [1, 2, 8] {
            let report = runner.run(&request(concurrency, 2_000));
            let ids: Vec<&str> = report.results().map(|r| r.probe_id.as_str()).collect();
            assert_eq!(ids, vec!["health.slow", "health.fast", "drivers.mid", "desktop.a"]);
            assert!(report.results().all(|r| r.status == CheckStatus::Pass));
        }
    }

    #[test]
    fn never_exceeds_concurrency_limit() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut builder = RegistryBuilder::new();
        for i in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            builder = builder.probe(Probe::new(&format!("health.p{i}"), Category::Health, "p", 1, move |ctx| {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(40));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(ctx.pass("ok"))
            }));
        }
        let report = runner(builder.build().expect("valid")).run(&request(2, 2_000));
        assert_eq!(report.results().count(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn overdue_probes_keep_their_worker_slot() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut builder = RegistryBuilder::new();
        for i in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            builder = builder.probe(Probe::new(&format!("health.p{i}"), Category::Health, "p", 1, move |ctx| {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(1_500));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(ctx.pass("late"))
            }));
        }
        let started = Instant::now();
        let report = runner(builder.build().expect("valid")).run(&request(1, 50));
        assert!(started.elapsed() < Duration::from_millis(1_200));
        assert_eq!(report.results().count(), 6);
        assert!(report.results().all(|r| r.status == CheckStatus::Error && r.message == "timeout"));
        let starved = report.results().filter(|r| r.details.get("reason").map(String::as_str) == Some("no free worker"));
        assert_eq!(starved.count(), 5);

        // give the abandoned evaluation time to finish; nothing else may have started
        thread::sleep(Duration::from_millis(1_600));
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn slow_probe_is_followed_once_its_worker_frees_up() {
        let registry = RegistryBuilder::new()
            .probe(sleeping("health.slow", Category::Health, 500))
            .probe(sleeping("health.next", Category::Health, 1))
            .build()
            .expect("valid");
        // the first overruns its deadline but returns before the stall limit
        let report = runner(registry).run(&request(1, 200));
        assert_eq!(report.result("health.slow").map(|r| r.message.as_str()), Some("timeout"));
        assert_eq!(report.result("health.next").map(|r| r.status), Some(CheckStatus::Pass));
    }

    #[test]
    fn hung_probe_times_out_without_stalling_the_scan() {
        let registry = RegistryBuilder::new()
            .probe(sleeping("health.ok", Category::Health, 1))
            .probe(sleeping("health.stuck", Category::Health, 10_000))
            .build()
            .expect("valid");
        let started = Instant::now();
        let report = runner(registry).run(&request(4, 150));
        assert!(started.elapsed() < Duration::from_secs(2));

        let stuck = report.result("health.stuck").expect("result");
        assert_eq!(stuck.status, CheckStatus::Error);
        assert_eq!(stuck.message, "timeout");
        assert_eq!(report.result("health.ok").map(|r| r.status), Some(CheckStatus::Pass));
    }

    #[test]
    fn one_failing_probe_does_not_affect_others() {
        let registry = RegistryBuilder::new()
            .probe(sleeping("health.a", Category::Health, 1))
            .probe(Probe::new("health.boom", Category::Health, "boom", 1, |_ctx| panic!("defect")))
            .probe(Probe::new("health.fail", Category::Health, "fail", 1, |ctx| Ok(ctx.fail("bad"))))
            .build()
            .expect("valid");
        let report = runner(registry).run(&request(3, 2_000));
        let statuses: Vec<CheckStatus> = report.results().map(|r| r.status).collect();
        assert_eq!(statuses, vec![CheckStatus::Pass, CheckStatus::Error, CheckStatus::Fail]);
    }

    #[test]
    fn cancellation_marks_unfinished_probes() {
        let registry = RegistryBuilder::new()
            .probe(sleeping("health.fast", Category::Health, 1))
            .probe(sleeping("health.slow1", Category::Health, 5_000))
            .probe(sleeping("health.slow2", Category::Health, 5_000))
            .build()
            .expect("valid");
        let req = request(3, 10_000);
        let cancel = req.cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            cancel.cancel();
        });

        let started = Instant::now();
        let report = runner(registry).run(&req);
        let _ = canceller.join();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(report.result("health.fast").map(|r| r.status), Some(CheckStatus::Pass));
        for id in ["health.slow1", "health.slow2"] {
            let r = report.result(id).expect("present");
            assert_eq!(r.status, CheckStatus::Error);
            assert_eq!(r.message, "cancelled");
        }
    }

    #[test]
    fn requested_categories_and_excludes_select_probes() {
        let registry = RegistryBuilder::new()
            .probe(sleeping("health.a", Category::Health, 1))
            .probe(sleeping("security.a", Category::Security, 1))
            .probe(sleeping("security.b", Category::Security, 1))
            .build()
            .expect("valid");
        let runner = runner(registry);
        let req = ScanRequest {
            categories: vec![Category::Security],
            exclude: vec!["security.b".to_string()],
            ..request(2, 1_000)
        };
        let report = runner.run(&req);
        let ids: Vec<&str> = report.results().map(|r| r.probe_id.as_str()).collect();
        assert_eq!(ids, vec!["security.a"]);
    }

    #[test]
    fn zero_concurrency_is_clamped_to_one() {
        let registry = RegistryBuilder::new()
            .probe(sleeping("health.a", Category::Health, 1))
            .build()
            .expect("valid");
        let report = runner(registry).run(&request(0, 1_000));
        assert_eq!(report.results().count(), 1);
    }

    #[test]
    fn rejects_invalid_exclude_globs() {
        assert!(validate_excludes(&["health.*".to_string()]).is_ok());
        assert!(validate_excludes(&["[".to_string()]).is_err());
    }
}

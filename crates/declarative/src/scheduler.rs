//! Execution engine - runs every resource concurrently behind its dependencies
//!
//! Each pending resource gets its own scoped thread. A thread waits until all
//! of its dependencies are `Success` (or one of them failed), optionally takes
//! the manifest-wide lock, then runs preflight checks and the side effect.
//!
//! Statuses live in a [`StatusBoard`]: a read/write locked map written once
//! per resource and read by every waiting dependent. Each write bumps a
//! generation counter and wakes waiters through a condition variable; the
//! jittered poll interval only bounds how long a waiter sleeps between
//! checks of cancellation and its deadline.

use rayon::prelude::*;
use std::any::Any;
use std::collections::HashMap;
use std::collections::hash_map::RandomState;
use std::fs;
use std::hash::BuildHasher;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::context::{ApplyContext, ResourceLog, RunConfig};
use crate::error::ResourceError;
use crate::manifest::Manifest;
use crate::resource::{BoxedDescriptor, Resource, ResourceId, ResourceKind, Status};
use crate::types::{ApplyResult, DumpPolicy, RunSummary};

/// Shortest pause between dependency checks
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Terminal state of one resource as recorded by the board
#[derive(Debug, Default)]
struct Slot {
    status: Status,
    error: Option<ResourceError>,
    result: Option<ApplyResult>,
}

/// Outcome of checking a resource's dependencies
#[derive(Debug, PartialEq, Eq)]
enum Gate {
    Ready,
    Waiting,
    Failed(ResourceId),
}

/// Shared run state of every resource in a manifest
struct StatusBoard {
    slots: RwLock<HashMap<ResourceId, Slot>>,
    generation: Mutex<u64>,
    changed: Condvar,
}

impl StatusBoard {
    fn new<'a>(resources: impl Iterator<Item = &'a Resource>) -> Self {
        let slots = resources
            .map(|r| {
                let slot = Slot {
                    status: r.status,
                    ..Default::default()
                };
                (r.id.clone(), slot)
            })
            .collect();

        Self {
            slots: RwLock::new(slots),
            generation: Mutex::new(0),
            changed: Condvar::new(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ResourceId, Slot>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ResourceId, Slot>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn generation(&self) -> u64 {
        *self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inspect dependency statuses. A failed dependency wins over pending ones.
    fn check(&self, deps: &[ResourceId]) -> Gate {
        let slots = self.read();
        let mut waiting = false;

        for dep in deps {
            match slots.get(dep).map(|slot| slot.status) {
                Some(Status::Success) => {}
                Some(Status::Pending) => waiting = true,
                Some(Status::Failed | Status::DependencyFailed) | None => {
                    return Gate::Failed(dep.clone());
                }
            }
        }

        if waiting { Gate::Waiting } else { Gate::Ready }
    }

    /// Record a terminal state and wake waiters
    ///
    /// Returns false if the resource is unknown or already terminal; a
    /// terminal status is never overwritten.
    fn complete(
        &self,
        id: &ResourceId,
        status: Status,
        error: Option<ResourceError>,
        result: Option<ApplyResult>,
    ) -> bool {
        {
            let mut slots = self.write();
            let Some(slot) = slots.get_mut(id) else {
                return false;
            };
            if slot.status.is_terminal() {
                log::warn!(
                    "Ignoring {} -> {} for {}: status is terminal",
                    slot.status,
                    status,
                    id
                );
                return false;
            }
            *slot = Slot {
                status,
                error,
                result,
            };
        }

        let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        *generation += 1;
        drop(generation);
        self.changed.notify_all();
        true
    }

    /// Sleep until the generation moves past `seen` or `timeout` elapses
    fn wait_for_change(&self, seen: u64, timeout: Duration) {
        let generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = self
            .changed
            .wait_timeout_while(generation, timeout, |current| *current == seen);
    }

    fn into_slots(self) -> HashMap<ResourceId, Slot> {
        self.slots.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One resource's borrowed view for the duration of its thread
struct Task<'m> {
    id: &'m ResourceId,
    kind: &'m ResourceKind,
    attributes: &'m mut BoxedDescriptor,
    depends_on: &'m [ResourceId],
    global_lock: bool,
}

/// State shared by all task threads of one run
struct Engine<'c> {
    board: StatusBoard,
    global_lock: Mutex<()>,
    config: &'c RunConfig,
}

impl Engine<'_> {
    fn run_task(&self, task: Task<'_>) {
        let id = task.id;
        let log = ResourceLog::new(task.kind.as_str(), task.attributes.operation_name());

        let (status, error, result) = match self.execute(task, &log) {
            Ok(result) => (Status::Success, None, Some(result)),
            Err(e) if e.is_dependency_failure() => {
                log.warn(&e);
                (Status::DependencyFailed, Some(e), None)
            }
            Err(e) => {
                log.warn(&e);
                (Status::Failed, Some(e), None)
            }
        };

        self.board.complete(id, status, error, result);
    }

    fn execute(&self, task: Task<'_>, log: &ResourceLog) -> Result<ApplyResult, ResourceError> {
        if !task.depends_on.is_empty() {
            self.wait_for_dependencies(task.id, task.depends_on)?;
        }

        let _guard = task
            .global_lock
            .then(|| self.global_lock.lock().unwrap_or_else(PoisonError::into_inner));

        if self.config.cancel.is_cancelled() {
            return Err(ResourceError::Cancelled);
        }

        let kind = task.kind.as_str();
        let operation = task.attributes.operation_name();
        let ctx = ApplyContext::new(self.config, log.clone());

        guarded(kind, operation, || task.attributes.preflight_checks(&ctx))?.map_err(|source| {
            ResourceError::Preflight {
                kind: kind.to_string(),
                operation: operation.to_string(),
                source,
            }
        })?;

        guarded(kind, operation, || task.attributes.run(&ctx))?.map_err(|source| {
            ResourceError::Run {
                kind: kind.to_string(),
                operation: operation.to_string(),
                source,
            }
        })
    }

    /// Block until every dependency succeeded, one failed, or the deadline passed
    fn wait_for_dependencies(
        &self,
        id: &ResourceId,
        deps: &[ResourceId],
    ) -> Result<(), ResourceError> {
        let timeout = self.config.dependency_timeout;
        let deadline = Instant::now().checked_add(timeout);
        let mut attempt: u32 = 0;

        loop {
            let seen = self.board.generation();
            match self.board.check(deps) {
                Gate::Ready => return Ok(()),
                Gate::Failed(dependency) => {
                    return Err(ResourceError::DependencyFailed { dependency });
                }
                Gate::Waiting => {}
            }

            if self.config.cancel.is_cancelled() {
                return Err(ResourceError::Cancelled);
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ResourceError::WaitTimeout {
                            id: id.clone(),
                            waited: timeout,
                        });
                    }
                    deadline - now
                }
                None => Duration::MAX,
            };

            let pause = jittered(self.config.poll_interval, id, attempt).min(remaining);
            self.board.wait_for_change(seen, pause);
            attempt = attempt.wrapping_add(1);
        }
    }
}

/// Scale `interval` into [50%, 100%] so waiters do not wake in lockstep
fn jittered(interval: Duration, id: &ResourceId, attempt: u32) -> Duration {
    let roll = RandomState::new().hash_one((id, attempt)) % 1000;
    let factor = 0.5 + (roll as f64 / 2000.0);
    interval.mul_f64(factor).max(MIN_POLL_INTERVAL)
}

/// Run a descriptor call, turning a panic into a resource error
fn guarded<T>(
    kind: &str,
    operation: &str,
    f: impl FnOnce() -> anyhow::Result<T>,
) -> Result<anyhow::Result<T>, ResourceError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| ResourceError::Panicked {
        kind: kind.to_string(),
        operation: operation.to_string(),
        message: panic_message(payload.as_ref()),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl Manifest {
    /// Run every resource and report the outcome
    ///
    /// Never aborts part-way because one branch failed: every independent
    /// subgraph runs to its own terminal state. The returned summary's
    /// [`exit_code`](RunSummary::exit_code) is non-zero iff any resource
    /// ended non-Success.
    pub fn run(&mut self, config: &RunConfig) -> RunSummary {
        let log = ResourceLog::new("Viaduct", "Run");
        let start = Instant::now();
        log.info("Started");

        self.fail_dangling_dependencies();

        log.info("Performing preflight checks...");
        let preflight_failures = self.preflight(config);

        if preflight_failures > 0 {
            log.critical(format!(
                "{} resource(s) failed preflight checks, nothing was run",
                preflight_failures
            ));
        } else {
            self.execute(config);
        }

        let mut summary = self.summarize();
        summary.elapsed = start.elapsed();
        self.report(&log, &summary);

        let wants_dump = match config.dump_policy {
            DumpPolicy::Never => false,
            DumpPolicy::OnFailure => !summary.is_success(),
            DumpPolicy::Always => true,
        };
        if wants_dump {
            match self.write_dump(&config.dump_dir) {
                Ok(path) => {
                    log.info(format!("Manifest written to: {}", path.display()));
                    summary.dump_path = Some(path);
                }
                Err(e) => log.critical(format!("Failed to write manifest dump: {:#}", e)),
            }
        }

        if summary.is_success()
            && let Some(dir) = &config.scratch_dir
            && dir.exists()
            && let Err(e) = fs::remove_dir_all(dir)
        {
            log.warn(format!(
                "Could not remove scratch directory {}: {}",
                dir.display(),
                e
            ));
        }

        summary
    }

    /// Run every pending descriptor's preflight checks in parallel
    ///
    /// Failing resources are marked Failed. Returns the number of failures.
    pub fn preflight(&mut self, config: &RunConfig) -> usize {
        self.resources
            .par_iter_mut()
            .filter(|(_, r)| r.status == Status::Pending)
            .map(|(_, r)| preflight_one(r, config))
            .filter(|failed| *failed)
            .count()
    }

    /// Mark resources whose dependencies never resolved as Failed
    fn fail_dangling_dependencies(&mut self) {
        for (id, dependency) in self.dangling_dependencies() {
            if let Some(resource) = self.resources.get_mut(&id)
                && resource.status == Status::Pending
            {
                ResourceLog::new(resource.kind.as_str(), resource.attributes.operation_name())
                    .warn(format!("unknown dependency {}", dependency));
                resource.status = Status::Failed;
                resource.error = Some(ResourceError::UnknownDependency { dependency });
            }
        }
    }

    /// Spawn one thread per pending resource and wait for all of them
    fn execute(&mut self, config: &RunConfig) {
        let engine = Engine {
            board: StatusBoard::new(self.resources.values()),
            global_lock: Mutex::new(()),
            config,
        };

        thread::scope(|scope| {
            for (id, resource) in self.resources.iter_mut() {
                if resource.status.is_terminal() {
                    continue;
                }

                let Resource {
                    kind,
                    attributes,
                    depends_on,
                    global_lock,
                    ..
                } = resource;

                let task = Task {
                    id,
                    kind,
                    attributes,
                    depends_on,
                    global_lock: *global_lock,
                };

                let engine = &engine;
                let spawned = thread::Builder::new()
                    .name(id.as_str().replace('\0', ""))
                    .spawn_scoped(scope, move || engine.run_task(task));

                if let Err(e) = spawned {
                    engine
                        .board
                        .complete(id, Status::Failed, Some(ResourceError::Spawn(e)), None);
                }
            }
        });

        for (id, slot) in engine.board.into_slots() {
            if let Some(resource) = self.resources.get_mut(&id)
                && resource.status == Status::Pending
            {
                resource.status = slot.status;
                resource.error = slot.error;
                resource.result = slot.result;
            }
        }
    }

    fn summarize(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for resource in self.resources.values() {
            summary.add_outcome(resource.status, resource.result.as_ref());
        }
        summary
    }

    fn report(&self, log: &ResourceLog, summary: &RunSummary) {
        if summary.is_success() {
            log.info(format!("Completed without errors in {:.1?}", summary.elapsed));
            return;
        }

        log.warn(format!("Completed with errors in {:.1?}", summary.elapsed));
        for resource in self.resources.values() {
            if let Some(error) = &resource.error {
                log.critical(format!(
                    "The following resource returned an error:\n{} ({} [{}])\n{}\n{}",
                    resource.id,
                    resource.kind,
                    resource.attributes.operation_name(),
                    resource.attributes_pretty(),
                    error
                ));
            }
        }
    }
}

/// Returns true if the preflight checks failed
fn preflight_one(resource: &mut Resource, config: &RunConfig) -> bool {
    let kind = resource.kind.as_str();
    let operation = resource.attributes.operation_name();
    let ctx = ApplyContext::new(config, ResourceLog::new(kind, operation));

    let error = match guarded(kind, operation, || resource.attributes.preflight_checks(&ctx)) {
        Ok(Ok(())) => return false,
        Ok(Err(source)) => ResourceError::Preflight {
            kind: kind.to_string(),
            operation: operation.to_string(),
            source,
        },
        Err(panicked) => panicked,
    };

    resource.status = Status::Failed;
    resource.error = Some(error);
    true
}

//! Scriptable descriptor for engine tests

use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::context::ApplyContext;
use crate::resource::ResourceDescriptor;
use crate::types::{ApplyResult, ResourceParams};

/// When a stub's run started and finished
#[derive(Debug, Clone, Copy)]
pub struct Span {
    pub start: Instant,
    pub end: Instant,
}

/// Collects run spans from every stub sharing it
#[derive(Debug, Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<(String, Span)>>>);

impl Recorder {
    fn push(&self, name: &str, span: Span) {
        self.0.lock().unwrap().push((name.to_string(), span));
    }

    pub fn span(&self, name: &str) -> Option<Span> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, span)| *span)
    }

    pub fn ran(&self, name: &str) -> bool {
        self.span(name).is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Stub {
    name: String,
    /// Filled by preflight when unset
    mode: Option<u32>,
    #[serde(skip)]
    sleep: Duration,
    #[serde(skip)]
    fail: bool,
    #[serde(skip)]
    fail_preflight: bool,
    #[serde(skip)]
    panics: bool,
    #[serde(skip)]
    unchanged: bool,
    #[serde(skip)]
    lock: bool,
    #[serde(skip)]
    recorder: Option<Recorder>,
}

impl Stub {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            mode: None,
            sleep: Duration::ZERO,
            fail: false,
            fail_preflight: false,
            panics: false,
            unchanged: false,
            lock: false,
            recorder: None,
        }
    }

    pub fn sleep(mut self, millis: u64) -> Self {
        self.sleep = Duration::from_millis(millis);
        self
    }

    pub fn fail(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn fail_preflight(mut self) -> Self {
        self.fail_preflight = true;
        self
    }

    pub fn panics(mut self) -> Self {
        self.panics = true;
        self
    }

    pub fn unchanged(mut self) -> Self {
        self.unchanged = true;
        self
    }

    pub fn locked(mut self) -> Self {
        self.lock = true;
        self
    }

    pub fn record(mut self, recorder: &Recorder) -> Self {
        self.recorder = Some(recorder.clone());
        self
    }
}

impl ResourceDescriptor for Stub {
    fn kind(&self) -> &'static str {
        "Stub"
    }

    fn operation_name(&self) -> &'static str {
        "Poke"
    }

    fn params(&self) -> ResourceParams {
        ResourceParams {
            global_lock: self.lock,
        }
    }

    fn preflight_checks(&mut self, _ctx: &ApplyContext) -> anyhow::Result<()> {
        if self.fail_preflight {
            anyhow::bail!("stub {} rejected its attributes", self.name);
        }
        self.mode.get_or_insert(0o644);
        Ok(())
    }

    fn run(&self, _ctx: &ApplyContext) -> anyhow::Result<ApplyResult> {
        if self.panics {
            panic!("stub panic in {}", self.name);
        }

        let start = Instant::now();
        thread::sleep(self.sleep);
        let end = Instant::now();
        if let Some(recorder) = &self.recorder {
            recorder.push(&self.name, Span { start, end });
        }

        if self.fail {
            anyhow::bail!("stub {} failed", self.name);
        }
        Ok(if self.unchanged {
            ApplyResult::NoChange
        } else {
            ApplyResult::Created
        })
    }
}

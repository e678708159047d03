//! Runs one algorithm per locator, either inline or on a worker thread.
//!
//! Incremental runs report progress over a channel shared by every run the
//! driver ever started. Each message carries the request id of its run, and
//! messages whose id is not the current one are dropped. A run's geometry
//! crosses the channel in a single `Finished` message, so the foreground never
//! sees a half-built element.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::algorithm::{Algorithm, ExtractionError, NoProgress, Parameters, ProgressSink};
use crate::dataset::DataSet;
use crate::element::{Element, Geometry};
use crate::geom::Point3;

pub type RequestId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum SessionState {
    Idle,
    Dragging,
    Busy,
    Done,
    Cancelled,
}

/// Bookkeeping for the run a locator currently cares about.
#[derive(Debug, Clone)]
pub struct ExtractionSession {
    algorithm_name: &'static str,
    parameters: Box<dyn Parameters>,
    request_id: RequestId,
    completion: f32,
    state: SessionState,
}

impl ExtractionSession {
    #[must_use]
    pub fn new(
        algorithm_name: &'static str,
        parameters: Box<dyn Parameters>,
        request_id: RequestId,
    ) -> Self {
        Self {
            algorithm_name,
            parameters,
            request_id,
            completion: 0.0,
            state: SessionState::Busy,
        }
    }

    #[must_use]
    pub const fn algorithm_name(&self) -> &'static str {
        self.algorithm_name
    }

    #[must_use]
    pub fn parameters(&self) -> &dyn Parameters {
        self.parameters.as_ref()
    }

    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Last accepted completion percentage in `[0, 100]`.
    #[must_use]
    pub const fn completion(&self) -> f32 {
        self.completion
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Applies a progress report tagged with `request_id`. Reports from any
    /// other run are ignored and `false` is returned.
    pub fn apply_progress(&mut self, request_id: RequestId, percent: f32) -> bool {
        if request_id != self.request_id {
            log::debug!(
                "{}: dropping stale progress {percent:.0}% of request {request_id} (current {})",
                self.algorithm_name,
                self.request_id
            );
            return false;
        }
        if matches!(self.state, SessionState::Done | SessionState::Cancelled) {
            return false;
        }
        self.completion = percent.clamp(0.0, 100.0);
        true
    }
}

/// Messages from worker threads to the driver.
#[derive(Debug)]
pub enum ExtractionEvent {
    Progress {
        request_id: RequestId,
        percent: f32,
    },
    Finished {
        request_id: RequestId,
        result: Result<Geometry, ExtractionError>,
    },
}

/// Outcome of [`ExtractionDriver::begin`].
#[derive(Debug)]
pub enum Launch {
    /// A non-incremental algorithm ran inline.
    Finished(Element),
    /// An incremental run is going on a worker thread.
    Started { request_id: RequestId },
}

#[derive(Debug, Default)]
struct WorkerControl {
    /// Return the partial result as soon as possible.
    stop: AtomicBool,
    /// Nobody wants the result anymore.
    discard: AtomicBool,
}

struct ChannelProgress {
    request_id: RequestId,
    events: Sender<ExtractionEvent>,
    control: Arc<WorkerControl>,
}

impl ProgressSink for ChannelProgress {
    fn report(&mut self, percent: f32) {
        if self.control.discard.load(Ordering::Relaxed) {
            return;
        }
        // The driver may already be gone.
        let _ = self.events.send(ExtractionEvent::Progress {
            request_id: self.request_id,
            percent,
        });
    }

    fn should_stop(&self) -> bool {
        self.control.stop.load(Ordering::Relaxed) || self.control.discard.load(Ordering::Relaxed)
    }
}

/// Drives one algorithm instance for one locator.
pub struct ExtractionDriver {
    algorithm: Arc<dyn Algorithm>,
    data_set: Arc<DataSet>,
    next_request_id: RequestId,
    session: Option<ExtractionSession>,
    control: Option<Arc<WorkerControl>>,
    started: Option<Instant>,
    events_tx: Sender<ExtractionEvent>,
    events_rx: Receiver<ExtractionEvent>,
}

impl ExtractionDriver {
    #[must_use]
    pub fn new(algorithm: Arc<dyn Algorithm>, data_set: Arc<DataSet>) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            algorithm,
            data_set,
            next_request_id: 1,
            session: None,
            control: None,
            started: None,
            events_tx,
            events_rx,
        }
    }

    #[must_use]
    pub fn algorithm(&self) -> &dyn Algorithm {
        self.algorithm.as_ref()
    }

    #[must_use]
    pub fn session(&self) -> Option<&ExtractionSession> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.as_ref().map_or(SessionState::Idle, ExtractionSession::state)
    }

    /// True while a worker run is being waited for.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.state(), SessionState::Busy | SessionState::Dragging) && self.control.is_some()
    }

    /// Starts a new run seeded at `seed`, superseding any run in flight.
    ///
    /// A seed outside the data set yields [`ExtractionError::SeedOutsideDomain`]
    /// and leaves the driver idle.
    pub fn begin(&mut self, seed: Point3) -> Result<Launch, ExtractionError> {
        self.discard_worker();
        let Some(parameters) = self.algorithm.seed_parameters(&self.data_set, seed) else {
            self.session = None;
            return Err(ExtractionError::SeedOutsideDomain { seed });
        };
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        let name = self.algorithm.name();
        self.session = Some(ExtractionSession::new(name, parameters.clone(), request_id));
        self.started = Some(Instant::now());

        if !self.algorithm.is_incremental() {
            let result = self
                .algorithm
                .create_element(&self.data_set, parameters, &mut NoProgress);
            return match result {
                Ok(element) => {
                    self.log_done();
                    self.mark(SessionState::Done);
                    Ok(Launch::Finished(element))
                }
                Err(err) => {
                    self.session = None;
                    Err(err)
                }
            };
        }

        let control = Arc::new(WorkerControl::default());
        let mut sink = ChannelProgress {
            request_id,
            events: self.events_tx.clone(),
            control: Arc::clone(&control),
        };
        let algorithm = Arc::clone(&self.algorithm);
        let data_set = Arc::clone(&self.data_set);
        let spawned = thread::Builder::new()
            .name(format!("extract-{name}-{request_id}"))
            .spawn(move || {
                let result = algorithm.extract(&data_set, parameters.as_ref(), &mut sink);
                if !sink.control.discard.load(Ordering::Relaxed) {
                    let _ = sink.events.send(ExtractionEvent::Finished { request_id, result });
                }
            });
        if let Err(err) = spawned {
            log::warn!("{name}: cannot start worker thread: {err}");
            self.session = None;
            return Err(ExtractionError::WorkerUnavailable { algorithm: name });
        }
        self.control = Some(control);
        Ok(Launch::Started { request_id })
    }

    /// Marks the current run as following a drag.
    pub fn mark_dragging(&mut self) {
        if self.state() == SessionState::Busy {
            self.mark(SessionState::Dragging);
        }
    }

    /// Asks the current worker to stop and deliver what it has so far.
    pub fn finish(&mut self) {
        if let Some(control) = &self.control {
            control.stop.store(true, Ordering::Relaxed);
        }
        if self.state() == SessionState::Dragging {
            self.mark(SessionState::Busy);
        }
    }

    /// Abandons the current run. Progress and results it still produces are
    /// dropped; elements already handed out are unaffected.
    pub fn cancel(&mut self) {
        self.discard_worker();
        if matches!(self.state(), SessionState::Busy | SessionState::Dragging) {
            self.mark(SessionState::Cancelled);
        }
    }

    /// Applies every pending worker message and returns the element of the
    /// current run once it is complete.
    pub fn poll(&mut self) -> Option<Element> {
        loop {
            match self.events_rx.try_recv() {
                Ok(event) => {
                    if let Some(element) = self.apply_event(event) {
                        return Some(element);
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return None,
            }
        }
    }

    /// Blocks until the current run completes. Returns `None` when there is
    /// no run to wait for or it failed.
    pub fn wait(&mut self) -> Option<Element> {
        while self.is_running() {
            let event = self.events_rx.recv().ok()?;
            if let Some(element) = self.apply_event(event) {
                return Some(element);
            }
        }
        None
    }

    /// Applies one worker message. Messages tagged with another request id
    /// are ignored.
    pub fn apply_event(&mut self, event: ExtractionEvent) -> Option<Element> {
        match event {
            ExtractionEvent::Progress {
                request_id,
                percent,
            } => {
                if let Some(session) = &mut self.session {
                    session.apply_progress(request_id, percent);
                }
                None
            }
            ExtractionEvent::Finished { request_id, result } => {
                let session = self.session.as_mut()?;
                if session.request_id != request_id
                    || !matches!(session.state, SessionState::Busy | SessionState::Dragging)
                {
                    log::debug!("{}: dropping stale result of request {request_id}", session.algorithm_name);
                    return None;
                }
                self.control = None;
                match result {
                    Ok(geometry) => {
                        let element =
                            Element::new(session.algorithm_name, session.parameters.clone(), geometry);
                        session.completion = 100.0;
                        self.log_done();
                        self.mark(SessionState::Done);
                        Some(element)
                    }
                    Err(err) => {
                        log::warn!("{}: extraction failed: {err}", session.algorithm_name);
                        self.session = None;
                        None
                    }
                }
            }
        }
    }

    fn discard_worker(&mut self) {
        if let Some(control) = self.control.take() {
            control.discard.store(true, Ordering::Relaxed);
        }
    }

    fn mark(&mut self, state: SessionState) {
        if let Some(session) = &mut self.session {
            session.state = state;
        }
    }

    fn log_done(&self) {
        if let Some(started) = self.started {
            log::info!(
                "Creating {}... done in {:.1} ms",
                self.algorithm.name(),
                started.elapsed().as_secs_f64() * 1000.0
            );
        }
    }
}

impl Drop for ExtractionDriver {
    fn drop(&mut self) {
        self.discard_worker();
    }
}

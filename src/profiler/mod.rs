//! Profiler state machine.
//!
//! A [`Profiler`] owns one session slot per enabling thread plus a single
//! process-global slot used by on-demand profiling. Instrumentation hooks on
//! the profiler route to the calling thread's session first, then to the
//! global one; worker threads can also hold an `Arc<Session>` directly.

pub mod config;
pub mod registry;
pub mod result;
pub mod session;

pub use config::{ActivityType, ExperimentalConfig, ProfilerConfig, ProfilerMode};
pub use registry::{BoundedRegistry, CallbackHandle, CallbackKind, CallbackRegistry, CallbackSpec};
pub use result::ProfilerResult;
pub use session::{next_correlation_id, FinalizedSession, Session, SpanStart};

use crate::clock::{Clock, SystemClock};
use crate::device::DeviceTimer;
use crate::normalize::PostProcessFn;
use crate::record::{Device, OpHandle, RecordScope};
use crate::trace::{ChromeTraceSink, TraceSink};
use crate::tracer::CallStackTracer;
use crate::utils::error::ProfilerError;
use crate::utils::thread::current_thread_id;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Creates the trace sink for each new session
pub type SinkFactory = Arc<dyn Fn() -> Arc<dyn TraceSink> + Send + Sync>;

/// Builder for [`Profiler`]
pub struct ProfilerBuilder {
    clock: Arc<dyn Clock>,
    registry: Arc<dyn CallbackRegistry>,
    sink_factory: SinkFactory,
    tracer: Option<Arc<dyn CallStackTracer>>,
    device_timer: Option<Arc<dyn DeviceTimer>>,
}

impl Default for ProfilerBuilder {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            registry: Arc::new(BoundedRegistry::default()),
            sink_factory: Arc::new(|| Arc::new(ChromeTraceSink::new()) as Arc<dyn TraceSink>),
            tracer: None,
            device_timer: None,
        }
    }
}

impl ProfilerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(mut self, registry: Arc<dyn CallbackRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn sink_factory(mut self, factory: SinkFactory) -> Self {
        self.sink_factory = factory;
        self
    }

    /// Use one shared sink for every session
    pub fn sink(self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink_factory(Arc::new(move || Arc::clone(&sink)))
    }

    pub fn tracer(mut self, tracer: Arc<dyn CallStackTracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn device_timer(mut self, timer: Arc<dyn DeviceTimer>) -> Self {
        self.device_timer = Some(timer);
        self
    }

    pub fn build(self) -> Profiler {
        Profiler {
            clock: self.clock,
            registry: self.registry,
            sink_factory: self.sink_factory,
            tracer: self.tracer,
            device_timer: self.device_timer,
            thread_sessions: Mutex::new(HashMap::new()),
            global_session: Mutex::new(None),
        }
    }
}

/// Entry point: enables and disables sessions and routes hooks to them
pub struct Profiler {
    clock: Arc<dyn Clock>,
    registry: Arc<dyn CallbackRegistry>,
    sink_factory: SinkFactory,
    tracer: Option<Arc<dyn CallStackTracer>>,
    device_timer: Option<Arc<dyn DeviceTimer>>,
    thread_sessions: Mutex<HashMap<u64, Arc<Session>>>,
    global_session: Mutex<Option<Arc<Session>>>,
}

impl Default for Profiler {
    fn default() -> Self {
        ProfilerBuilder::default().build()
    }
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> ProfilerBuilder {
        ProfilerBuilder::new()
    }

    fn new_session(
        &self,
        config: ProfilerConfig,
        activities: &BTreeSet<ActivityType>,
        scopes: &HashSet<RecordScope>,
    ) -> Arc<Session> {
        Arc::new(Session::new(
            config,
            activities.clone(),
            scopes.clone(),
            Arc::clone(&self.clock),
            (self.sink_factory)(),
            self.device_timer.clone(),
        ))
    }

    fn register_callbacks(&self, session: &Session, kind: CallbackKind) -> Result<(), ProfilerError> {
        let handle = self.registry.add_callback(CallbackSpec {
            kind,
            scopes: session.scopes().clone(),
            needs_inputs: session.config().report_input_shapes,
        })?;
        session.set_callback_handle(handle);
        Ok(())
    }

    /// Remove the session's callbacks, logging a registry failure
    fn release_callbacks(&self, session: &Session) {
        if let Some(handle) = session.take_callback_handle() {
            if let Err(e) = self.registry.remove_callback(handle) {
                warn!("Failed to remove profiler callbacks. {}", e);
            }
        }
    }

    /// Start a session with `config`.
    ///
    /// # Errors
    /// * `AlreadyEnabled` - the calling thread already owns a session
    /// * `NoActivities` - a recording mode was given no activity
    /// * `OnDemandRequiresCpu` - on-demand mode without CPU activity
    /// * `CallbackRegistration` - the registry refused the callbacks
    pub fn enable(
        &self,
        config: ProfilerConfig,
        activities: &BTreeSet<ActivityType>,
        scopes: &HashSet<RecordScope>,
    ) -> Result<(), ProfilerError> {
        let tid = current_thread_id();
        if self.thread_sessions.lock().contains_key(&tid) {
            return Err(ProfilerError::AlreadyEnabled);
        }

        match config.mode {
            ProfilerMode::Disabled => Err(ProfilerError::UnsupportedMode(config.mode)),
            ProfilerMode::AnnotationOnly => {
                let session = self.new_session(config, activities, scopes);
                self.register_callbacks(&session, CallbackKind::ThreadLocal)?;
                self.thread_sessions.lock().insert(tid, session);
                debug!("Annotation-only profiling enabled on thread {}", tid);
                Ok(())
            }
            ProfilerMode::Standard | ProfilerMode::GpuFallback => {
                if activities.is_empty() {
                    return Err(ProfilerError::NoActivities);
                }
                self.enable_thread_session(tid, config, activities, scopes)
            }
            ProfilerMode::OnDemand => {
                if activities.is_empty() {
                    return Err(ProfilerError::NoActivities);
                }
                self.enable_global_session(config, activities, scopes)
            }
        }
    }

    fn enable_thread_session(
        &self,
        tid: u64,
        config: ProfilerConfig,
        activities: &BTreeSet<ActivityType>,
        scopes: &HashSet<RecordScope>,
    ) -> Result<(), ProfilerError> {
        if config.mode == ProfilerMode::GpuFallback && self.device_timer.is_none() {
            warn!("GPU fallback profiling enabled without a device timer; device times will be -1");
        }

        let session = self.new_session(config, activities, scopes);
        let sink = session.sink();
        sink.prepare(activities)?;

        if session.collects_cpu() {
            self.register_callbacks(&session, CallbackKind::ThreadLocal)?;
        }
        if let Err(e) = sink.start(session.start_time_us()) {
            self.release_callbacks(&session);
            return Err(e.into());
        }

        // Started last so a failed enable never leaves frames buffered
        if session.config().with_stack && session.collects_cpu() {
            match &self.tracer {
                Some(tracer) => tracer.start(),
                None => debug!("Stack collection requested but no call stack tracer is installed"),
            }
        }

        self.thread_sessions.lock().insert(tid, session);

        info!("Profiler enabled on thread {} ({:?})", tid, activities);
        Ok(())
    }

    fn enable_global_session(
        &self,
        config: ProfilerConfig,
        activities: &BTreeSet<ActivityType>,
        scopes: &HashSet<RecordScope>,
    ) -> Result<(), ProfilerError> {
        if !activities.contains(&ActivityType::Cpu) {
            return Err(ProfilerError::OnDemandRequiresCpu);
        }

        let mut global = self.global_session.lock();
        if global.is_some() {
            warn!("On-demand profiling is already enabled; ignoring second enable");
            return Ok(());
        }

        let session = self.new_session(config, activities, scopes);
        self.register_callbacks(&session, CallbackKind::Global)?;
        let sink = session.sink();
        if let Err(e) = sink
            .prepare(activities)
            .and_then(|_| sink.start(session.start_time_us()))
        {
            self.release_callbacks(&session);
            return Err(e.into());
        }
        *global = Some(session);

        info!("On-demand profiling enabled ({:?})", activities);
        Ok(())
    }

    /// Enable with a callback resolving debug handles into stacks and modules
    ///
    /// # Errors
    /// * `PostProcessUnsupported` - annotation-only or on-demand profiling
    /// * any error of [`enable`](Self::enable)
    pub fn enable_with_post_process(
        &self,
        config: ProfilerConfig,
        activities: &BTreeSet<ActivityType>,
        callback: PostProcessFn,
        scopes: &HashSet<RecordScope>,
    ) -> Result<(), ProfilerError> {
        match config.mode {
            ProfilerMode::AnnotationOnly => {
                return Err(ProfilerError::PostProcessUnsupported("annotation-only profiling"))
            }
            ProfilerMode::OnDemand => {
                return Err(ProfilerError::PostProcessUnsupported("on-demand profiling"))
            }
            _ => {}
        }
        if self.global_session.lock().is_some() {
            return Err(ProfilerError::PostProcessUnsupported("on-demand profiling"));
        }

        self.enable(config, activities, scopes)?;
        if let Some(session) = self.thread_sessions.lock().get(&current_thread_id()) {
            session.set_post_process(callback);
        }
        Ok(())
    }

    /// Stop the active session and collect its result.
    ///
    /// The global on-demand session takes precedence over the calling
    /// thread's session.
    pub fn disable(&self) -> Result<ProfilerResult, ProfilerError> {
        let session = match self.global_session.lock().take() {
            Some(global) => global,
            None => self
                .thread_sessions
                .lock()
                .remove(&current_thread_id())
                .ok_or(ProfilerError::NotRunning)?,
        };

        self.release_callbacks(&session);

        match session.mode() {
            ProfilerMode::OnDemand => {
                session.finalize(None)?;
                return Ok(ProfilerResult::empty());
            }
            ProfilerMode::AnnotationOnly | ProfilerMode::Disabled => {
                return Ok(ProfilerResult::empty());
            }
            ProfilerMode::Standard | ProfilerMode::GpuFallback => {}
        }

        let tracer = self
            .tracer
            .as_ref()
            .filter(|_| session.config().with_stack && session.collects_cpu());

        let frames = tracer.map(|tracer| {
            tracer.stop();
            tracer.events()
        });
        let finalized = session.finalize(frames.as_deref());
        if let Some(tracer) = tracer {
            tracer.clear();
        }
        let finalized = finalized?;

        info!("Profiler disabled with {} events", finalized.events.len());
        Ok(ProfilerResult::new(
            session.start_time_us(),
            finalized.events,
            finalized.trace,
            finalized.event_tree,
            session.sink(),
        ))
    }

    /// Whether a session is active for the calling thread or globally
    pub fn is_enabled(&self) -> bool {
        self.thread_sessions.lock().contains_key(&current_thread_id())
            || self.global_session.lock().is_some()
    }

    /// Session hooks on this thread route to
    pub fn session(&self) -> Option<Arc<Session>> {
        if let Some(session) = self.thread_sessions.lock().get(&current_thread_id()) {
            return Some(Arc::clone(session));
        }
        self.global_session.lock().clone()
    }

    pub fn on_span_start(&self, span: SpanStart) -> Option<OpHandle> {
        self.session()?.on_span_start(span)
    }

    pub fn on_span_end(&self, handle: OpHandle) {
        match self.session() {
            Some(session) => session.on_span_end(handle),
            None => debug!(
                "Span {} ended with no active session",
                handle.correlation_id()
            ),
        }
    }

    pub fn report_memory_usage(
        &self,
        ptr: usize,
        alloc_size: i64,
        total_allocated: i64,
        total_reserved: i64,
        device: Device,
    ) {
        if let Some(session) = self.session() {
            session.report_memory_usage(ptr, alloc_size, total_allocated, total_reserved, device);
        }
    }

    /// Record a backend-executed span on the calling thread's session.
    ///
    /// Ignored when the thread has no session.
    ///
    /// # Errors
    /// * `OnDemandUnsupported` - an on-demand session is active
    pub fn report_backend_event(
        &self,
        start_us: i64,
        end_us: i64,
        debug_handle: i64,
        scope: RecordScope,
        name: impl Into<String>,
        backend: impl Into<String>,
    ) -> Result<(), ProfilerError> {
        if self.global_session.lock().is_some() {
            return Err(ProfilerError::OnDemandUnsupported("backend event reporting"));
        }

        let session = self.thread_sessions.lock().get(&current_thread_id()).cloned();
        if let Some(session) = session {
            session.report_backend_event(start_us, end_us, debug_handle, scope, name, backend);
        }
        Ok(())
    }
}

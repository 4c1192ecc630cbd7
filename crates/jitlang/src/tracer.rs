//! Pipeline tracing infrastructure.
//!
//! Provides a trait-based tracing system for the phase driver, both static
//! visitors, the compilation visitor, and the JIT dispatcher, with zero-cost
//! abstraction. With [`NoopTracer`], every trace call compiles away entirely
//! via monomorphization.
//!
//! # Architecture
//!
//! [`JitTracer`] defines hook points at key pipeline events: phase
//! transitions, name bindings discovered by the annotation visitor, type
//! decisions made by the analysis visitor, fragment compile start/finish, and
//! dispatcher entry/exit/callsite-patch. Concrete implementations collect
//! different kinds of data:
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (production default) |
//! | [`StderrTracer`] | Human-readable pipeline log to stderr |
//! | [`RecordingTracer`] | Full event recording for post-mortem inspection |
//!
//! # Usage
//!
//! Every pipeline entry point is generic over `Tr: JitTracer`. Callers choose
//! the tracer at construction time:
//!
//! ```ignore
//! // Production (zero overhead):
//! advance_module(&mut global, &mut module, Phase::Imported, &NoopTracer);
//!
//! // Debugging:
//! advance_module(&mut global, &mut module, Phase::Imported, &StderrTracer);
//! ```

use crate::{context::module::Phase, ids::FunctionId};

/// A discrete pipeline event, used by [`RecordingTracer`] to capture a full
/// trace for post-mortem inspection.
#[derive(Debug, Clone)]
pub enum TraceEvent {
    PhaseTransition { module: String, from: Phase, to: Phase },
    NameBound { module: String, name: String },
    TypeDecided { detail: String },
    FragmentCompileStart { function: Option<FunctionId>, fragment: usize },
    FragmentCompileFinish { function: Option<FunctionId>, fragment: usize, bytes: usize },
    DispatcherEnter { callsite_token: u64 },
    DispatcherExit { callsite_token: u64, resume_offset: Option<usize> },
    CallsitePatched { callsite_token: u64, callee: FunctionId },
}

/// Hook points a pipeline implementation calls at each interesting event.
/// All methods have no-op default bodies so a tracer only needs to implement
/// the events it cares about.
pub trait JitTracer {
    fn on_phase_transition(&self, _module: &str, _from: Phase, _to: Phase) {}
    fn on_name_bound(&self, _module: &str, _name: &str) {}
    fn on_type_decided(&self, _detail: &str) {}
    fn on_fragment_compile_start(&self, _function: Option<FunctionId>, _fragment: usize) {}
    fn on_fragment_compile_finish(&self, _function: Option<FunctionId>, _fragment: usize, _bytes: usize) {}
    fn on_dispatcher_enter(&self, _callsite_token: u64) {}
    fn on_dispatcher_exit(&self, _callsite_token: u64, _resume_offset: Option<usize>) {}
    fn on_callsite_patched(&self, _callsite_token: u64, _callee: FunctionId) {}
}

/// Zero-cost production default. Every method is empty and inlines away.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl JitTracer for NoopTracer {}

/// Writes a one-line human-readable record of every event to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrTracer;

impl JitTracer for StderrTracer {
    fn on_phase_transition(&self, module: &str, from: Phase, to: Phase) {
        eprintln!("[phase] {module}: {from} -> {to}");
    }

    fn on_name_bound(&self, module: &str, name: &str) {
        eprintln!("[bind] {module}::{name}");
    }

    fn on_type_decided(&self, detail: &str) {
        eprintln!("[type] {detail}");
    }

    fn on_fragment_compile_start(&self, function: Option<FunctionId>, fragment: usize) {
        eprintln!("[compile-start] function={function:?} fragment={fragment}");
    }

    fn on_fragment_compile_finish(&self, function: Option<FunctionId>, fragment: usize, bytes: usize) {
        eprintln!("[compile-finish] function={function:?} fragment={fragment} bytes={bytes}");
    }

    fn on_dispatcher_enter(&self, callsite_token: u64) {
        eprintln!("[dispatch-enter] token={callsite_token}");
    }

    fn on_dispatcher_exit(&self, callsite_token: u64, resume_offset: Option<usize>) {
        eprintln!("[dispatch-exit] token={callsite_token} resume={resume_offset:?}");
    }

    fn on_callsite_patched(&self, callsite_token: u64, callee: FunctionId) {
        eprintln!("[patch] token={callsite_token} callee={}", callee.raw());
    }
}

/// Records every event into an in-memory log for assertions in tests or
/// post-mortem inspection. Uses interior mutability so it can be shared
/// through the same `&Tr` the other tracers take.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: std::cell::RefCell<Vec<TraceEvent>>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.borrow().clone()
    }
}

impl JitTracer for RecordingTracer {
    fn on_phase_transition(&self, module: &str, from: Phase, to: Phase) {
        self.events.borrow_mut().push(TraceEvent::PhaseTransition {
            module: module.to_owned(),
            from,
            to,
        });
    }

    fn on_name_bound(&self, module: &str, name: &str) {
        self.events.borrow_mut().push(TraceEvent::NameBound {
            module: module.to_owned(),
            name: name.to_owned(),
        });
    }

    fn on_type_decided(&self, detail: &str) {
        self.events.borrow_mut().push(TraceEvent::TypeDecided { detail: detail.to_owned() });
    }

    fn on_fragment_compile_start(&self, function: Option<FunctionId>, fragment: usize) {
        self.events.borrow_mut().push(TraceEvent::FragmentCompileStart { function, fragment });
    }

    fn on_fragment_compile_finish(&self, function: Option<FunctionId>, fragment: usize, bytes: usize) {
        self.events
            .borrow_mut()
            .push(TraceEvent::FragmentCompileFinish { function, fragment, bytes });
    }

    fn on_dispatcher_enter(&self, callsite_token: u64) {
        self.events.borrow_mut().push(TraceEvent::DispatcherEnter { callsite_token });
    }

    fn on_dispatcher_exit(&self, callsite_token: u64, resume_offset: Option<usize>) {
        self.events
            .borrow_mut()
            .push(TraceEvent::DispatcherExit { callsite_token, resume_offset });
    }

    fn on_callsite_patched(&self, callsite_token: u64, callee: FunctionId) {
        self.events.borrow_mut().push(TraceEvent::CallsitePatched { callsite_token, callee });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_tracer_captures_events_in_order() {
        let tracer = RecordingTracer::new();
        tracer.on_phase_transition("m", Phase::Initial, Phase::Parsed);
        tracer.on_dispatcher_enter(1);
        let events = tracer.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], TraceEvent::PhaseTransition { .. }));
        assert!(matches!(events[1], TraceEvent::DispatcherEnter { .. }));
    }
}

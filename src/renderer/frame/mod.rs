pub mod gpu;

use std::any::Any;
use crate::renderer::error::{EngineError, EngineResult};
use crate::renderer::overlay::Overlay;
use crate::renderer::resources::state::ResourceState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Recording,
    /// Executed and presented; the fence has not reached the frame's value yet
    Submitted,
}

/// The device operations one frame is made of.
///
/// `FrameEngine` decides the order; a backend only carries each step out.
pub trait FrameBackend {
    type Recorder<'a> where Self: 'a;

    /// Index of the back buffer to render into this frame
    fn acquire_back_buffer(&mut self) -> EngineResult<u32>;
    fn transition_back_buffer(
        &mut self,
        index: u32,
        before: ResourceState,
        after: ResourceState,
    ) -> EngineResult<()>;
    /// Binds the color and depth targets, clears them, and binds the shader-visible heap
    fn begin_rendering(&mut self, index: u32) -> EngineResult<()>;
    fn end_rendering(&mut self) -> EngineResult<()>;
    fn close(&mut self) -> EngineResult<()>;
    fn execute(&mut self, index: u32) -> EngineResult<()>;
    fn present(&mut self, index: u32) -> EngineResult<()>;
    fn signal(&mut self, value: u64) -> EngineResult<()>;
    fn completed_value(&self) -> EngineResult<u64>;
    /// Blocks until the fence reaches `value`
    fn wait(&mut self, value: u64) -> EngineResult<()>;
    /// Resets the command allocator, then reopens the command list
    fn reset(&mut self) -> EngineResult<()>;
    fn recorder(&self) -> EngineResult<Self::Recorder<'_>>;
}

/// Drives `Idle -> Recording -> Submitted -> Idle` over a backend.
///
/// Only one frame is ever outstanding: `end_frame` does not return until the
/// GPU has finished the frame it submitted, so the allocator and list are
/// always free to reset when it does.
pub struct FrameEngine<B: FrameBackend> {
    // Dropped before the backend that owns the device
    deferred: Vec<Box<dyn Any>>,
    backend: B,
    state: FrameState,
    fence_value: u64,
    back_buffer: Option<u32>,
}

impl<B: FrameBackend> FrameEngine<B> {
    pub fn new(backend: B) -> Self {
        Self {
            deferred: Vec::new(),
            backend,
            state: FrameState::Idle,
            fence_value: 0,
            back_buffer: None,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Last fence value requested by `end_frame`
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn begin_frame(&mut self) -> EngineResult<u32> {
        if self.state != FrameState::Idle {
            return Err(EngineError::InvalidFrameState(format!(
                "begin_frame called while {:?}",
                self.state,
            )));
        }

        let index = self.backend.acquire_back_buffer()?;
        self.backend.transition_back_buffer(
            index,
            ResourceState::Present,
            ResourceState::RenderTarget,
        )?;
        self.backend.begin_rendering(index)?;

        self.back_buffer = Some(index);
        self.state = FrameState::Recording;
        Ok(index)
    }

    /// Recording handle for draw calls between `begin_frame` and `end_frame`
    pub fn record(&self) -> EngineResult<B::Recorder<'_>> {
        if self.state != FrameState::Recording {
            return Err(EngineError::InvalidFrameState(
                "no frame is recording".into(),
            ));
        }
        self.backend.recorder()
    }

    /// Keeps `resource` alive until the GPU finishes the current frame
    pub fn defer_release<T: Any>(&mut self, resource: T) {
        self.deferred.push(Box::new(resource));
    }

    pub fn pending_releases(&self) -> usize {
        self.deferred.len()
    }

    /// One whole frame: `record` draws the scene, then the overlay goes on top.
    ///
    /// The overlay's `begin` runs right after `begin_frame`; its `end` and
    /// `draw` run after the scene and before `end_frame`.
    pub fn run_frame(
        &mut self,
        mut overlay: Option<&mut (dyn Overlay<B> + '_)>,
        record: impl FnOnce(&Self) -> EngineResult<()>,
    ) -> EngineResult<u32> {
        let index = self.begin_frame()?;
        if let Some(overlay) = overlay.as_deref_mut() {
            overlay.begin();
        }

        record(self)?;

        if let Some(overlay) = overlay {
            overlay.end();
            let recorder = self.record()?;
            overlay.draw(&recorder);
        }
        self.end_frame()?;
        Ok(index)
    }

    pub fn end_frame(&mut self) -> EngineResult<()> {
        let index = match (self.state, self.back_buffer) {
            (FrameState::Recording, Some(index)) => index,
            _ => {
                return Err(EngineError::InvalidFrameState(
                    "end_frame called with no frame recording".into(),
                ));
            }
        };

        self.backend.end_rendering()?;
        self.backend.transition_back_buffer(
            index,
            ResourceState::RenderTarget,
            ResourceState::Present,
        )?;
        self.backend.close()?;
        self.backend.execute(index)?;
        self.state = FrameState::Submitted;
        self.backend.present(index)?;

        self.fence_value += 1;
        self.backend.signal(self.fence_value)?;
        if self.backend.completed_value()? < self.fence_value {
            self.backend.wait(self.fence_value)?;
        }
        log::trace!("Frame {} complete", self.fence_value);

        self.deferred.clear();
        self.backend.reset()?;

        self.back_buffer = None;
        self.state = FrameState::Idle;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Acquire(u32),
        Transition(u32, ResourceState, ResourceState),
        BeginRendering(u32),
        EndRendering,
        Close,
        Execute(u32),
        Present(u32),
        Signal(u64),
        Wait(u64),
        Reset,
    }

    /// Instrumented backend: records every call and simulates a GPU that
    /// either finishes instantly or only when waited on.
    struct MockBackend {
        events: Vec<Event>,
        image_count: u32,
        next_image: u32,
        signaled: u64,
        completed: u64,
        gpu_is_instant: bool,
        unsafe_resets: u32,
        fail_wait: bool,
    }

    impl MockBackend {
        fn new(gpu_is_instant: bool) -> Self {
            Self {
                events: Vec::new(),
                image_count: 2,
                next_image: 0,
                signaled: 0,
                completed: 0,
                gpu_is_instant,
                unsafe_resets: 0,
                fail_wait: false,
            }
        }

        fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
            self.events.iter().filter(|e| pred(e)).count()
        }
    }

    impl FrameBackend for MockBackend {
        type Recorder<'a> = &'a [Event];

        fn acquire_back_buffer(&mut self) -> EngineResult<u32> {
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            self.events.push(Event::Acquire(index));
            Ok(index)
        }

        fn transition_back_buffer(
            &mut self,
            index: u32,
            before: ResourceState,
            after: ResourceState,
        ) -> EngineResult<()> {
            self.events.push(Event::Transition(index, before, after));
            Ok(())
        }

        fn begin_rendering(&mut self, index: u32) -> EngineResult<()> {
            self.events.push(Event::BeginRendering(index));
            Ok(())
        }

        fn end_rendering(&mut self) -> EngineResult<()> {
            self.events.push(Event::EndRendering);
            Ok(())
        }

        fn close(&mut self) -> EngineResult<()> {
            self.events.push(Event::Close);
            Ok(())
        }

        fn execute(&mut self, index: u32) -> EngineResult<()> {
            self.events.push(Event::Execute(index));
            Ok(())
        }

        fn present(&mut self, index: u32) -> EngineResult<()> {
            self.events.push(Event::Present(index));
            Ok(())
        }

        fn signal(&mut self, value: u64) -> EngineResult<()> {
            self.signaled = value;
            if self.gpu_is_instant {
                self.completed = value;
            }
            self.events.push(Event::Signal(value));
            Ok(())
        }

        fn completed_value(&self) -> EngineResult<u64> {
            Ok(self.completed)
        }

        fn wait(&mut self, value: u64) -> EngineResult<()> {
            if self.fail_wait {
                return Err(EngineError::Vulkan(ash::vk::Result::ERROR_DEVICE_LOST));
            }
            self.completed = self.completed.max(value);
            self.events.push(Event::Wait(value));
            Ok(())
        }

        fn reset(&mut self) -> EngineResult<()> {
            if self.completed < self.signaled {
                self.unsafe_resets += 1;
            }
            self.events.push(Event::Reset);
            Ok(())
        }

        fn recorder(&self) -> EngineResult<Self::Recorder<'_>> {
            Ok(&self.events)
        }
    }

    fn run_frames(engine: &mut FrameEngine<MockBackend>, count: usize) {
        for _ in 0..count {
            engine.begin_frame().unwrap();
            engine.end_frame().unwrap();
        }
    }

    #[test]
    fn test_fence_target_increases_by_one_per_frame() {
        let mut engine = FrameEngine::new(MockBackend::new(false));
        for expected in 1..=5u64 {
            engine.begin_frame().unwrap();
            engine.end_frame().unwrap();
            assert_eq!(engine.fence_value(), expected);
        }
        let signals: Vec<u64> = engine
            .backend()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Signal(v) => Some(*v),
                _ => None,
            })
            .collect();
        assert_eq!(signals, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_reset_never_precedes_completion() {
        let mut engine = FrameEngine::new(MockBackend::new(false));
        run_frames(&mut engine, 4);
        assert_eq!(engine.backend().unsafe_resets, 0);
        assert_eq!(engine.backend().count(|e| matches!(e, Event::Wait(_))), 4);
    }

    #[test]
    fn test_wait_skipped_when_gpu_already_done() {
        let mut engine = FrameEngine::new(MockBackend::new(true));
        run_frames(&mut engine, 3);
        assert_eq!(engine.backend().count(|e| matches!(e, Event::Wait(_))), 0);
        assert_eq!(engine.backend().unsafe_resets, 0);
    }

    #[test]
    fn test_transitions_pair_on_same_back_buffer() {
        let mut engine = FrameEngine::new(MockBackend::new(false));
        run_frames(&mut engine, 4);

        let mut open: Option<u32> = None;
        let mut pairs = 0;
        for event in &engine.backend().events {
            match *event {
                Event::Transition(i, ResourceState::Present, ResourceState::RenderTarget) => {
                    assert_eq!(open, None, "crossed transition on buffer {i}");
                    open = Some(i);
                }
                Event::Transition(i, ResourceState::RenderTarget, ResourceState::Present) => {
                    assert_eq!(open, Some(i));
                    open = None;
                    pairs += 1;
                }
                _ => {}
            }
        }
        assert_eq!(open, None);
        assert_eq!(pairs, 4);
    }

    #[test]
    fn test_end_frame_order() {
        let mut engine = FrameEngine::new(MockBackend::new(false));
        run_frames(&mut engine, 1);
        assert_eq!(
            engine.backend().events,
            vec![
                Event::Acquire(0),
                Event::Transition(0, ResourceState::Present, ResourceState::RenderTarget),
                Event::BeginRendering(0),
                Event::EndRendering,
                Event::Transition(0, ResourceState::RenderTarget, ResourceState::Present),
                Event::Close,
                Event::Execute(0),
                Event::Present(0),
                Event::Signal(1),
                Event::Wait(1),
                Event::Reset,
            ]
        );
    }

    #[test]
    fn test_steady_state_third_cycle() {
        let mut engine = FrameEngine::new(MockBackend::new(false));
        run_frames(&mut engine, 2);
        assert_eq!(engine.state(), FrameState::Idle);

        assert_eq!(engine.begin_frame().unwrap(), 0);
        assert!(engine.record().is_ok());
        engine.end_frame().unwrap();
        assert_eq!(engine.fence_value(), 3);
        assert_eq!(engine.backend().count(|e| *e == Event::Reset), 3);
    }

    #[test]
    fn test_wrong_state_is_an_error() {
        let mut engine = FrameEngine::new(MockBackend::new(false));
        assert!(matches!(engine.end_frame(), Err(EngineError::InvalidFrameState(_))));
        assert!(matches!(engine.record(), Err(EngineError::InvalidFrameState(_))));

        engine.begin_frame().unwrap();
        assert!(matches!(engine.begin_frame(), Err(EngineError::InvalidFrameState(_))));
        assert_eq!(engine.state(), FrameState::Recording);
        engine.end_frame().unwrap();
        assert_eq!(engine.fence_value(), 1);
    }

    #[test]
    fn test_deferred_release_dropped_after_wait() {
        struct Tracked(Rc<RefCell<bool>>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                *self.0.borrow_mut() = true;
            }
        }

        let dropped = Rc::new(RefCell::new(false));
        let mut engine = FrameEngine::new(MockBackend::new(false));
        engine.defer_release(Tracked(Rc::clone(&dropped)));

        engine.begin_frame().unwrap();
        assert_eq!(engine.pending_releases(), 1);
        assert!(!*dropped.borrow());

        engine.end_frame().unwrap();
        assert_eq!(engine.pending_releases(), 0);
        assert!(*dropped.borrow());
    }

    #[test]
    fn test_failed_wait_leaves_frame_submitted() {
        let mut backend = MockBackend::new(false);
        backend.fail_wait = true;
        let mut engine = FrameEngine::new(backend);

        engine.begin_frame().unwrap();
        assert!(engine.end_frame().is_err());
        assert_eq!(engine.state(), FrameState::Submitted);
        assert_eq!(engine.backend().count(|e| *e == Event::Reset), 0);
        assert!(matches!(engine.begin_frame(), Err(EngineError::InvalidFrameState(_))));
        assert!(matches!(engine.record(), Err(EngineError::InvalidFrameState(_))));
    }

    /// Logs its calls, noting what the backend had recorded when `draw` ran
    struct LoggingOverlay {
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Overlay<MockBackend> for LoggingOverlay {
        fn init(&mut self, _info: &crate::renderer::overlay::OverlayInitInfo) -> EngineResult<()> {
            Ok(())
        }

        fn begin(&mut self) {
            self.log.borrow_mut().push("begin".into());
        }

        fn end(&mut self) {
            self.log.borrow_mut().push("end".into());
        }

        fn draw(&mut self, cmd: &&[Event]) {
            self.log.borrow_mut().push(format!("draw after {:?}", cmd.last()));
        }
    }

    #[test]
    fn test_overlay_runs_inside_the_frame() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut overlay = LoggingOverlay { log: Rc::clone(&log) };
        let mut engine = FrameEngine::new(MockBackend::new(false));

        let index = engine
            .run_frame(Some(&mut overlay), |engine| {
                assert_eq!(engine.state(), FrameState::Recording);
                log.borrow_mut().push("scene".into());
                Ok(())
            })
            .unwrap();

        assert_eq!(index, 0);
        assert_eq!(
            *log.borrow(),
            vec![
                "begin".to_string(),
                "scene".to_string(),
                "end".to_string(),
                format!("draw after {:?}", Some(&Event::BeginRendering(0))),
            ]
        );
        assert_eq!(engine.state(), FrameState::Idle);
        assert_eq!(engine.fence_value(), 1);
        assert_eq!(engine.backend().events.last(), Some(&Event::Reset));
    }

    #[test]
    fn test_frame_without_overlay_still_records_scene() {
        let mut engine = FrameEngine::new(MockBackend::new(true));
        let mut scenes = 0;
        for _ in 0..3 {
            engine
                .run_frame(None, |_| {
                    scenes += 1;
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(scenes, 3);
        assert_eq!(engine.fence_value(), 3);
    }
}

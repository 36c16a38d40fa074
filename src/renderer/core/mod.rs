/// "Core" refers to the Vulkan objects that live as long as the engine:
/// instance, adapter choice, device, swap chain, command submission and sync.

pub mod adapter;
pub mod commands;
pub mod device;
pub mod instance;
pub mod swapchain;
pub mod sync;

use crate::renderer::error::EngineResult;

/// Passes `handle` to `release` when `result` is an error.
///
/// Used between creating a raw Vulkan handle and moving it into the struct whose
/// `Drop` owns it, so early returns do not leak it.
pub fn release_on_error<H, T>(
    result: EngineResult<T>,
    handle: H,
    release: impl FnOnce(H),
) -> EngineResult<T> {
    if result.is_err() {
        release(handle);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use crate::renderer::error::EngineError;

    #[test]
    fn test_release_runs_only_on_error() {
        let released = Cell::new(0);
        let ok: EngineResult<u32> = Ok(7);
        assert_eq!(release_on_error(ok, 1, |_| released.set(released.get() + 1)).unwrap(), 7);
        assert_eq!(released.get(), 0);

        let failed: EngineResult<u32> = Err(EngineError::NoSuitableAdapter);
        let result = release_on_error(failed, 42, |handle| released.set(handle));
        assert!(matches!(result, Err(EngineError::NoSuitableAdapter)));
        assert_eq!(released.get(), 42);
    }

    #[test]
    fn test_later_failure_releases_every_earlier_handle() {
        // Mirrors a three-step build where the third step fails
        let released = std::cell::RefCell::new(Vec::new());
        let build = || -> EngineResult<()> {
            let first = release_on_error(Ok("sampler"), "sampler", |_| {})?;
            let second = release_on_error(Ok("layout"), first, |h| released.borrow_mut().push(h))?;
            let third: EngineResult<()> = Err(EngineError::Init("set allocation".into()));
            release_on_error(third, (first, second), |(a, b)| {
                released.borrow_mut().push(b);
                released.borrow_mut().push(a);
            })
        };
        assert!(build().is_err());
        assert_eq!(*released.borrow(), vec!["layout", "sampler"]);
    }
}

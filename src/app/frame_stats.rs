use std::time::{Duration, Instant};
use crate::renderer::core::commands::CommandRecorder;
use crate::renderer::error::EngineResult;
use crate::renderer::overlay::{Overlay, OverlayInitInfo};

/// Reports how long the CPU spends recording each frame's scene, averaged
/// over `report_every` frames, at debug level. Records no GPU work.
pub struct FrameStatsOverlay {
    report_every: u32,
    frames: u32,
    accumulated: Duration,
    frame_start: Option<Instant>,
}

impl FrameStatsOverlay {
    pub fn new(report_every: u32) -> Self {
        Self {
            report_every: report_every.max(1),
            frames: 0,
            accumulated: Duration::ZERO,
            frame_start: None,
        }
    }

    /// Returns the average once `report_every` samples have accumulated, then starts over
    fn add_sample(&mut self, elapsed: Duration) -> Option<Duration> {
        self.accumulated += elapsed;
        self.frames += 1;
        if self.frames < self.report_every {
            return None;
        }
        let average = self.accumulated / self.frames;
        self.frames = 0;
        self.accumulated = Duration::ZERO;
        Some(average)
    }
}

impl Overlay for FrameStatsOverlay {
    fn init(&mut self, info: &OverlayInitInfo) -> EngineResult<()> {
        log::debug!(
            "Frame stats overlay on heap slot {} ({} back buffers, {:?})",
            info.font_srv_gpu_handle.index,
            info.back_buffer_count,
            info.back_buffer_format,
        );
        Ok(())
    }

    fn begin(&mut self) {
        self.frame_start = Some(Instant::now());
    }

    fn end(&mut self) {
        let Some(start) = self.frame_start.take() else {
            return;
        };
        if let Some(average) = self.add_sample(start.elapsed()) {
            log::debug!("Scene recorded in {:.3} ms on average", average.as_secs_f64() * 1000.0);
        }
    }

    fn draw(&mut self, _cmd: &CommandRecorder) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_average_every_n_frames() {
        let mut stats = FrameStatsOverlay::new(3);
        assert_eq!(stats.add_sample(Duration::from_millis(1)), None);
        assert_eq!(stats.add_sample(Duration::from_millis(2)), None);
        assert_eq!(stats.add_sample(Duration::from_millis(3)), Some(Duration::from_millis(2)));

        // Window starts over after a report
        assert_eq!(stats.add_sample(Duration::from_millis(9)), None);
    }

    #[test]
    fn test_end_without_begin_is_ignored() {
        let mut stats = FrameStatsOverlay::new(1);
        stats.end();
        assert_eq!(stats.frames, 0);

        stats.begin();
        stats.end();
        assert_eq!(stats.frames, 0);
        assert!(stats.frame_start.is_none());
    }
}

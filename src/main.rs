pub mod app;
pub mod renderer;

use color_eyre::Result;
use winit::event_loop::EventLoop;
use app::App;
use renderer::config::RenderConfig;

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let config = RenderConfig::load_or_default(RenderConfig::DEFAULT_PATH)?;
    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.take_error() {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

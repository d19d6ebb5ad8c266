pub mod app;
pub mod renderer;

use color_eyre::Result;
use env_logger::Env;

use app::App;

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let mut app = App::new();
    app.run()?;

    Ok(())
}

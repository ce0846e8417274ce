mod app;
mod click;
mod config;
mod engine;
mod error;
mod pet;
mod platform;
mod sched;
mod telemetry;
mod util;

use config::PetConfig;

fn main() {
    env_logger::init();
    log::info!("PetPal starting up");

    let cfg = match PetConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("Fatal error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = app::run(cfg) {
        log::error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

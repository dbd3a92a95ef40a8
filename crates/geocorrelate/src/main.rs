mod items;
mod report;
mod run;
mod settings;

use settings::Settings;
use std::process::ExitCode;

fn main() -> ExitCode {
    let settings = Settings::from_cli();
    run::init_logging(settings.verbose);

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to start the async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run::run(settings)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

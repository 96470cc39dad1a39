use std::process::ExitCode;

use taskflow_worker::WorkerSettings;

#[tokio::main]
async fn main() -> ExitCode {
    taskflow_observability::init();

    let settings = match WorkerSettings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            tracing::error!(error = %err, "invalid settings");
            return ExitCode::from(2);
        }
    };

    match taskflow_worker::run(settings, taskflow_worker::shutdown_signal()).await {
        Ok(()) => {
            tracing::info!("worker stopped");
            ExitCode::SUCCESS
        }
        Err(err) => {
            let detail = format!("{err:#}");
            tracing::error!(error = %detail, "worker failed");
            ExitCode::FAILURE
        }
    }
}

use std::process::ExitCode;

use attendance_monitor::cli::app;

#[tokio::main]
async fn main() -> ExitCode {
    match app::run().await {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(1)
        }
    }
}

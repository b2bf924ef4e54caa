// CLI main entry point
use mimalloc::MiMalloc;
use std::process::ExitCode;
use student_service::app::{already_logged, run};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;
#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments and run
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if !already_logged(&err) {
                eprintln!("Error: {err:?}");
            }
            ExitCode::FAILURE
        }
    }
}

#![cfg(unix)]

use std::{process::Command, time::Duration};
use student_service::shutdown::shutdown_signal;

fn raise(signal: &str) {
    let status = Command::new("kill")
        .arg(format!("-{signal}"))
        .arg(std::process::id().to_string())
        .status()
        .expect("run kill");
    assert!(status.success());
}

async fn resolves_on(signal: &str) {
    let waiter = tokio::spawn(shutdown_signal());
    // Let the handlers get installed before the signal goes out.
    tokio::time::sleep(Duration::from_millis(200)).await;
    raise(signal);

    tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .unwrap_or_else(|_| panic!("shutdown signal did not resolve on SIG{signal}"))
        .unwrap();
}

// Both signals are exercised in one test so no signal reaches the process
// before a handler exists.
#[tokio::test]
async fn termination_signals_resolve_the_shutdown_future() {
    resolves_on("TERM").await;
    resolves_on("INT").await;
}

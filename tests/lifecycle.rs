mod common;

use common::{client, loopback, test_router};
use std::{collections::HashMap, sync::Arc, time::Duration};
use student_service::{
    config::{AppSettings, ServerConfig},
    database::DatabaseError,
    lifecycle::{self, Application, Lifecycle, LifecycleError, Phase},
    server::{Server, ServerError},
};
use tokio::sync::Notify;

fn settings(driver: &str) -> AppSettings {
    let vars: HashMap<String, String> = [
        ("DB_DRIVER", driver),
        ("DB_DSN", "postgres://nobody@127.0.0.1:1/none"),
        ("DB_CONNECT_TIMEOUT_SECS", "1"),
        ("JWT_SIGNING_KEY", "lifecycle-test-key"),
        ("PASSWORD_SALT", "salt"),
        ("HTTP_HOST", "127.0.0.1"),
        ("HTTP_PORT", "0"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    AppSettings::from_vars(&vars).unwrap()
}

#[tokio::test]
async fn signal_leads_to_a_clean_stop() {
    let mut lifecycle = Lifecycle::new();
    let server = Server::new(&loopback(), test_router(Arc::new(Notify::new())));

    lifecycle
        .serve(server, Duration::from_secs(5), async {})
        .await
        .expect("clean shutdown");
    assert_eq!(lifecycle.phase(), Phase::Stopped);
}

#[tokio::test]
async fn shutdown_past_the_deadline_fails_once() {
    let port = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let config = ServerConfig {
        port,
        ..loopback()
    };

    // Keep knocking until the listener is up, then hold a slow request open.
    let request = tokio::spawn(async move {
        let url = format!("http://127.0.0.1:{port}/slow/30000");
        let http = client();
        loop {
            match http.get(&url).send().await {
                Err(err) if err.is_connect() => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                other => return other.map(|_| ()),
            }
        }
    });

    // The "signal" fires once that request is inside the handler.
    let entered = Arc::new(Notify::new());
    let signal = {
        let entered = entered.clone();
        async move { entered.notified().await }
    };

    let mut lifecycle = Lifecycle::new();
    let server = Server::new(&config, test_router(entered));
    let err = lifecycle
        .serve(server, Duration::from_millis(200), signal)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LifecycleError::Shutdown(ServerError::ShutdownTimeout { .. })
    ));
    assert!(matches!(lifecycle.phase(), Phase::ShuttingDown { .. }));

    let outcome = tokio::time::timeout(Duration::from_secs(5), request)
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.is_err());
}

#[tokio::test]
async fn bind_failure_never_waits_for_a_signal() {
    let holder = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = ServerConfig {
        port: holder.local_addr().unwrap().port(),
        ..loopback()
    };

    let mut lifecycle = Lifecycle::new();
    let server = Server::new(&config, test_router(Arc::new(Notify::new())));
    let err = lifecycle
        .serve(server, Duration::from_secs(5), async {
            panic!("signal must not be awaited when the server cannot start")
        })
        .await
        .unwrap_err();

    assert!(matches!(err, LifecycleError::Server(ServerError::Bind { .. })));
    assert_eq!(lifecycle.phase(), Phase::Starting);
}

#[tokio::test]
async fn unbounded_shutdown_timeout_is_capped() {
    let mut lifecycle = Lifecycle::new();
    let server = Server::new(&loopback(), test_router(Arc::new(Notify::new())));

    lifecycle
        .serve(server, Duration::MAX, async {})
        .await
        .expect("clean shutdown");
    assert_eq!(lifecycle.phase(), Phase::Stopped);
}

#[tokio::test]
async fn pool_is_closed_when_the_server_cannot_start() {
    let holder = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = ServerConfig {
        port: holder.local_addr().unwrap().port(),
        ..loopback()
    };
    let pool = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgres://nobody@127.0.0.1:1/none")
        .unwrap();
    let app = Application {
        server: Server::new(&config, test_router(Arc::new(Notify::new()))),
        pool: pool.clone(),
    };

    let mut lifecycle = Lifecycle::new();
    let err = lifecycle
        .run_application(app, Duration::from_secs(5), async {
            panic!("signal must not be awaited when the server cannot start")
        })
        .await
        .unwrap_err();

    assert!(matches!(err, LifecycleError::Server(ServerError::Bind { .. })));
    assert!(pool.is_closed());
}

#[tokio::test]
async fn unsupported_driver_stops_construction() {
    let mut lifecycle = Lifecycle::new();
    let err = lifecycle.construct(&settings("sqlite")).await.unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Database(DatabaseError::UnsupportedDriver(_))
    ));
    assert_eq!(lifecycle.phase(), Phase::Constructing);
}

#[tokio::test]
async fn unreachable_database_never_starts_the_server() {
    let err = lifecycle::run(&settings("postgres"), async {
        panic!("signal must not be awaited after a construction failure")
    })
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Database(DatabaseError::Connect(_))
    ));
}

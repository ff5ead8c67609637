use axum::{http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};

use viz_launcher::cluster_load::{ClusterLoadSource, OverwatchClient, QueueLoads};
use viz_launcher::config::CLUSTER_STATUS_PATH;
use viz_launcher::error::LauncherError;

/// Serve `app` on an ephemeral port and return its base URL.
async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn status_handler() -> Json<Value> {
    Json(json!({
        "QueueStatus": [
            {
                "name": "euc09",
                "totalSlots": 400,
                "totalUsedSlots": 250,
                "totalUnavailableSlots": 20,
                "totalReservedSlots": 30,
                "totalAvailableSlots": 100
            },
            {
                "name": "gpu01",
                "totalSlots": 8,
                "totalUsedSlots": 0,
                "totalUnavailableSlots": 0,
                "totalReservedSlots": 0,
                "totalAvailableSlots": 8
            }
        ]
    }))
}

#[tokio::test]
async fn test_fetch_and_aggregate() {
    let base = serve(Router::new().route(CLUSTER_STATUS_PATH, get(status_handler))).await;
    let client = OverwatchClient::new(format!("{}{}", base, CLUSTER_STATUS_PATH));

    let status = client.fetch().await.unwrap();
    assert_eq!(status.queues.len(), 2);

    let mut loads = QueueLoads::with_queues(["euc09", "ottc01"]);
    assert_eq!(loads.apply(&status), 1);

    let euc09 = loads.get("euc09").unwrap();
    assert_eq!(euc09.total, 400);
    assert_eq!(euc09.used, 250);
    assert_eq!(euc09.available, 100);
    assert_eq!(euc09.reserved, 30);
    assert_eq!(euc09.failed, 20);
    assert!(loads.get("gpu01").is_none());
}

#[tokio::test]
async fn test_server_error_is_transport_error() {
    let app = Router::new().route(
        CLUSTER_STATUS_PATH,
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
    );
    let base = serve(app).await;
    let client = OverwatchClient::new(format!("{}{}", base, CLUSTER_STATUS_PATH));

    assert!(matches!(client.fetch().await, Err(LauncherError::Transport(_))));
}

#[tokio::test]
async fn test_malformed_body_is_decode_error() {
    let app = Router::new().route(
        CLUSTER_STATUS_PATH,
        get(|| async { Json(json!({"unexpected": true})) }),
    );
    let base = serve(app).await;
    let client = OverwatchClient::new(format!("{}{}", base, CLUSTER_STATUS_PATH));

    assert!(matches!(client.fetch().await, Err(LauncherError::Decode(_))));
}

#[tokio::test]
async fn test_unreachable_server_is_transport_error() {
    // Bind and drop to get a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = OverwatchClient::new(format!("http://{}{}", addr, CLUSTER_STATUS_PATH));
    let err = client.fetch().await.unwrap_err();
    assert!(matches!(err, LauncherError::Transport(_)));
    assert!(err.is_recoverable());
}

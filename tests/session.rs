//! End-to-end tests: a real `Client` over TCP against `LocalNode`s on
//! ephemeral loopback ports.

use std::io::Write;
use std::time::{Duration, Instant};

use ledger_client::common::config::{ClientConfig, EnvConfig, ExecutionOptions};
use ledger_client::common::messages::Status;
use ledger_client::network::NodeState;
use ledger_client::node::{LocalNode, NodeBehavior, NodeHandle};
use ledger_client::{AccountId, Client, ClientError, NetworkRegistry, PrivateKey, Request};

async fn start_node(account: u64, behavior: NodeBehavior) -> NodeHandle {
    let node = LocalNode::bind("127.0.0.1:0", AccountId::from_num(account), behavior)
        .await
        .unwrap();
    let (handle, _task) = node.spawn();
    handle
}

/// A loopback address nothing listens on.
async fn dead_address() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    address
}

fn fast_options() -> ExecutionOptions {
    ExecutionOptions {
        min_backoff_ms: 10,
        max_backoff_ms: 50,
        request_timeout_ms: 5_000,
        attempt_timeout_ms: 500,
        connect_timeout_ms: 500,
        close_timeout_ms: 1_000,
        ..ExecutionOptions::default()
    }
}

fn client_for(nodes: &[(String, u64)]) -> Client {
    client_with(nodes, fast_options())
}

fn client_with(nodes: &[(String, u64)], options: ExecutionOptions) -> Client {
    let registry = NetworkRegistry::from_map(
        nodes
            .iter()
            .map(|(address, account)| (address.clone(), AccountId::from_num(*account))),
    )
    .unwrap();
    let client = Client::with_options(registry, options).unwrap();
    client
        .set_operator(AccountId::from_num(2), PrivateKey::generate())
        .unwrap();
    client
}

#[tokio::test]
async fn test_single_node_with_mirror_serves_request() {
    let node = start_node(3, NodeBehavior::Accept).await;

    let client = Client::for_network([(node.address(), AccountId::from_num(3))]).unwrap();
    client.set_mirror_network(["127.0.0.1:5600"]).unwrap();
    client
        .set_operator(AccountId::from_num(2), PrivateKey::generate())
        .unwrap();

    let response = client
        .execute(&Request::new(b"hello".to_vec()))
        .await
        .unwrap();

    assert_eq!(response.node_account_id, AccountId::from_num(3));
    assert_eq!(response.payload, b"hello".to_vec());
    assert_eq!(response.transaction_id.account_id, AccountId::from_num(2));
    assert_eq!(client.mirror_network(), vec!["127.0.0.1:5600".to_string()]);
    assert_eq!(node.received(), 1);

    client.close().await;
}

#[tokio::test]
async fn test_empty_network_map_is_invalid() {
    let result = Client::for_network(Vec::<(String, AccountId)>::new());
    assert!(matches!(result, Err(ClientError::InvalidEndpoint(_))));
}

#[tokio::test]
async fn test_execute_without_operator_sends_nothing() {
    let node = start_node(3, NodeBehavior::Accept).await;
    let client = Client::for_network([(node.address(), AccountId::from_num(3))]).unwrap();

    let err = client
        .execute(&Request::new(b"hello".to_vec()))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::NoOperatorConfigured));
    assert_eq!(node.received(), 0);
}

#[tokio::test]
async fn test_unreachable_single_node_exhausts_with_one_failure() {
    let address = dead_address().await;
    let client = client_for(&[(address.clone(), 3)]);

    let err = client
        .execute(&Request::new(b"hello".to_vec()))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::RequestExhausted { .. }));
    assert_eq!(err.failures().len(), 1);
    assert_eq!(err.failures()[0].endpoint, address);
    assert!(matches!(
        client.pool().state(&address),
        Some(NodeState::Unhealthy { .. })
    ));

    // Still backing off: fails fast without touching the network again.
    let started = Instant::now();
    let err = client
        .execute(&Request::new(b"hello".to_vec()))
        .await
        .unwrap_err();
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(err.failures()[0].reason.contains("backing off"));
}

#[tokio::test]
async fn test_close_twice_then_execute_fails() {
    let node = start_node(3, NodeBehavior::Accept).await;
    let client = client_for(&[(node.address(), 3)]);
    client
        .execute(&Request::new(b"hello".to_vec()))
        .await
        .unwrap();

    client.close().await;
    client.close().await;

    assert!(client.is_closed());
    assert!(matches!(
        client.execute(&Request::new(b"hello".to_vec())).await,
        Err(ClientError::SessionClosed)
    ));
}

#[tokio::test]
async fn test_failover_to_next_node_after_transport_failure() {
    let dead = dead_address().await;
    let live = start_node(4, NodeBehavior::Accept).await;
    let client = client_for(&[(dead.clone(), 3), (live.address(), 4)]);

    let response = client
        .execute(&Request::new(b"hello".to_vec()))
        .await
        .unwrap();

    assert_eq!(response.node_account_id, AccountId::from_num(4));
    assert!(!client.pool().is_healthy(&dead));
    assert!(client.pool().is_healthy(&live.address()));
}

#[tokio::test]
async fn test_busy_node_is_skipped_and_stays_healthy() {
    let busy = start_node(3, NodeBehavior::Busy).await;
    let live = start_node(4, NodeBehavior::Accept).await;
    let client = client_for(&[(busy.address(), 3), (live.address(), 4)]);

    let response = client
        .execute(&Request::new(b"hello".to_vec()))
        .await
        .unwrap();

    assert_eq!(response.node_account_id, AccountId::from_num(4));
    assert_eq!(busy.received(), 1);
    assert!(client.pool().is_healthy(&busy.address()));
}

#[tokio::test]
async fn test_disconnecting_node_is_marked_unhealthy() {
    let flaky = start_node(3, NodeBehavior::Disconnect).await;
    let live = start_node(4, NodeBehavior::Accept).await;
    let client = client_for(&[(flaky.address(), 3), (live.address(), 4)]);

    let response = client
        .execute(&Request::new(b"hello".to_vec()))
        .await
        .unwrap();

    assert_eq!(response.node_account_id, AccountId::from_num(4));
    assert!(!client.pool().is_healthy(&flaky.address()));
    assert_eq!(client.pool().bad_count(&flaky.address()), 1);
}

#[tokio::test]
async fn test_hanging_node_times_out_and_fails_over() {
    let stuck = start_node(3, NodeBehavior::Hang).await;
    let live = start_node(4, NodeBehavior::Accept).await;
    let client = client_for(&[(stuck.address(), 3), (live.address(), 4)]);

    let started = Instant::now();
    let response = client
        .execute(&Request::new(b"hello".to_vec()))
        .await
        .unwrap();

    assert_eq!(response.node_account_id, AccountId::from_num(4));
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!client.pool().is_healthy(&stuck.address()));
}

#[tokio::test]
async fn test_rejection_is_returned_without_retry() {
    let rejecting = start_node(3, NodeBehavior::Reject(Status::InsufficientPayerBalance)).await;
    let live = start_node(4, NodeBehavior::Accept).await;
    let client = client_for(&[(rejecting.address(), 3), (live.address(), 4)]);

    let err = client
        .execute(&Request::new(b"hello".to_vec()))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ClientError::Rejected {
            status: Status::InsufficientPayerBalance,
            ..
        }
    ));
    assert_eq!(live.received(), 0);
}

#[tokio::test]
async fn test_empty_payload_is_rejected_by_node() {
    let node = start_node(3, NodeBehavior::Accept).await;
    let client = client_for(&[(node.address(), 3)]);

    let err = client.execute(&Request::new(Vec::new())).await.unwrap_err();

    assert!(matches!(
        err,
        ClientError::Rejected {
            status: Status::InvalidTransactionBody,
            ..
        }
    ));
}

#[tokio::test]
async fn test_target_node_override() {
    let first = start_node(3, NodeBehavior::Accept).await;
    let second = start_node(4, NodeBehavior::Accept).await;
    let client = client_for(&[(first.address(), 3), (second.address(), 4)]);

    let request = Request::new(b"hello".to_vec()).with_node_account_id(AccountId::from_num(4));
    let response = client.execute(&request).await.unwrap();

    assert_eq!(response.node_account_id, AccountId::from_num(4));
    assert_eq!(first.received(), 0);
    assert_eq!(second.received(), 1);
}

#[tokio::test]
async fn test_unhealthy_target_is_not_replaced() {
    let dead = dead_address().await;
    let live = start_node(4, NodeBehavior::Accept).await;
    let client = client_for(&[(dead.clone(), 3), (live.address(), 4)]);

    let request = Request::new(b"hello".to_vec()).with_node_account_id(AccountId::from_num(3));
    let err = client.execute(&request).await.unwrap_err();

    assert!(matches!(err, ClientError::NodeUnreachable { endpoint, .. } if endpoint == dead));
    assert_eq!(live.received(), 0);
}

#[tokio::test]
async fn test_concurrent_requests_share_one_channel() {
    let node = start_node(3, NodeBehavior::Accept).await;
    let client = client_for(&[(node.address(), 3)]);

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .execute(&Request::new(format!("request {i}").into_bytes()))
                    .await
            })
        })
        .collect();

    for task in tasks {
        let response = task.await.unwrap().unwrap();
        assert_eq!(response.node_account_id, AccountId::from_num(3));
    }
    assert_eq!(node.received(), 20);
    assert_eq!(client.pool().state(&node.address()), Some(NodeState::Connected));
}

#[tokio::test]
async fn test_operator_swap_applies_to_later_requests() {
    let node = start_node(3, NodeBehavior::Accept).await;
    let client = client_for(&[(node.address(), 3)]);

    let before = client
        .execute(&Request::new(b"hello".to_vec()))
        .await
        .unwrap();
    client
        .set_operator(AccountId::from_num(1001), PrivateKey::generate())
        .unwrap();
    let after = client
        .execute(&Request::new(b"hello".to_vec()))
        .await
        .unwrap();

    assert_eq!(before.transaction_id.account_id, AccountId::from_num(2));
    assert_eq!(after.transaction_id.account_id, AccountId::from_num(1001));
}

#[tokio::test]
async fn test_client_from_config_file() {
    let node = start_node(3, NodeBehavior::Accept).await;
    let key = PrivateKey::generate();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
mirror_network = ["127.0.0.1:5600"]

[[network]]
address = "{}"
account = "0.0.3"

[operator]
account_id = "0.0.1001"
private_key = "{}"

[execution]
max_attempts = 3
request_timeout_ms = 5000
"#,
        node.address(),
        key.to_string_der()
    )
    .unwrap();

    let config = ClientConfig::from_file(file.path()).unwrap();
    let client = Client::from_config(&config).unwrap();

    assert_eq!(client.options().max_attempts, 3);
    let response = client
        .execute(&Request::new(b"hello".to_vec()))
        .await
        .unwrap();
    assert_eq!(response.transaction_id.account_id, AccountId::from_num(1001));
}

#[tokio::test]
async fn test_client_from_environment_single_node() {
    let node = start_node(3, NodeBehavior::Accept).await;
    let key = PrivateKey::generate().to_string_der();
    let address = node.address();

    let env = EnvConfig::from_lookup(|name| match name {
        "OPERATOR_ID" => Some("0.0.2".to_string()),
        "OPERATOR_KEY" => Some(key.clone()),
        "NODE_ID" => Some("0.0.3".to_string()),
        "NODE_ADDRESS" => Some(address.clone()),
        _ => None,
    })
    .unwrap();
    let client = Client::from_config(&env.to_client_config()).unwrap();

    let response = client
        .execute(&Request::new(b"hello".to_vec()))
        .await
        .unwrap();
    assert_eq!(response.node_account_id, AccountId::from_num(3));
}

#[tokio::test]
async fn test_ping_live_node() {
    let node = start_node(3, NodeBehavior::Accept).await;
    let client = client_for(&[(node.address(), 3)]);

    client.ping(AccountId::from_num(3)).await.unwrap();

    assert_eq!(node.received(), 1);
    assert_eq!(client.pool().state(&node.address()), Some(NodeState::Connected));
}

#[tokio::test]
async fn test_ping_all_marks_dead_node_unhealthy() {
    let dead = dead_address().await;
    let live = start_node(4, NodeBehavior::Accept).await;
    let client = client_with(
        &[(dead.clone(), 3), (live.address(), 4)],
        ExecutionOptions {
            max_attempts: 1,
            ..fast_options()
        },
    );

    let err = client.ping_all().await.unwrap_err();

    assert!(matches!(err, ClientError::NodeUnreachable { endpoint, .. } if endpoint == dead));
    assert!(matches!(
        client.pool().state(&dead),
        Some(NodeState::Unhealthy { .. })
    ));
    assert!(client.pool().is_healthy(&live.address()));
    assert_eq!(live.received(), 1);
}

#[tokio::test]
async fn test_busy_node_recovers_within_one_request() {
    let node = start_node(3, NodeBehavior::Busy).await;
    let client = client_with(
        &[(node.address(), 3)],
        ExecutionOptions {
            min_backoff_ms: 200,
            max_backoff_ms: 200,
            ..fast_options()
        },
    );

    let request = {
        let client = client.clone();
        tokio::spawn(async move { client.execute(&Request::new(b"hello".to_vec())).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    node.set_behavior(NodeBehavior::Accept).await;

    let response = request.await.unwrap().unwrap();
    assert_eq!(response.node_account_id, AccountId::from_num(3));
    assert!(node.received() >= 2);
}

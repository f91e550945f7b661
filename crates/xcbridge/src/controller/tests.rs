//! Unit tests for the controller

use super::*;
use std::sync::Mutex;
use std::time::SystemTime;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};
use xcbridge_launch::test_utils::{agent_url_line, ScriptedDevice, ScriptedSpawner, StaticProbe};

fn announcing(server: &MockServer) -> ScriptedSpawner {
    ScriptedSpawner::new()
        .with_script(
            "tail",
            &format!("echo '{}'; sleep 30", agent_url_line(&server.uri())),
        )
        .with_script("xcodebuild", "sleep 30")
}

fn controller(device: &ScriptedDevice, spawner: ScriptedSpawner) -> Controller {
    Controller::builder(Arc::new(device.clone()))
        .with_spawner(Arc::new(spawner))
        .with_probe(Arc::new(StaticProbe::new("15.2")))
        .with_settle_delay(Duration::from_millis(20))
        .with_discovery_timeout(Duration::from_secs(10))
        .with_local_session_id("local-1".to_string())
        .build()
        .unwrap()
}

async fn mount_session(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sessionId": "ABC123",
            "status": 0,
            "value": {}
        })))
        .mount(server)
        .await;
}

#[test]
fn test_controller_state_display() {
    assert_eq!(ControllerState::Idle.to_string(), "idle");
    assert_eq!(ControllerState::SessionActive.to_string(), "session-active");
    assert_eq!(ControllerState::Stopped.to_string(), "stopped");
}

#[test]
fn test_wants_safari() {
    assert!(wants_safari(&json!({"desiredCapabilities": {"browserName": "Safari"}})));
    assert!(wants_safari(&json!({"desiredCapabilities": {"browserName": "safari"}})));
    assert!(!wants_safari(&json!({"desiredCapabilities": {"bundleId": "com.example"}})));
    assert!(!wants_safari(&json!({"browserName": "Safari"})));
}

#[test]
fn test_builder_configuration() {
    let device = ScriptedDevice::simulator(ScriptedSpawner::new());
    let config = Controller::builder(Arc::new(device))
        .with_settle_delay(Duration::from_secs(1))
        .with_discovery_timeout(Duration::from_secs(60))
        .with_request_timeout(Duration::from_secs(30))
        .with_url_base("/custom/")
        .with_launch_strategy(LaunchStrategy::DirectBinary {
            binary: PathBuf::from("/tmp/agent"),
        })
        .with_resign_identity("Apple Development".to_string())
        .with_browser_start_url("https://example.com".to_string())
        .build_config();
    
    assert_eq!(config.bootstrap.settle_delay, Duration::from_secs(1));
    assert_eq!(config.bootstrap.discovery_timeout, Duration::from_secs(60));
    assert_eq!(config.proxy.request_timeout, Duration::from_secs(30));
    assert_eq!(config.proxy.url_base, "custom");
    assert_eq!(
        config.bootstrap.strategy,
        LaunchStrategy::DirectBinary { binary: PathBuf::from("/tmp/agent") }
    );
    assert_eq!(config.bootstrap.resign_identity.as_deref(), Some("Apple Development"));
    assert_eq!(config.browser_start_url, "https://example.com");
    assert_eq!(config.safari_bundle_id, SAFARI_BUNDLE_ID);
}

#[tokio::test]
async fn test_send_command_requires_session() {
    let device = ScriptedDevice::simulator(ScriptedSpawner::new());
    let mut controller = controller(&device, ScriptedSpawner::new());
    
    let err = controller
        .send_command("/wd/hub/status", "GET", None)
        .await
        .unwrap_err();
    
    match err {
        XcBridgeError::InvalidState { expected, actual } => {
            assert_eq!(expected, "session-active");
            assert_eq!(actual, "idle");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_start_opens_session() {
    let server = MockServer::start().await;
    mount_session(&server).await;
    Mock::given(method("GET"))
        .and(path("/wd/hub/session/ABC123/source"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sessionId": "ABC123",
            "value": "<XCUIElementTypeApplication/>"
        })))
        .expect(1)
        .mount(&server)
        .await;
    
    let spawner = announcing(&server);
    let device = ScriptedDevice::simulator(spawner.clone());
    let mut controller = controller(&device, spawner);
    
    let created = controller
        .start(json!({"desiredCapabilities": {"bundleId": "com.example.app"}}))
        .await
        .unwrap();
    
    assert_eq!(created["sessionId"], "local-1");
    assert_eq!(controller.state(), ControllerState::SessionActive);
    assert_eq!(controller.proxy().remote_session_id(), Some("ABC123"));
    assert_eq!(controller.endpoint().unwrap().url_base, "wd/hub");
    
    let source = controller
        .send_command("/wd/hub/session/local-1/source", "GET", None)
        .await
        .unwrap();
    assert_eq!(source["sessionId"], "local-1");
    
    controller.stop().await;
    assert_eq!(controller.state(), ControllerState::Stopped);
    assert!(controller.endpoint().is_none());
    assert_eq!(controller.proxy().remote_session_id(), None);
    assert_eq!(controller.proxy().local_session_id(), Some("local-1"));
    controller.stop().await;
    assert_eq!(controller.state(), ControllerState::Stopped);
}

#[tokio::test]
async fn test_session_created_outside_url_base() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sessionId": "ABC123"})))
        .expect(1)
        .mount(&server)
        .await;
    
    let spawner = announcing(&server);
    let device = ScriptedDevice::simulator(spawner.clone());
    let mut controller = controller(&device, spawner);
    
    controller.start(json!({"desiredCapabilities": {}})).await.unwrap();
    
    assert_eq!(controller.proxy().remote_session_id(), Some("ABC123"));
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.path(), "/session");
    controller.stop().await;
}

#[tokio::test]
async fn test_custom_session_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/wd/hub/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sessionId": "ABC123"})))
        .expect(1)
        .mount(&server)
        .await;
    
    let spawner = announcing(&server);
    let device = ScriptedDevice::simulator(spawner.clone());
    let mut controller = Controller::builder(Arc::new(device))
        .with_spawner(Arc::new(spawner))
        .with_probe(Arc::new(StaticProbe::new("15.2")))
        .with_settle_delay(Duration::from_millis(20))
        .with_session_path("wd/hub/session")
        .build()
        .unwrap();
    assert_eq!(controller.config().session_path, "/wd/hub/session");
    
    controller.start(json!({"desiredCapabilities": {}})).await.unwrap();
    assert_eq!(controller.proxy().remote_session_id(), Some("ABC123"));
    controller.stop().await;
}

#[tokio::test]
async fn test_start_without_session_id_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "status": 9,
            "value": "unknown command"
        })))
        .expect(1)
        .mount(&server)
        .await;
    
    let spawner = announcing(&server);
    let device = ScriptedDevice::simulator(spawner.clone());
    let mut controller = controller(&device, spawner);
    
    let err = controller
        .start(json!({"desiredCapabilities": {}}))
        .await
        .unwrap_err();
    
    match err {
        XcBridgeError::SessionNotCreated(body) => assert!(body.contains("unknown command")),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(controller.state(), ControllerState::Idle);
    assert!(controller.endpoint().is_none());
    assert!(controller.orchestrator.running().is_empty());
}

/// Records the wall-clock time of the first request it answers
struct FirstRequestClock {
    first: Arc<Mutex<Option<SystemTime>>>,
}

impl Respond for FirstRequestClock {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        if let Ok(mut first) = self.first.lock() {
            if first.is_none() {
                *first = Some(SystemTime::now());
            }
        }
        ResponseTemplate::new(200).set_body_json(json!({"sessionId": "ABC123"}))
    }
}

#[tokio::test]
async fn test_no_request_before_settle_delay() {
    let settle = Duration::from_millis(400);
    let server = MockServer::start().await;
    let first = Arc::new(Mutex::new(None));
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(FirstRequestClock { first: first.clone() })
        .mount(&server)
        .await;
    
    // The marker is touched right before the URL is printed
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("announced");
    let spawner = ScriptedSpawner::new()
        .with_script(
            "tail",
            &format!(
                "sleep 0.1; touch '{}'; echo '{}'; sleep 30",
                marker.display(),
                agent_url_line(&server.uri())
            ),
        )
        .with_script("xcodebuild", "sleep 30");
    let device = ScriptedDevice::simulator(spawner.clone());
    let mut controller = Controller::builder(Arc::new(device))
        .with_spawner(Arc::new(spawner))
        .with_probe(Arc::new(StaticProbe::new("15.2")))
        .with_settle_delay(settle)
        .build()
        .unwrap();
    
    controller.start(json!({"desiredCapabilities": {}})).await.unwrap();
    
    let announced = std::fs::metadata(&marker).unwrap().modified().unwrap();
    let first_request = (*first.lock().unwrap()).expect("agent saw no request");
    let waited = first_request.duration_since(announced).unwrap();
    assert!(waited >= settle, "first request {:?} after the URL was printed", waited);
    controller.stop().await;
}

#[tokio::test]
async fn test_start_only_from_idle() {
    let server = MockServer::start().await;
    mount_session(&server).await;
    
    let spawner = announcing(&server);
    let device = ScriptedDevice::simulator(spawner.clone());
    let mut controller = controller(&device, spawner);
    controller.start(json!({"desiredCapabilities": {}})).await.unwrap();
    
    let err = controller.start(json!({})).await.unwrap_err();
    assert!(matches!(err, XcBridgeError::InvalidState { .. }));
    
    controller.stop().await;
    let err = controller.start(json!({})).await.unwrap_err();
    assert!(matches!(err, XcBridgeError::InvalidState { .. }));
}

#[tokio::test]
async fn test_safari_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .and(body_json(json!({
            "desiredCapabilities": {"bundleId": SAFARI_BUNDLE_ID}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sessionId": "SAF-1"})))
        .expect(1)
        .mount(&server)
        .await;
    
    let spawner = announcing(&server);
    let device = ScriptedDevice::simulator(spawner.clone());
    let mut controller = controller(&device, spawner);
    
    let created = controller
        .start(json!({"desiredCapabilities": {"browserName": "Safari"}}))
        .await
        .unwrap();
    
    assert_eq!(created["sessionId"], "local-1");
    assert_eq!(device.opened(), vec![DEFAULT_BROWSER_START_URL.to_string()]);
    controller.stop().await;
}

#[tokio::test]
async fn test_bootstrap_failure_returns_to_idle() {
    let spawner = ScriptedSpawner::new()
        .with_script("tail", "exit 1")
        .with_script("xcodebuild", "sleep 30");
    let device = ScriptedDevice::simulator(spawner.clone());
    let mut controller = controller(&device, spawner);
    
    let err = controller.start(json!({})).await.unwrap_err();
    
    assert!(err.is_bootstrap_aborted());
    assert_eq!(controller.state(), ControllerState::Idle);
    assert!(controller.endpoint().is_none());
}

#[tokio::test]
async fn test_stop_before_start() {
    let device = ScriptedDevice::simulator(ScriptedSpawner::new());
    let mut controller = controller(&device, ScriptedSpawner::new());
    
    controller.stop().await;
    assert_eq!(controller.state(), ControllerState::Stopped);
}

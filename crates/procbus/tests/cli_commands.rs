#![cfg(all(unix, feature = "cli"))]

use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "procbus-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn procbus() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_procbus"));
    cmd.arg("--log-level").arg("error");
    cmd
}

struct KillOnDrop(Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

const CONFIG: &str = r#"{
    "routing": {
        "services": {"s:/billing": {"targets": ["0.4"]}},
        "shards": {"s:/users/": [
            {"from": "a", "to": "m", "targets": ["0.5"]},
            {"from": "n", "to": "z", "targets": ["0.6"]}
        ]}
    }
}"#;

#[test]
fn version_prints_name_and_version() {
    let output = procbus()
        .arg("version")
        .output()
        .expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("procbus {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn route_resolves_destinations_as_json() {
    let dir = unique_temp_dir("route");
    let config = dir.join("bus.json");
    std::fs::write(&config, CONFIG).expect("config should be writable");

    let output = procbus()
        .arg("--format")
        .arg("json")
        .arg("route")
        .arg("--config")
        .arg(&config)
        .arg("s:/billing/invoice")
        .arg("s:/users/nina")
        .arg("x:/0/9/reply")
        .arg("s:/unknown")
        .output()
        .expect("route should run");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let routes: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("route output should be JSON");
    let targets: Vec<&serde_json::Value> = routes
        .as_array()
        .expect("route output should be an array")
        .iter()
        .map(|route| &route["targets"])
        .collect();
    assert_eq!(targets[0], &serde_json::json!(["0.4"]));
    assert_eq!(targets[1], &serde_json::json!(["0.6"]));
    assert_eq!(targets[2], &serde_json::json!(["0.9"]));
    assert_eq!(targets[3], &serde_json::json!([]));

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn route_without_destinations_lists_rules() {
    let dir = unique_temp_dir("rules");
    let config = dir.join("bus.json");
    std::fs::write(&config, CONFIG).expect("config should be writable");

    let output = procbus()
        .arg("--format")
        .arg("pretty")
        .arg("route")
        .arg("--config")
        .arg(&config)
        .output()
        .expect("route should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("s:/billing simple 0.4"));
    assert!(lines[1].starts_with("s:/users/ sharded"));

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn route_with_missing_config_fails() {
    let output = procbus()
        .arg("route")
        .arg("--config")
        .arg("/nonexistent/procbus.json")
        .arg("s:/a")
        .output()
        .expect("route should run");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load"));
}

#[test]
fn send_without_daemon_fails() {
    let output = procbus()
        .arg("send")
        .arg("--addr")
        .arg("127.0.0.1:1")
        .arg("--pid")
        .arg("1")
        .arg("--dest")
        .arg("s:/a")
        .arg("--data")
        .arg("x")
        .output()
        .expect("send should run");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn serve_listen_send_roundtrip() {
    let serve = procbus()
        .arg("--format")
        .arg("json")
        .arg("serve")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve should start");
    let mut serve = KillOnDrop(serve);

    let mut ready = String::new();
    BufReader::new(serve.0.stdout.take().expect("serve stdout should be piped"))
        .read_line(&mut ready)
        .expect("serve should print its address");
    let ready: serde_json::Value =
        serde_json::from_str(&ready).expect("ready line should be JSON");
    let addr = ready["listen"]
        .as_str()
        .expect("ready line should carry the address")
        .to_string();

    let listen = procbus()
        .arg("--format")
        .arg("json")
        .arg("listen")
        .arg("--addr")
        .arg(&addr)
        .arg("--pid")
        .arg("7")
        .arg("--count")
        .arg("1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("listen should start");
    let mut listen = KillOnDrop(listen);

    // The listener may not be registered yet; resend until it reports a message.
    let deadline = Instant::now() + Duration::from_secs(10);
    let status = loop {
        let sent = procbus()
            .arg("--format")
            .arg("json")
            .arg("send")
            .arg("--addr")
            .arg(&addr)
            .arg("--pid")
            .arg("8")
            .arg("--dest")
            .arg("x:/0/7/cli")
            .arg("--data")
            .arg("hello over the bus")
            .output()
            .expect("send should run");
        assert!(sent.status.success());

        if let Some(status) = listen.0.try_wait().expect("listen status") {
            break status;
        }
        if Instant::now() >= deadline {
            panic!("listen did not receive a message");
        }
        thread::sleep(Duration::from_millis(100));
    };
    assert!(status.success());

    let mut stdout = String::new();
    listen
        .0
        .stdout
        .take()
        .expect("listen stdout should be piped")
        .read_to_string(&mut stdout)
        .expect("listen output should be readable");
    let message: serde_json::Value = serde_json::from_str(
        stdout.lines().next().expect("listen should print a message"),
    )
    .expect("message should be JSON");
    assert_eq!(message["destination"], "x:/0/7/cli");
    assert_eq!(message["source"], "0.8");
    assert_eq!(message["payload"], "hello over the bus");
    assert_eq!(message["payload_size"], 18);
}

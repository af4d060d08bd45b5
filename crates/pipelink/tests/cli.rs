#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/plcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn pipelink(dir: &Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_pipelink"));
    command
        .env_remove("PIPELINK_CONFIG")
        .arg("--log-level")
        .arg("error")
        .arg("--socket-dir")
        .arg(dir);
    command
}

struct Server {
    child: Child,
    dir: PathBuf,
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn serve(tag: &str, name: &str) -> Server {
    let dir = unique_temp_dir(tag);
    let child = pipelink(&dir)
        .arg("serve")
        .arg(name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve command should start");

    let socket = dir.join(format!("{name}.sock"));
    let start = Instant::now();
    while !socket.exists() {
        if start.elapsed() >= Duration::from_secs(5) {
            panic!("server socket never appeared");
        }
        thread::sleep(Duration::from_millis(25));
    }
    Server { child, dir }
}

fn call(server: &Server, command: &str, name: &str, json: &str) -> Output {
    pipelink(&server.dir)
        .arg("--format")
        .arg("json")
        .arg(command)
        .arg(name)
        .arg("--json")
        .arg(json)
        .arg("--timeout")
        .arg("5s")
        .output()
        .expect("client command should run")
}

#[test]
fn request_echo_prints_reply_value() {
    let server = serve("echo", "demo");
    let output = call(&server, "request", "demo", r#"{"op":"echo","data":"hi"}"#);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let reply: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("stdout should be one JSON object");
    assert_eq!(reply["value"], "hi");
    assert_eq!(reply["code"], 200);
    assert_eq!(reply["endpoint"], "demo@.");
}

#[test]
fn application_error_exits_2() {
    let server = serve("fail", "demo");
    let output = call(
        &server,
        "request",
        "demo",
        r#"{"op":"fail","code":404,"message":"not found"}"#,
    );

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("404"), "stderr: {stderr}");
    assert!(stderr.contains("not found"), "stderr: {stderr}");
}

#[test]
fn send_is_acknowledged() {
    let server = serve("send", "demo");
    let output = call(&server, "send", "demo", r#"{"op":"echo","data":1}"#);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
}

#[test]
fn missing_service_exits_3() {
    let dir = unique_temp_dir("missing");
    let output = pipelink(&dir)
        .arg("request")
        .arg("nobody")
        .arg("--json")
        .arg("{}")
        .output()
        .expect("request should run");

    assert_eq!(output.status.code(), Some(3));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn invalid_json_is_usage_error() {
    let dir = unique_temp_dir("usage");
    let output = pipelink(&dir)
        .arg("request")
        .arg("demo")
        .arg("--json")
        .arg("{nope")
        .output()
        .expect("request should run");

    assert_eq!(output.status.code(), Some(64));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_pipelink"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("pipelink {}", env!("CARGO_PKG_VERSION")));
}

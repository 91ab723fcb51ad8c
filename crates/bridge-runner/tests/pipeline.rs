use bridge_runner::config::{CourseContext, StagingLayout, WorkspaceLayout};
use bridge_runner::stager::{extract_archive, reset_layout};
use bridge_runner::{run_pipeline, BridgeError, DirectBoundary, PipelineConfig};
use serial_test::serial;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use zip::write::FileOptions;
use zip::ZipWriter;

const CONTEXT: &str = r#"{
    "completedDate": "2024-03-01T10:00:00Z",
    "student": {"email": "ada@example.edu", "id": "s-1", "username": "ada", "fullName": "Ada Lovelace"},
    "course": {"id": "c-9", "projectId": "p-2", "lti": true,
               "assignment": {"id": "a-7", "start": "2024-02-01", "end": "2024-03-02"}}
}"#;

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().to_path_buf();
        fs::create_dir_all(root.join("workspace/.guides")).expect("guides");
        fs::write(root.join("workspace/solution.py"), "def add(a, b):\n    return a + b\n")
            .expect("student file");
        Self { _dir: dir, root }
    }

    fn workspace(&self) -> PathBuf {
        self.root.join("workspace")
    }

    fn staging(&self) -> StagingLayout {
        StagingLayout::new(self.root.join("autograder"))
    }

    /// Bundles `run_autograder` (and optionally `setup.sh`) into the public archive slot.
    fn bundle(&self, run_autograder: &str, setup: Option<&str>) {
        let path = self.workspace().join(".guides/autograder.zip");
        let mut zip = ZipWriter::new(File::create(path).expect("archive"));
        let exec = FileOptions::default().unix_permissions(0o755);
        zip.start_file("run_autograder", exec).expect("entry");
        zip.write_all(run_autograder.as_bytes()).expect("write entry");
        if let Some(body) = setup {
            zip.start_file("setup.sh", exec).expect("setup");
            zip.write_all(body.as_bytes()).expect("write setup");
        }
        zip.start_file("tests/expected/add.txt", FileOptions::default())
            .expect("data");
        zip.write_all(b"3\n").expect("write data");
        zip.finish().expect("finish");
    }

    fn config(&self, callback_url: &str) -> PipelineConfig {
        PipelineConfig {
            callback_url: callback_url.to_string(),
            run_setup: false,
            extended_logs: false,
            context: CourseContext::parse(CONTEXT).expect("context"),
            staging: self.staging(),
            workspace: WorkspaceLayout::new(self.workspace()),
            service_identity: "codio".to_string(),
            path_env: std::env::var_os("PATH"),
        }
    }
}

fn grader_writing(results: &str) -> String {
    format!(
        "#!/bin/sh\necho \"grading\"\necho \"noise\" >&2\ncat > results/results.json <<'JSON'\n{}\nJSON\n",
        results
    )
}

/// Serves one callback request; yields the decoded-enough form body.
fn callback_server(reply: &'static str) -> (String, thread::JoinHandle<String>) {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("bind");
    let addr = server.server_addr().to_ip().expect("ip listener");
    let handle = thread::spawn(move || {
        let mut request = server.recv().expect("request");
        let mut body = String::new();
        request.as_reader().read_to_string(&mut body).expect("body");
        request
            .respond(tiny_http::Response::from_string(reply))
            .expect("respond");
        body
    });
    (format!("http://{}/callback", addr), handle)
}

fn unused_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    format!("http://{}/callback", addr)
}

fn direct() -> DirectBoundary {
    DirectBoundary
}

#[test]
#[serial]
fn all_passing_results_grade_full_marks() {
    let fx = Fixture::new();
    fx.bundle(
        &grader_writing(r#"{"tests":[{"score":10,"max_score":10,"status":"passed","name":"A"}]}"#),
        None,
    );
    let (url, server) = callback_server(r#"{"code":1,"message":"saved"}"#);

    let outcome = run_pipeline(&fx.config(&url), &direct()).expect("pipeline");
    let body = server.join().expect("server");

    assert_eq!(outcome.score, 100);
    assert_eq!((outcome.passed, outcome.failed), (1, 0));
    assert_eq!(outcome.acknowledgment.message, "saved");
    assert!(body.contains("grade=100"));
    assert!(body.contains("points=100"));
    assert!(body.contains("Passed+Tests"));
    assert!(!body.contains("Failed+Tests"));
    assert!(!fx.staging().root.exists(), "staging area removed after success");
}

#[test]
#[serial]
fn mixed_results_grade_half_and_list_both_groups() {
    let fx = Fixture::new();
    fx.bundle(
        &grader_writing(
            r#"{"tests":[{"score":0,"max_score":5,"name":"B"},{"score":5,"max_score":5,"name":"C"}]}"#,
        ),
        None,
    );
    let (url, server) = callback_server(r#"{"code":1,"message":"saved"}"#);

    let outcome = run_pipeline(&fx.config(&url), &direct()).expect("pipeline");
    let body = server.join().expect("server");

    assert_eq!(outcome.score, 50);
    assert_eq!((outcome.passed, outcome.failed), (1, 1));
    assert!(body.contains("grade=50"));
    assert!(body.contains("Failed+Tests"));
    assert!(body.contains("Passed+Tests"));
}

#[test]
#[serial]
fn rejected_callback_surfaces_remote_message() {
    let fx = Fixture::new();
    fx.bundle(
        &grader_writing(r#"{"score": 12.2, "tests": []}"#),
        None,
    );
    let (url, server) = callback_server(r#"{"code":2,"message":"bad token"}"#);

    let err = run_pipeline(&fx.config(&url), &direct()).expect_err("rejected");
    let body = server.join().expect("server");

    assert!(body.contains("grade=13"));
    match &err {
        BridgeError::Rejected { code, message } => {
            assert_eq!(*code, 2);
            assert_eq!(message, "bad token");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("bad token"));
}

#[test]
#[serial]
fn failing_grader_aborts_before_translation() {
    let fx = Fixture::new();
    fx.bundle("#!/bin/sh\necho \"about to fail\"\nexit 3\n", None);

    // Nothing listens here; reaching the callback would yield an HTTP error instead.
    let err = run_pipeline(&fx.config(&unused_url()), &direct()).expect_err("grader fails");
    assert!(matches!(err, BridgeError::GraderFailed { code: 3 }), "got {err}");

    let staging = fx.staging();
    assert!(!staging.results_file().exists());
    let captured = fs::read_to_string(staging.capture_file()).expect("capture file");
    assert!(captured.contains("about to fail"));
    assert!(staging.metadata_file().exists(), "metadata written before grading");
    assert!(staging.submission().join("solution.py").exists());
    assert!(!staging.submission().join(".guides").exists());
}

#[test]
#[serial]
fn killed_grader_is_reported_as_signalled() {
    let fx = Fixture::new();
    fx.bundle("#!/bin/sh\necho \"partial\"\nkill -KILL $$\n", None);

    let err = run_pipeline(&fx.config(&unused_url()), &direct()).expect_err("grader killed");
    assert!(matches!(err, BridgeError::GraderSignalled { signal: 9 }), "got {err}");
    assert!(!fx.staging().results_file().exists());
    let captured = fs::read_to_string(fx.staging().capture_file()).expect("capture file");
    assert!(captured.contains("partial"));
}

#[test]
#[serial]
fn grader_sees_configured_path() {
    let fx = Fixture::new();
    let seen = fx.root.join("grader-path.txt");
    let grader = format!(
        "#!/bin/sh\necho \"$PATH\" > '{}'\n\
         echo '{{\"tests\":[{{\"score\":1,\"max_score\":1,\"name\":\"path\"}}]}}' > results/results.json\n",
        seen.display()
    );
    fx.bundle(&grader, None);
    let (url, server) = callback_server(r#"{"code":1,"message":"saved"}"#);

    let mut config = fx.config(&url);
    config.path_env = Some("/opt/grader/bin:/usr/bin:/bin".into());
    run_pipeline(&config, &direct()).expect("pipeline");
    server.join().expect("server");

    assert_eq!(
        fs::read_to_string(&seen).expect("recorded PATH"),
        "/opt/grader/bin:/usr/bin:/bin\n"
    );
}

#[test]
#[serial]
fn setup_hook_runs_before_grader_when_enabled() {
    let fx = Fixture::new();
    let grader = "#!/bin/sh\n[ -f source/setup.marker ] || exit 9\n\
                  echo '{\"tests\":[{\"score\":1,\"max_score\":1,\"name\":\"env\"}]}' > results/results.json\n";
    fx.bundle(grader, Some("#!/bin/sh\necho ready > setup.marker\n"));
    let (url, server) = callback_server(r#"{"code":1,"message":"saved"}"#);

    let mut config = fx.config(&url);
    config.run_setup = true;
    config.extended_logs = true;
    let outcome = run_pipeline(&config, &direct()).expect("pipeline");
    let body = server.join().expect("server");

    assert_eq!(outcome.score, 100);
    assert!(body.contains("details"), "verbose feedback carries output blocks");
}

#[test]
#[serial]
fn failing_setup_hook_is_fatal() {
    let fx = Fixture::new();
    fx.bundle(&grader_writing(r#"{"tests":[]}"#), Some("#!/bin/sh\nexit 1\n"));

    let mut config = fx.config(&unused_url());
    config.run_setup = true;
    let err = run_pipeline(&config, &direct()).expect_err("setup fails");
    assert!(matches!(err, BridgeError::SetupFailed(_)), "got {err}");
    assert!(!fx.staging().entry_point().exists(), "grader never copied");
}

#[test]
#[serial]
fn missing_archive_and_missing_results_abort() {
    let fx = Fixture::new();
    let err = run_pipeline(&fx.config(&unused_url()), &direct()).expect_err("no archive");
    assert!(matches!(err, BridgeError::ArchiveNotFound { .. }));

    fx.bundle("#!/bin/sh\necho 'forgot to write results'\n", None);
    let err = run_pipeline(&fx.config(&unused_url()), &direct()).expect_err("no results");
    assert!(matches!(err, BridgeError::ResultsNotFound(_)), "got {err}");
}

#[test]
#[serial]
fn stale_staging_area_is_replaced() {
    let fx = Fixture::new();
    let staging = fx.staging();
    fs::create_dir_all(staging.results()).expect("stale");
    fs::write(
        staging.results_file(),
        r#"{"tests":[{"score":0,"max_score":1,"name":"stale"}]}"#,
    )
    .expect("stale results");
    fx.bundle(
        &grader_writing(r#"{"tests":[{"score":1,"max_score":1,"name":"fresh"}]}"#),
        None,
    );
    let (url, server) = callback_server(r#"{"code":1,"message":"saved"}"#);

    let outcome = run_pipeline(&fx.config(&url), &direct()).expect("pipeline");
    let body = server.join().expect("server");
    assert_eq!(outcome.score, 100);
    assert!(body.contains("fresh"));
    assert!(!body.contains("stale"));
}

fn tree_digest(root: &Path) -> String {
    let mut hasher = Sha256::new();
    for entry in walkdir::WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.expect("entry");
        let rel = entry.path().strip_prefix(root).expect("prefix");
        let meta = entry.metadata().expect("meta");
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update(meta.permissions().mode().to_le_bytes());
        if meta.is_file() {
            hasher.update(fs::read(entry.path()).expect("read"));
        }
    }
    hex::encode(hasher.finalize())
}

#[test]
fn extraction_into_fresh_layout_is_idempotent() {
    let fx = Fixture::new();
    fx.bundle(&grader_writing(r#"{"tests":[]}"#), Some("#!/bin/sh\n"));
    let archive = fx.workspace().join(".guides/autograder.zip");
    let staging = fx.staging();

    reset_layout(&staging).expect("reset");
    extract_archive(&archive, &staging.source()).expect("first");
    let first = tree_digest(&staging.source());

    reset_layout(&staging).expect("reset again");
    extract_archive(&archive, &staging.source()).expect("second");
    assert_eq!(tree_digest(&staging.source()), first);

    // extracting over an existing tree changes nothing either
    extract_archive(&archive, &staging.source()).expect("third");
    assert_eq!(tree_digest(&staging.source()), first);
}

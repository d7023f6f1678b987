//! End-to-end runs against a real Docker daemon.
//!
//! Requires the `code-runner-<language>` images to be built locally.
//! Skipped unless `CODE_RUNNER_DOCKER_TEST` is set.

use std::path::Path;
use std::time::{Duration, Instant};

use code_runner_daemon::backend::DockerBackend;
use code_runner_daemon::config::Config;
use code_runner_daemon::language::Language;
use code_runner_daemon::result::TIMEOUT_MESSAGE;
use code_runner_daemon::service::{ExecuteRequest, ExecutionService};
use tokio_test::assert_ok;

fn enabled() -> bool {
    std::env::var("CODE_RUNNER_DOCKER_TEST").is_ok()
}

fn service(root: &Path) -> ExecutionService<DockerBackend> {
    let config = Config {
        workspace_root: root.to_path_buf(),
        ..Config::default()
    };
    ExecutionService::new(&config, assert_ok!(DockerBackend::connect()))
}

fn request(language: Language, code: &str, stdin: &str) -> ExecuteRequest {
    ExecuteRequest {
        language: Some(language.as_str().to_string()),
        code: Some(code.to_string()),
        stdin: Some(stdin.to_string()),
    }
}

fn exit_zero_program(language: Language) -> &'static str {
    match language {
        Language::Python => "print('ok')",
        Language::JavaScript => "console.log('ok')",
        Language::Java => {
            "public class Main { public static void main(String[] a) { System.out.println(\"ok\"); } }"
        }
        Language::C => "#include <stdio.h>\nint main(void) { puts(\"ok\"); return 0; }",
        Language::Cpp => "#include <iostream>\nint main() { std::cout << \"ok\\n\"; }",
        Language::Ruby => "puts 'ok'",
        Language::Go => "package main\nimport \"fmt\"\nfunc main() { fmt.Println(\"ok\") }",
        Language::Php => "<?php echo \"ok\\n\";",
        Language::Rust => "fn main() { println!(\"ok\"); }",
        Language::Swift => "print(\"ok\")",
    }
}

fn assert_no_workspaces(root: &Path) {
    let left: Vec<_> = std::fs::read_dir(root)
        .map(|entries| entries.map(|e| e.unwrap().path()).collect())
        .unwrap_or_default();
    assert!(left.is_empty(), "leaked workspaces: {left:?}");
}

#[tokio::test]
async fn every_language_exits_zero() {
    if !enabled() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let service = service(root.path());

    for language in Language::ALL {
        let result = assert_ok!(
            service
                .execute(request(language, exit_zero_program(language), ""))
                .await
        );
        assert_eq!(result.exit_code, Some(0), "{language}: {}", result.stderr);
        assert_eq!(result.stdout, "ok\n", "{language}");
    }
    assert_no_workspaces(root.path());
}

#[tokio::test]
async fn stdout_and_exit_code_pass_through() {
    if !enabled() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let service = service(root.path());

    let result = assert_ok!(
        service
            .execute(request(
                Language::Python,
                "import sys\nprint(input())\nsys.exit(42)",
                "forty-two\n",
            ))
            .await
    );
    assert_eq!(result.stdout, "forty-two\n");
    assert_eq!(result.exit_code, Some(42));
    assert_no_workspaces(root.path());
}

#[tokio::test]
async fn infinite_loop_times_out() {
    if !enabled() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let service = service(root.path());

    let started = Instant::now();
    let result = assert_ok!(
        service
            .execute(request(Language::JavaScript, "while (true) {}", ""))
            .await
    );
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(result.stderr, TIMEOUT_MESSAGE);
    assert_eq!(result.exit_code, None);
    assert_no_workspaces(root.path());
}

#[tokio::test]
async fn network_is_unreachable() {
    if !enabled() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let service = service(root.path());

    let code = "import socket\n\
                try:\n    socket.create_connection(('1.1.1.1', 80), timeout=2)\n    print('connected')\n\
                except OSError:\n    print('isolated')";
    let result = assert_ok!(service.execute(request(Language::Python, code, "")).await);
    assert_eq!(result.stdout, "isolated\n");
}

#[tokio::test]
async fn concurrent_runs_do_not_share_stdin() {
    if !enabled() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let service = service(root.path());

    let code = "import sys; print(sys.stdin.read(), end='')";
    let (a, b) = tokio::join!(
        service.execute(request(Language::Python, code, "A")),
        service.execute(request(Language::Python, code, "B")),
    );
    assert_eq!(assert_ok!(a).stdout, "A");
    assert_eq!(assert_ok!(b).stdout, "B");
    assert_no_workspaces(root.path());
}

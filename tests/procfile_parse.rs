use std::time::Duration;

use proctor::procfile::{parse, ProcessKind, ReadySpec, ReloadSignal};

#[test]
fn simple_process() {
    let procfile = parse("api: go run ./cmd/api").unwrap();
    assert_eq!(procfile.processes.len(), 1);
    let api = &procfile.processes[0];
    assert_eq!(api.name, "api");
    assert_eq!(api.command, "go run ./cmd/api");
    assert_eq!(api.kind, ProcessKind::LongRunning);
    assert_eq!(api.signal, ReloadSignal::Term);
    assert_eq!(api.debounce, Duration::from_millis(500));
    assert_eq!(api.shutdown_grace, Duration::from_secs(5));
}

#[test]
fn one_shot_process() {
    let procfile = parse("migrate!: just db migrate").unwrap();
    assert_eq!(procfile.processes[0].name, "migrate");
    assert_eq!(procfile.processes[0].kind, ProcessKind::OneShot);
}

#[test]
fn watch_patterns_and_excludes() {
    let procfile = parse("api **/*.go !**/*_test.go: go run ./cmd/api").unwrap();
    let api = &procfile.processes[0];
    assert_eq!(api.watch_includes, vec!["**/*.go"]);
    assert_eq!(api.watch_excludes, vec!["**/*_test.go"]);
}

#[test]
fn bare_file_path_is_a_pattern() {
    let procfile = parse("echo Procfile: echo hello").unwrap();
    assert_eq!(procfile.processes[0].watch_includes, vec!["Procfile"]);
}

#[test]
fn options() {
    let input = "db: postgres\napi after=db debounce=1s signal=INT shutdown=10s dir=./svc: ./api";
    let procfile = parse(input).unwrap();
    let api = &procfile.processes[1];
    assert_eq!(api.dependencies, vec!["db"]);
    assert_eq!(api.debounce, Duration::from_secs(1));
    assert_eq!(api.signal, ReloadSignal::Int);
    assert_eq!(api.shutdown_grace, Duration::from_secs(10));
    assert_eq!(api.dir.as_deref(), Some("./svc"));
}

#[test]
fn after_accepts_a_comma_list() {
    let input = "a: true\nb: true\nc after=a,b: true";
    let procfile = parse(input).unwrap();
    assert_eq!(procfile.processes[2].dependencies, vec!["a", "b"]);
}

#[test]
fn signal_names_accept_sig_prefix_and_case() {
    let procfile = parse("api signal=sigusr1: ./api").unwrap();
    assert_eq!(procfile.processes[0].signal, ReloadSignal::Usr1);
}

#[test]
fn ready_tcp() {
    let procfile = parse("db ready=5432: postgres").unwrap();
    assert_eq!(procfile.processes[0].ready, Some(ReadySpec::Tcp { port: 5432 }));
}

#[test]
fn ready_http_with_path() {
    let procfile = parse("api ready=http:8080/health: ./api").unwrap();
    assert_eq!(
        procfile.processes[0].ready,
        Some(ReadySpec::Http { port: 8080, path: "/health".into(), status: None })
    );
}

#[test]
fn ready_http_with_status() {
    let procfile = parse("api ready=http:8080/health=200: ./api").unwrap();
    assert_eq!(
        procfile.processes[0].ready,
        Some(ReadySpec::Http { port: 8080, path: "/health".into(), status: Some(200) })
    );
}

#[test]
fn ready_http_status_without_path() {
    let procfile = parse("api ready=http:8080=201: ./api").unwrap();
    assert_eq!(
        procfile.processes[0].ready,
        Some(ReadySpec::Http { port: 8080, path: "/".into(), status: Some(201) })
    );
}

#[test]
fn ready_exec_double_quoted() {
    let procfile = parse(r#"api ready=exec:"pg_isready -h localhost": ./api"#).unwrap();
    assert_eq!(
        procfile.processes[0].ready,
        Some(ReadySpec::Exec { command: "pg_isready -h localhost".into() })
    );
}

#[test]
fn ready_exec_single_quoted() {
    let procfile = parse("api ready=exec:'test -f /tmp/ready': ./api").unwrap();
    assert_eq!(
        procfile.processes[0].ready,
        Some(ReadySpec::Exec { command: "test -f /tmp/ready".into() })
    );
}

#[test]
fn ready_exec_empty_is_an_error() {
    let err = parse("api ready=exec:: ./api").unwrap_err();
    assert!(err.to_string().contains("exec probe requires a command"));
}

#[test]
fn comments_and_blank_lines() {
    let input = "\n# comment\napi: ./api\n\n  # indented comment\nworker: ./worker\n";
    let procfile = parse(input).unwrap();
    assert_eq!(procfile.processes.len(), 2);
}

#[test]
fn line_continuation() {
    let procfile = parse("api: go run \\\n  -tags dev \\\n  ./cmd/api").unwrap();
    assert_eq!(procfile.processes[0].command, "go run -tags dev ./cmd/api");
}

#[test]
fn block_command() {
    let procfile = parse("api:\n    echo hello\n    echo world\n").unwrap();
    assert_eq!(procfile.processes[0].command, "echo hello\necho world");
}

#[test]
fn block_command_keeps_relative_indent() {
    let procfile = parse("api:\n    if true; then\n      echo y\n    fi\n").unwrap();
    assert_eq!(procfile.processes[0].command, "if true; then\n  echo y\nfi");
}

#[test]
fn block_followed_by_another_process() {
    let procfile = parse("api:\n    echo hello\nworker: echo world").unwrap();
    assert_eq!(procfile.processes.len(), 2);
    assert_eq!(procfile.processes[0].command, "echo hello");
    assert_eq!(procfile.processes[1].command, "echo world");
}

#[test]
fn block_with_options_on_declaration() {
    let procfile = parse("api ready=8080:\n    go run ./cmd/api\n").unwrap();
    assert_eq!(procfile.processes[0].command, "go run ./cmd/api");
    assert_eq!(procfile.processes[0].ready, Some(ReadySpec::Tcp { port: 8080 }));
}

#[test]
fn global_env_bare_and_quoted() {
    let input = "FOO=bar\nMSG='hello world'\nQ=\"a\\nb\"\napi: ./api";
    let procfile = parse(input).unwrap();
    assert_eq!(procfile.env.get("FOO").unwrap(), "bar");
    assert_eq!(procfile.env.get("MSG").unwrap(), "hello world");
    assert_eq!(procfile.env.get("Q").unwrap(), "a\nb");
}

#[test]
fn global_env_value_with_quoted_colon() {
    let procfile = parse("GREETING='hello: world'\napi: ./api").unwrap();
    assert_eq!(procfile.env.get("GREETING").unwrap(), "hello: world");
}

#[test]
fn inline_env_is_split_from_the_command() {
    let procfile = parse("api: CGO_ENABLED=0 PORT=8080 go run ./cmd/api").unwrap();
    let api = &procfile.processes[0];
    assert_eq!(
        api.inline_env,
        vec![("CGO_ENABLED".to_string(), "0".to_string()), ("PORT".to_string(), "8080".to_string())]
    );
    assert_eq!(api.command, "go run ./cmd/api");
}

#[test]
fn lowercase_assignment_stays_in_the_command() {
    let procfile = parse("api: foo=bar ./api").unwrap();
    assert!(procfile.processes[0].inline_env.is_empty());
    assert_eq!(procfile.processes[0].command, "foo=bar ./api");
}

#[test]
fn missing_command_is_an_error() {
    let err = parse("api:").unwrap_err();
    assert!(err.to_string().contains("no command"));
}

#[test]
fn duplicate_name_is_an_error() {
    let err = parse("api: one\napi: two").unwrap_err();
    assert!(err.to_string().contains("duplicate process name"));
}

#[test]
fn unknown_dependency_is_an_error() {
    let err = parse("api after=ghost: ./api").unwrap_err();
    assert!(err.to_string().contains("unknown process 'ghost'"));
}

#[test]
fn unknown_option_is_an_error() {
    let err = parse("api bogus=1: ./api").unwrap_err();
    assert!(err.to_string().contains("unknown option: 'bogus'"));
}

#[test]
fn cycle_is_reported_with_its_path() {
    let err = parse("a after=b: true\nb after=a: true").unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("circular dependency"), "got: {msg}");
    assert!(msg.contains("a -> b -> a") || msg.contains("b -> a -> b"), "got: {msg}");
}

#[test]
fn self_dependency_is_a_cycle() {
    let err = parse("a after=a: true").unwrap_err();
    assert!(err.to_string().contains("circular dependency"));
}

#[test]
fn one_shot_with_ready_is_an_error() {
    let err = parse("migrate! ready=5432: just db migrate").unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("one-shot") && msg.contains("ready"), "got: {msg}");
}

#[test]
fn one_shot_with_watch_and_options_is_fine() {
    let procfile =
        parse("migrate! **/*.sql !**/test_*.sql debounce=1s signal=INT: just db migrate").unwrap();
    let m = &procfile.processes[0];
    assert_eq!(m.kind, ProcessKind::OneShot);
    assert_eq!(m.watch_includes, vec!["**/*.sql"]);
    assert_eq!(m.watch_excludes, vec!["**/test_*.sql"]);
    assert_eq!(m.debounce, Duration::from_secs(1));
    assert_eq!(m.signal, ReloadSignal::Int);
}

#[test]
fn bad_duration_is_an_error() {
    let err = parse("api debounce=fast: ./api").unwrap_err();
    assert!(err.to_string().contains("invalid duration"));
}

#[test]
fn syntax_error_carries_line_and_column() {
    let err = parse("ok: true\napi 'unclosed: ./api").unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("line 2"), "got: {msg}");
    assert!(msg.contains("unterminated"), "got: {msg}");
}

#[test]
fn all_errors_are_collected() {
    let input = "api: one\napi: two\nbad bogus=1: x\nw after=ghost: y";
    let err = parse(input).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("duplicate process name"), "got: {msg}");
    assert!(msg.contains("unknown option"), "got: {msg}");
    assert!(msg.contains("unknown process 'ghost'"), "got: {msg}");
    assert!(err.diagnostics.len() >= 3);
}

#[test]
fn invalid_glob_is_an_error() {
    let err = parse("api src/[: ./api").unwrap_err();
    assert!(err.to_string().contains("invalid glob pattern"));
}

#[test]
fn parsing_is_deterministic() {
    let input = "\
FOO=bar
init!: just init
db ready=5432 after=init: postgres
api **/*.go !vendor/** after=db debounce=250ms: CGO_ENABLED=0 go run ./cmd/api
";
    let first = parse(input).unwrap();
    let second = parse(input).unwrap();
    assert_eq!(first, second);
}

#[test]
fn full_example() {
    let input = "\
# Setup
init!: just db init
migrate! after=init: just db migrate

# Infrastructure
redis: redis-server
postgres ready=5432: docker run --rm -p 5432:5432 postgres:16

# Services
api **/*.go !**/*_test.go after=postgres debounce=500ms: CGO_ENABLED=0 go run ./cmd/api
";
    let procfile = parse(input).unwrap();
    assert_eq!(procfile.processes.len(), 5);

    let api = procfile.processes.iter().find(|p| p.name == "api").unwrap();
    assert_eq!(api.watch_includes, vec!["**/*.go"]);
    assert_eq!(api.watch_excludes, vec!["**/*_test.go"]);
    assert_eq!(api.dependencies, vec!["postgres"]);
    assert_eq!(api.debounce, Duration::from_millis(500));
    assert_eq!(api.inline_env, vec![("CGO_ENABLED".to_string(), "0".to_string())]);
    assert_eq!(api.command, "go run ./cmd/api");
}

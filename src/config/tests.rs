//! Unit tests for membox configuration types and layer composition.

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::MergeComposer;
use ortho_config::serde_json::{self, json};
use rstest::rstest;

use crate::config::{AppConfig, DEFAULT_IMAGE, SourceLanguage};

/// Push serialised `AppConfig::default()` as the defaults layer, exactly as
/// `load_config` does in production.
fn composer_with_defaults() -> MergeComposer {
    let mut composer = MergeComposer::new();
    let defaults = serde_json::to_value(AppConfig::default())
        .expect("serialising defaults should succeed");
    composer.push_defaults(defaults);
    composer
}

fn merge(composer: MergeComposer) -> AppConfig {
    AppConfig::merge_from_layers(composer.layers()).expect("layer merge should succeed")
}

#[rstest]
fn defaults_describe_the_pinned_toolchain() {
    let config = AppConfig::default();

    assert_eq!(config.engine_socket, None);
    assert_eq!(config.image, None);
    assert_eq!(config.image_or_default(), DEFAULT_IMAGE);
    assert_eq!(config.toolchain.cc, "gcc");
    assert_eq!(config.toolchain.cxx, "g++");
    assert!(config.toolchain.flags.iter().any(|flag| flag == "-g"));
    assert_eq!(config.toolchain.output_name, "program");
    assert_eq!(config.analyzer.command, "valgrind");
    assert!(
        config
            .analyzer
            .flags
            .iter()
            .any(|flag| flag == "--leak-check=full")
    );
    assert_eq!(config.workspace.staging_dir, Utf8PathBuf::from("/workspace"));
}

#[rstest]
fn analysis_timeout_defaults_larger_than_compile_timeout() {
    let config = AppConfig::default();
    assert!(config.limits.analyze_timeout() > config.limits.compile_timeout());
}

#[rstest]
#[case("main.c", Some(SourceLanguage::C))]
#[case("main.cpp", Some(SourceLanguage::Cpp))]
#[case("main.cc", Some(SourceLanguage::Cpp))]
#[case("main.cxx", Some(SourceLanguage::Cpp))]
#[case("main.rs", None)]
#[case("main", None)]
#[case("README.md", None)]
fn source_language_follows_extension(
    #[case] path: &str,
    #[case] expected: Option<SourceLanguage>,
) {
    assert_eq!(SourceLanguage::from_path(Utf8Path::new(path)), expected);
}

#[rstest]
fn compiler_selection_follows_language() {
    let config = AppConfig::default();
    assert_eq!(config.toolchain.compiler_for(SourceLanguage::C), "gcc");
    assert_eq!(config.toolchain.compiler_for(SourceLanguage::Cpp), "g++");
}

#[rstest]
fn image_or_default_ignores_blank_override() {
    let config = AppConfig {
        image: Some(String::from("   ")),
        ..AppConfig::default()
    };
    assert_eq!(config.image_or_default(), DEFAULT_IMAGE);
}

#[rstest]
fn full_toml_round_trips_every_section() {
    let toml = r#"
        engine_socket = "unix:///run/podman/podman.sock"
        image = "ghcr.io/example/toolchain:gcc-12"

        [toolchain]
        cc = "gcc-12"
        cxx = "g++-12"
        flags = ["-Wall", "-g"]
        output_name = "a.out"

        [analyzer]
        command = "valgrind"
        flags = ["--leak-check=full", "--track-origins=yes"]

        [limits]
        compile_timeout_secs = 30
        analyze_timeout_secs = 300

        [workspace]
        staging_dir = "/build"
    "#;

    let config: AppConfig = toml::from_str(toml).expect("TOML parsing should succeed");

    assert_eq!(
        config.engine_socket.as_deref(),
        Some("unix:///run/podman/podman.sock")
    );
    assert_eq!(config.image_or_default(), "ghcr.io/example/toolchain:gcc-12");
    assert_eq!(config.toolchain.cc, "gcc-12");
    assert_eq!(config.toolchain.output_name, "a.out");
    assert_eq!(config.analyzer.flags.len(), 2);
    assert_eq!(config.limits.compile_timeout_secs, 30);
    assert_eq!(config.workspace.staging_dir, Utf8PathBuf::from("/build"));
}

#[rstest]
fn partial_toml_keeps_section_defaults() {
    let toml = r#"
        engine_socket = "unix:///tmp/docker.sock"
    "#;

    let config: AppConfig = toml::from_str(toml).expect("TOML parsing should succeed");

    assert_eq!(config.engine_socket.as_deref(), Some("unix:///tmp/docker.sock"));
    assert_eq!(config.toolchain.cc, "gcc");
    assert_eq!(config.analyzer.command, "valgrind");
    assert_eq!(config.limits.compile_timeout_secs, 60);
}

#[rstest]
fn layer_precedence_serialised_defaults_round_trip() {
    let composer = composer_with_defaults();
    let config = merge(composer);
    let expected = AppConfig::default();

    assert_eq!(config.engine_socket, expected.engine_socket);
    assert_eq!(config.image, expected.image);
    assert_eq!(config.toolchain.cc, expected.toolchain.cc);
    assert_eq!(config.analyzer.command, expected.analyzer.command);
    assert_eq!(
        config.limits.compile_timeout_secs,
        expected.limits.compile_timeout_secs
    );
    assert_eq!(config.workspace.staging_dir, expected.workspace.staging_dir);
}

#[rstest]
fn layer_precedence_file_overrides_defaults() {
    let mut composer = composer_with_defaults();
    composer.push_file(
        json!({
            "engine_socket": "unix:///from/file.sock",
            "image": "file-image:latest"
        }),
        None,
    );

    let config = merge(composer);

    assert_eq!(
        config.engine_socket.as_deref(),
        Some("unix:///from/file.sock")
    );
    assert_eq!(config.image.as_deref(), Some("file-image:latest"));
}

#[rstest]
fn layer_precedence_env_overrides_file() {
    let mut composer = composer_with_defaults();
    composer.push_file(
        json!({
            "engine_socket": "unix:///from/file.sock",
            "image": "file-image:latest"
        }),
        None,
    );
    composer.push_environment(json!({
        "engine_socket": "unix:///from/env.sock"
    }));

    let config = merge(composer);

    assert_eq!(config.engine_socket.as_deref(), Some("unix:///from/env.sock"));
    // File value preserved for image (not in env layer)
    assert_eq!(config.image.as_deref(), Some("file-image:latest"));
}

#[rstest]
fn layer_precedence_cli_overrides_all() {
    let mut composer = composer_with_defaults();
    composer.push_file(json!({"engine_socket": "unix:///from/file.sock"}), None);
    composer.push_environment(json!({"engine_socket": "unix:///from/env.sock"}));
    composer.push_cli(json!({"engine_socket": "unix:///from/cli.sock"}));

    let config = merge(composer);

    assert_eq!(config.engine_socket.as_deref(), Some("unix:///from/cli.sock"));
}

#[rstest]
#[case(json!({"limits": {"compile_timeout_secs": 0}}))]
#[case(json!({"limits": {"analyze_timeout_secs": 0}}))]
#[case(json!({"toolchain": {"cc": ""}}))]
#[case(json!({"analyzer": {"command": "  "}}))]
#[case(json!({"workspace": {"staging_dir": "relative/dir"}}))]
fn post_merge_rejects_invalid_values(#[case] file_layer: serde_json::Value) {
    let mut composer = composer_with_defaults();
    composer.push_file(file_layer, None);

    let result = AppConfig::merge_from_layers(composer.layers());
    assert!(result.is_err(), "expected post-merge validation to reject");
}

use std::time::Duration;

use vg_core::config::{Config, DirtyPolicy, REPO_CONFIG_FILE};

#[test]
fn default_config() {
    let cfg = Config::default();
    assert_eq!(cfg.general.log_level, "info");
    assert_eq!(cfg.session.branch_prefix, "vibe-");
    assert_eq!(cfg.session.dirty_policy, DirtyPolicy::Ask);
    assert!(cfg.session.fetch_on_start);
    assert_eq!(cfg.watcher.debounce(), Duration::from_secs(1));
    assert_eq!(cfg.watcher.min_commit_interval(), Duration::ZERO);
    assert!(cfg.watcher.respect_gitignore);
    assert!(cfg.watcher.ignore_dirs.iter().any(|d| d == "target"));
    assert_eq!(cfg.commit.marker, "vibe-git auto-commit");
    assert!(cfg.commit.skip_hooks);
    assert_eq!(cfg.finalize.remote, "origin");
    assert!(cfg.finalize.create_pr);
    assert!(cfg.finalize.return_to_trunk);
    assert_eq!(cfg.commands.git_bin, "git");
    assert_eq!(cfg.commands.hosting_bin, "gh");
    assert!(cfg.persistence.enabled);
    assert_eq!(cfg.persistence.stale_after(), chrono::Duration::hours(24));
    cfg.validate().expect("defaults validate");
}

#[test]
fn config_roundtrip() {
    let cfg = Config::default();
    let toml_str = cfg.to_toml().expect("serialize to toml");
    assert!(toml_str.contains("vibe-git auto-commit"));

    let parsed: Config = toml::from_str(&toml_str).expect("parse toml back");
    assert_eq!(parsed.session.branch_prefix, cfg.session.branch_prefix);
    assert_eq!(parsed.watcher.debounce_ms, cfg.watcher.debounce_ms);
    assert_eq!(parsed.commands.timeout_secs, cfg.commands.timeout_secs);
    parsed.validate().expect("config validates");
}

#[test]
fn config_partial_toml() {
    let partial = r#"
[session]
branch_prefix = "ai/"
dirty_policy = "adopt"
fetch_on_start = false

[watcher]
debounce_ms = 250
"#;
    let cfg: Config = toml::from_str(partial).expect("parse partial");
    assert_eq!(cfg.session.branch_prefix, "ai/");
    assert_eq!(cfg.session.dirty_policy, DirtyPolicy::Adopt);
    assert!(!cfg.session.fetch_on_start);
    assert_eq!(cfg.watcher.debounce(), Duration::from_millis(250));
    // defaults should fill in the rest
    assert_eq!(cfg.finalize.remote, "origin");
    assert_eq!(cfg.commit.marker, "vibe-git auto-commit");
    cfg.validate().expect("config validates");
}

#[test]
fn repo_file_takes_precedence() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(REPO_CONFIG_FILE),
        "[finalize]\ncreate_pr = false\n",
    )
    .unwrap();
    let cfg = Config::load_for_repo(dir.path()).expect("load repo config");
    assert!(!cfg.finalize.create_pr);
}

#[test]
fn malformed_file_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[watcher\ndebounce_ms = ").unwrap();
    let err = Config::load_from(&path).expect_err("parse should fail");
    assert!(err.to_string().starts_with("parse:"));
}

#[test]
fn zero_debounce_fails_validation() {
    let mut cfg = Config::default();
    cfg.watcher.debounce_ms = 0;
    let err = cfg.validate().expect_err("validation should fail");
    assert!(err.to_string().contains("debounce_ms"));
}

#[test]
fn bad_branch_prefix_fails_validation() {
    let mut cfg = Config::default();
    cfg.session.branch_prefix = "vibe branch".to_string();
    let err = cfg.validate().expect_err("validation should fail");
    assert!(err.to_string().contains("branch_prefix"));
}

#[test]
fn empty_remote_fails_validation() {
    let mut cfg = Config::default();
    cfg.finalize.remote = " ".to_string();
    let err = cfg.validate().expect_err("validation should fail");
    assert!(err.to_string().contains("finalize.remote"));
}

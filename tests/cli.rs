use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

use clap::CommandFactory;
use codetunnel::Cli;

/// Binary with an isolated config file location and editor dirs.
fn base_cmd(dir: &TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("codetunnel"));
    cmd.env("CODETUNNEL_CONFIG", dir.path().join("config.toml"))
        .env("VSCODE_CONFIG_DIR", dir.path().join("settings"))
        .env("VSCODE_EXTENSIONS_DIR", dir.path().join("extensions"))
        .env_remove("CODETUNNEL_SSH_FLAGS")
        .env_remove("DISPLAY");
    cmd
}

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn help_lists_flags_and_environment() {
    let dir = TempDir::new().unwrap();
    base_cmd(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("--skipsync"))
        .stdout(contains("--ssh-flags"))
        .stdout(contains("VSCODE_CONFIG_DIR"))
        .stdout(contains("VSCODE_EXTENSIONS_DIR"));
}

#[test]
fn version_prints_package_version() {
    let dir = TempDir::new().unwrap();
    base_cmd(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn missing_host_is_a_usage_error() {
    let dir = TempDir::new().unwrap();
    base_cmd(&dir)
        .assert()
        .failure()
        .stderr(contains("<HOST>"));
}

#[test]
fn bad_remote_port_fails_before_contacting_host() {
    let dir = TempDir::new().unwrap();
    base_cmd(&dir)
        .args(["--remote-port", "http", "dev"])
        .assert()
        .code(1)
        .stderr(contains("--remote-port"))
        .stderr(contains("Tunneling").not());
}

#[test]
fn unbalanced_ssh_flags_are_rejected() {
    let dir = TempDir::new().unwrap();
    base_cmd(&dir)
        .args(["--ssh-flags", "-o 'ProxyCommand=nc", "dev"])
        .assert()
        .code(1)
        .stderr(contains("invalid configuration"));
}

#[test]
fn unknown_config_file_keys_are_rejected() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("config.toml"), "sshflags = \"-p 2\"\n").unwrap();
    base_cmd(&dir)
        .arg("dev")
        .assert()
        .code(1)
        .stderr(contains("config"));
}

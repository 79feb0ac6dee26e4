use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn slidecast(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("slidecast").unwrap();
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"))
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_subcommands() {
    let home = TempDir::new().unwrap();
    slidecast(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("render"))
        .stdout(predicate::str::contains("backends"));
}

#[test]
fn render_requires_csv_and_audio_dir() {
    let home = TempDir::new().unwrap();
    slidecast(&home).arg("render").assert().failure();
}

#[test]
fn render_with_missing_csv_exits_with_one() {
    let home = TempDir::new().unwrap();
    std::fs::create_dir(home.path().join("clips")).unwrap();

    slidecast(&home)
        .args(["render", "--csv", "missing.csv", "--audio-dir", "clips", "--quiet"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn backends_shows_default_chain() {
    let home = TempDir::new().unwrap();
    slidecast(&home)
        .arg("backends")
        .assert()
        .success()
        .stdout(predicate::str::contains("baseline"))
        .stdout(predicate::str::contains("remote"));
}

#[test]
fn local_config_file_is_used() {
    let home = TempDir::new().unwrap();
    std::fs::write(
        home.path().join("config.yaml"),
        "render:\n  output_dir: renders\n",
    )
    .unwrap();

    slidecast(&home)
        .args(["config", "--show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Output Directory: renders"));
}

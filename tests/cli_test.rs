use predicates::prelude::*;
use tempfile::tempdir;

/// Strips every configuration source so each test sees exactly the
/// environment it sets up: no real credentials, no user config file, no
/// stray .env in the working directory.
fn isolated_cmd(tmp: &std::path::Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("restat");
    cmd.current_dir(tmp)
        .env("RESTAT_HOME", tmp)
        .env("RESTAT_CONFIG_PATH", tmp.join("no-such-config.toml"))
        .env_remove("RESTAT_ACCESS_KEY_ID")
        .env_remove("RESTAT_SECRET_ACCESS_KEY")
        .env_remove("RESTAT_BUCKET_REGION")
        .env_remove("RESTAT_BUCKET_NAME")
        .env_remove("AWS_ACCESS_KEY_ID")
        .env_remove("AWS_SECRET_ACCESS_KEY")
        .env_remove("AWS_REGION");
    cmd
}

#[test]
fn run_aborts_startup_enumerating_missing_store_settings() {
    let tmp = tempdir().expect("tempdir");

    isolated_cmd(tmp.path())
        .arg("run")
        .assert()
        .failure()
        .stderr(
            predicate::str::contains("store.access_key_id")
                .and(predicate::str::contains("store.secret_access_key"))
                .and(predicate::str::contains("store.region"))
                .and(predicate::str::contains("store.bucket")),
        );
}

#[test]
fn partial_credentials_report_only_what_is_missing() {
    let tmp = tempdir().expect("tempdir");

    isolated_cmd(tmp.path())
        .env("RESTAT_ACCESS_KEY_ID", "AKIATEST")
        .env("RESTAT_BUCKET_NAME", "statements")
        .arg("run")
        .assert()
        .failure()
        .stderr(
            predicate::str::contains("store.secret_access_key")
                .and(predicate::str::contains("store.region"))
                .and(predicate::str::contains("store.access_key_id").not())
                .and(predicate::str::contains("store.bucket").not()),
        );
}

#[test]
fn purge_refuses_without_confirmation_before_touching_config() {
    let tmp = tempdir().expect("tempdir");

    // The --yes guard fires before config loading, so this needs no store
    // settings at all.
    isolated_cmd(tmp.path())
        .arg("purge")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--yes"));
}

#[test]
fn help_lists_the_three_subcommands() {
    let tmp = tempdir().expect("tempdir");

    isolated_cmd(tmp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("run")
                .and(predicate::str::contains("status"))
                .and(predicate::str::contains("purge")),
        );
}

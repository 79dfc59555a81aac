// CLI contract: exit codes and files on disk, driven through the real binary.

use donation_match::{DONATION_VIEW, RECIPIENT_VIEW, REGISTRY_FILE, SHORTFALL_VIEW};
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn donation_match(state_dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_donation-match"));
    cmd.arg("--state-dir").arg(state_dir);
    cmd.env_remove("DONATION_STATE_DIR");
    cmd.env_remove("RUST_LOG");
    cmd
}

fn run(state_dir: &Path, args: &[&str]) -> Output {
    donation_match(state_dir).args(args).output().unwrap()
}

fn write(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path.to_string_lossy().into_owned()
}

const DONORS: &str = "Name,Email,Card Capacity\n\
Dana Smith,dana@example.com,3\n\
Eli Park,eli@example.com,2\n";

const RECIPIENTS: &str = "Name,Home Email,Address,Stores\n\
Rita Lopez,rita@example.com,1 Elm St,Petco;Target\n\
Sam Reed,sam@example.com,2 Oak Ave,Petco\n";

#[test]
fn full_round_writes_registry_and_views() {
    let dir = tempfile::tempdir().unwrap();
    let donors = write(dir.path(), "donors.csv", DONORS);
    let recipients = write(dir.path(), "recipients.csv", RECIPIENTS);

    assert_eq!(run(dir.path(), &["update-donors", &donors]).status.code(), Some(0));
    assert_eq!(run(dir.path(), &["update-recipients", &recipients]).status.code(), Some(0));
    assert!(dir.path().join(REGISTRY_FILE).exists());

    let out = run(dir.path(), &["match"]);
    assert_eq!(out.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    for view in [DONATION_VIEW, RECIPIENT_VIEW, SHORTFALL_VIEW] {
        assert!(dir.path().join(view).exists(), "{} missing", view);
    }
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Round 1"), "stdout: {}", stdout);

    let status = run(dir.path(), &["status"]);
    assert_eq!(status.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&status.stdout).contains("Rounds run:      1"));
}

#[test]
fn repeated_home_email_exits_4_and_keeps_registry() {
    let dir = tempfile::tempdir().unwrap();
    let recipients = write(dir.path(), "recipients.csv", RECIPIENTS);
    assert_eq!(run(dir.path(), &["update-recipients", &recipients]).status.code(), Some(0));
    let before = fs::read(dir.path().join(REGISTRY_FILE)).unwrap();

    let again = write(
        dir.path(),
        "more.csv",
        "Home Email,Stores\nnew@example.com,Costco\nRITA@example.com,Petco\n",
    );
    let out = run(dir.path(), &["update-recipients", &again]);

    assert_eq!(out.status.code(), Some(4));
    assert!(String::from_utf8_lossy(&out.stderr).contains("rita@example.com"));
    assert_eq!(fs::read(dir.path().join(REGISTRY_FILE)).unwrap(), before);
}

#[test]
fn lowering_capacity_below_commitments_exits_5() {
    let dir = tempfile::tempdir().unwrap();
    let donors = write(dir.path(), "donors.csv", DONORS);
    let recipients = write(dir.path(), "recipients.csv", RECIPIENTS);
    run(dir.path(), &["update-donors", &donors]);
    run(dir.path(), &["update-recipients", &recipients]);
    assert_eq!(run(dir.path(), &["match"]).status.code(), Some(0));

    // Dana gave to both recipients
    let lower = write(dir.path(), "lower.csv", "Name,Email,Card Capacity\nDana Smith,dana@example.com,1\n");
    assert_eq!(run(dir.path(), &["update-donors", &lower]).status.code(), Some(5));
}

#[test]
fn malformed_capacity_exits_3() {
    let dir = tempfile::tempdir().unwrap();
    let bad = write(dir.path(), "donors.csv", "Name,Email,Card Capacity\nDana,dana@example.com,lots\n");
    let out = run(dir.path(), &["update-donors", &bad]);
    assert_eq!(out.status.code(), Some(3));
    assert!(!dir.path().join(REGISTRY_FILE).exists());
}

#[test]
fn missing_input_file_is_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(dir.path(), &["update-donors", "/nonexistent/donors.csv"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn held_lock_exits_8() {
    let dir = tempfile::tempdir().unwrap();
    let donors = write(dir.path(), "donors.csv", DONORS);
    let _lock = donation_match::RegistryLock::acquire(dir.path()).unwrap();

    assert_eq!(run(dir.path(), &["update-donors", &donors]).status.code(), Some(8));
}

#[test]
fn corrupt_registry_exits_6() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(REGISTRY_FILE), b"not a database at all").unwrap();
    assert_eq!(run(dir.path(), &["status"]).status.code(), Some(6));
}

#[test]
fn huge_pledges_do_not_crash_status_or_match() {
    let dir = tempfile::tempdir().unwrap();
    let donors = write(
        dir.path(),
        "donors.csv",
        "Name,Email,Card Capacity\nBig One,one@example.com,3000000000\nBig Two,two@example.com,3000000000\n",
    );
    let recipients = write(dir.path(), "recipients.csv", RECIPIENTS);
    assert_eq!(run(dir.path(), &["update-donors", &donors]).status.code(), Some(0));
    assert_eq!(run(dir.path(), &["update-recipients", &recipients]).status.code(), Some(0));

    let status = run(dir.path(), &["status"]);
    assert_eq!(status.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&status.stderr));
    assert!(String::from_utf8_lossy(&status.stdout).contains("6000000000 cards"));

    let out = run(dir.path(), &["-v", "match"]);
    assert_eq!(out.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&out.stderr));
}

#[test]
fn rerun_without_updates_keeps_donation_view() {
    let dir = tempfile::tempdir().unwrap();
    let donors = write(dir.path(), "donors.csv", DONORS);
    let recipients = write(dir.path(), "recipients.csv", RECIPIENTS);
    run(dir.path(), &["update-donors", &donors]);
    run(dir.path(), &["update-recipients", &recipients]);
    assert_eq!(run(dir.path(), &["match"]).status.code(), Some(0));
    let before = fs::read(dir.path().join(DONATION_VIEW)).unwrap();

    assert_eq!(run(dir.path(), &["match"]).status.code(), Some(0));
    assert_eq!(fs::read(dir.path().join(DONATION_VIEW)).unwrap(), before);
    assert!(!dir.path().join("old_donation_view_1.csv").exists());
}

#[test]
fn repeated_work_email_exits_4() {
    let dir = tempfile::tempdir().unwrap();
    let signup = write(
        dir.path(),
        "signup.csv",
        "Validity,EPA Email,Home Email,Selected\n\
         true,pat@work.example,pat@example.com,Petco\n\
         true,PAT@work.example,pat.home@example.com,Target\n",
    );
    let out = run(dir.path(), &["update-recipients", &signup]);
    assert_eq!(out.status.code(), Some(4));
    assert!(!dir.path().join(REGISTRY_FILE).exists());
}

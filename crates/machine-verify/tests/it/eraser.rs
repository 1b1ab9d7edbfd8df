use std::path::Path;

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use test_log::test;

use machine_fs::{RemoveError, guarded_remove_dir_all};

#[test]
fn root_is_never_removed() {
    let err = guarded_remove_dir_all("/").unwrap_err();

    assert!(matches!(err, RemoveError::Refused(ref path) if path == Path::new("/")));
    assert_eq!(err.to_string(), "refusing to recursively delete `/`");
    assert!(Path::new("/").read_dir().unwrap().next().is_some());
}

#[test]
fn empty_path_is_never_removed() {
    let err = guarded_remove_dir_all("").unwrap_err();

    assert_eq!(err.to_string(), "refusing to recursively delete ``");
}

#[test]
fn relative_current_directory_is_never_removed() {
    let err = guarded_remove_dir_all("./").unwrap_err();

    assert!(matches!(err, RemoveError::Refused(_)));
}

#[test]
fn sandbox_like_tree_is_removed() -> anyhow::Result<()> {
    let temp = assert_fs::TempDir::new()?;
    let sandbox = temp.child("machine_test_erase");
    sandbox.child(".ssh").child("config").write_str("IdentitiesOnly=yes")?;
    sandbox.child("connections.json").write_str("{}")?;
    sandbox.child("podman").child("machine").create_dir_all()?;

    guarded_remove_dir_all(&sandbox)?;

    sandbox.assert(predicate::path::missing());
    temp.assert(predicate::path::is_dir());
    Ok(())
}

use std::panic::{AssertUnwindSafe, catch_unwind};

use assert_fs::assert::PathAssert;
use predicates::prelude::predicate;
use test_log::test;

use machine_fs::RemoveError;
use machine_test::{HomeBinding, ResetFailure};

use crate::common::FakeMachine;

#[test]
fn cleanup_resets_then_erases_then_restores() -> anyhow::Result<()> {
    let fake = FakeMachine::new()?;
    let before = HomeBinding::current();

    let context = fake.context();
    let sandbox = context.sandbox.root().to_path_buf();
    context.cleanup()?;

    let calls = fake.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args, "machine reset -f");
    // The reset still ran against the sandboxed home, before it was erased.
    assert_eq!(calls[0].home, sandbox);
    assert!(calls[0].home_exists);
    assert_eq!(calls[0].ssh_auth_sock, None);

    assert!(!sandbox.exists());
    assert_eq!(HomeBinding::current(), before);
    assert_eq!(HomeBinding::current(), *HomeBinding::original());
    Ok(())
}

#[test]
fn drop_cleans_up() -> anyhow::Result<()> {
    let fake = FakeMachine::new()?;
    let before = HomeBinding::current();

    let sandbox = {
        let context = fake.context();
        context.sandbox.root().to_path_buf()
    };

    assert_eq!(fake.calls().len(), 1);
    assert!(!sandbox.exists());
    assert_eq!(HomeBinding::current(), before);
    Ok(())
}

#[test]
fn failing_test_body_still_cleans_up() -> anyhow::Result<()> {
    let fake = FakeMachine::new()?;
    let before = HomeBinding::current();

    let result = catch_unwind(AssertUnwindSafe(|| {
        let context = fake.context();
        fs_err::write(context.sandbox.root().join("scratch"), "left behind").unwrap();
        panic!("test body failed");
    }));

    assert!(result.is_err());
    let calls = fake.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args, "machine reset -f");
    assert!(!calls[0].home.exists());
    assert_eq!(HomeBinding::current(), before);
    Ok(())
}

#[test]
fn failing_reset_still_erases_and_restores() -> anyhow::Result<()> {
    let fake = FakeMachine::new()?;
    fake.fail_reset();
    let before = HomeBinding::current();

    let context = fake.context();
    let sandbox = context.sandbox.root().to_path_buf();
    let err = context.cleanup().unwrap_err();

    assert!(matches!(
        err.reset,
        Some(ResetFailure::Exit {
            code: Some(125),
            ..
        })
    ));
    assert!(err.erase.is_none());
    assert!(
        err.to_string()
            .contains("`machine reset -f` exited with code 125: Error: machine is still running")
    );
    assert!(!sandbox.exists());
    assert_eq!(HomeBinding::current(), before);
    Ok(())
}

#[test]
#[should_panic(expected = "cleaning up after test in")]
fn failing_reset_fails_the_test() {
    let fake = FakeMachine::new().unwrap();
    fake.fail_reset();

    let _context = fake.context();
}

#[test]
fn failing_reset_during_failing_test_keeps_the_original_panic() {
    let fake = FakeMachine::new().unwrap();
    fake.fail_reset();

    let result = catch_unwind(AssertUnwindSafe(|| {
        let _context = fake.context();
        panic!("original failure");
    }));

    let payload = result.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"original failure"));
    assert_eq!(fake.calls().len(), 1);
}

#[test]
fn missing_sandbox_is_not_a_cleanup_error() -> anyhow::Result<()> {
    let fake = FakeMachine::new()?;
    let before = HomeBinding::current();

    let context = fake.context();
    fs_err::remove_dir_all(context.sandbox.root())?;
    context.cleanup()?;

    assert_eq!(fake.calls().len(), 1);
    assert_eq!(HomeBinding::current(), before);
    fake.tmp_dir.assert(predicate::path::is_dir());
    Ok(())
}

#[test]
fn body_commands_run_before_reset() -> anyhow::Result<()> {
    let fake = FakeMachine::new()?;

    let context = fake.context();
    context.builder().set_cmd(["machine", "list"]).run()?;
    context.builder().set_cmd(["machine", "stop"]).run()?;
    context.cleanup()?;

    let args: Vec<_> = fake.calls().into_iter().map(|call| call.args).collect();
    assert_eq!(args, ["machine list", "machine stop", "machine reset -f"]);
    Ok(())
}

#[test]
fn failing_erase_is_reported_after_reset_and_restore() -> anyhow::Result<()> {
    let fake = FakeMachine::new()?;
    let before = HomeBinding::current();

    let context = fake.context();
    let sandbox = context.sandbox.root().to_path_buf();
    // A file where the sandbox directory should be can't be removed as a directory tree.
    fs_err::remove_dir_all(&sandbox)?;
    fs_err::write(&sandbox, "not a directory")?;
    let err = context.cleanup().unwrap_err();

    let calls = fake.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args, "machine reset -f");
    assert_eq!(calls[0].home, sandbox);
    assert!(calls[0].home_exists);

    assert!(err.reset.is_none());
    assert!(matches!(err.erase, Some(RemoveError::Io(_))));
    assert!(err.to_string().contains("failed to remove test dir"));
    assert_eq!(HomeBinding::current(), before);

    fs_err::remove_file(&sandbox)?;
    Ok(())
}

#[test]
fn nested_context_panics_instead_of_hanging() -> anyhow::Result<()> {
    let fake = FakeMachine::new()?;
    let before = HomeBinding::current();

    let outer = fake.context();
    let Err(payload) = catch_unwind(AssertUnwindSafe(|| fake.context())) else {
        panic!("a second context was created while the first was active");
    };
    let message = payload
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| payload.downcast_ref::<&str>().map(ToString::to_string))
        .unwrap_or_default();
    assert!(
        message.contains("already active on this thread"),
        "unexpected panic: {message}"
    );
    // Only the outer sandbox was created.
    assert_eq!(fs_err::read_dir(fake.tmp_dir.path())?.count(), 1);

    outer.cleanup()?;
    assert_eq!(fs_err::read_dir(fake.tmp_dir.path())?.count(), 0);
    assert_eq!(HomeBinding::current(), before);
    Ok(())
}

#[test]
fn home_binding_inside_a_context_panics() -> anyhow::Result<()> {
    let fake = FakeMachine::new()?;

    let context = fake.context();
    let result = catch_unwind(HomeBinding::current);
    context.cleanup()?;

    assert!(result.is_err());
    Ok(())
}

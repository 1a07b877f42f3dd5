//! Packaging failure diagnosis.
//!
//! A non-zero packaging exit must surface as a build error carrying the
//! tail of the captured tool output, and must leave no artifact behind.

#![cfg(unix)]

use signforge::build::Builder;
use signforge::pipeline::Layout;
use signforge::plan::ResolvedBuildPlan;
use std::fs;
use std::os::unix::fs::PermissionsExt;

#[tokio::test]
async fn non_zero_exit_surfaces_a_log_tail() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stub = dir.path().join("fake-python");
    fs::write(
        &stub,
        "#!/bin/sh\n\
         echo 'Building EXE from EXE-00.toc'\n\
         echo 'ERROR: Hidden import gamma not found' >&2\n\
         exit 1\n",
    )
    .expect("stub");
    fs::set_permissions(&stub, fs::Permissions::from_mode(0o755)).expect("chmod");

    let layout = Layout::new(dir.path().join("builds"));
    let builder = Builder::new(layout.clone()).with_python(stub.display().to_string());

    let plan = ResolvedBuildPlan {
        args: vec!["main.py".to_string(), "--name=MyTool".to_string()],
        project_root: None,
        app_name: "MyTool".to_string(),
        config_source: None,
    };

    let err = builder.build(&plan).await.expect_err("must fail");
    match err {
        signforge::PipelineError::BuildToolNonZeroExit { code, log_tail } => {
            assert_eq!(code, Some(1));
            assert!(!log_tail.is_empty());
            assert!(
                log_tail.iter().any(|l| l.contains("Hidden import gamma")),
                "tail: {log_tail:?}"
            );
        }
        other => panic!("unexpected error: {other}"),
    }

    // No artifact may exist after a failed build
    assert!(!layout.dist_dir().join("MyTool").exists());
    assert!(!layout.dist_dir().join("MyTool.exe").exists());
}

//! Command line interface.
//!
//! Parses arguments, wires Ctrl-C into the pipeline's cancellation token
//! and dispatches to the orchestrator or the ad-hoc store/sign operations.

mod args;

pub use args::{BuildArgs, CertsCommand, Cli, Command, SignArgs};

use crate::error::Result;
use crate::pipeline::{Layout, Pipeline};
use clap::Parser;
use tokio_util::sync::CancellationToken;

/// Main CLI entry point, returns the process exit code.
pub async fn run() -> Result<i32> {
    let cli = Cli::parse();
    let layout = Layout::new(&cli.build_root);
    let pipeline = Pipeline::new(layout.clone());

    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    match cli.command {
        Command::Build(build_args) => {
            let request = match build_args.into_request() {
                Ok(request) => request,
                Err(reason) => {
                    eprintln!("invalid arguments: {reason}");
                    return Ok(2);
                }
            };
            let outcome = pipeline.run(&request, &cancel).await?;
            println!("artifact: {}", outcome.artifact.display());
            println!("pfx:      {}", outcome.pfx.display());
            if let Some(cer) = &outcome.cer {
                println!("cer:      {}", cer.display());
            }
            println!("dist:     {}", outcome.dist_dir.display());
            Ok(0)
        }
        Command::Certs { command } => run_certs(&pipeline, command).await,
        Command::Sign(sign_args) => run_sign(&pipeline, sign_args, &cancel).await,
    }
}

async fn run_certs(pipeline: &Pipeline, command: CertsCommand) -> Result<i32> {
    let store = pipeline.certificate_store();
    match command {
        CertsCommand::List => {
            let credentials = store.list_available().await?;
            if credentials.is_empty() {
                println!("no credentials in {}", store.dir().display());
            }
            for credential in credentials {
                let public = credential
                    .cer
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(no public container)".to_string());
                println!("{}\t{}\t{}", credential.name, credential.pfx.display(), public);
            }
            Ok(0)
        }
        CertsCommand::Create {
            name,
            password,
            backend,
        } => {
            let credential = store.get_or_create(&name, &password, backend.into()).await?;
            println!("pfx: {}", credential.pfx.display());
            if let Some(cer) = credential.cer {
                println!("cer: {}", cer.display());
            }
            Ok(0)
        }
    }
}

async fn run_sign(
    pipeline: &Pipeline,
    sign_args: SignArgs,
    cancel: &CancellationToken,
) -> Result<i32> {
    let backend = pipeline
        .resolve_signing_backend(sign_args.signer.into(), cancel)
        .await?;
    let display_name = sign_args
        .file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "App".to_string());
    pipeline
        .signer()
        .sign(
            &backend,
            &sign_args.file,
            &sign_args.pfx,
            &sign_args.password,
            &display_name,
        )
        .await?;
    println!("signed: {}", sign_args.file.display());
    Ok(0)
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, cancelling network waits");
            cancel.cancel();
        }
    });
}

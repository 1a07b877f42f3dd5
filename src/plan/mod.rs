//! Build-argument resolution and path sanitization.
//!
//! Two incompatible argument sources feed the packaging tool: a declarative
//! build configuration discovered among the caller's assets, or arguments
//! assembled from discrete request fields. Both are resolved into one
//! canonical [`ResolvedBuildPlan`] whose filesystem arguments are absolute
//! by construction, because the packaging tool resolves relative paths
//! against its own working directory rather than the caller's project root.
//!
//! The declarative config is structured data, never executed code: a
//! `.json` or `.toml` asset carrying the marker key `pyinstaller_args` as
//! an array of strings.

use crate::error::{PipelineError, Result};
use crate::pipeline::request::BuildRequest;
use path_absolutize::Absolutize;
use std::path::{Path, PathBuf};

/// Marker key that makes an asset an authoritative argument list.
pub const CONFIG_ARGS_KEY: &str = "pyinstaller_args";

/// Separator between source and destination in bundling arguments.
///
/// The packaging tool uses the platform path-list separator.
pub const ADD_DATA_SEP: char = if cfg!(windows) { ';' } else { ':' };

/// Directory names that mark a config file as living one level below the
/// project root.
const CONFIG_DIR_NAMES: &[&str] = &["scripts", "config"];

/// Hidden-dependency hints known to frequently cause missing-module
/// failures in packaged output.
const DEFAULT_HIDDEN_IMPORTS: &[&str] = &["yaml", "win32api", "win32con"];

/// Canonical, absolute-path-only build invocation.
#[derive(Debug, Clone)]
pub struct ResolvedBuildPlan {
    /// Argument list handed to the packaging tool (framework output-path
    /// overrides are prefixed later by the builder)
    pub args: Vec<String>,
    /// Working-directory anchor for the packaging subprocess
    pub project_root: Option<PathBuf>,
    /// Expected output name derived from the arguments
    pub app_name: String,
    /// The declarative config file the plan came from, when one was found
    pub config_source: Option<PathBuf>,
}

/// A discovered declarative build configuration.
#[derive(Debug, Clone)]
pub struct DeclarativeConfig {
    /// Exact-as-written argument list
    pub args: Vec<String>,
    /// Inferred project root for relative-path resolution
    pub project_root: PathBuf,
    /// The file the arguments came from
    pub source: PathBuf,
}

/// Scans assets in caller order for a declarative build configuration.
///
/// The first matching asset wins and no further assets are scanned. Files
/// that are not parseable as JSON or TOML, or parse without the marker key,
/// are skipped; a present marker key with the wrong shape is an error.
pub fn detect_declarative_config(assets: &[PathBuf]) -> Result<Option<DeclarativeConfig>> {
    for asset in assets {
        if !asset.is_file() {
            continue;
        }
        let Some(ext) = asset.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        let args = match ext {
            "json" => extract_args_json(asset)?,
            "toml" => extract_args_toml(asset)?,
            _ => continue,
        };
        if let Some(args) = args {
            let project_root = infer_project_root(asset);
            log::info!(
                "declarative build configuration found: {} (project root {})",
                asset.display(),
                project_root.display()
            );
            return Ok(Some(DeclarativeConfig {
                args,
                project_root,
                source: asset.clone(),
            }));
        }
    }
    Ok(None)
}

fn extract_args_json(path: &Path) -> Result<Option<Vec<String>>> {
    let text = std::fs::read_to_string(path)?;
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
        log::debug!("{} is not valid JSON, skipping", path.display());
        return Ok(None);
    };
    let Some(raw) = value.get(CONFIG_ARGS_KEY) else {
        return Ok(None);
    };
    string_list(raw.as_array().map(|items| {
        items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect()
    }))
    .map(Some)
    .map_err(|reason| PipelineError::InvalidBuildConfig {
        path: path.to_path_buf(),
        reason,
    })
}

fn extract_args_toml(path: &Path) -> Result<Option<Vec<String>>> {
    let text = std::fs::read_to_string(path)?;
    let Ok(value) = text.parse::<toml::Value>() else {
        log::debug!("{} is not valid TOML, skipping", path.display());
        return Ok(None);
    };
    let Some(raw) = value.get(CONFIG_ARGS_KEY) else {
        return Ok(None);
    };
    string_list(raw.as_array().map(|items| {
        items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect()
    }))
    .map(Some)
    .map_err(|reason| PipelineError::InvalidBuildConfig {
        path: path.to_path_buf(),
        reason,
    })
}

fn string_list(
    items: Option<Vec<Option<String>>>,
) -> std::result::Result<Vec<String>, String> {
    let items = items.ok_or_else(|| format!("'{CONFIG_ARGS_KEY}' must be an array"))?;
    items
        .into_iter()
        .collect::<Option<Vec<String>>>()
        .ok_or_else(|| format!("'{CONFIG_ARGS_KEY}' entries must all be strings"))
}

/// Project root is the parent of the config's directory when that directory
/// carries a conventional name, otherwise the config's own directory.
fn infer_project_root(config: &Path) -> PathBuf {
    let dir = config.parent().unwrap_or_else(|| Path::new("."));
    let dir_name = dir.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if CONFIG_DIR_NAMES.contains(&dir_name) {
        if let Some(parent) = dir.parent() {
            return parent.to_path_buf();
        }
    }
    dir.to_path_buf()
}

/// Rewrites the filesystem-path portion of bundling and icon arguments from
/// relative to absolute, anchored at `project_root`.
///
/// Already-absolute paths pass through untouched, which makes the rewrite
/// idempotent. Non-path arguments are never modified.
pub fn sanitize_paths(args: &[String], project_root: &Path) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut rewrite_next: Option<PathKind> = None;

    for arg in args {
        if let Some(kind) = rewrite_next.take() {
            out.push(rewrite_value(arg, kind, project_root));
            continue;
        }

        match split_flag(arg) {
            Some((flag, Some(value))) => {
                if let Some(kind) = path_kind(flag) {
                    out.push(format!("{flag}={}", rewrite_value(value, kind, project_root)));
                } else {
                    out.push(arg.clone());
                }
            }
            Some((flag, None)) => {
                rewrite_next = path_kind(flag);
                out.push(arg.clone());
            }
            None => out.push(arg.clone()),
        }
    }

    out
}

#[derive(Debug, Clone, Copy)]
enum PathKind {
    /// `source{SEP}destination` pair: only the source half is a path
    BundlePair,
    /// Whole value is a path
    Plain,
}

fn split_flag(arg: &str) -> Option<(&str, Option<&str>)> {
    if !arg.starts_with("--") {
        return None;
    }
    match arg.split_once('=') {
        Some((flag, value)) => Some((flag, Some(value))),
        None => Some((arg, None)),
    }
}

fn path_kind(flag: &str) -> Option<PathKind> {
    match flag {
        "--add-data" | "--add-binary" => Some(PathKind::BundlePair),
        "--icon" => Some(PathKind::Plain),
        _ => None,
    }
}

fn rewrite_value(value: &str, kind: PathKind, project_root: &Path) -> String {
    match kind {
        PathKind::Plain => absolutize(value, project_root),
        PathKind::BundlePair => match value.split_once(ADD_DATA_SEP) {
            Some((source, dest)) => {
                format!("{}{}{}", absolutize(source, project_root), ADD_DATA_SEP, dest)
            }
            None => absolutize(value, project_root),
        },
    }
}

fn absolutize(value: &str, project_root: &Path) -> String {
    match Path::new(value).absolutize_from(project_root) {
        Ok(path) => path.display().to_string(),
        Err(e) => {
            log::warn!("could not absolutize '{}': {}", value, e);
            value.to_string()
        }
    }
}

/// Absolutizes against the process working directory, which is where
/// request-supplied paths are anchored.
fn absolutize_cwd(path: &Path) -> String {
    match path.absolutize() {
        Ok(p) => p.display().to_string(),
        Err(e) => {
            log::warn!("could not absolutize '{}': {}", path.display(), e);
            path.display().to_string()
        }
    }
}

/// Builds an equivalent argument list purely from request fields.
///
/// Used when no declarative configuration is found among the assets. All
/// filesystem arguments come out absolute, since the packaging subprocess
/// may run with a different working directory.
pub fn assemble_from_request(request: &BuildRequest) -> Vec<String> {
    let app_name = normalized_app_name(&request.app_name);

    let mut args = vec![
        absolutize_cwd(&request.script),
        format!("--name={app_name}"),
        if request.one_file { "--onefile" } else { "--onedir" }.to_string(),
        if request.console { "--console" } else { "--noconsole" }.to_string(),
        "--clean".to_string(),
        "--noconfirm".to_string(),
    ];

    for hint in DEFAULT_HIDDEN_IMPORTS {
        args.push(format!("--hidden-import={hint}"));
    }

    if let Some(icon) = &request.icon {
        if icon.exists() {
            args.push(format!("--icon={}", absolutize_cwd(icon)));
        } else {
            log::warn!("icon {} does not exist, skipping", icon.display());
        }
    }

    for asset in &request.assets {
        if let Some(pair) = bundle_pair(asset) {
            args.push(format!("--add-data={pair}"));
        }
    }

    args
}

/// Formats one asset as an absolute `source{SEP}destination` bundling pair.
///
/// Files land at the bundle root; directories keep their own name.
pub fn bundle_pair(asset: &Path) -> Option<String> {
    if asset.is_file() {
        Some(format!("{}{}.", absolutize_cwd(asset), ADD_DATA_SEP))
    } else if asset.is_dir() {
        let name = asset.file_name()?.to_string_lossy().into_owned();
        Some(format!("{}{}{}", absolutize_cwd(asset), ADD_DATA_SEP, name))
    } else {
        log::warn!("asset {} does not exist, skipping", asset.display());
        None
    }
}

/// Resolves a request into the canonical build plan.
///
/// Declarative configuration takes precedence over assembled arguments.
/// The config file itself is excluded from the bundled-data argument set,
/// and extra caller-selected assets not already named in the config are
/// appended as bundling arguments.
pub fn resolve(request: &BuildRequest) -> Result<ResolvedBuildPlan> {
    if !request.script.exists() {
        return Err(PipelineError::ScriptNotFound(request.script.clone()));
    }

    if let Some(config) = detect_declarative_config(&request.assets)? {
        let mut args = sanitize_paths(&config.args, &config.project_root);

        for asset in &request.assets {
            if asset == &config.source || asset_named_in(&args, asset, &config.project_root) {
                continue;
            }
            let Some(pair) = bundle_pair(asset) else {
                continue;
            };
            let sanitized =
                rewrite_value(&pair, PathKind::BundlePair, &config.project_root);
            args.push(format!("--add-data={sanitized}"));
        }

        let app_name = extract_app_name(&args).unwrap_or_else(|| "App".to_string());
        return Ok(ResolvedBuildPlan {
            args,
            project_root: Some(config.project_root),
            app_name,
            config_source: Some(config.source),
        });
    }

    let args = assemble_from_request(request);
    let app_name = normalized_app_name(&request.app_name);
    Ok(ResolvedBuildPlan {
        args,
        project_root: None,
        app_name,
        config_source: None,
    })
}

/// Whether an asset already appears as the source of a bundling argument.
///
/// Compares paths, not substrings: the asset and each bundling source are
/// absolutized against `project_root` and matched for equality, so an asset
/// whose name happens to occur inside another argument is not mistaken for
/// an existing entry.
fn asset_named_in(args: &[String], asset: &Path, project_root: &Path) -> bool {
    let target = absolutize(&asset.display().to_string(), project_root);

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let value = if let Some(v) = arg
            .strip_prefix("--add-data=")
            .or_else(|| arg.strip_prefix("--add-binary="))
        {
            Some(v)
        } else if arg == "--add-data" || arg == "--add-binary" {
            iter.next().map(String::as_str)
        } else {
            None
        };
        let Some(value) = value else { continue };

        let source = value
            .split_once(ADD_DATA_SEP)
            .map(|(source, _)| source)
            .unwrap_or(value);
        if absolutize(source, project_root) == target {
            return true;
        }
    }
    false
}

/// Pulls the expected output name out of an argument list.
pub fn extract_app_name(args: &[String]) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--name" {
            return iter.next().cloned();
        }
        if let Some(value) = arg.strip_prefix("--name=") {
            return Some(value.to_string());
        }
    }
    None
}

/// Strips a trailing `.exe` the caller may have typed into the app name.
fn normalized_app_name(name: &str) -> String {
    let trimmed = name.trim();
    let base = trimmed
        .strip_suffix(".exe")
        .or_else(|| trimmed.strip_suffix(".EXE"))
        .unwrap_or(trimmed);
    if base.is_empty() {
        "App".to_string()
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abs(s: &str) -> String {
        Path::new(s).display().to_string()
    }

    #[test]
    fn sanitize_anchors_relative_bundle_sources() {
        let root = Path::new("/proj");
        let args = vec![format!("--add-data=assets{ADD_DATA_SEP}assets")];
        let out = sanitize_paths(&args, root);
        assert_eq!(out, vec![format!("--add-data={}{ADD_DATA_SEP}assets", abs("/proj/assets"))]);
    }

    #[test]
    fn sanitize_leaves_absolute_paths_untouched_and_is_idempotent() {
        let root = Path::new("/proj");
        let args = vec![
            format!("--add-data=/data/file.yml{ADD_DATA_SEP}."),
            "--icon=logo.ico".to_string(),
            "--onefile".to_string(),
        ];
        let once = sanitize_paths(&args, root);
        assert_eq!(once[0], format!("--add-data=/data/file.yml{ADD_DATA_SEP}."));
        assert_eq!(once[1], format!("--icon={}", abs("/proj/logo.ico")));
        assert_eq!(once[2], "--onefile");
        assert_eq!(sanitize_paths(&once, root), once);
    }

    #[test]
    fn sanitize_handles_space_separated_flag_values() {
        let root = Path::new("/proj");
        let args: Vec<String> = ["--icon", "icons/app.ico", "--name", "Foo"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let out = sanitize_paths(&args, root);
        assert_eq!(out[1], abs("/proj/icons/app.ico"));
        // --name's value is not a path and must pass through
        assert_eq!(out[3], "Foo");
    }

    #[test]
    fn app_name_extraction_handles_both_flag_forms() {
        let args: Vec<String> = ["--name", "Alpha"].iter().map(|s| s.to_string()).collect();
        assert_eq!(extract_app_name(&args).as_deref(), Some("Alpha"));
        let args = vec!["--name=Beta".to_string()];
        assert_eq!(extract_app_name(&args).as_deref(), Some("Beta"));
        assert_eq!(extract_app_name(&["--onefile".to_string()]), None);
    }

    #[test]
    fn app_name_normalization_strips_exe_suffix() {
        assert_eq!(normalized_app_name("MyTool.exe"), "MyTool");
        assert_eq!(normalized_app_name("  MyTool  "), "MyTool");
        assert_eq!(normalized_app_name(""), "App");
    }

    #[test]
    fn assembled_filesystem_arguments_are_absolute_by_construction() {
        use crate::certs::CertificateBackend;
        use crate::pipeline::request::{CertSource, SignerKind};

        let request = BuildRequest {
            script: PathBuf::from("main.py"),
            app_name: "MyTool".to_string(),
            icon: None,
            console: true,
            one_file: true,
            assets: vec![],
            cert_source: CertSource::CacheOrCreate {
                name: "Acme".to_string(),
            },
            cert_password: "secret".to_string(),
            cert_backend: CertificateBackend::Portable,
            signer: SignerKind::Osslsigncode,
        };

        let args = assemble_from_request(&request);
        assert!(
            Path::new(&args[0]).is_absolute(),
            "script argument must be absolute, got {}",
            args[0]
        );
        assert!(args[0].ends_with("main.py"));
    }

    #[test]
    fn bundling_source_extraction_matches_paths_not_substrings() {
        let root = Path::new("/proj");
        let args = vec![format!("--add-data=/proj/other.txt{ADD_DATA_SEP}.")];
        // "data" is a substring of the flag itself and must not match
        assert!(!asset_named_in(&args, Path::new("data"), root));
        assert!(!asset_named_in(&args, Path::new("a"), root));
        // the actual source matches whether given relative or absolute
        assert!(asset_named_in(&args, Path::new("other.txt"), root));
        assert!(asset_named_in(&args, Path::new("/proj/other.txt"), root));
        // space-separated flag form
        let args: Vec<String> = ["--add-binary", &format!("lib.so{ADD_DATA_SEP}.")]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(asset_named_in(&args, Path::new("/proj/lib.so"), root));
    }

    #[test]
    fn project_root_skips_conventional_config_directories() {
        assert_eq!(
            infer_project_root(Path::new("/repo/scripts/build_args.json")),
            Path::new("/repo")
        );
        assert_eq!(
            infer_project_root(Path::new("/repo/config/build_args.toml")),
            Path::new("/repo")
        );
        assert_eq!(
            infer_project_root(Path::new("/repo/build_args.json")),
            Path::new("/repo")
        );
    }
}

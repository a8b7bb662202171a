mod report;

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use serde_sarif::sarif::Result as SarifResult;

use jpatch::classset::ClassSet;
use jpatch::disassemble::{changed_classes, disassemble};
use jpatch::logging::ResolutionFailure;
use jpatch::patch::PatchClasses;
use jpatch::scan::load_inputs;
use jpatch::{PatchError, PatchScope, Patcher};

use crate::report::{build_invocation, build_sarif, resolution_result, validation_result};

/// CLI arguments for jpatch execution.
#[derive(Parser, Debug)]
#[command(
    name = "jpatch",
    about = "Resolve symbolic patches against obfuscated JVM classes and apply them.",
    version
)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve and apply patches, reporting failures as SARIF.
    Patch(PatchArgs),
    /// Print classes in patch syntax.
    Disassemble(DisassembleArgs),
}

#[derive(clap::Args, Debug)]
struct PatchArgs {
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    #[arg(long, value_name = "PATH")]
    classpath: Vec<PathBuf>,
    /// Patch files, applied in order.
    #[arg(long, value_name = "FILE", required = true)]
    patch: Vec<PathBuf>,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Write the resolved bindings as JSON.
    #[arg(long, value_name = "PATH")]
    mappings: Option<PathBuf>,
    /// Write every changed or added class, disassembled, under this directory.
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,
    /// Directory for search walk-throughs of failed patches.
    #[arg(long, value_name = "DIR")]
    report_dir: Option<PathBuf>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

#[derive(clap::Args, Debug)]
struct DisassembleArgs {
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    #[arg(long, value_name = "PATH")]
    classpath: Vec<PathBuf>,
    #[arg(long = "class", value_name = "NAME", required = true)]
    classes: Vec<String>,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Command::Patch(args) => run_patch(args),
        Command::Disassemble(args) => run_disassemble(args).map(|()| ExitCode::SUCCESS),
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

fn ensure_exists(path: &Path, what: &str) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("{what} not found: {}", path.display());
    }
    Ok(())
}

fn run_patch(args: PatchArgs) -> Result<ExitCode> {
    ensure_exists(&args.input, "input")?;
    for entry in &args.classpath {
        ensure_exists(entry, "classpath entry")?;
    }
    for patch in &args.patch {
        ensure_exists(patch, "patch")?;
    }
    if let Some(dir) = &args.report_dir {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let started_at = Instant::now();
    let loaded = load_inputs(&args.input, &args.classpath)?;
    let class_count = loaded.class_count;
    info!(
        "loaded {} classes and {} library classes",
        loaded.class_count, loaded.hidden_count
    );
    let mut patcher = Patcher::new(loaded.class_set).with_trace(args.report_dir.is_some());
    let original = args.output_dir.as_ref().map(|_| patcher.class_set().clone());

    let mut scope = PatchScope::new();
    let mut results = Vec::new();
    for path in &args.patch {
        match apply_patch_file(&mut patcher, path, &scope, args.report_dir.as_deref())? {
            Ok(resolved) => scope = resolved,
            Err(result) => {
                warn!("{} failed, skipping remaining patches", path.display());
                results.push(result);
                break;
            }
        }
    }

    if let Some(path) = &args.mappings {
        let mut writer = output_writer(Some(path))?;
        serde_json::to_writer_pretty(&mut writer, &scope.mappings(patcher.class_set()))
            .context("failed to serialize mappings")?;
        writer.write_all(b"\n").context("failed to write mappings")?;
    }

    if let (Some(dir), Some(original)) = (&args.output_dir, &original) {
        let written = write_classes(dir, original, patcher.class_set())?;
        info!("wrote {written} changed classes to {}", dir.display());
    }

    let failed = !results.is_empty();
    let sarif = build_sarif(results, build_invocation());
    let mut writer = output_writer(args.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &sarif).context("failed to serialize SARIF output")?;
    writer.write_all(b"\n").context("failed to write SARIF output")?;

    if args.timing && !args.quiet {
        eprintln!(
            "timing: total_ms={} classes={} patches={}",
            started_at.elapsed().as_millis(),
            class_count,
            args.patch.len()
        );
    }

    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

/// Apply one patch file. Patch failures become SARIF results; anything else
/// aborts the run.
fn apply_patch_file(
    patcher: &mut Patcher,
    path: &Path,
    scope: &PatchScope<'_>,
    report_dir: Option<&Path>,
) -> Result<std::result::Result<PatchScope<'static>, SarifResult>> {
    let source = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let patch = match PatchClasses::parse(&source) {
        Ok(patch) => patch,
        Err(error) => return Ok(Err(validation_result(path, &error))),
    };
    match patcher.apply_with_scope(&patch, scope) {
        Ok(resolved) => {
            info!("applied {}", path.display());
            Ok(Ok(resolved))
        }
        Err(PatchError::Validate(error)) => Ok(Err(validation_result(path, &error))),
        Err(PatchError::Resolution(failure)) => {
            let report = match report_dir {
                Some(dir) => Some(write_report(dir, &failure)?),
                None => None,
            };
            Ok(Err(resolution_result(path, &failure, report.as_deref())))
        }
        Err(error) => Err(error).with_context(|| format!("failed to apply {}", path.display())),
    }
}

fn write_report(dir: &Path, failure: &ResolutionFailure) -> Result<PathBuf> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    let path = dir.join(format!("{millis}.log"));
    fs::write(&path, failure.to_string()).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Write the disassembly of each class changed between `before` and `after`
/// to `<dir>/<internal name>.patch`.
fn write_classes(dir: &Path, before: &ClassSet, after: &ClassSet) -> Result<usize> {
    let changed = changed_classes(before, after);
    for name in &changed {
        let text = disassemble(after, name).with_context(|| format!("failed to disassemble {name}"))?;
        let path = dir.join(format!("{name}.patch"));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(changed.len())
}

fn run_disassemble(args: DisassembleArgs) -> Result<()> {
    ensure_exists(&args.input, "input")?;
    for entry in &args.classpath {
        ensure_exists(entry, "classpath entry")?;
    }

    let loaded = load_inputs(&args.input, &args.classpath)?;
    let mut writer = output_writer(args.output.as_deref())?;
    for class in &args.classes {
        let text = disassemble(&loaded.class_set, class).with_context(|| format!("failed to disassemble {class}"))?;
        writer
            .write_all(text.as_bytes())
            .context("failed to write disassembly")?;
    }
    Ok(())
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn patch_arguments_accept_repeated_patches() {
        let cli = Cli::try_parse_from([
            "jpatch",
            "patch",
            "--input",
            "app.jar",
            "--patch",
            "a.patch",
            "--patch",
            "b.patch",
            "--verbose",
        ])
        .expect("parse");
        assert!(cli.verbose);
        let Command::Patch(args) = cli.command else {
            panic!("expected patch command");
        };
        assert_eq!(args.patch, vec![PathBuf::from("a.patch"), PathBuf::from("b.patch")]);
        assert!(args.report_dir.is_none());
    }

    #[test]
    fn missing_patch_file_fails_before_loading() {
        let dir = tempfile::tempdir().expect("temp dir");
        let args = PatchArgs {
            input: dir.path().to_path_buf(),
            classpath: Vec::new(),
            patch: vec![dir.path().join("missing.patch")],
            output: None,
            mappings: None,
            output_dir: None,
            report_dir: None,
            quiet: true,
            timing: false,
        };
        let error = run_patch(args).expect_err("missing patch");
        assert!(error.to_string().starts_with("patch not found"));
    }

    #[test]
    fn changed_classes_are_written_as_patch_source() {
        use jpatch::ir::{ClassNode, Insn, MethodNode};
        use jpatch::opcodes::{self, ACC_PUBLIC};

        let mut set = ClassSet::new();
        set.add(
            ClassNode::new(ACC_PUBLIC, "demo/Counter", Some("java/lang/Object")).with_method(
                MethodNode::new(ACC_PUBLIC, "count", "()I").with_body(
                    vec![Insn::Simple(opcodes::ICONST_5), Insn::Simple(opcodes::IRETURN)],
                    Vec::new(),
                ),
            ),
            false,
        );
        set.add(ClassNode::new(ACC_PUBLIC, "demo/Other", Some("java/lang/Object")), false);
        let mut patcher = Patcher::new(set);
        let before = patcher.class_set().clone();
        patcher
            .apply(".class ~A\n.method ~m ()I\n-push-int 5\n+push-int 10\n.return\n.end-method\n.end-class\n")
            .expect("apply");

        let dir = tempfile::tempdir().expect("temp dir");
        let written = write_classes(dir.path(), &before, patcher.class_set()).expect("write classes");
        assert_eq!(written, 1);
        let text = fs::read_to_string(dir.path().join("demo/Counter.patch")).expect("read output");
        assert!(text.starts_with(".class demo/Counter\n"));
        assert!(text.contains(".push-int 10\n"));
        assert!(!dir.path().join("demo/Other.patch").exists());
    }

    #[test]
    fn resolution_failure_writes_report() {
        let dir = tempfile::tempdir().expect("temp dir");
        let patch = dir.path().join("fix.patch");
        fs::write(&patch, ".class ~A\n.method ~m ()J\n.return\n.end-method\n.end-class\n").expect("write patch");
        let mut patcher = Patcher::new(jpatch::classset::ClassSet::new()).with_trace(true);

        let outcome = apply_patch_file(&mut patcher, &patch, &PatchScope::new(), Some(dir.path())).expect("apply");
        let result = outcome.err().expect("resolution failure");
        assert_eq!(result.rule_id.as_deref(), Some(report::PATCH_RESOLVE));
        let logs: Vec<_> = fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "log"))
            .collect();
        assert_eq!(logs.len(), 1);
    }
}

//! `aspc`: inspect and build ASPX applications from the command line.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use aspx_build::{
    BuildContext, BuildManager, BuildProviderGroup, CompilationConfig, CompilerRegistry,
    DirectoryBuilder, EmitOnlyCompiler, ProviderRegistry,
};
use aspx_compiler::{ComponentRegistry, PhysicalPathProvider, VirtualPath, VirtualPathProvider};
use clap::{Arg, ArgAction, ArgMatches, Command};
use rayon::prelude::*;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let config_arg = Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("Compilation settings (JSON)");

    let matches = Command::new("aspc")
        .version(env!("CARGO_PKG_VERSION"))
        .about("ASPX page compiler")
        .subcommand_required(true)
        .subcommand(
            Command::new("tree")
                .about("Parse one markup file and print its control tree as JSON")
                .arg(Arg::new("file").required(true).value_name("FILE"))
                .arg(
                    Arg::new("root")
                        .short('r')
                        .long("root")
                        .value_name("DIR")
                        .help("Application root (defaults to the file's directory)"),
                ),
        )
        .subcommand(
            Command::new("groups")
                .about("Show how a request would be batched into assemblies")
                .arg(Arg::new("root").required(true).value_name("DIR"))
                .arg(Arg::new("path").required(true).value_name("VIRTUAL_PATH"))
                .arg(config_arg.clone()),
        )
        .subcommand(
            Command::new("build")
                .about("Compile every markup file of an application")
                .arg(Arg::new("root").required(true).value_name("DIR"))
                .arg(
                    Arg::new("out")
                        .short('o')
                        .long("out")
                        .value_name("DIR")
                        .default_value("aspc-out")
                        .help("Where generated sources are written"),
                )
                .arg(
                    Arg::new("records")
                        .long("records")
                        .value_name("DIR")
                        .help("Write preservation records for every result"),
                )
                .arg(
                    Arg::new("keep-going")
                        .short('k')
                        .long("keep-going")
                        .action(ArgAction::SetTrue)
                        .help("Keep building after a failure instead of stopping"),
                )
                .arg(config_arg),
        )
        .get_matches();

    let result = match matches.subcommand() {
        Some(("tree", args)) => run_tree(args),
        Some(("groups", args)) => run_groups(args),
        Some(("build", args)) => run_build(args),
        _ => Ok(()),
    };
    if let Err(err) = result {
        eprintln!("error: {:#}", err);
        process::exit(1);
    }
}

fn load_config(args: &ArgMatches) -> Result<CompilationConfig> {
    match args.get_one::<String>("config") {
        Some(path) => CompilationConfig::load(Path::new(path))
            .with_context(|| format!("loading {}", path)),
        None => Ok(CompilationConfig::default()),
    }
}

fn open_root(dir: &Path) -> Result<PhysicalPathProvider> {
    PhysicalPathProvider::new(dir).with_context(|| format!("opening {}", dir.display()))
}

fn run_tree(args: &ArgMatches) -> Result<()> {
    let file = PathBuf::from(args.get_one::<String>("file").context("missing file")?);
    let file = fs::canonicalize(&file).with_context(|| format!("reading {}", file.display()))?;
    let root = match args.get_one::<String>("root") {
        Some(root) => PathBuf::from(root),
        None => file.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    let provider = open_root(&root)?;
    let Some(path) = provider.virtual_path_for(&file) else {
        bail!("{} is outside {}", file.display(), root.display());
    };

    let parsed = aspx_compiler::parse_file(
        &provider,
        Arc::new(ComponentRegistry::with_builtins()),
        None,
        &path,
    )?;
    println!("{}", serde_json::to_string_pretty(&parsed.tree.to_json())?);
    Ok(())
}

fn run_groups(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;
    let provider = open_root(Path::new(args.get_one::<String>("root").context("missing root")?))?;
    let path = VirtualPath::new(args.get_one::<String>("path").context("missing path")?);

    let compilers = CompilerRegistry::new(config.compilers.clone());
    let extensions = ProviderRegistry::new(config.build_providers.clone());
    let ctx = BuildContext {
        provider: &provider,
        registry: Arc::new(ComponentRegistry::with_builtins()),
        filter: None,
        compilers: &compilers,
        config: &config,
    };
    let groups = DirectoryBuilder::new(&ctx, &extensions).build(
        &path,
        !config.batch,
        &|_: &VirtualPath| false,
    )?;
    let summaries: Vec<_> = groups.iter().map(BuildProviderGroup::summary).collect();
    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}

/// Markup files under the application root with a registered extension,
/// minus the ignored ones.
fn discover_files(
    provider: &PhysicalPathProvider,
    config: &CompilationConfig,
) -> Result<Vec<VirtualPath>> {
    let mut files = Vec::new();
    for extension in config.build_providers.keys() {
        let pattern = provider.root().join(format!("**/*{}", extension));
        for entry in glob::glob(&pattern.to_string_lossy())? {
            let physical = entry?;
            match provider.virtual_path_for(&physical) {
                Some(path) if !config.is_ignored(&path) => files.push(path),
                Some(path) => debug!(path = %path, "ignored"),
                None => {}
            }
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// Build `files` in parallel. Without `keep_going` no new file is started
/// once one has failed. Returns the number compiled and the failures.
fn build_files(
    manager: &BuildManager,
    files: &[VirtualPath],
    keep_going: bool,
    diagnostic_mode: bool,
) -> (usize, Vec<(VirtualPath, String)>) {
    let failed = AtomicBool::new(false);
    let outcomes: Vec<Option<(VirtualPath, String)>> = files
        .par_iter()
        .filter_map(|path| {
            if !keep_going && failed.load(Ordering::Relaxed) {
                return None;
            }
            match manager.get_cache_item(path) {
                Ok(_) => Some(None),
                Err(err) => {
                    failed.store(true, Ordering::Relaxed);
                    Some(Some((path.clone(), err.user_message(diagnostic_mode))))
                }
            }
        })
        .collect();
    let compiled = outcomes.iter().filter(|outcome| outcome.is_none()).count();
    (compiled, outcomes.into_iter().flatten().collect())
}

fn run_build(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;
    let root = Path::new(args.get_one::<String>("root").context("missing root")?);
    let out = PathBuf::from(args.get_one::<String>("out").context("missing output")?);
    let keep_going = args.get_flag("keep-going");
    let diagnostic_mode = config.diagnostic_mode;

    let provider = Arc::new(open_root(root)?);
    let files = discover_files(&provider, &config)?;
    let manager = BuildManager::new(config, provider, Arc::new(EmitOnlyCompiler::new(&out)))?;

    let (compiled, failures) = build_files(&manager, &files, keep_going, diagnostic_mode);

    for (path, message) in &failures {
        error!(path = %path, "build failed");
        eprintln!("{}:\n{}\n", path, message);
    }

    if let Some(dir) = args.get_one::<String>("records") {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir))?;
        for path in &files {
            if let Some(record) = manager.preservation_record(path) {
                record.save(Path::new(dir))?;
            }
        }
    }

    println!(
        "{} of {} files compiled into {}",
        compiled,
        files.len(),
        out.display()
    );
    if !failures.is_empty() {
        bail!("{} file(s) failed to compile", failures.len());
    }
    Ok(())
}

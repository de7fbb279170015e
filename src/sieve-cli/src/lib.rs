use std::{io::Write, path::PathBuf, sync::Arc};

use clap::{Args, Parser, Subcommand};
use common_error::{SieveError, SieveResult};
use common_sieve_config::SieveExecutionConfig;
use itertools::Itertools;
use sieve_local_execution::{JsonlSink, JsonlSource, PipelineExecutor, ProcessContext};
use sieve_ops::{OperatorDescriptor, OperatorKind, OperatorRegistry};
use sieve_plan::{FusionPlanner, RecipeFile};

#[derive(Parser, Debug)]
#[command(name = "sieve", author, version = common_version::VERSION, about, long_about = None)]
pub struct Cli {
    /// Write a chrome trace of the run (also enabled by SIEVE_DEV_ENABLE_CHROME_TRACE)
    #[arg(long, global = true)]
    pub chrome_trace: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a recipe over a JSONL dataset
    Run(RunArgs),
    /// List the registered operators
    ListOps(ListOpsArgs),
    /// Print the execution plan of a recipe without running it
    Explain(ExplainArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Recipe file (.yaml, .yml or .json)
    #[arg(short, long)]
    pub recipe: PathBuf,
    /// Input JSONL, overrides the recipe's dataset_path
    #[arg(short, long)]
    pub dataset: Option<PathBuf>,
    /// Output JSONL, overrides the recipe's export_path
    #[arg(short, long)]
    pub export: Option<PathBuf>,
    /// Worker count for operators that do not set num_proc, overrides the recipe's np
    #[arg(long)]
    pub np: Option<usize>,
    /// Fuse filters sharing intermediates, overrides the recipe's op_fusion
    #[arg(long)]
    pub op_fusion: Option<bool>,
    /// Threads of the compute runtime (also SIEVE_COMPUTE_THREADS)
    #[arg(long)]
    pub compute_threads: Option<usize>,
    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ListOpsArgs {
    /// Only list operators of this kind (mapper, filter, deduplicator, selector)
    #[arg(short, long)]
    pub kind: Option<OperatorKind>,
    /// Also print every operator's parameters
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Args, Debug)]
pub struct ExplainArgs {
    /// Recipe file (.yaml, .yml or .json)
    #[arg(short, long)]
    pub recipe: PathBuf,
    /// Fuse filters sharing intermediates, overrides the recipe's op_fusion
    #[arg(long)]
    pub op_fusion: Option<bool>,
}

fn builtin_process(config: SieveExecutionConfig) -> SieveResult<Arc<ProcessContext>> {
    ProcessContext::init(
        sieve_functions_text::builtin_registry()?,
        sieve_functions_text::builtin_providers()?,
        config,
    )
}

fn config_for(recipe: &RecipeFile, np: Option<usize>, op_fusion: Option<bool>) -> SieveExecutionConfig {
    let mut config = recipe.apply_to(SieveExecutionConfig::from_env());
    if let Some(op_fusion) = op_fusion {
        config = config.with_op_fusion(op_fusion);
    }
    if np.is_some() {
        config = config.with_default_num_proc(np);
    }
    config
}

fn required_path(
    flag: Option<PathBuf>,
    from_recipe: Option<&PathBuf>,
    what: &str,
) -> SieveResult<PathBuf> {
    flag.or_else(|| from_recipe.cloned()).ok_or_else(|| {
        SieveError::ValueError(format!(
            "No {what} given: pass it on the command line or set it in the recipe"
        ))
    })
}

fn run(args: RunArgs, out: &mut impl Write) -> SieveResult<()> {
    let recipe_file = RecipeFile::load(&args.recipe)?;
    let dataset = required_path(args.dataset, recipe_file.dataset_path.as_ref(), "dataset path")?;
    let export = required_path(args.export, recipe_file.export_path.as_ref(), "export path")?;
    let mut config = config_for(&recipe_file, args.np, args.op_fusion);
    if args.compute_threads.is_some() {
        config = config.with_compute_threads(args.compute_threads);
    }

    if let Some(project) = &recipe_file.project_name {
        log::info!("Running project {}", project);
    }
    let process = builtin_process(config)?;
    let mut executor = PipelineExecutor::new(process.clone(), &recipe_file.recipe())?;
    let result = executor.run(&JsonlSource::new(dataset), &JsonlSink::new(export));
    process.shutdown();
    let report = result?;

    if args.json {
        serde_json::to_writer_pretty(&mut *out, &report)?;
        writeln!(out)?;
    } else {
        writeln!(out, "{report}")?;
    }
    Ok(())
}

fn describe(descriptor: &OperatorDescriptor, verbose: bool) -> Vec<String> {
    let mut flags = vec![];
    if descriptor.batched {
        flags.push("batched".to_string());
    }
    if !descriptor.intermediate_tags.is_empty() {
        flags.push(format!(
            "tags: {}",
            descriptor.intermediate_tags.iter().join(", ")
        ));
    }
    let mut lines = vec![format!(
        "{:<36} {:<13} {}{}",
        descriptor.name,
        descriptor.kind,
        descriptor.docstring,
        if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join("; "))
        }
    )];
    if verbose {
        for spec in descriptor.schema.specs() {
            let default = spec
                .default
                .as_ref()
                .map_or_else(String::new, |value| format!(" = {value}"));
            let required = if spec.required { " (required)" } else { "" };
            lines.push(format!("    {}: {}{}{}", spec.name, spec.ty, default, required));
        }
    }
    lines
}

fn list_ops(registry: &OperatorRegistry, args: &ListOpsArgs, out: &mut impl Write) -> SieveResult<()> {
    for descriptor in registry.list(args.kind) {
        for line in describe(descriptor, args.verbose) {
            writeln!(out, "{line}")?;
        }
    }
    Ok(())
}

fn explain(args: ExplainArgs, out: &mut impl Write) -> SieveResult<()> {
    let recipe_file = RecipeFile::load(&args.recipe)?;
    let config = config_for(&recipe_file, None, args.op_fusion);
    let registry = sieve_functions_text::builtin_registry()?;
    let plan = FusionPlanner::new(&registry)
        .with_op_fusion(config.op_fusion)
        .plan(&recipe_file.recipe())?;
    writeln!(out, "{plan}")?;
    Ok(())
}

/// Runs one parsed command line, writing user-facing output to `out`.
pub fn execute(cli: Cli, out: &mut impl Write) -> SieveResult<()> {
    match cli.command {
        Commands::Run(args) => run(args, out),
        Commands::ListOps(args) => list_ops(&sieve_functions_text::builtin_registry()?, &args, out),
        Commands::Explain(args) => explain(args, out),
    }
}

// cps-run: run a JSON-encoded workflow program through the script cache

use clap::Parser;
use cps::{DefaultInvoker, Invoker, LoggingInvoker, Outcome};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use workflow_cps::{
    compile_json, AccessPolicy, Binding, CacheConfig, CpsRuntime, FlowDefinition, JobOwner, SandboxInvoker,
};

#[derive(Parser)]
#[command(name = "cps-run")]
#[command(about = "Run a workflow program, reusing compiled scripts across runs")]
#[command(version = "0.1.0")]
struct Args {
    /// JSON-encoded program arena
    #[arg(value_name = "FILE")]
    program: PathBuf,

    /// Number of runs of the same job
    #[arg(short, long, default_value_t = 1)]
    runs: usize,

    /// Job name; runs of one job share a cache lock
    #[arg(long, default_value = "cli")]
    job: String,

    /// TOML cache configuration
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable the script cache regardless of configuration
    #[arg(long)]
    enable_cache: bool,

    /// Run under a sandbox policy admitting only the `--allow` signatures
    #[arg(long)]
    sandbox: bool,

    /// Signature admitted by the sandbox policy, e.g. `Map.get` or `String.*`
    #[arg(long = "allow", value_name = "SIGNATURE")]
    allow: Vec<String>,

    /// Run one janitor pass after the last run
    #[arg(long)]
    sweep: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => CacheConfig::load(path)?,
        None => CacheConfig::default(),
    };
    let mut config = config.with_env_overrides()?;
    if args.enable_cache {
        config.enabled = true;
    }

    let checkout = args
        .program
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let file = args.program.file_name().map(PathBuf::from).ok_or("program path has no file name")?;
    let definition = FlowDefinition::from_file(checkout, file, args.sandbox);
    let sandbox_policy = args
        .allow
        .iter()
        .fold(AccessPolicy::new("cli-sandbox"), |policy, sig| policy.allow(sig.clone()));
    let policy = definition.policy(&sandbox_policy);

    let runtime = CpsRuntime::new(config.clone());
    runtime.start_janitor();

    let mut failed = false;
    for run in 1..=args.runs {
        let root_dir = config.root_dir.join("executions").join(Uuid::new_v4().to_string());
        let (execution, source) = definition.create_execution(JobOwner::new(&args.job), root_dir)?;
        let execution = Arc::new(execution);

        let script = runtime.load_script(&policy, &source, Binding::new(), &execution, || {
            compile_json(source.name(), source.text()).map(|s| s.bind(Arc::clone(&execution)))
        })?;

        let sink = Arc::clone(&execution);
        let logging = LoggingInvoker::new(DefaultInvoker::new())
            .with_recorder(move |signature| sink.record_internal_call(signature));
        let invoker: Arc<dyn Invoker> = if definition.is_sandboxed() {
            Arc::new(SandboxInvoker::new(policy.clone(), logging))
        } else {
            Arc::new(logging)
        };

        match script.run(invoker) {
            Outcome::Completed(value) => println!("run {}: {}", run, value),
            Outcome::Failed(failure) => {
                failed = true;
                println!("run {}: failed: {}", run, failure);
            }
            Outcome::Suspended(suspension) => println!("run {}: suspended on {}", run, suspension.request),
            Outcome::Cancelled => println!("run {}: cancelled", run),
            Outcome::OutOfBudget(_) => println!("run {}: out of budget", run),
        }
        for (signature, count) in execution.internal_calls() {
            println!("run {}: internal call {} x{}", run, signature, count);
        }
    }

    if let Some(cache) = runtime.cache() {
        println!("cache: {}", cache.stats());
    }
    if args.sweep {
        let report = runtime.sweep_now()?;
        println!(
            "sweep: kept {}, deleted {}{}",
            report.kept.len(),
            report.deleted.len(),
            if report.purged { ", store purged" } else { "" }
        );
    }

    runtime.shutdown().await;
    if failed {
        std::process::exit(1);
    }
    Ok(())
}

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use skein_core::config::AppConfig;
use skein_core::dag::Dag;
use skein_core::registry::NodeRegistry;
use skein_core::traits::{LlmClient, ServiceDiscovery, WorkflowEngine};
use skein_core::types::{GenerationHints, GenerationRequest, RunStatus, Style, WorkflowRun};
use skein_core::validator::{validate_dag, ValidationIssue};

use skein_agent::{ApiRegistryClient, WorkflowGenerator};
use skein_compiler::{compile_dag, dag_signature, pick_signature_name};
use skein_engine::{
    deploy_generated, deploy_named, runs, DeployAction, EngineClient, JobPoller,
    NamedWorkflowSpec, WorkflowStore,
};

#[derive(Parser)]
#[command(name = "skein", version, about = "Workflow DAG compiler and run orchestrator")]
struct Cli {
    /// Path to config file (default: skein.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a DAG file against the node registry
    Validate {
        /// Path to a DAG JSON file
        file: PathBuf,
    },
    /// Compile a DAG file and print the engine flow
    Compile {
        /// Path to a DAG JSON file
        file: PathBuf,
        /// Workflow name used in the flow summary
        #[arg(long, default_value = "workflow")]
        name: String,
    },
    /// Deploy named workflow files to an app
    Deploy {
        /// A workflow JSON file or a directory of them
        path: PathBuf,
        /// Application the workflows belong to
        #[arg(long)]
        app: String,
    },
    /// Generate a workflow DAG from a description and deploy it
    Generate {
        /// What the workflow should do
        description: String,
        /// Application the workflow belongs to
        #[arg(long)]
        app: String,
        /// Let the model query the API registry for endpoint details
        #[arg(long)]
        agentic: bool,
        /// Narrow the service catalog to these services (repeatable)
        #[arg(long = "service")]
        services: Vec<String>,
        /// Preferred node types (repeatable)
        #[arg(long = "node-type")]
        node_types: Vec<String>,
        /// Expected flow_input fields (repeatable)
        #[arg(long = "input")]
        inputs: Vec<String>,
        /// Style scope: human or brand
        #[arg(long)]
        style_kind: Option<String>,
        /// Id of the styled human or brand
        #[arg(long)]
        style_id: Option<String>,
        /// Display name of the styled human or brand
        #[arg(long)]
        style_name: Option<String>,
    },
    /// Start a run of a deployed workflow
    Run {
        /// Workflow name
        name: String,
        /// Application the workflow belongs to
        #[arg(long)]
        app: String,
        /// Run inputs as key=value pairs (values may be JSON)
        #[arg(long = "input")]
        inputs: Vec<String>,
    },
    /// Inspect workflow runs
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },
    /// Reconcile active runs against the engine until interrupted
    Poll,
}

#[derive(Subcommand)]
enum RunsAction {
    /// List runs, newest first
    List {
        /// Filter by workflow id
        #[arg(long)]
        workflow: Option<String>,
        /// Filter by status (queued/running/completed/failed/cancelled)
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one run, reconciling against the engine if still active
    Get {
        /// Run id
        id: String,
    },
    /// Cancel an active run
    Cancel {
        /// Run id
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("skein=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    let mut registry = NodeRegistry::with_builtins();
    registry.extend(&config.registry.node_types);
    let registry = Arc::new(registry);

    match cli.command {
        Commands::Validate { file } => {
            let dag = read_dag(&file)?;
            let outcome = validate_dag(&dag, &registry);
            if !outcome.valid {
                print_issues(&outcome.errors);
                anyhow::bail!("{} validation error(s)", outcome.errors.len());
            }
            println!(
                "{} is valid ({} nodes, {} edges)",
                file.display(),
                dag.nodes.len(),
                dag.edges.len()
            );
        }
        Commands::Compile { file, name } => {
            let dag = read_dag(&file)?;
            let outcome = validate_dag(&dag, &registry);
            if !outcome.valid {
                print_issues(&outcome.errors);
                anyhow::bail!("{} validation error(s)", outcome.errors.len());
            }

            let plan = compile_dag(&dag, &name, &registry)?;
            let signature = dag_signature(&dag)?;
            eprintln!("signature: {}", signature);
            eprintln!(
                "signature name: {}",
                pick_signature_name(&signature, &HashSet::new())
            );
            println!("{}", serde_json::to_string_pretty(&plan.to_flow())?);
        }
        Commands::Deploy { path, app } => {
            let store = open_store(&config)?;
            let engine = connect_engine(&config)?;
            let specs = read_workflow_specs(&path)?;

            let outcomes = deploy_named(&store, engine.as_ref(), &registry, &app, &specs).await?;
            for outcome in &outcomes {
                println!(
                    "{} {} ({})",
                    action_verb(outcome.action),
                    outcome.workflow.name,
                    outcome.workflow.id
                );
            }
        }
        Commands::Generate {
            description,
            app,
            agentic,
            services,
            node_types,
            inputs,
            style_kind,
            style_id,
            style_name,
        } => {
            let store = open_store(&config)?;
            let engine = connect_engine(&config)?;

            let llm: Arc<dyn LlmClient> = Arc::from(skein_llm::create_client(&config.llm)?);
            let discovery: Option<Arc<dyn ServiceDiscovery>> = if agentic {
                if !config.discovery.is_configured() {
                    anyhow::bail!(
                        "agentic mode needs [discovery] url (or SKEIN_API_REGISTRY_URL)"
                    );
                }
                Some(Arc::new(ApiRegistryClient::new(&config.discovery)?))
            } else {
                None
            };
            let generator = WorkflowGenerator::new(llm, discovery, registry.clone());

            let mut request = GenerationRequest::new(description);
            if !services.is_empty() || !node_types.is_empty() || !inputs.is_empty() {
                request.hints = Some(GenerationHints {
                    services,
                    node_types,
                    expected_inputs: inputs,
                });
            }
            request.style = parse_style(style_kind.as_deref(), style_id, style_name)?;

            let generated = generator.generate(&request).await?;
            let outcome = deploy_generated(
                &store,
                engine.as_ref(),
                &registry,
                &app,
                &generated,
                request.style.as_ref(),
            )
            .await?;

            println!(
                "{} {} ({})",
                action_verb(outcome.action),
                outcome.workflow.name,
                outcome.workflow.id
            );
            println!("{}", serde_json::to_string_pretty(&outcome.workflow.dag)?);
        }
        Commands::Run { name, app, inputs } => {
            let store = open_store(&config)?;
            let engine = connect_engine(&config)?;
            let inputs = parse_inputs(&inputs)?;

            let run = runs::execute_by_name(&store, engine.as_ref(), &app, &name, inputs).await?;
            print_run(&run);
        }
        Commands::Runs { action } => {
            let store = open_store(&config)?;
            match action {
                RunsAction::List { workflow, status } => {
                    let status = match status.as_deref() {
                        Some(s) => Some(
                            RunStatus::parse(s)
                                .ok_or_else(|| anyhow::anyhow!("unknown run status: {}", s))?,
                        ),
                        None => None,
                    };
                    let all = store.list_runs(workflow.as_deref(), status)?;
                    if all.is_empty() {
                        println!("No runs recorded.");
                    } else {
                        for run in &all {
                            println!(
                                "{}  {:<9}  {}  {}",
                                run.id,
                                run.status,
                                run.workflow_id,
                                run.created_at.to_rfc3339()
                            );
                        }
                    }
                }
                RunsAction::Get { id } => {
                    let engine = connect_engine(&config)?;
                    let run = runs::get_run(&store, engine.as_ref(), &id).await?;
                    print_run(&run);
                }
                RunsAction::Cancel { id } => {
                    let engine = connect_engine(&config)?;
                    let run = runs::cancel_run(&store, engine.as_ref(), &id).await?;
                    print_run(&run);
                }
            }
        }
        Commands::Poll => {
            if !config.engine.is_configured() {
                anyhow::bail!(
                    "polling needs [engine] url and token (or SKEIN_ENGINE_URL / SKEIN_ENGINE_TOKEN)"
                );
            }
            let store = Arc::new(open_store(&config)?);
            let engine: Arc<dyn WorkflowEngine> = Arc::new(EngineClient::new(&config.engine)?);

            let cancel = CancellationToken::new();
            let cancel_clone = cancel.clone();

            // Graceful shutdown on Ctrl-C
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down poller...");
                cancel_clone.cancel();
            });

            let poller = JobPoller::new(store, engine, &config.poller, cancel);
            poller.run().await;
        }
    }

    Ok(())
}

fn open_store(config: &AppConfig) -> anyhow::Result<WorkflowStore> {
    Ok(WorkflowStore::open(Path::new(&config.store.path))?)
}

/// Connect to the execution engine when one is configured. Without one,
/// deploys and runs still hit the store; there is just no job to drive.
fn connect_engine(config: &AppConfig) -> anyhow::Result<Option<Arc<dyn WorkflowEngine>>> {
    if !config.engine.is_configured() {
        warn!("No engine configured; workflows persist to the store only");
        return Ok(None);
    }
    let client = EngineClient::new(&config.engine)?;
    Ok(Some(Arc::new(client)))
}

fn read_dag(file: &Path) -> anyhow::Result<Dag> {
    let content = std::fs::read_to_string(file)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {}", file.display(), e))?;
    let dag: Dag = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("{} is not a valid DAG: {}", file.display(), e))?;
    Ok(dag)
}

/// Collect workflow specs from a single JSON file or every `.json` file in a
/// directory, sorted by path for stable deploy order.
fn read_workflow_specs(path: &Path) -> anyhow::Result<Vec<NamedWorkflowSpec>> {
    let files = if path.is_dir() {
        let mut files: Vec<PathBuf> = std::fs::read_dir(path)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    };

    if files.is_empty() {
        anyhow::bail!("no workflow files found at {}", path.display());
    }

    let mut specs = Vec::new();
    for file in &files {
        let content = std::fs::read_to_string(file)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {}", file.display(), e))?;
        let spec: NamedWorkflowSpec = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("{} is not a workflow spec: {}", file.display(), e))?;
        specs.push(spec);
    }
    Ok(specs)
}

fn parse_style(
    kind: Option<&str>,
    id: Option<String>,
    name: Option<String>,
) -> anyhow::Result<Option<Style>> {
    let Some(kind) = kind else {
        if id.is_some() || name.is_some() {
            anyhow::bail!("--style-id/--style-name need --style-kind");
        }
        return Ok(None);
    };
    let (Some(id), Some(name)) = (id, name) else {
        anyhow::bail!("--style-kind needs both --style-id and --style-name");
    };
    match kind {
        "human" => Ok(Some(Style::Human { human_id: id, name })),
        "brand" => Ok(Some(Style::Brand { brand_id: id, name })),
        other => anyhow::bail!("unknown style kind: {} (use human or brand)", other),
    }
}

/// Turn `key=value` pairs into a JSON object. Values that parse as JSON keep
/// their type; everything else becomes a string.
fn parse_inputs(pairs: &[String]) -> anyhow::Result<Value> {
    let mut map = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("input must be key=value, got: {}", pair))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        map.insert(key.to_string(), value);
    }
    Ok(Value::Object(map))
}

fn print_issues(issues: &[ValidationIssue]) {
    for issue in issues {
        eprintln!("  {}: {}", issue.field, issue.message);
    }
}

fn print_run(run: &WorkflowRun) {
    println!("run:      {}", run.id);
    println!("workflow: {}", run.workflow_id);
    println!("status:   {}", run.status);
    if let Some(job) = &run.external_job_id {
        println!("job:      {}", job);
    }
    if let Some(result) = &run.result {
        println!("result:   {}", result);
    }
    if let Some(error) = &run.error {
        println!("error:    {}", error);
    }
}

fn action_verb(action: DeployAction) -> &'static str {
    match action {
        DeployAction::Created => "created",
        DeployAction::Updated => "updated",
    }
}

//! forgeloop CLI
//!
//! ```text
//! forgeloop run --project demo "create a hello-world page"
//! forgeloop run --project demo --run-id <id> "create a hello-world page"   # resume
//! forgeloop history --project demo
//! ```

use clap::{Parser, Subcommand};

use forgeloop::metrics::encode_metrics;
use forgeloop::store::MessageKind;
use forgeloop::tracing::{init_tracing, shutdown_tracing};
use forgeloop::{RunConfig, RunEvent, Workflow};

#[derive(Parser)]
#[command(name = "forgeloop")]
#[command(about = "Run an autonomous coding agent against a sandbox", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the agent on a prompt until it completes or hits the iteration cap")]
    Run {
        #[arg(help = "The task for the agent")]
        prompt: String,

        #[arg(short, long, help = "Project the result is saved under")]
        project: String,

        #[arg(long, help = "Resume an existing run from its step journal")]
        run_id: Option<String>,

        #[arg(long, help = "Model to use (overrides FORGELOOP_MODEL)")]
        model: Option<String>,

        #[arg(long, help = "Print Prometheus metrics after the run")]
        metrics: bool,
    },

    #[command(about = "List the saved results of a project")]
    History {
        #[arg(short, long, help = "Project to list")]
        project: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    let mut config = RunConfig::from_env();

    init_tracing("forgeloop", config.otlp_endpoint.as_deref())?;

    let result = match cli.command {
        Commands::Run {
            prompt,
            project,
            run_id,
            model,
            metrics,
        } => {
            if let Some(model) = model {
                config.model = model;
            }
            run(config, RunEvent::new(prompt, project), run_id, metrics).await
        }
        Commands::History { project } => history(config, &project),
    };

    shutdown_tracing();
    result
}

async fn run(
    config: RunConfig,
    event: RunEvent,
    run_id: Option<String>,
    print_metrics: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let workflow = Workflow::from_config(config)?;
    let output = workflow.run(event, run_id).await?;

    println!();
    println!("Run:      {}", output.run_id);
    println!("Sandbox:  {}", output.sandbox_url);
    println!("Files:    {}", output.files.len());
    for path in output.files.keys() {
        println!("  - {}", path);
    }
    match &output.summary {
        Some(summary) if !output.is_error => println!("Summary:\n{}", summary),
        _ => println!("Result:   {}", forgeloop::workflow::GENERIC_ERROR_MESSAGE),
    }

    if print_metrics {
        println!();
        print!("{}", encode_metrics());
    }
    Ok(())
}

fn history(config: RunConfig, project: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let workflow = Workflow::from_config(config)?;
    let messages = workflow.store().list(project)?;

    if messages.is_empty() {
        println!("No messages for project {}", project);
        return Ok(());
    }

    for message in messages {
        let kind = match message.kind {
            MessageKind::Result => "RESULT",
            MessageKind::Error => "ERROR",
        };
        let first_line = message.content.lines().next().unwrap_or_default();
        println!("{}  {:<6}  {}", message.id, kind, first_line);
        if let Some(fragment) = &message.fragment {
            println!("    {} ({} files)", fragment.sandbox_url, fragment.files.len());
        }
    }
    Ok(())
}

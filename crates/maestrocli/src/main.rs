use anyhow::{anyhow, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use maestrocore::{
    AgentExecutor, AgentReply, CapabilityError, ChunkSink, EventPayload, ExecutionContext,
    HumanGate, ManifestValidator, NodeSpec, Recipe, SerdeManifestValidator, ToolExecutor,
};
use maestroruntime::{Controller, Topology};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_stream::StreamExt;

#[derive(Parser)]
#[command(name = "maestro")]
#[command(about = "Maestro recipe runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a recipe manifest with stub capabilities
    Run {
        /// Path to recipe manifest JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as JSON string
        #[arg(short, long)]
        input: Option<String>,

        /// Maximum concurrently executing nodes
        #[arg(long, default_value_t = maestrocore::DEFAULT_MAX_PARALLEL_NODES)]
        max_parallel: usize,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a recipe manifest (schema + topology)
    Validate {
        /// Path to recipe manifest JSON file
        file: PathBuf,
    },

    /// Create a new example recipe manifest
    Init {
        /// Output file path
        #[arg(short, long, default_value = "recipe.json")]
        output: PathBuf,
    },
}

/// Agent stub that echoes the prompt it was handed. Lets a recipe be
/// exercised end-to-end without a model behind it.
struct StubAgent;

#[async_trait]
impl AgentExecutor for StubAgent {
    async fn invoke(
        &self,
        agent_name: &str,
        inputs: &Value,
        _overrides: Option<&Value>,
        _stream: &dyn ChunkSink,
    ) -> Result<AgentReply, CapabilityError> {
        Ok(AgentReply::new(json!({
            "agent": agent_name,
            "echo": inputs,
        })))
    }
}

/// Tool stub that echoes its arguments.
struct StubTool;

#[async_trait]
impl ToolExecutor for StubTool {
    async fn execute(&self, tool_name: &str, args: &Value) -> Result<Value, CapabilityError> {
        Ok(json!({
            "tool": tool_name,
            "args": args,
        }))
    }
}

/// Gate stub that approves instantly.
struct StubGate;

#[async_trait]
impl HumanGate for StubGate {
    async fn await_decision(
        &self,
        _node_id: &str,
        _inputs: &Value,
        _timeout_ms: Option<u64>,
    ) -> Result<Value, CapabilityError> {
        Ok(json!({"approved": true}))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            max_parallel,
            verbose,
        } => {
            let level = if verbose {
                tracing::Level::DEBUG
            } else {
                tracing::Level::INFO
            };
            tracing_subscriber::fmt().with_max_level(level).init();

            run_recipe(file, input, max_parallel).await?;
        }

        Commands::Validate { file } => {
            validate_recipe(file)?;
        }

        Commands::Init { output } => {
            create_example_recipe(output)?;
        }
    }

    Ok(())
}

async fn run_recipe(file: PathBuf, input: Option<String>, max_parallel: usize) -> Result<()> {
    let manifest: Value = serde_json::from_str(&std::fs::read_to_string(&file)?)?;

    let inputs: Value = match input {
        Some(text) => {
            let parsed: Value = serde_json::from_str(&text)?;
            if !parsed.is_object() {
                return Err(anyhow!("input must be a JSON object"));
            }
            parsed
        }
        None => json!({}),
    };

    let context = ExecutionContext::new(
        "cli-user",
        format!("cli-{}", std::process::id()),
        Arc::new(StubAgent),
        Arc::new(StubTool),
        Arc::new(StubGate),
    )
    .with_max_parallel_nodes(max_parallel);

    let controller = Controller::new(Arc::new(SerdeManifestValidator));
    let mut stream = controller.execute_recipe(&manifest, inputs, context, None)?;

    let mut done = 0usize;
    let mut failed = false;
    while let Some(event) = stream.next().await {
        match &event.payload {
            EventPayload::NodeInit { kind } => {
                println!("  · declared {} ({})", event.node_id, kind.as_str());
            }
            EventPayload::NodeStart { .. } => {
                println!("  ⚡ {} running", event.node_id);
            }
            EventPayload::NodeStream { chunk } => {
                println!("     ▸ [{}] {}", event.node_id, chunk);
            }
            EventPayload::NodeDone { output, .. } => {
                done += 1;
                println!("  ✅ {} done: {}", event.node_id, compact(output));
            }
            EventPayload::NodeRestored { .. } => {
                done += 1;
                println!("  ↻ {} restored from snapshot", event.node_id);
            }
            EventPayload::NodeSkipped { .. } => {
                println!("  ⊘ {} skipped (pruned)", event.node_id);
            }
            EventPayload::EdgeActive { from, to } => {
                println!("  → {} ⇒ {}", from, to);
            }
            EventPayload::CouncilVote { votes, .. } => {
                println!("  🗳  {} council: {} votes", event.node_id, votes.len());
            }
            EventPayload::Error {
                node_id,
                error_kind,
                message,
                ..
            } => {
                failed = true;
                println!("  ❌ {} failed [{}]: {}", node_id, error_kind, message);
            }
        }
    }

    println!();
    if failed {
        println!("💥 Run failed after {} completed node(s)", done);
    } else {
        println!("✨ Run completed: {} node(s)", done);
    }

    Ok(())
}

fn compact(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() > 80 {
        let short: String = text.chars().take(79).collect();
        format!("{short}…")
    } else {
        text
    }
}

fn validate_recipe(file: PathBuf) -> Result<()> {
    println!("🔍 Validating recipe: {}", file.display());

    let manifest: Value = serde_json::from_str(&std::fs::read_to_string(&file)?)?;
    let recipe = SerdeManifestValidator.parse(&manifest)?;
    let topology = Topology::build(&recipe)?;

    println!("✅ Recipe is valid:");
    println!("   Name: {}", recipe.name);
    println!("   Nodes: {}", recipe.graph.nodes.len());
    println!("   Edges: {}", recipe.graph.edges.len());
    println!("   Layers: {}", topology.layers().len());

    Ok(())
}

fn create_example_recipe(output: PathBuf) -> Result<()> {
    let mut recipe = Recipe::new("example-research", "Example research recipe");
    recipe.description = Some("Drafts an answer, reviews it, and routes on the verdict".to_string());
    recipe.inputs.insert("question".to_string(), "string".to_string());

    recipe
        .add_node(NodeSpec::agent("draft", "drafter"))
        .add_node(NodeSpec::agent("review", "reviewer"))
        .add_node(NodeSpec::logic("publish", "publisher"))
        .add_node(NodeSpec::human("escalate").with_timeout_ms(60_000))
        .connect("draft", "review")
        .connect_when("review", "publish", "approve")
        .connect_when("review", "escalate", "reject");

    let json = serde_json::to_string_pretty(&recipe)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example recipe: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  maestro run --file {} --input '{{\"question\": \"why is the sky blue?\"}}'",
        output.display()
    );

    Ok(())
}

// Tether CLI
//
// `serve` hosts a worker on the in-process engine until interrupted;
// `run` drives one demo run to completion and prints its stream events.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use tether_contracts::{AgentId, Message, RunInput, ToolName, ToolRequest, ToolResult, ToolSpec};
use tether_core::{
    AgentRegistration, FnToolExecutor, Runtime, ScriptedPlanner, StreamSubscriber,
    ToolsetRegistration,
};
use tether_core::hooks::stream::ChannelSink;
use tether_durable::InProcessEngine;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Tether - durable agent workflow runtime")]
#[command(version)]
struct Cli {
    /// Workflow queue name
    #[arg(long, env = "TETHER_QUEUE", default_value = "tether-runs")]
    queue: String,

    /// Engine URL (unused by the in-process engine)
    #[arg(long, env = "TETHER_ENGINE_URL", default_value = "inprocess")]
    engine_url: String,

    /// Telemetry sink ("stderr" or "none")
    #[arg(long, env = "TETHER_TELEMETRY", default_value = "stderr")]
    telemetry: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Host a worker serving registered agents until interrupted
    Serve,

    /// Execute one demo run and print its stream events
    Run {
        /// Agent id to run under
        #[arg(long, default_value = "demo.agent")]
        agent: String,

        /// User message starting the run
        message: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.telemetry != "none" {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    info!(queue = %cli.queue, engine = %cli.engine_url, "tether starting");

    match cli.command {
        Commands::Serve => serve().await,
        Commands::Run { agent, message } => run_once(&agent, &message).await,
    }
}

fn demo_runtime(agent: &str, reply: &str) -> anyhow::Result<Arc<Runtime>> {
    let engine = Arc::new(InProcessEngine::new());
    let runtime = Runtime::builder(engine).build();

    let echo = ToolName::parse("demo.util.echo")?;
    runtime.registry().register_toolset(
        ToolsetRegistration::new(
            "demo.util",
            Arc::new(FnToolExecutor::new(Arc::new(|meta, request| {
                Box::pin(async move {
                    Ok(ToolResult::ok(
                        meta.tool_call_id,
                        request.name,
                        serde_json::json!({"echo": request.payload}),
                    ))
                })
            }))),
        ),
        vec![ToolSpec::new(echo.clone(), "echoes its payload back")],
    )?;

    let planner = ScriptedPlanner::new()
        .then_tool_calls(vec![ToolRequest::new(
            echo,
            serde_json::json!({"ping": true}),
        )])
        .then_final(reply)
        .build();

    runtime.register_agent(AgentRegistration::new(AgentId::new(agent), planner))?;
    Ok(runtime)
}

async fn serve() -> anyhow::Result<()> {
    let _runtime = demo_runtime("demo.agent", "ready")?;
    info!("worker ready; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}

async fn run_once(agent: &str, message: &str) -> anyhow::Result<()> {
    let runtime = demo_runtime(agent, &format!("echoed: {message}"))?;

    let (sink, mut events) = ChannelSink::new();
    let _subscription = runtime
        .hook_bus()
        .register(Arc::new(StreamSubscriber::new(Arc::new(sink))));

    let started = runtime
        .start_run(RunInput::new(
            AgentId::new(agent),
            vec![Message::user(message)],
        ))
        .await?;

    let output = started
        .handle
        .wait()
        .await
        .map_err(|e| anyhow::anyhow!("run failed: {e}"))?;

    while let Ok(event) = events.try_recv() {
        println!("{}", serde_json::to_string(&event)?);
    }

    match output.final_message {
        Some(message) => {
            println!("{}", message.content);
            Ok(())
        }
        None => anyhow::bail!("run ended without a final message: {:?}", output.failure),
    }
}

//! Basic coordination walkthrough
//!
//! Registers a coordinator and two workers behind a heartbeat monitor,
//! delegates a small build pipeline, then lets one worker go silent and
//! watches its task move to the survivor.
//!
//! Run with `RUST_LOG=warband=debug cargo run --example basic_coordination`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use warband::{
    capabilities, HeartbeatMonitor, Orchestrator, SchedulerConfig, SchedulerEvent, TaskRequest,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = SchedulerConfig::from_json_str(
        r#"{ "heartbeat_timeout_secs": 2, "liveness_poll_interval_ms": 250 }"#,
    )?;
    let monitor = Arc::new(HeartbeatMonitor::from_config(&config));

    let (orchestrator, channel) = Orchestrator::with_channel(monitor.clone(), config);
    let service = tokio::spawn(orchestrator.run());

    let coordinator = channel.register_agent(capabilities(["plan"])).await?;
    let builder = channel.register_agent(capabilities(["build", "test"])).await?;
    let shipper = channel
        .register_agent(capabilities(["build", "test", "deploy"]))
        .await?;
    for agent in [coordinator, builder, shipper] {
        monitor.register(agent);
    }

    let compile = channel
        .delegate_task(
            TaskRequest::new("Compile the workspace")
                .with_capabilities(["build"])
                .with_priority(1)
                .with_task_type("build")
                .with_parent(coordinator),
        )
        .await?;
    let test = channel
        .delegate_task(
            TaskRequest::new("Run the test suite")
                .with_capabilities(["test"])
                .with_priority(2)
                .with_dependencies([compile])
                .with_parent(coordinator),
        )
        .await?;
    let deploy = channel
        .delegate_task(
            TaskRequest::new("Deploy to staging")
                .with_capabilities(["deploy"])
                .with_priority(3)
                .with_dependencies([test])
                .with_parent(coordinator),
        )
        .await?;

    info!(status = ?channel.task_status(compile).await?, "compile");
    info!(status = ?channel.task_status(test).await?, "test");

    channel.complete_task(compile, Some("0 warnings".into())).await?;
    let test_view = channel.task_status(test).await?;
    info!(status = ?test_view, "test after compile finished");

    // The worker holding the tests stops sending heartbeats
    let silent = test_view.assigned_agent;
    let keep_beating = {
        let monitor = monitor.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(500));
            loop {
                tick.tick().await;
                for agent in [coordinator, builder, shipper] {
                    if Some(agent) != silent {
                        monitor.heartbeat(&agent);
                    }
                }
            }
        })
    };

    tokio::time::sleep(Duration::from_secs(3)).await;
    let test_view = channel.task_status(test).await?;
    info!(status = ?test_view, "test after the silent worker timed out");

    channel.complete_task(test, Some("all green".into())).await?;
    info!(status = ?channel.task_status(deploy).await?, "deploy");
    channel.complete_task(deploy, None).await?;

    while let Some(event) = channel.try_recv() {
        match event {
            SchedulerEvent::AgentLost { agent_id, requeued } => {
                info!(agent_id = %agent_id, requeued = requeued.len(), "Agent lost")
            }
            other => info!(event = ?other, "Event"),
        }
    }

    keep_beating.abort();
    drop(channel);
    service.await??;
    Ok(())
}

//! Agent lifecycle tests against the real `outproc-host` child process.
//!
//! Each test launches its own child through the binary Cargo builds for this
//! package, then drives it only through the public agent surface.

use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::Signal;
use outproc::{
    Agent, AgentConfig, CallOptions, CancellationToken, DisposeMode, HostConfig, OutprocError,
    ProcessDescriptor, Value,
};

const SIGKILL: i32 = Signal::SIGKILL as i32;

fn host() -> ProcessDescriptor {
    ProcessDescriptor::new(env!("CARGO_BIN_EXE_outproc-host"))
}

async fn spawn_constructed(type_name: &str, args: Vec<Value>) -> Arc<Agent> {
    let agent = Arc::new(Agent::spawn(&host()).expect("Failed to spawn outproc-host"));
    agent.construct(type_name, args).await.unwrap();
    agent.await_constructed().await.unwrap();
    agent
}

#[tokio::test]
async fn test_counter_counts_and_exits_cleanly() {
    let agent = spawn_constructed("Counter", vec![]).await;

    for expected in 1..=3 {
        let reply = agent.call("increment", vec![]).await.unwrap();
        assert_eq!(reply, Value::Int(expected));
    }

    agent.dispose(DisposeMode::Polite).await.unwrap();
    let status = agent.wait_for_exit(AgentConfig::EXIT_WAIT_TIMEOUT).await.unwrap();
    assert_eq!(status.code(), Some(0));
}

#[tokio::test]
async fn test_exit_before_construct_is_clean() {
    let agent = Agent::spawn(&host()).unwrap();
    agent.dispose(DisposeMode::Polite).await.unwrap();

    let status = agent.wait_for_exit(AgentConfig::EXIT_WAIT_TIMEOUT).await.unwrap();
    assert!(status.success());
}

#[tokio::test]
async fn test_dispose_is_idempotent() {
    let agent = spawn_constructed("Counter", vec![]).await;

    agent.dispose(DisposeMode::Polite).await.unwrap();
    agent.dispose(DisposeMode::Polite).await.unwrap();
    agent.dispose(DisposeMode::Kill).await.unwrap();
    assert!(agent.is_disposed());

    // The second and third calls were no-ops: the child still exits on Exit.
    let status = agent.wait_for_exit(AgentConfig::EXIT_WAIT_TIMEOUT).await.unwrap();
    assert_eq!(status.code(), Some(0));

    let result = agent.call("increment", vec![]).await;
    assert!(matches!(result, Err(OutprocError::ChannelClosed)));
}

#[tokio::test]
async fn test_constructor_arguments_reach_the_child() {
    let agent = spawn_constructed("Counter", vec![Value::Int(41)]).await;
    assert_eq!(agent.call("increment", vec![]).await.unwrap(), Value::Int(42));
    assert_eq!(
        agent.call("add", vec![Value::Int(-2)]).await.unwrap(),
        Value::Int(40)
    );
    agent.dispose(DisposeMode::Polite).await.unwrap();
}

#[tokio::test]
async fn test_unknown_type_is_construction_fault() {
    let agent = Agent::spawn(&host()).unwrap();
    agent.construct("Teleporter", vec![]).await.unwrap();

    match agent.await_constructed().await {
        Err(OutprocError::ConstructionFault { description }) => {
            assert_eq!(description, "unknown type Teleporter")
        }
        other => panic!("Expected ConstructionFault, got: {:?}", other),
    }

    // Calls keep reporting the construction failure instead of a call fault.
    let result = agent.call("increment", vec![]).await;
    assert!(matches!(result, Err(OutprocError::ConstructionFault { .. })));

    agent.dispose(DisposeMode::Polite).await.unwrap();
    let status = agent.wait_for_exit(AgentConfig::EXIT_WAIT_TIMEOUT).await.unwrap();
    assert_eq!(status.code(), Some(0));
}

#[tokio::test]
async fn test_construction_fault_surfaces_on_first_call() {
    let agent = Agent::spawn(&host()).unwrap();
    agent
        .construct("Counter", vec![Value::from("ten")])
        .await
        .unwrap();

    match agent.call("increment", vec![]).await {
        Err(OutprocError::ConstructionFault { description }) => {
            assert!(description.contains("bad arguments"), "{}", description)
        }
        other => panic!("Expected ConstructionFault, got: {:?}", other),
    }
    agent.dispose(DisposeMode::Kill).await.unwrap();
}

#[tokio::test]
async fn test_construct_after_failed_construct_succeeds() {
    let agent = Agent::spawn(&host()).unwrap();
    agent.construct("Teleporter", vec![]).await.unwrap();
    assert!(agent.await_constructed().await.is_err());

    agent.construct("Counter", vec![]).await.unwrap();
    agent.await_constructed().await.unwrap();
    assert_eq!(agent.call("increment", vec![]).await.unwrap(), Value::Int(1));
    agent.dispose(DisposeMode::Polite).await.unwrap();
}

#[tokio::test]
async fn test_second_construct_is_rejected_locally() {
    let agent = spawn_constructed("Counter", vec![]).await;

    let result = agent.construct("Counter", vec![]).await;
    assert!(matches!(result, Err(OutprocError::AlreadyInitialized)));

    // The child never saw the second Init and is still serving.
    assert_eq!(agent.call("increment", vec![]).await.unwrap(), Value::Int(1));
    agent.dispose(DisposeMode::Polite).await.unwrap();
}

#[tokio::test]
async fn test_call_before_construct_is_invocation_fault() {
    let agent = Agent::spawn(&host()).unwrap();

    match agent.call("increment", vec![]).await {
        Err(OutprocError::InvocationFault { description }) => {
            assert!(description.contains("no hosted instance"), "{}", description)
        }
        other => panic!("Expected InvocationFault, got: {:?}", other),
    }

    // The child survives and can still be constructed.
    agent.construct("Counter", vec![]).await.unwrap();
    assert_eq!(agent.call("get", vec![]).await.unwrap(), Value::Int(0));
    agent.dispose(DisposeMode::Polite).await.unwrap();
}

#[tokio::test]
async fn test_method_failures_are_faults_and_not_fatal() {
    let agent = spawn_constructed("Sleeper", vec![]).await;

    match agent.call("teleport", vec![]).await {
        Err(OutprocError::InvocationFault { description }) => {
            assert_eq!(description, "Sleeper has no method teleport")
        }
        other => panic!("Expected InvocationFault, got: {:?}", other),
    }

    match agent
        .call("crash", vec![Value::from("boom")])
        .await
    {
        Err(OutprocError::InvocationFault { description }) => {
            assert!(description.contains("panicked: boom"), "{}", description)
        }
        other => panic!("Expected InvocationFault, got: {:?}", other),
    }

    assert_eq!(
        agent.call("nap", vec![Value::UInt(1)]).await.unwrap(),
        Value::UInt(1)
    );
    assert_eq!(agent.call("naps", vec![]).await.unwrap(), Value::UInt(1));
    agent.dispose(DisposeMode::Polite).await.unwrap();
}

#[tokio::test]
async fn test_child_exit_mid_call_is_channel_closed() {
    let agent = spawn_constructed("Sleeper", vec![]).await;

    let result = agent.call("exit", vec![Value::Int(7)]).await;
    assert!(matches!(result, Err(OutprocError::ChannelClosed)));

    let status = agent.wait_for_exit(AgentConfig::EXIT_WAIT_TIMEOUT).await.unwrap();
    assert_eq!(status.code(), Some(7));

    let result = agent.call("naps", vec![]).await;
    assert!(matches!(result, Err(OutprocError::ChannelClosed)));
    agent.dispose(DisposeMode::Kill).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_kill_releases_blocked_call() {
    let agent = spawn_constructed("Sleeper", vec![]).await;

    let caller = {
        let agent = Arc::clone(&agent);
        tokio::spawn(async move { agent.call("hang", vec![]).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    agent.dispose(DisposeMode::Kill).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), caller)
        .await
        .expect("blocked call was not released by kill")
        .unwrap();
    assert!(matches!(result, Err(OutprocError::ChannelClosed)));
    assert!(started.elapsed() < Duration::from_secs(5));

    let status = agent.wait_for_exit(AgentConfig::KILL_WAIT_TIMEOUT).await.unwrap();
    assert_eq!(status.signal(), Some(SIGKILL));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_kill_is_not_held_up_by_a_waiter() {
    let agent = spawn_constructed("Sleeper", vec![]).await;

    let waiter = {
        let agent = Arc::clone(&agent);
        tokio::spawn(async move { agent.wait_for_exit(Duration::from_secs(10)).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    agent.dispose(DisposeMode::Kill).await.unwrap();
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "kill took {:?}",
        started.elapsed()
    );

    let status = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("waiter did not observe the kill")
        .unwrap()
        .unwrap();
    assert_eq!(status.signal(), Some(SIGKILL));
}

#[tokio::test]
async fn test_bad_launch_arguments_are_bootstrap_failures() {
    let host = env!("CARGO_BIN_EXE_outproc-host");
    let launches: [&[&str]; 3] = [&[], &["not-a-descriptor", "4"], &["3", "4", "5"]];

    for args in launches {
        let status = tokio::process::Command::new(host)
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .unwrap();
        assert_eq!(
            status.code(),
            Some(i32::from(HostConfig::BOOTSTRAP_FAILURE_EXIT_CODE)),
            "args {:?}",
            args
        );
    }
}

#[tokio::test]
async fn test_timeout_breaks_the_agent() {
    let agent = spawn_constructed("Sleeper", vec![]).await;

    let options = CallOptions::new().with_timeout(Duration::from_millis(100));
    let result = agent
        .call_with("nap", vec![Value::UInt(2_000)], options)
        .await;
    assert!(matches!(result, Err(OutprocError::Timeout(_))));

    // The late reply would desynchronize the channel; the agent refuses further calls.
    let result = agent.call("naps", vec![]).await;
    assert!(matches!(result, Err(OutprocError::ChannelClosed)));

    agent.dispose(DisposeMode::Kill).await.unwrap();
    agent.wait_for_exit(AgentConfig::KILL_WAIT_TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_call_within_timeout_succeeds() {
    let agent = spawn_constructed("Sleeper", vec![]).await;

    let options = CallOptions::new().with_timeout(Duration::from_secs(10));
    let reply = agent
        .call_with("nap", vec![Value::UInt(10)], options)
        .await
        .unwrap();
    assert_eq!(reply, Value::UInt(10));
    agent.dispose(DisposeMode::Polite).await.unwrap();
}

#[tokio::test]
async fn test_cancel_breaks_the_agent() {
    let agent = spawn_constructed("Sleeper", vec![]).await;
    let token = CancellationToken::new();

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        })
    };

    let options = CallOptions::new().with_cancel(token);
    let result = agent.call_with("hang", vec![], options).await;
    assert!(matches!(result, Err(OutprocError::Cancelled)));
    canceller.await.unwrap();

    let result = agent.call("naps", vec![]).await;
    assert!(matches!(result, Err(OutprocError::ChannelClosed)));
    agent.dispose(DisposeMode::Kill).await.unwrap();
}

#[tokio::test]
async fn test_already_cancelled_call_is_not_sent() {
    let agent = spawn_constructed("Counter", vec![]).await;
    let token = CancellationToken::new();
    token.cancel();

    let result = agent
        .call_with("increment", vec![], CallOptions::new().with_cancel(token))
        .await;
    assert!(matches!(result, Err(OutprocError::Cancelled)));

    // Nothing went on the wire, so the agent is still usable.
    assert_eq!(agent.call("increment", vec![]).await.unwrap(), Value::Int(1));
    agent.dispose(DisposeMode::Polite).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_are_serialized() {
    let agent = spawn_constructed("Counter", vec![]).await;

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let agent = Arc::clone(&agent);
            tokio::spawn(async move { agent.call("increment", vec![]).await })
        })
        .collect();

    let mut replies = Vec::new();
    for task in tasks {
        let value: i64 = task.await.unwrap().unwrap().try_into().unwrap();
        replies.push(value);
    }
    replies.sort_unstable();
    assert_eq!(replies, (1..=16).collect::<Vec<i64>>());

    agent.dispose(DisposeMode::Polite).await.unwrap();
}

// crates/flowmat-runtime/tests/workflow_test.rs

use async_trait::async_trait;
use flowmat_core::{
    FlowError, Inlet, Outlet, Outputs, PortError, PortSet, Process, RunContext, Transfer,
    WaitPolicy, WorkflowError,
};
use flowmat_nodes::{Combine, Constant, Delay, Transform};
use flowmat_runtime::{RunConfig, Workflow};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Initialize tracing for tests
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

fn fast_config() -> RunConfig {
    RunConfig {
        rendezvous_timeout_ms: 200,
        completion_timeout_ms: 1_000,
    }
}

fn wait_ms(ms: u64) -> WaitPolicy {
    WaitPolicy::new(Duration::from_millis(ms), CancellationToken::new())
}

/// The "sum" graph: start -> Double -> Inc -> result
fn sum_workflow(config: RunConfig) -> Workflow<i64> {
    let mut wf = Workflow::with_config("sum", config).unwrap();
    wf.add(Transform::new("Double", |v: i64| v * 2)).unwrap();
    wf.add(Transform::new("Inc", |v: i64| v + 1)).unwrap();
    wf.connect("Double", "out", "Inc", "in").unwrap();
    wf.map_in("start", "Double", "in").unwrap();
    wf.map_out("result", "Inc", "out").unwrap();
    wf
}

/// A process that always fails without touching its ports, either with an
/// error or by panicking.
struct Failing {
    name: String,
    panics: bool,
}

#[async_trait]
impl Process<i64> for Failing {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_in(&self, _port: &str) -> Result<(), PortError> {
        Ok(())
    }

    fn check_out(&self, _port: &str) -> Result<(), PortError> {
        Ok(())
    }

    fn set_in(&mut self, _port: &str, _inlet: Inlet<i64>) -> Result<(), PortError> {
        Ok(())
    }

    fn set_out(&mut self, _port: &str, _outlet: Outlet<i64>) -> Result<(), PortError> {
        Ok(())
    }

    async fn execute(&mut self, _ctx: &RunContext) -> Result<(), FlowError> {
        if self.panics {
            panic!("{} blew up", self.name);
        }
        Err(FlowError::Execution("boom".to_string()))
    }
}

/// A source that stalls past any rendezvous on its first run and emits 0
/// right away on every later one.
struct SlowOnce {
    name: String,
    outputs: Outputs<i64>,
    runs: u32,
}

impl SlowOnce {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            outputs: PortSet::new(name, ["out"]),
            runs: 0,
        }
    }
}

#[async_trait]
impl Process<i64> for SlowOnce {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_in(&self, port: &str) -> Result<(), PortError> {
        Err(PortError::UnknownPort(format!("{}.{}", self.name, port)))
    }

    fn check_out(&self, port: &str) -> Result<(), PortError> {
        self.outputs.check(port)
    }

    fn set_in(&mut self, port: &str, _inlet: Inlet<i64>) -> Result<(), PortError> {
        self.check_in(port)
    }

    fn set_out(&mut self, port: &str, outlet: Outlet<i64>) -> Result<(), PortError> {
        self.outputs.bind(port, outlet)
    }

    async fn execute(&mut self, ctx: &RunContext) -> Result<(), FlowError> {
        self.runs += 1;
        if self.runs == 1 {
            ctx.wait.cancellation().cancelled().await;
            return Err(PortError::Cancelled {
                port: format!("{}.out", self.name),
                transfer: Transfer::Send,
            }
            .into());
        }
        self.outputs.get_mut("out")?.emit(0, &ctx.wait).await?;
        Ok(())
    }
}

fn run_failure(err: FlowError) -> Box<flowmat_core::RunFailure> {
    match err {
        FlowError::Run(failure) => failure,
        other => panic!("expected a run failure, got: {}", other),
    }
}

#[tokio::test]
async fn test_double_then_increment() {
    init_tracing();
    let mut wf = sum_workflow(fast_config());

    wf.input("start", 5).unwrap();
    let report = wf.run().await.unwrap();

    assert_eq!(wf.output("result").unwrap(), Some(&11));
    assert_eq!(report.workflow, "sum");
    assert_eq!(report.delivered, vec!["start".to_string()]);
    assert_eq!(report.collected, vec!["result".to_string()]);
    assert_eq!(report.completed, vec!["Double".to_string(), "Inc".to_string()]);
    assert_eq!(report.relays_fired, 1);
    assert_eq!(wf.input_names().collect::<Vec<_>>(), vec!["start"]);
    assert_eq!(wf.output_names().collect::<Vec<_>>(), vec!["result"]);
}

#[tokio::test]
async fn test_identity_round_trip() {
    let mut wf = Workflow::with_config("echo", fast_config()).unwrap();
    wf.add(Transform::identity("procA")).unwrap();
    wf.map_in("start", "procA", "in").unwrap();
    wf.map_out("result", "procA", "out").unwrap();

    wf.input("start", "payload".to_string()).unwrap();
    wf.run().await.unwrap();

    assert_eq!(wf.output("result").unwrap().map(String::as_str), Some("payload"));
}

#[tokio::test]
async fn test_relayed_value_arrives_once_unmodified() {
    let mut wf = Workflow::with_config("relay", fast_config()).unwrap();
    wf.add(Constant::new("A", 99_i64)).unwrap();
    wf.add(Transform::identity("B")).unwrap();
    wf.connect("A", "out", "B", "in").unwrap();
    wf.map_out("seen", "B", "out").unwrap();

    let report = wf.run().await.unwrap();
    assert_eq!(wf.output("seen").unwrap(), Some(&99));
    assert_eq!(report.relays_fired, 1);
    let connection = &wf.connections()[0];
    assert_eq!(connection.sender().to_string(), "A.out");
    assert_eq!(connection.receiver().to_string(), "B.in");
    assert!(connection.is_spent());
}

#[tokio::test]
async fn test_exposed_ports_bypass_cache() {
    let mut wf = sum_workflow(fast_config());
    let start = wf.expose_in("start").unwrap();
    let result = wf.expose_out("result").unwrap();
    assert!(wf.is_input_exposed("start"));
    assert!(!wf.is_output_exposed("start"));
    assert!(wf.is_output_exposed("result"));
    assert!(!wf.is_input_exposed("result"));

    let feed_and_read = async {
        start.send(20, &wait_ms(500)).await?;
        result.recv(&wait_ms(500)).await
    };
    let (report, read) = tokio::join!(wf.run(), feed_and_read);
    let report = report.unwrap();

    assert!(report.delivered.is_empty());
    assert!(report.collected.is_empty());
    assert_eq!(wf.output("result").unwrap(), None);
    assert_eq!(read.unwrap(), 41);
}

#[tokio::test]
async fn test_second_run_over_spent_relay_times_out() {
    init_tracing();
    let mut wf = sum_workflow(fast_config());
    wf.input("start", 1).unwrap();
    wf.run().await.unwrap();
    assert_eq!(wf.output("result").unwrap(), Some(&3));

    wf.input("start", 2).unwrap();
    let err = wf.run().await.unwrap_err();
    assert!(err.is_deadlock_timeout(), "unexpected error: {}", err);

    let failure = run_failure(err);
    assert_eq!(failure.report.delivered, vec!["start".to_string()]);
    assert!(failure.report.collected.is_empty());
    assert_eq!(failure.report.relays_fired, 0);
    // Stale value from the first run is still the last one collected.
    assert_eq!(wf.output("result").unwrap(), Some(&3));
}

#[tokio::test]
async fn test_duplicate_process_name_is_rejected() {
    let mut wf: Workflow<i64> = Workflow::new("dup");
    wf.add(Transform::new("p", |v: i64| v + 1)).unwrap();

    let err = wf.add(Transform::new("p", |v: i64| v * 10)).unwrap_err();
    assert!(matches!(
        err,
        FlowError::Workflow(WorkflowError::DuplicateProcessName(ref name)) if name == "p"
    ));
    assert_eq!(wf.process_names().collect::<Vec<_>>(), vec!["p"]);
}

#[tokio::test]
async fn test_empty_process_name_is_rejected() {
    let mut wf: Workflow<i64> = Workflow::new("names");
    let err = wf.add(Transform::identity("")).unwrap_err();
    assert!(matches!(
        err,
        FlowError::Workflow(WorkflowError::InvalidProcessName)
    ));
}

#[tokio::test]
async fn test_construction_errors_are_immediate() {
    let mut wf: Workflow<i64> = Workflow::new("g");
    wf.add(Transform::identity("a")).unwrap();
    wf.add(Transform::identity("b")).unwrap();

    assert!(matches!(
        wf.connect("a", "out", "ghost", "in").unwrap_err(),
        FlowError::Workflow(WorkflowError::UnknownProcess(ref n)) if n == "ghost"
    ));
    assert!(matches!(
        wf.map_in("x", "ghost", "in").unwrap_err(),
        FlowError::Workflow(WorkflowError::UnknownProcess(_))
    ));
    assert!(matches!(
        wf.connect("a", "nope", "b", "in").unwrap_err(),
        FlowError::Port(PortError::UnknownPort(ref p)) if p == "a.nope"
    ));
    assert!(matches!(
        wf.expose_in("missing").unwrap_err(),
        FlowError::Port(PortError::UnknownPort(ref p)) if p == "g.missing"
    ));
    assert!(matches!(
        wf.input("missing", 1).unwrap_err(),
        FlowError::Port(PortError::UnknownPort(_))
    ));
    assert!(matches!(
        wf.output("missing").unwrap_err(),
        FlowError::Port(PortError::UnknownPort(_))
    ));
}

#[tokio::test]
async fn test_rebinding_a_port_is_rejected() {
    let mut wf: Workflow<i64> = Workflow::new("g");
    wf.add(Transform::identity("a")).unwrap();
    wf.add(Transform::identity("b")).unwrap();
    wf.add(Transform::identity("c")).unwrap();
    wf.connect("a", "out", "b", "in").unwrap();

    assert!(matches!(
        wf.connect("c", "out", "b", "in").unwrap_err(),
        FlowError::Port(PortError::AlreadyBound(ref p)) if p == "b.in"
    ));
    // The failed connect left c.out free.
    wf.map_out("c_out", "c", "out").unwrap();

    wf.map_in("start", "a", "in").unwrap();
    assert!(matches!(
        wf.map_in("start", "c", "in").unwrap_err(),
        FlowError::Port(PortError::AlreadyBound(ref p)) if p == "g.start"
    ));
}

#[tokio::test]
async fn test_missing_input_fails_before_starting() {
    let mut wf = sum_workflow(fast_config());
    let err = wf.run().await.unwrap_err();
    assert!(matches!(
        err,
        FlowError::Workflow(WorkflowError::MissingInput(ref p)) if p == "sum.start"
    ));

    // Nothing was started, so the graph is still runnable.
    wf.input("start", 5).unwrap();
    wf.run().await.unwrap();
    assert_eq!(wf.output("result").unwrap(), Some(&11));
}

#[tokio::test]
async fn test_ports_are_delivered_and_collected_in_name_order() {
    let mut wf = Workflow::with_config("order", fast_config()).unwrap();
    wf.add(Combine::new("sub", |l: i64, r: i64| l - r)).unwrap();
    wf.add(Transform::identity("copy")).unwrap();
    wf.map_in("zeta", "sub", "left").unwrap();
    wf.map_in("alpha", "sub", "right").unwrap();
    wf.map_in("mid", "copy", "in").unwrap();
    wf.map_out("z_out", "sub", "out").unwrap();
    wf.map_out("a_out", "copy", "out").unwrap();

    wf.input("zeta", 10).unwrap();
    wf.input("alpha", 4).unwrap();
    wf.input("mid", 7).unwrap();
    let report = wf.run().await.unwrap();

    assert_eq!(report.delivered, vec!["alpha", "mid", "zeta"]);
    assert_eq!(report.collected, vec!["a_out", "z_out"]);
    assert_eq!(wf.output("z_out").unwrap(), Some(&6));
    assert_eq!(wf.output("a_out").unwrap(), Some(&7));
}

#[tokio::test]
async fn test_process_failure_is_captured_in_run_result() {
    let mut wf = Workflow::with_config("fails", fast_config()).unwrap();
    wf.add(Failing {
        name: "bad".to_string(),
        panics: false,
    })
    .unwrap();
    wf.add(Transform::identity("good")).unwrap();
    wf.map_in("start", "good", "in").unwrap();
    wf.map_out("result", "good", "out").unwrap();
    wf.map_out("never", "bad", "out").unwrap();
    wf.input("start", 1).unwrap();

    let failure = run_failure(wf.run().await.unwrap_err());
    assert!(matches!(
        &failure.errors[0],
        FlowError::Process { name, .. } if name == "bad"
    ));
    // Everything else was cut short by the cancellation the failure triggered.
    assert!(failure.errors[1..].iter().all(FlowError::is_cancelled));

    // Failed processes are handed back, so the graph keeps its shape.
    assert!(wf.process("bad").is_some());
}

#[tokio::test]
async fn test_nested_workflow_runs_as_a_process() {
    init_tracing();
    let mut inner = Workflow::with_config("inner", fast_config()).unwrap();
    inner.add(Transform::new("Double", |v: i64| v * 2)).unwrap();
    inner.map_in("in", "Double", "in").unwrap();
    inner.map_out("out", "Double", "out").unwrap();

    let mut outer = Workflow::with_config("outer", fast_config()).unwrap();
    outer.add(inner).unwrap();
    outer.add(Transform::new("Inc", |v: i64| v + 1)).unwrap();
    outer.connect("inner", "out", "Inc", "in").unwrap();
    outer.map_in("start", "inner", "in").unwrap();
    outer.map_out("result", "Inc", "out").unwrap();

    outer.input("start", 5).unwrap();
    outer.run().await.unwrap();
    assert_eq!(outer.output("result").unwrap(), Some(&11));
}

#[tokio::test]
async fn test_cancel_handle_aborts_stuck_run() {
    let config = RunConfig {
        rendezvous_timeout_ms: 30_000,
        completion_timeout_ms: 60_000,
    };
    let mut wf = Workflow::with_config("stuck", config).unwrap();
    wf.add(Delay::new("slow", Duration::from_secs(60))).unwrap();
    wf.map_in("start", "slow", "in").unwrap();
    wf.map_out("result", "slow", "out").unwrap();
    wf.input("start", 1_i64).unwrap();

    let cancel = wf.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let started = std::time::Instant::now();
    let failure = run_failure(wf.run().await.unwrap_err());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(failure.errors.iter().all(FlowError::is_cancelled));
}

#[tokio::test]
async fn test_slow_process_reports_deadlock_timeout() {
    let mut wf = Workflow::with_config("slow", fast_config()).unwrap();
    wf.add(Delay::new("lazy", Duration::from_secs(10))).unwrap();
    wf.map_in("start", "lazy", "in").unwrap();
    wf.map_out("result", "lazy", "out").unwrap();
    wf.input("start", 1_i64).unwrap();

    let failure = run_failure(wf.run().await.unwrap_err());
    assert!(matches!(
        &failure.errors[0],
        FlowError::Port(PortError::DeadlockTimeout { port, waited_ms: 200, .. }) if port == "slow.result"
    ));
    assert_eq!(failure.report.delivered, vec!["start".to_string()]);
}

#[test]
fn test_config_defaults_and_parsing() {
    let config: RunConfig = serde_json::from_str(r#"{ "rendezvous_timeout_ms": 250 }"#).unwrap();
    assert_eq!(config.rendezvous_timeout(), Duration::from_millis(250));
    assert_eq!(config.completion_timeout_ms, RunConfig::default().completion_timeout_ms);
    assert!(config.validate().is_ok());

    let bad = RunConfig {
        rendezvous_timeout_ms: 500,
        completion_timeout_ms: 100,
    };
    assert!(matches!(
        Workflow::<i64>::with_config("bad", bad),
        Err(FlowError::Workflow(WorkflowError::InvalidConfig(_)))
    ));
}

#[tokio::test]
async fn test_caller_bound_channels_act_like_mapped_ports() {
    let mut echo = Transform::identity("echo");
    let (start_tx, start_rx) = flowmat_core::channel::<i64>();
    let (result_tx, result_rx) = flowmat_core::channel::<i64>();
    echo.set_in("in", start_rx).unwrap();
    echo.set_out("out", result_tx).unwrap();

    let mut wf = Workflow::with_config("manual", fast_config()).unwrap();
    wf.add(echo).unwrap();
    wf.bind_in("start", start_tx.clone()).unwrap();
    wf.bind_out("result", result_rx).unwrap();
    assert!(matches!(
        wf.bind_in("start", start_tx).unwrap_err(),
        FlowError::Port(PortError::AlreadyBound(_))
    ));

    wf.input("start", 8).unwrap();
    wf.run().await.unwrap();
    assert_eq!(wf.output("result").unwrap(), Some(&8));
}

#[tokio::test]
async fn test_failed_run_leaves_no_stale_value_for_the_next() {
    init_tracing();
    let mut wf = Workflow::with_config("stale", fast_config()).unwrap();
    wf.add(SlowOnce::new("flaky")).unwrap();
    wf.add(Transform::identity("id")).unwrap();
    wf.map_out("a_out", "flaky", "out").unwrap();
    wf.map_in("start", "id", "in").unwrap();
    wf.map_out("b_out", "id", "out").unwrap();

    // a_out is collected first and never arrives, so id's value is abandoned.
    wf.input("start", 1).unwrap();
    let err = wf.run().await.unwrap_err();
    assert!(err.is_deadlock_timeout(), "unexpected error: {}", err);
    assert_eq!(wf.output("b_out").unwrap(), None);

    wf.input("start", 2).unwrap();
    wf.run().await.unwrap();
    assert_eq!(wf.output("a_out").unwrap(), Some(&0));
    assert_eq!(wf.output("b_out").unwrap(), Some(&2));
}

/// Dropping a run future part-way leaves the workflow marked as running with
/// its processes gone. Every later run is rejected with `RunInProgress`; the
/// workflow has to be rebuilt.
#[tokio::test]
async fn test_dropped_run_blocks_later_runs() {
    let mut wf = Workflow::with_config("w", fast_config()).unwrap();
    wf.add(Delay::new("slow", Duration::from_secs(60))).unwrap();
    wf.map_in("start", "slow", "in").unwrap();
    wf.map_out("result", "slow", "out").unwrap();
    wf.input("start", 1_i64).unwrap();

    let cut_short = tokio::time::timeout(Duration::from_millis(10), wf.run()).await;
    assert!(cut_short.is_err());

    assert!(matches!(
        wf.run().await.unwrap_err(),
        FlowError::Workflow(WorkflowError::RunInProgress(ref name)) if name == "w"
    ));
    assert_eq!(wf.process_names().count(), 0);
}

/// A process that panics is lost with its task, so the workflow refuses any
/// further run with `Poisoned`; it has to be rebuilt.
#[tokio::test]
async fn test_lost_process_poisons_workflow() {
    let mut wf: Workflow<i64> = Workflow::with_config("p", fast_config()).unwrap();
    wf.add(Failing {
        name: "crash".to_string(),
        panics: true,
    })
    .unwrap();

    let failure = run_failure(wf.run().await.unwrap_err());
    assert!(failure.errors.iter().any(|e| matches!(
        e,
        FlowError::Workflow(WorkflowError::ProcessLost { name, .. }) if name == "crash"
    )));
    assert!(wf.process("crash").is_none());

    assert!(matches!(
        wf.run().await.unwrap_err(),
        FlowError::Workflow(WorkflowError::Poisoned(ref name)) if name == "p"
    ));
}

#[tokio::test]
async fn test_exposed_inner_port_cannot_be_linked() {
    let mut inner = Workflow::with_config("inner", fast_config()).unwrap();
    inner.add(Transform::identity("copy")).unwrap();
    inner.map_in("in", "copy", "in").unwrap();
    inner.map_out("out", "copy", "out").unwrap();
    let _raw_in = inner.expose_in("in").unwrap();
    let _raw_out = inner.expose_out("out").unwrap();

    let mut outer: Workflow<i64> = Workflow::with_config("outer", fast_config()).unwrap();
    outer.add(inner).unwrap();
    assert!(matches!(
        outer.map_in("start", "inner", "in").unwrap_err(),
        FlowError::Port(PortError::Exposed(ref p)) if p == "inner.in"
    ));
    assert!(matches!(
        outer.map_out("result", "inner", "out").unwrap_err(),
        FlowError::Port(PortError::Exposed(ref p)) if p == "inner.out"
    ));
    // Nothing was half-created on the outer side.
    assert_eq!(outer.input_names().count(), 0);
    assert_eq!(outer.output_names().count(), 0);
}

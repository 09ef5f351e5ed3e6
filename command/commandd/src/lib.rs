//! HTTP surface for one robot's command arbiter, plus the metrics and the
//! background expiry ticker the `commandd` binary runs.
#![deny(missing_docs)]

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use prometheus::Encoder;
use robot_command_core::{
    executor_channel, ArbiterConfig, ArbiterParts, ClockOffset, CommandArbiter, LeaseAuthority,
    LeaseError, LocalClock, PowerState, RobotState, SimulatedExecutor, SystemClock,
    TimeSyncRegistry,
};
use robot_command_spec::{
    BehaviorFault, BehaviorFaultId, ClearBehaviorFaultRequest, ClearBehaviorFaultResponse,
    ClearBehaviorFaultStatus, CommandFeedback, CommandId, CommonError, FaultCause,
    FeedbackStatus, Lease, RequestHeader, ResponseHeader, RobotCommandFeedbackRequest,
    RobotCommandFeedbackResponse, RobotCommandRequest, RobotCommandResponse, RobotCommandStatus,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Prometheus collectors exported on `/metrics`.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: prometheus::Registry,
    /// Submissions by response status.
    pub submits_total: prometheus::IntCounterVec,
    /// Feedback polls by reported status.
    pub feedback_polls_total: prometheus::IntCounterVec,
    /// Fault clear attempts by outcome.
    pub fault_clears_total: prometheus::IntCounterVec,
    /// Commands timed out by the background ticker.
    pub ticker_expirations_total: prometheus::IntCounter,
    /// Uncleared behavior faults.
    pub outstanding_faults: prometheus::IntGauge,
}

impl DaemonMetrics {
    /// Create and register every collector.
    pub fn new() -> anyhow::Result<Self> {
        let registry = prometheus::Registry::new();
        let submits_total = prometheus::IntCounterVec::new(
            prometheus::Opts::new("commandd_submits_total", "Robot command submissions"),
            &["status"],
        )?;
        let feedback_polls_total = prometheus::IntCounterVec::new(
            prometheus::Opts::new("commandd_feedback_polls_total", "Feedback polls served"),
            &["status"],
        )?;
        let fault_clears_total = prometheus::IntCounterVec::new(
            prometheus::Opts::new("commandd_fault_clears_total", "Behavior fault clear attempts"),
            &["status"],
        )?;
        let ticker_expirations_total = prometheus::IntCounter::new(
            "commandd_ticker_expirations_total",
            "Commands timed out by the background expiry ticker",
        )?;
        let outstanding_faults = prometheus::IntGauge::new(
            "commandd_outstanding_faults",
            "Behavior faults awaiting clearance",
        )?;

        registry.register(Box::new(submits_total.clone()))?;
        registry.register(Box::new(feedback_polls_total.clone()))?;
        registry.register(Box::new(fault_clears_total.clone()))?;
        registry.register(Box::new(ticker_expirations_total.clone()))?;
        registry.register(Box::new(outstanding_faults.clone()))?;

        Ok(Self {
            registry,
            submits_total,
            feedback_polls_total,
            fault_clears_total,
            ticker_expirations_total,
            outstanding_faults,
        })
    }

    /// Encode the registry in the prometheus text format.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        let encoder = prometheus::TextEncoder::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Shared daemon state: the arbiter and its in-process collaborators.
pub struct AppState {
    /// The robot's arbiter.
    pub arbiter: CommandArbiter,
    /// Lease authority backing lease validation.
    pub leases: Arc<LeaseAuthority>,
    /// Established client clock offsets.
    pub clocks: Arc<TimeSyncRegistry>,
    /// Simulated executor driven through the `/v1/sim` routes.
    pub executor: Arc<SimulatedExecutor>,
    /// Robot-local time.
    pub clock: Arc<dyn LocalClock>,
    /// Exported metrics.
    pub metrics: DaemonMetrics,
}

impl AppState {
    /// Build state on the system clock.
    pub fn new(config: ArbiterConfig) -> anyhow::Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build state on a caller-supplied clock.
    pub fn with_clock(config: ArbiterConfig, clock: Arc<dyn LocalClock>) -> anyhow::Result<Self> {
        config.validate()?;
        let leases = Arc::new(LeaseAuthority::new(config.lease_resource.clone()));
        let clocks = Arc::new(TimeSyncRegistry::new());
        let (sink, events) = executor_channel();
        let executor = Arc::new(SimulatedExecutor::new(sink));
        let arbiter = CommandArbiter::new(
            config,
            ArbiterParts {
                leases: leases.clone(),
                clocks: clocks.clone(),
                executor: executor.clone(),
                clock: clock.clone(),
            },
            events,
        );
        Ok(Self {
            arbiter,
            leases,
            clocks,
            executor,
            clock,
            metrics: DaemonMetrics::new()?,
        })
    }
}

/// Periodically time out the active command until the task is dropped.
pub async fn run_expiry_ticker(state: Arc<AppState>) {
    let period = state.arbiter.config().expire_tick_interval();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if let Some(id) = state.arbiter.expire_tick() {
            state.metrics.ticker_expirations_total.inc();
            info!(robot_command_id = id, "expiry ticker timed out command");
        }
    }
}

/// Routes served by the daemon.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/robot-command", post(submit_endpoint))
        .route("/v1/robot-command/feedback", post(feedback_endpoint))
        .route("/v1/behavior-fault/clear", post(clear_fault_endpoint))
        .route("/v1/behavior-faults", get(faults_endpoint))
        .route("/v1/robot-state", get(robot_state_endpoint))
        .route("/v1/lease/acquire", post(lease_acquire_endpoint))
        .route("/v1/lease/release", post(lease_release_endpoint))
        .route("/v1/time-sync", post(time_sync_endpoint))
        .route("/v1/safety/frozen", post(frozen_endpoint))
        .route("/v1/power", post(power_endpoint))
        .route("/v1/sim/feedback", post(sim_feedback_endpoint))
        .route("/v1/sim/fault", post(sim_fault_endpoint))
        .route("/v1/sim/fault/resolve", post(sim_resolve_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .route("/healthz", get(health_endpoint))
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, err: impl std::fmt::Display) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
        .into_response()
}

/// Header for a body that could not be decoded, flagged as an invalid request.
fn undecodable_header(state: &AppState, rejection: &JsonRejection) -> ResponseHeader {
    let mut header = ResponseHeader::for_request(&RequestHeader::default(), state.clock.now());
    header.error = CommonError::invalid_request(rejection.body_text());
    warn!(error = %rejection.body_text(), "request body rejected");
    header
}

async fn submit_endpoint(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RobotCommandRequest>, JsonRejection>,
) -> Json<RobotCommandResponse> {
    let response = match payload {
        Ok(Json(request)) => state.arbiter.submit(request),
        Err(rejection) => RobotCommandResponse {
            header: undecodable_header(&state, &rejection),
            status: RobotCommandStatus::InvalidRequest,
            message: rejection.body_text(),
            ..RobotCommandResponse::default()
        },
    };
    state
        .metrics
        .submits_total
        .with_label_values(&[response.status.as_str()])
        .inc();
    Json(response)
}

async fn feedback_endpoint(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RobotCommandFeedbackRequest>, JsonRejection>,
) -> Json<RobotCommandFeedbackResponse> {
    let response = match payload {
        Ok(Json(request)) => state.arbiter.feedback(request),
        Err(rejection) => RobotCommandFeedbackResponse {
            header: undecodable_header(&state, &rejection),
            status: FeedbackStatus::Unknown,
            message: rejection.body_text(),
            ..RobotCommandFeedbackResponse::default()
        },
    };
    state
        .metrics
        .feedback_polls_total
        .with_label_values(&[response.status.as_str()])
        .inc();
    Json(response)
}

async fn clear_fault_endpoint(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ClearBehaviorFaultRequest>, JsonRejection>,
) -> Json<ClearBehaviorFaultResponse> {
    let response = match payload {
        Ok(Json(request)) => state.arbiter.clear_fault(request),
        Err(rejection) => ClearBehaviorFaultResponse {
            header: undecodable_header(&state, &rejection),
            status: ClearBehaviorFaultStatus::Unknown,
            ..ClearBehaviorFaultResponse::default()
        },
    };
    state
        .metrics
        .fault_clears_total
        .with_label_values(&[response.status.as_str()])
        .inc();
    Json(response)
}

async fn faults_endpoint(State(state): State<Arc<AppState>>) -> Json<Vec<BehaviorFault>> {
    Json(state.arbiter.outstanding_faults())
}

async fn robot_state_endpoint(State(state): State<Arc<AppState>>) -> Json<RobotState> {
    Json(state.arbiter.robot_state())
}

/// Lease acquisition request.
#[derive(Debug, Deserialize)]
pub struct LeaseAcquireRequest {
    /// Requesting client.
    pub client_name: String,
    /// Take the lease even if another client holds it.
    #[serde(default)]
    pub force: bool,
}

async fn lease_acquire_endpoint(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LeaseAcquireRequest>,
) -> axum::response::Response {
    if request.force {
        return Json(state.leases.take(&request.client_name)).into_response();
    }
    match state.leases.acquire(&request.client_name) {
        Ok(lease) => Json(lease).into_response(),
        Err(err @ LeaseError::AlreadyClaimed { .. }) => error_response(StatusCode::CONFLICT, err),
        Err(err) => error_response(StatusCode::BAD_REQUEST, err),
    }
}

async fn lease_release_endpoint(
    State(state): State<Arc<AppState>>,
    Json(lease): Json<Lease>,
) -> axum::response::Response {
    match state.leases.release(&lease) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(StatusCode::CONFLICT, err),
    }
}

/// Clock synchronization record for a client clock.
#[derive(Debug, Deserialize)]
pub struct TimeSyncRequest {
    /// Client clock identifier.
    pub clock_identifier: String,
    /// Robot-minus-client skew in milliseconds.
    pub skew_ms: i64,
}

async fn time_sync_endpoint(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TimeSyncRequest>,
) -> StatusCode {
    state.clocks.establish(
        request.clock_identifier,
        ClockOffset {
            skew_ms: request.skew_ms,
        },
    );
    StatusCode::NO_CONTENT
}

/// Frozen safety state transition.
#[derive(Debug, Deserialize)]
pub struct FrozenRequest {
    /// Whether the robot is frozen.
    pub frozen: bool,
}

/// Outcome of a frozen transition.
#[derive(Debug, Serialize, Deserialize)]
pub struct FrozenResponse {
    /// Command halted by entering the frozen state, if any.
    pub halted: Option<CommandId>,
}

async fn frozen_endpoint(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FrozenRequest>,
) -> Json<FrozenResponse> {
    Json(FrozenResponse {
        halted: state.arbiter.set_frozen(request.frozen),
    })
}

/// Motor power report.
#[derive(Debug, Deserialize)]
pub struct PowerRequest {
    /// Reported motor power.
    pub power: PowerState,
}

async fn power_endpoint(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PowerRequest>,
) -> Json<RobotState> {
    state.arbiter.set_power_state(request.power);
    Json(state.arbiter.robot_state())
}

/// Executor-side sub-status update.
#[derive(Debug, Deserialize)]
pub struct SimFeedbackRequest {
    /// Command the update refers to.
    pub robot_command_id: CommandId,
    /// New sub-status.
    pub feedback: CommandFeedback,
}

async fn sim_feedback_endpoint(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SimFeedbackRequest>,
) -> StatusCode {
    state
        .executor
        .report_feedback(request.robot_command_id, request.feedback);
    StatusCode::ACCEPTED
}

/// Executor-side fault report.
#[derive(Debug, Deserialize)]
pub struct SimFaultRequest {
    /// Fault identifier.
    pub id: BehaviorFaultId,
    /// Condition that halted behavior.
    #[serde(default)]
    pub cause: FaultCause,
}

async fn sim_fault_endpoint(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SimFaultRequest>,
) -> Json<BehaviorFault> {
    let fault = state
        .executor
        .raise_fault(request.id, request.cause, state.clock.now());
    warn!(fault_id = fault.id, "simulated behavior fault raised");
    Json(fault)
}

/// Marks a fault's condition resolved.
#[derive(Debug, Deserialize)]
pub struct SimResolveRequest {
    /// Fault identifier.
    pub id: BehaviorFaultId,
}

async fn sim_resolve_endpoint(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SimResolveRequest>,
) -> StatusCode {
    state.executor.resolve_fault(request.id);
    StatusCode::ACCEPTED
}

async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let outstanding = state.arbiter.outstanding_faults().len();
    state.metrics.outstanding_faults.set(outstanding as i64);
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

#[derive(Serialize)]
struct HealthReport {
    status: &'static str,
    #[serde(flatten)]
    robot: RobotState,
}

async fn health_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthReport {
        status: "ok",
        robot: state.arbiter.robot_state(),
    })
}

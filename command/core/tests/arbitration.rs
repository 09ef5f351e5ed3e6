use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, OnceLock, Weak};
use std::thread;
use std::time::Duration;

use proptest::prelude::*;
use robot_command_core::*;
use robot_command_spec::*;

struct Robot {
    arbiter: CommandArbiter,
    clock: Arc<ManualClock>,
    leases: Arc<LeaseAuthority>,
    executor: Arc<SimulatedExecutor>,
    lease: Lease,
}

fn robot() -> Robot {
    robot_with(ArbiterConfig::default())
}

fn robot_with(config: ArbiterConfig) -> Robot {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let clocks = Arc::new(TimeSyncRegistry::new());
    clocks.establish("operator", ClockOffset::default());
    let leases = Arc::new(LeaseAuthority::new("body"));
    let lease = leases.acquire("operator").expect("fresh authority");
    let (sink, events) = executor_channel();
    let executor = Arc::new(SimulatedExecutor::new(sink));
    let arbiter = CommandArbiter::new(
        config,
        ArbiterParts {
            leases: leases.clone(),
            clocks,
            executor: executor.clone(),
            clock: clock.clone(),
        },
        events,
    );
    arbiter.set_power_state(PowerState::On);
    Robot {
        arbiter,
        clock,
        leases,
        executor,
        lease,
    }
}

fn request(lease: &Lease, command: RobotCommand) -> RobotCommandRequest {
    RobotCommandRequest {
        header: RequestHeader {
            client_name: lease.client_names.last().cloned().unwrap_or_default(),
            request_timestamp: None,
        },
        lease: lease.clone(),
        command: Some(command),
        clock_identifier: "operator".into(),
    }
}

fn submit(robot: &Robot, command: RobotCommand) -> RobotCommandResponse {
    robot.arbiter.submit(request(&robot.lease, command))
}

fn poll(robot: &Robot, id: CommandId) -> RobotCommandFeedbackResponse {
    robot.arbiter.feedback(RobotCommandFeedbackRequest {
        header: RequestHeader::default(),
        robot_command_id: id,
    })
}

fn velocity_until(end_time: Timestamp) -> RobotCommand {
    RobotCommand::mobility(MobilityVariant::Se2Velocity {
        end_time,
        frame_name: "body".into(),
        velocity: Se2Velocity {
            vx: 0.3,
            vy: 0.0,
            angular: 0.1,
        },
    })
}

fn trajectory_until(end_time: Timestamp) -> RobotCommand {
    RobotCommand::mobility(MobilityVariant::Se2Trajectory {
        end_time,
        frame_name: "odom".into(),
        points: vec![Se2TrajectoryPoint {
            pose: Se2Pose {
                x: 1.0,
                y: 0.0,
                angle: 0.0,
            },
            time_since_reference_ms: 500,
        }],
    })
}

fn stop() -> RobotCommand {
    RobotCommand::full_body(FullBodyVariant::Stop)
}

#[test]
fn override_marks_previous_command() {
    let robot = robot();
    let a = submit(&robot, velocity_until(robot.clock.now() + 2_000));
    let b = submit(&robot, RobotCommand::mobility(MobilityVariant::Sit));
    assert_eq!(a.status, RobotCommandStatus::Ok);
    assert_eq!(b.status, RobotCommandStatus::Ok);

    let polled_a = poll(&robot, a.robot_command_id);
    assert_eq!(polled_a.status, FeedbackStatus::CommandOverridden);
    assert!(polled_a.message.contains(&b.robot_command_id.to_string()));
    assert_eq!(
        poll(&robot, b.robot_command_id).status,
        FeedbackStatus::Processing
    );
    assert_eq!(robot.executor.current(), Some(b.robot_command_id));
}

#[test]
fn command_times_out_after_end_time() {
    let robot = robot();
    let deadline = robot.clock.now() + 1_500;
    let a = submit(&robot, trajectory_until(deadline));

    robot.clock.set(deadline - 1);
    assert_eq!(
        poll(&robot, a.robot_command_id).status,
        FeedbackStatus::Processing
    );

    robot.clock.set(deadline);
    let polled = poll(&robot, a.robot_command_id);
    assert_eq!(polled.status, FeedbackStatus::CommandTimedOut);
    assert_eq!(robot.executor.halted(), vec![a.robot_command_id]);

    // A later admission does not rewrite the timeout.
    submit(&robot, stop());
    assert_eq!(
        poll(&robot, a.robot_command_id).status,
        FeedbackStatus::CommandTimedOut
    );
}

#[test]
fn expiry_tick_alone_times_out_command() {
    let robot = robot();
    let a = submit(&robot, velocity_until(robot.clock.now() + 100));
    robot.clock.advance(100);
    assert_eq!(robot.arbiter.expire_tick(), Some(a.robot_command_id));
    assert_eq!(robot.arbiter.expire_tick(), None);
    assert_eq!(robot.arbiter.robot_state().active_command, None);
}

#[test]
fn unknown_identifier_is_distinct_from_retired() {
    let robot = robot();
    let a = submit(&robot, stop());
    let unknown = poll(&robot, a.robot_command_id + 41);
    assert_eq!(unknown.status, FeedbackStatus::Unknown);
    assert_eq!(unknown.header.error.code, CommonErrorCode::InvalidRequest);

    let zero = poll(&robot, 0);
    assert_eq!(zero.status, FeedbackStatus::Unknown);
}

#[test]
fn evicted_identifier_reports_overridden() {
    let robot = robot();
    let first = submit(&robot, stop()).robot_command_id;
    for _ in 0..ArbiterConfig::default().history_depth + 1 {
        submit(&robot, stop());
    }
    let polled = poll(&robot, first);
    assert_eq!(polled.status, FeedbackStatus::CommandOverridden);
    assert_eq!(polled.header.error.code, CommonErrorCode::Ok);
}

#[test]
fn lease_rejection_leaves_slot_untouched() {
    let robot = robot();
    let a = submit(&robot, RobotCommand::mobility(MobilityVariant::Stand));

    let newer = robot.leases.take("intruder");
    let stale = submit(&robot, stop());
    assert_ne!(stale.status, RobotCommandStatus::Ok);
    assert_eq!(stale.status, RobotCommandStatus::Unknown);
    assert_eq!(stale.lease_use_result.status, LeaseUseStatus::Older);
    assert_eq!(stale.lease_use_result.latest_known_lease, Some(newer));
    assert_eq!(stale.robot_command_id, 0);

    assert_eq!(
        poll(&robot, a.robot_command_id).status,
        FeedbackStatus::Processing
    );
    assert_eq!(robot.arbiter.robot_state().last_issued, a.robot_command_id);
    assert_eq!(robot.executor.begun(), vec![a.robot_command_id]);
}

#[test]
fn frozen_state_gates_motion_but_admits_stop() {
    let robot = robot();
    robot.arbiter.set_frozen(true);

    let moving = submit(&robot, velocity_until(robot.clock.now() + 1_000));
    assert_eq!(moving.status, RobotCommandStatus::Unsupported);
    assert_eq!(moving.robot_command_id, 0);

    let halted = submit(&robot, stop());
    assert_eq!(halted.status, RobotCommandStatus::Ok);
    assert_eq!(
        poll(&robot, halted.robot_command_id).status,
        FeedbackStatus::Processing
    );

    robot.arbiter.set_frozen(false);
    let resumed = submit(&robot, velocity_until(robot.clock.now() + 1_000));
    assert_eq!(resumed.status, RobotCommandStatus::Ok);
}

#[test]
fn fault_clearance_requires_resolution() {
    let robot = robot();
    let fault = robot
        .executor
        .raise_fault(7, FaultCause::Fall, robot.clock.now());
    let clear = |robot: &Robot| {
        robot.arbiter.clear_fault(ClearBehaviorFaultRequest {
            header: RequestHeader::default(),
            lease: robot.lease.clone(),
            behavior_fault_id: 7,
        })
    };

    let first = clear(&robot);
    assert_eq!(first.status, ClearBehaviorFaultStatus::NotCleared);
    assert_eq!(robot.arbiter.outstanding_faults(), vec![fault]);

    robot.executor.resolve_fault(7);
    let second = clear(&robot);
    assert_eq!(second.status, ClearBehaviorFaultStatus::Cleared);
    assert!(robot.arbiter.outstanding_faults().is_empty());
}

#[test]
fn fault_clear_with_bad_lease_is_rejected() {
    let robot = robot();
    robot.executor.raise_fault(3, FaultCause::Hardware, 0);
    robot.executor.resolve_fault(3);
    let response = robot.arbiter.clear_fault(ClearBehaviorFaultRequest {
        header: RequestHeader::default(),
        lease: Lease::default(),
        behavior_fault_id: 3,
    });
    assert_eq!(response.status, ClearBehaviorFaultStatus::Unknown);
    assert_eq!(response.lease_use_result.status, LeaseUseStatus::Invalid);
    assert_eq!(robot.arbiter.outstanding_faults().len(), 1);
}

#[test]
fn trajectory_feedback_reaches_poll() {
    let robot = robot();
    let id = submit(&robot, trajectory_until(robot.clock.now() + 5_000)).robot_command_id;
    assert_eq!(
        poll(&robot, id).feedback,
        CommandFeedback::Se2Trajectory(Se2TrajectoryStatus::GoingToGoal)
    );
    robot
        .executor
        .report_feedback(id, CommandFeedback::Se2Trajectory(Se2TrajectoryStatus::AtGoal));
    assert_eq!(
        poll(&robot, id).feedback,
        CommandFeedback::Se2Trajectory(Se2TrajectoryStatus::AtGoal)
    );
}

#[test]
fn evicted_timeout_keeps_its_status() {
    let robot = robot_with(ArbiterConfig {
        history_depth: 1,
        ..ArbiterConfig::default()
    });
    let moving = submit(&robot, velocity_until(robot.clock.now() + 200)).robot_command_id;
    robot.clock.advance(200);
    assert_eq!(poll(&robot, moving).status, FeedbackStatus::CommandTimedOut);

    submit(&robot, stop());
    submit(&robot, stop());
    let polled = poll(&robot, moving);
    assert_eq!(polled.status, FeedbackStatus::CommandTimedOut);
    assert_eq!(polled.header.error.code, CommonErrorCode::Ok);
}

#[test]
fn unset_inner_variant_is_unsupported_before_lease() {
    let robot = robot();
    let response = robot.arbiter.submit(RobotCommandRequest {
        header: RequestHeader::default(),
        lease: Lease::default(),
        command: Some(RobotCommand::Mobility(MobilityCommand {
            command: None,
            params: None,
        })),
        clock_identifier: "never-synced".into(),
    });
    assert_eq!(response.status, RobotCommandStatus::Unsupported);
    assert_eq!(response.lease_use_result.status, LeaseUseStatus::Unknown);
    assert_eq!(response.robot_command_id, 0);
    assert_eq!(robot.arbiter.robot_state().last_issued, 0);
    assert!(robot.executor.begun().is_empty());
}

#[test]
fn concurrent_submits_get_distinct_ids_and_one_processing() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 25;
    let robot = Arc::new(robot());
    let done = Arc::new(AtomicBool::new(false));

    let watcher = {
        let robot = robot.clone();
        let done = done.clone();
        thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                assert!(robot.arbiter.processing_count() <= 1);
            }
        })
    };
    let submitters: Vec<_> = (0..THREADS)
        .map(|n| {
            let robot = robot.clone();
            thread::spawn(move || {
                (0..PER_THREAD)
                    .map(|i| {
                        let command = if (n + i) % 2 == 0 {
                            stop()
                        } else {
                            RobotCommand::mobility(MobilityVariant::Sit)
                        };
                        let response = submit(&robot, command);
                        assert_eq!(response.status, RobotCommandStatus::Ok);
                        response.robot_command_id
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in submitters {
        for id in handle.join().unwrap() {
            assert!(ids.insert(id), "id {id} issued twice");
        }
    }
    done.store(true, Ordering::SeqCst);
    watcher.join().unwrap();

    let total = (THREADS * PER_THREAD) as u64;
    assert_eq!(ids.len() as u64, total);
    assert_eq!(robot.arbiter.processing_count(), 1);
    assert_eq!(robot.arbiter.robot_state().active_command, Some(total));
}

/// Validator that stalls one client right after its lease checks out.
struct StallingValidator {
    inner: Arc<LeaseAuthority>,
    stalled_client: String,
    gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
}

impl LeaseValidator for StallingValidator {
    fn validate(&self, lease: &Lease) -> LeaseUseResult {
        let result = self.inner.validate(lease);
        if lease.client_names.last() == Some(&self.stalled_client) {
            let gate = self.gate.lock().unwrap().take();
            if let Some((validated, resume)) = gate {
                validated.send(()).unwrap();
                resume.recv().unwrap();
            }
        }
        result
    }
}

#[test]
fn lease_taken_mid_admission_leaves_new_holder_active() {
    let authority = Arc::new(LeaseAuthority::new("body"));
    let old_lease = authority.acquire("x").unwrap();
    let (validated_tx, validated_rx) = mpsc::channel();
    let (resume_tx, resume_rx) = mpsc::channel();
    let clocks = Arc::new(TimeSyncRegistry::new());
    clocks.establish("operator", ClockOffset::default());
    let (sink, events) = executor_channel();
    let arbiter = Arc::new(CommandArbiter::new(
        ArbiterConfig::default(),
        ArbiterParts {
            leases: Arc::new(StallingValidator {
                inner: authority.clone(),
                stalled_client: "x".into(),
                gate: Mutex::new(Some((validated_tx, resume_rx))),
            }),
            clocks,
            executor: Arc::new(SimulatedExecutor::new(sink)),
            clock: Arc::new(ManualClock::new(0)),
        },
        events,
    ));
    arbiter.set_power_state(PowerState::On);

    let x = {
        let arbiter = arbiter.clone();
        thread::spawn(move || {
            arbiter.submit(request(&old_lease, RobotCommand::mobility(MobilityVariant::Sit)))
        })
    };
    validated_rx.recv().unwrap();
    let new_lease = authority.take("y");
    let y = {
        let arbiter = arbiter.clone();
        thread::spawn(move || arbiter.submit(request(&new_lease, stop())))
    };
    thread::sleep(Duration::from_millis(50));
    resume_tx.send(()).unwrap();

    let x = x.join().unwrap();
    let y = y.join().unwrap();
    assert_eq!(y.status, RobotCommandStatus::Ok);
    if x.status == RobotCommandStatus::Ok {
        assert!(x.robot_command_id < y.robot_command_id);
    }
    assert_eq!(arbiter.robot_state().active_command, Some(y.robot_command_id));
}

/// Executor whose first feedback query triggers an overriding submit.
struct OverridingExecutor {
    inner: SimulatedExecutor,
    arbiter: OnceLock<Weak<CommandArbiter>>,
    lease: Lease,
    fired: AtomicBool,
}

impl ExecutorBridge for OverridingExecutor {
    fn begin(&self, id: CommandId, command: &RobotCommand) {
        self.inner.begin(id, command);
    }

    fn halt(&self, id: CommandId) {
        self.inner.halt(id);
    }

    fn query_feedback(&self, id: CommandId) -> Option<CommandFeedback> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            if let Some(arbiter) = self.arbiter.get().and_then(Weak::upgrade) {
                arbiter.submit(request(&self.lease, stop()));
            }
        }
        self.inner.query_feedback(id)
    }

    fn fault_resolved(&self, fault_id: BehaviorFaultId) -> bool {
        self.inner.fault_resolved(fault_id)
    }
}

#[test]
fn poll_racing_an_override_reports_overridden() {
    let leases = Arc::new(LeaseAuthority::new("body"));
    let lease = leases.acquire("operator").unwrap();
    let clocks = Arc::new(TimeSyncRegistry::new());
    clocks.establish("operator", ClockOffset::default());
    let (sink, events) = executor_channel();
    let executor = Arc::new(OverridingExecutor {
        inner: SimulatedExecutor::new(sink),
        arbiter: OnceLock::new(),
        lease: lease.clone(),
        fired: AtomicBool::new(false),
    });
    let arbiter = Arc::new(CommandArbiter::new(
        ArbiterConfig::default(),
        ArbiterParts {
            leases,
            clocks,
            executor: executor.clone(),
            clock: Arc::new(ManualClock::new(0)),
        },
        events,
    ));
    executor.arbiter.set(Arc::downgrade(&arbiter)).unwrap();
    arbiter.set_power_state(PowerState::On);

    let stand = arbiter
        .submit(request(&lease, RobotCommand::mobility(MobilityVariant::Stand)))
        .robot_command_id;
    let polled = arbiter.feedback(RobotCommandFeedbackRequest {
        header: RequestHeader::default(),
        robot_command_id: stand,
    });
    assert_eq!(polled.status, FeedbackStatus::CommandOverridden);
    assert_eq!(arbiter.robot_state().active_command, Some(stand + 1));
}

#[derive(Debug, Clone)]
enum Step {
    Velocity(u64),
    Stop,
    Sit,
    Advance(u64),
    Freeze(bool),
    StaleLease,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (1u64..3_000).prop_map(Step::Velocity),
        Just(Step::Stop),
        Just(Step::Sit),
        (0u64..2_000).prop_map(Step::Advance),
        any::<bool>().prop_map(Step::Freeze),
        Just(Step::StaleLease),
    ]
}

proptest! {
    #[test]
    fn single_processing_and_monotone_ids(steps in prop::collection::vec(step(), 1..40)) {
        let robot = robot();
        let mut last_admitted = 0;
        for step in steps {
            let response = match step {
                Step::Velocity(ahead) => Some(submit(&robot, velocity_until(robot.clock.now() + ahead))),
                Step::Stop => Some(submit(&robot, stop())),
                Step::Sit => Some(submit(&robot, RobotCommand::mobility(MobilityVariant::Sit))),
                Step::Advance(ms) => {
                    robot.clock.advance(ms);
                    robot.arbiter.expire_tick();
                    None
                }
                Step::Freeze(frozen) => {
                    robot.arbiter.set_frozen(frozen);
                    None
                }
                Step::StaleLease => {
                    let mut stale = robot.lease.clone();
                    stale.epoch = "someone-else".into();
                    let response = robot.arbiter.submit(request(&stale, stop()));
                    prop_assert_ne!(response.status, RobotCommandStatus::Ok);
                    None
                }
            };
            if let Some(response) = response {
                if response.status == RobotCommandStatus::Ok {
                    prop_assert!(response.robot_command_id > last_admitted);
                    last_admitted = response.robot_command_id;
                } else {
                    prop_assert_eq!(response.robot_command_id, 0);
                }
            }
            prop_assert!(robot.arbiter.processing_count() <= 1);
        }
        prop_assert_eq!(robot.arbiter.robot_state().last_issued, last_admitted);
    }
}

// Command runtime: zenoh move requests in, health out
//
// Moves are executed one at a time on this task; the emergency line is
// handled independently by the controller on its own dispatch thread.

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::block_in_place;
use tokio::time::{interval, sleep};
use tracing::{info, warn};

// local imports
use crate::config::{
    DEMO_DISTANCE, DEMO_PAUSE, EDGE_POLL_INTERVAL, HEALTH_HZ, Options, TOPIC_CMD_MOVE,
    TOPIC_HEALTH, TOPIC_IRQ_TRIGGER,
};
use crate::messages::{DriverHealth, MoveRequest};
use crate::motor::{
    Clock, I2cBus, InterruptSource, LinuxI2cBus, LoggingBus, MonotonicClock, MotionCommand,
    MotionController, SoftInterruptLine, SysfsEdgeLine,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub struct Runtime<B, S, C, R>
where
    B: I2cBus,
    S: InterruptSource,
    C: Clock,
    R: Rng + Send + 'static,
{
    controller: MotionController<B, S, C, R>,
    last_error: Option<String>,
}

impl<B, S, C, R> Runtime<B, S, C, R>
where
    B: I2cBus,
    S: InterruptSource,
    C: Clock,
    R: Rng + Send + 'static,
{
    pub fn new(controller: MotionController<B, S, C, R>) -> Self {
        Self {
            controller,
            last_error: None,
        }
    }

    /// Execute a move request; failures are kept for the health report
    pub fn on_move(&mut self, req: MoveRequest) {
        info!("Received move: {:?}", &req);
        match self.controller.execute(MotionCommand::from(&req)) {
            Ok(()) => self.last_error = None,
            Err(e) => {
                warn!("Move failed: {}", e);
                self.last_error = Some(e.to_string());
            }
        }
    }

    pub fn health(&self) -> DriverHealth {
        DriverHealth::new(&self.controller.state(), self.last_error.clone())
    }
}

pub async fn run(options: Options) -> Result<(), BoxError> {
    let config = options.controller_config();

    if options.dry_run {
        info!("Dry run: bus writes are logged, interrupts come from {}", TOPIC_IRQ_TRIGGER);
        let line = Arc::new(SoftInterruptLine::new());
        let controller = MotionController::new(
            LoggingBus,
            Arc::clone(&line),
            MonotonicClock::new(),
            StdRng::from_os_rng(),
            config,
        )?;
        drive(options, controller, Some(line)).await
    } else {
        info!("Using bus {} and interrupt line {}", options.bus.display(), options.gpio.display());
        let line = Arc::new(SysfsEdgeLine::new(&options.gpio, EDGE_POLL_INTERVAL));
        let controller = MotionController::new(
            LinuxI2cBus::new(&options.bus),
            line,
            MonotonicClock::new(),
            StdRng::from_os_rng(),
            config,
        )?;
        drive(options, controller, None).await
    }
}

async fn drive<B, S, C, R>(
    options: Options,
    controller: MotionController<B, S, C, R>,
    trigger: Option<Arc<SoftInterruptLine>>,
) -> Result<(), BoxError>
where
    B: I2cBus,
    S: InterruptSource,
    C: Clock,
    R: Rng + Send + 'static,
{
    if options.demo {
        demo(&controller).await
    } else {
        serve(Runtime::new(controller), trigger).await
    }
}

/// Forward, short pause, backward
async fn demo<B, S, C, R>(controller: &MotionController<B, S, C, R>) -> Result<(), BoxError>
where
    B: I2cBus,
    S: InterruptSource,
    C: Clock,
    R: Rng + Send + 'static,
{
    info!("Demo: {} steps forward and back", DEMO_DISTANCE);
    block_in_place(|| controller.forward(DEMO_DISTANCE))?;
    sleep(DEMO_PAUSE).await;
    block_in_place(|| controller.backward(DEMO_DISTANCE))?;
    info!("Demo finished");
    Ok(())
}

async fn serve<B, S, C, R>(
    mut runtime: Runtime<B, S, C, R>,
    trigger: Option<Arc<SoftInterruptLine>>,
) -> Result<(), BoxError>
where
    B: I2cBus,
    S: InterruptSource,
    C: Clock,
    R: Rng + Send + 'static,
{
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_move = session.declare_subscriber(TOPIC_CMD_MOVE).await?;
    let sub_trigger = match &trigger {
        Some(_) => Some(session.declare_subscriber(TOPIC_IRQ_TRIGGER).await?),
        None => None,
    };
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut tick = interval(Duration::from_millis(1000 / HEALTH_HZ));

    info!("Runtime started: {}Hz health", HEALTH_HZ);
    info!("Subscribed to: {}", TOPIC_CMD_MOVE);
    info!("Publishing to: {}", TOPIC_HEALTH);

    loop {
        tick.tick().await;

        // 1. Fire the soft line for every trigger sample (dry run only)
        if let (Some(sub), Some(line)) = (&sub_trigger, &trigger) {
            while let Ok(Some(_)) = sub.try_recv() {
                if !block_in_place(|| line.fire()) {
                    info!("Trigger ignored, interrupt delivery disabled");
                }
            }
        }

        // 2. Execute pending moves in arrival order
        while let Ok(Some(sample)) = sub_move.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<MoveRequest>(&payload) {
                Ok(req) => block_in_place(|| runtime.on_move(req)),
                Err(e) => warn!("Failed to parse move request: {}", e),
            }
        }

        // 3. Publish health
        let health_json = serde_json::to_string(&runtime.health())?;
        pub_health.put(health_json).await?;
    }
}

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use kobuki_widowx_runtime::arm::{ArmController, CancelToken, DynamixelBus, IkTarget, Joint, parse_poses};
use kobuki_widowx_runtime::config::{ArmConfig, BaseConfig, RuntimeConfig};
use kobuki_widowx_runtime::{kobuki, runtime};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Kobuki base and WidowX-200 arm control", long_about = None)]
struct Cli {
    /// JSON config file; built-in defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the base serial port
    #[arg(long, global = true)]
    base_port: Option<String>,

    /// Override the arm serial port
    #[arg(long, global = true)]
    arm_port: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Kobuki base commands
    Base {
        #[command(subcommand)]
        action: BaseAction,
    },
    /// WidowX-200 arm commands
    Arm {
        #[command(subcommand)]
        action: ArmAction,
    },
    /// Watch base feedback until Ctrl-C
    Monitor {
        /// Print one JSON event per line on stdout
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum BaseAction {
    /// Drive at SPEED mm/s and TURN deg/s
    #[command(allow_negative_numbers = true)]
    Drive {
        speed: i16,
        #[arg(default_value_t = 0)]
        turn: i16,
        /// Stop after this many milliseconds
        #[arg(long, default_value_t = 1000)]
        duration_ms: u64,
    },
    Stop,
    /// Power the wheel motors
    Enable,
    Reset,
    /// Request a status frame and print the feedback that arrives
    Status {
        #[arg(long, default_value_t = 1000)]
        listen_ms: u64,
    },
    /// Simulate a B0 button press
    Button,
    /// Reset, then re-enable the motors
    Unlock,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Torque {
    On,
    Off,
}

#[derive(Subcommand, Debug)]
enum ArmAction {
    /// Move the five arm joints to 0°
    Zero {
        #[arg(long)]
        speed: Option<u32>,
    },
    /// Fold the arm into its stowed pose
    Tuck {
        #[arg(long)]
        speed: Option<u32>,
    },
    /// Move one joint to an absolute angle
    #[command(allow_negative_numbers = true)]
    Joint {
        joint: Joint,
        degrees: f64,
        #[arg(long)]
        speed: Option<u32>,
        /// Block until the joint arrives
        #[arg(long)]
        wait: bool,
    },
    /// Print one joint angle, or the whole pose as JSON
    Read { joint: Option<Joint> },
    /// Open or close the gripper (mm of finger travel)
    #[command(allow_negative_numbers = true)]
    Gripper {
        position: f64,
        #[arg(long)]
        speed: Option<u32>,
    },
    /// Move the end effector to a Cartesian target
    #[command(allow_negative_numbers = true)]
    Reach {
        x: f64,
        y: f64,
        z: f64,
        #[arg(long, default_value_t = 0.0)]
        pitch: f64,
        #[arg(long, default_value_t = 0.0)]
        roll: f64,
        /// Treat x, y, z as 0..100 percent of the workspace
        #[arg(long)]
        percent: bool,
        #[arg(long)]
        speed: Option<u32>,
    },
    /// Step through a JSON list of poses (or one pose saved from `arm read`)
    #[command(visible_alias = "replay")]
    Sequence {
        file: PathBuf,
        /// Pause between poses
        #[arg(long, default_value_t = 1000)]
        step_delay_ms: u64,
        #[arg(long)]
        speed: Option<u32>,
    },
    /// Swing one joint between two angles, ramping the speed each cycle
    #[command(allow_negative_numbers = true)]
    Cycle {
        joint: Joint,
        min: f64,
        max: f64,
        #[arg(long, default_value_t = 100)]
        start_speed: u32,
        #[arg(long, default_value_t = 1023)]
        end_speed: u32,
        #[arg(long, default_value_t = 20)]
        cycles: u32,
    },
    /// Switch servo torque on or off
    Torque { state: Torque },
}

impl ArmAction {
    /// Commands that block on the arm and stop early on Ctrl-C
    fn cancellable(&self) -> bool {
        matches!(
            self,
            ArmAction::Joint { wait: true, .. }
                | ArmAction::Tuck { .. }
                | ArmAction::Sequence { .. }
                | ArmAction::Cycle { .. }
        )
    }
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };
    if let Some(port) = cli.base_port {
        config.base.port = port;
    }
    if let Some(port) = cli.arm_port {
        config.arm.port = port;
    }

    match cli.command {
        Command::Monitor { json } => runtime::run(&config, json).await,
        Command::Base { action } => {
            tokio::task::spawn_blocking(move || base_command(&config.base, action)).await?
        }
        Command::Arm { action } => {
            // Ctrl-C stops a waiting or multi-step motion between steps
            let cancel = CancelToken::new();
            if action.cancellable() {
                let on_signal = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        on_signal.cancel();
                    }
                });
            }
            tokio::task::spawn_blocking(move || arm_command(config.arm, action, &cancel)).await?
        }
    }
}

fn base_command(config: &BaseConfig, action: BaseAction) -> Result<(), BoxError> {
    let (mut base, mut reader) = kobuki::open(config)?;

    match action {
        BaseAction::Drive {
            speed,
            turn,
            duration_ms,
        } => base.drive_for(speed, turn, Duration::from_millis(duration_ms))?,
        BaseAction::Stop => base.stop()?,
        BaseAction::Enable => base.enable_motors()?,
        BaseAction::Reset => base.reset()?,
        BaseAction::Button => base.simulate_button_press()?,
        BaseAction::Unlock => base.unlock()?,
        BaseAction::Status { listen_ms } => {
            base.request_status()?;
            let deadline = std::time::Instant::now() + Duration::from_millis(listen_ms);
            while std::time::Instant::now() < deadline {
                for feedback in reader.poll()? {
                    println!("{}", serde_json::to_string(&feedback)?);
                }
            }
        }
    }
    Ok(())
}

fn arm_command(config: ArmConfig, action: ArmAction, cancel: &CancelToken) -> Result<(), BoxError> {
    info!("Opening arm bus on {} at {} baud", config.port, config.baudrate);
    let bus = DynamixelBus::open_with_baudrate(&config.port, config.baudrate)?;
    let default_speed = config.default_speed;
    let mut arm = ArmController::new(bus, config);

    match action {
        ArmAction::Torque { state: Torque::Off } => arm.disable_torque()?,
        ArmAction::Torque { state: Torque::On } => {
            arm.enable_torque()?;
            arm.set_all_speed(default_speed)?;
        }
        ArmAction::Read { joint: Some(joint) } => {
            println!("{}: {:.2}", joint, arm.read_joint_position(joint)?);
        }
        ArmAction::Read { joint: None } => {
            println!("{}", serde_json::to_string_pretty(&arm.capture_pose()?)?);
        }
        motion => {
            arm.enable_torque()?;
            run_motion(&mut arm, motion, default_speed, cancel)?;
        }
    }
    Ok(())
}

fn run_motion(
    arm: &mut ArmController<DynamixelBus>,
    action: ArmAction,
    default_speed: u32,
    cancel: &CancelToken,
) -> Result<(), BoxError> {
    match action {
        ArmAction::Zero { speed } => arm.zero(speed.unwrap_or(default_speed))?,
        ArmAction::Tuck { speed } => arm.tuck(speed.unwrap_or(default_speed), cancel)?,
        ArmAction::Joint {
            joint,
            degrees,
            speed,
            wait,
        } => {
            let speed = speed.unwrap_or(default_speed);
            let command = if wait {
                arm.move_joint_and_wait(joint, degrees, speed, cancel)?
            } else {
                arm.move_joint(joint, degrees, speed)?
            };
            info!("{} commanded to {:.2}°", command.joint, command.target_degrees);
        }
        ArmAction::Gripper { position, speed } => {
            arm.gripper(position, speed.unwrap_or(default_speed))?;
        }
        ArmAction::Reach {
            x,
            y,
            z,
            pitch,
            roll,
            percent,
            speed,
        } => {
            let speed = speed.unwrap_or(default_speed);
            let solution = if percent {
                arm.move_arm_percent([x, y, z], pitch, roll, speed)?
            } else {
                arm.move_arm(&IkTarget::new(x, y, z, pitch, roll), speed)?
            };
            println!("{}", serde_json::to_string_pretty(&solution)?);
        }
        ArmAction::Sequence {
            file,
            step_delay_ms,
            speed,
        } => {
            let poses = parse_poses(&std::fs::read_to_string(&file)?)?;
            info!("Running {} pose(s) from {}", poses.len(), file.display());
            arm.run_sequence(
                &poses,
                Duration::from_millis(step_delay_ms),
                speed.unwrap_or(default_speed),
                cancel,
            )?;
        }
        ArmAction::Cycle {
            joint,
            min,
            max,
            start_speed,
            end_speed,
            cycles,
        } => arm.cycle_joint(joint, min, max, start_speed, end_speed, cycles, cancel)?,
        ArmAction::Torque { .. } | ArmAction::Read { .. } => {}
    }
    Ok(())
}

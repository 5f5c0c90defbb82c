//! Drives the standard arm through a short pick-and-place routine against the
//! simulated actuators.
//!
//! ```text
//! robobones [CONFIG.rsn]
//! robobones --write-default CONFIG.rsn
//! ```

use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use robobones::{ArmConfig, Outcome, RobotArm, SimulatedActuators, Vector};
use tracing_subscriber::EnvFilter;

const FRAME: Duration = Duration::from_nanos(16_666_667);
const MAX_FRAMES_PER_MOVE: usize = 60 * 120;
const ROUTINE: [(Vector, f32); 4] = [
    (Vector::new(1.5, 0.6), 1.),
    (Vector::new(1.2, 0.45), 0.2),
    (Vector::new(0.8, 1.2), 0.2),
    (Vector::new(1.8, 0.5), 1.),
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("robobones=info")),
        )
        .init();

    let mut args = std::env::args_os().skip(1);
    let config = match args.next() {
        Some(flag) if flag == "--write-default" => {
            let path = args
                .next()
                .map(PathBuf::from)
                .ok_or("--write-default requires a path")?;
            ArmConfig::standard()?.write_to(&path)?;
            tracing::info!(path = %path.display(), "wrote default configuration");
            return Ok(());
        }
        Some(path) => ArmConfig::read_from(&PathBuf::from(path))?,
        None => ArmConfig::standard()?,
    };

    let actuators = SimulatedActuators::for_chain(&config.chain);
    let mut arm = RobotArm::from_config(config, actuators)?;

    for (target, claw) in ROUTINE {
        let outcome = Rc::new(Cell::new(None));
        let accepted = arm.move_arm(target, {
            let outcome = outcome.clone();
            move |result: Outcome, _: &robobones::KinematicsChain| outcome.set(Some(result))
        });
        if !accepted {
            tracing::warn!(goal = ?target, "arm refused to move");
            continue;
        }

        let frames = run_until_finished(&mut arm);
        let end = arm.chain().end_effector().unwrap_or_default();
        tracing::info!(
            goal = ?target,
            outcome = ?outcome.get(),
            frames,
            error = end.distance(target),
            "move finished"
        );

        if arm.set_claw(claw)? {
            run_until_finished(&mut arm);
        }
    }

    Ok(())
}

fn run_until_finished(arm: &mut RobotArm<SimulatedActuators>) -> usize {
    for frame in 0..MAX_FRAMES_PER_MOVE {
        arm.tick(FRAME);
        arm.actuators_mut().step(FRAME);
        if arm.has_finished_moving() && !arm.is_claw_moving() {
            return frame + 1;
        }
    }
    tracing::warn!("giving up on the current move");
    arm.emergency_stop();
    MAX_FRAMES_PER_MOVE
}

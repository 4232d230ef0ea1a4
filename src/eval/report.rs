//! CSV side-channel reports of ground-truth and learner trajectories

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::infra::{AirlError, Result, Trajectory};

pub const TRAJECTORY_HEADER: [&str; 2] = ["Test Trajectory", "Learner Trajectory"];

pub const TIMESTEP_HEADER: [&str; 4] = [
    "Test Trajectory",
    "Test Trajectory Timestep",
    "Learner Trajectory",
    "Learner Trajectory Timestep",
];

fn check_rows(test: &[Trajectory], learner: &[Trajectory]) -> Result<()> {
    if test.len() != learner.len() {
        return Err(AirlError::shape(format!(
            "{} ground-truth rows but {} learner rows",
            test.len(),
            learner.len()
        )));
    }
    Ok(())
}

/// One `test,learner` row per pair, trajectories underscore-joined.
pub fn write_trajectories<W: Write>(
    writer: &mut csv::Writer<W>,
    test: &[Trajectory],
    learner: &[Trajectory],
) -> Result<()> {
    check_rows(test, learner)?;

    writer.write_record(TRAJECTORY_HEADER)?;
    for (expected, decoded) in test.iter().zip(learner.iter()) {
        writer.write_record([expected.encode(), decoded.encode()])?;
    }
    Ok(())
}

/// One row per query; both time step columns carry that query's time step.
pub fn write_trajectories_with_timestep<W: Write>(
    writer: &mut csv::Writer<W>,
    test: &[Trajectory],
    learner: &[Trajectory],
    time_steps: &[u32],
) -> Result<()> {
    check_rows(test, learner)?;
    if time_steps.len() != test.len() {
        return Err(AirlError::shape(format!(
            "{} time steps for {} rows",
            time_steps.len(),
            test.len()
        )));
    }

    writer.write_record(TIMESTEP_HEADER)?;
    for ((expected, decoded), time_step) in test.iter().zip(learner.iter()).zip(time_steps.iter()) {
        let time_step = time_step.to_string();
        writer.write_record([expected.encode(), time_step.clone(), decoded.encode(), time_step])?;
    }
    Ok(())
}

/// Create `path` and fill it with `write`, flushing before returning.
pub fn save_csv<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut csv::Writer<File>) -> Result<()>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::Writer::from_writer(File::create(path)?);
    write(&mut writer)?;
    writer.flush()?;

    tracing::debug!("Wrote {}", path.display());
    Ok(())
}

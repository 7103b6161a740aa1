use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::simulation_system::branch::{BranchStatus, FlightData, FlightDataBranch};
use crate::trajectory_system::events::FlightEventType;

/// Post-flight figures of one branch.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FlightSummary {
    pub max_altitude: f64,
    pub time_to_apogee: Option<f64>,
    pub max_velocity: f64,
    pub max_acceleration: f64,
    pub max_mach: f64,
    pub flight_time: f64,
    pub ground_hit_velocity: Option<f64>,
    pub launch_rod_velocity: Option<f64>,
    pub deployment_velocity: Option<f64>,
    /// Time from the last burnout to apogee, the ejection delay a motor would need.
    pub optimum_delay: Option<f64>,
}

impl FlightSummary {
    pub fn from_branch(branch: &FlightDataBranch) -> Self {
        let mut summary = FlightSummary::default();
        let Some(first) = branch.samples().first() else {
            return summary;
        };

        summary.max_altitude = f64::NEG_INFINITY;
        for sample in branch.samples() {
            summary.max_altitude = summary.max_altitude.max(sample.state.altitude());
            summary.max_velocity = summary.max_velocity.max(sample.state.speed());
            summary.max_acceleration = summary.max_acceleration.max(sample.derived.acceleration.norm());
            summary.max_mach = summary.max_mach.max(sample.derived.mach);
        }
        if let Some(last) = branch.last_sample() {
            summary.flight_time = last.time - first.time;
        }

        let speed_at = |kind| {
            branch
                .first_event(kind)
                .and_then(|event| branch.sample_at(event.time))
                .map(|sample| sample.state.speed())
        };
        summary.ground_hit_velocity = speed_at(FlightEventType::GroundHit);
        summary.launch_rod_velocity = speed_at(FlightEventType::LaunchRodClearance);
        summary.deployment_velocity = speed_at(FlightEventType::RecoveryDeviceDeployment);

        let apogee = branch.first_event(FlightEventType::Apogee).map(|e| e.time);
        summary.time_to_apogee = apogee;
        let burnout = branch
            .events_of(FlightEventType::Burnout)
            .map(|e| e.time)
            .fold(None, |latest: Option<f64>, t| Some(latest.map_or(t, |l| l.max(t))));
        summary.optimum_delay = match (apogee, burnout) {
            (Some(apogee), Some(burnout)) if apogee >= burnout => Some(apogee - burnout),
            _ => None,
        };
        summary
    }
}

/// Human-readable rendering of a finished run.
pub struct Telemetry;

impl Telemetry {
    fn format_time(elapsed_time: f64) -> String {
        if elapsed_time >= 3600.0 {
            let hours = (elapsed_time / 3600.0).floor();
            let minutes = ((elapsed_time % 3600.0) / 60.0).floor();
            let seconds = elapsed_time % 60.0;
            format!("{:.0}h {:.0}m {:.2}s", hours, minutes, seconds)
        } else if elapsed_time >= 60.0 {
            let minutes = (elapsed_time / 60.0).floor();
            let seconds = elapsed_time % 60.0;
            format!("{:.0}m {:.2}s", minutes, seconds)
        } else {
            format!("{:.2}s", elapsed_time)
        }
    }

    fn format_altitude(altitude: f64) -> String {
        if altitude >= 1000.0 {
            format!("{:.2} km", altitude / 1000.0)
        } else {
            format!("{:.2} m", altitude)
        }
    }

    fn format_velocity(velocity: Option<f64>) -> String {
        velocity.map_or_else(|| "n/a".to_string(), |v| format!("{:.2} m/s", v))
    }

    fn format_status(status: &BranchStatus) -> String {
        match status {
            BranchStatus::Running => "running".to_string(),
            BranchStatus::Landed => "landed".to_string(),
            BranchStatus::Separated => "separated".to_string(),
            BranchStatus::EndReached => "end of simulation reached".to_string(),
            BranchStatus::Aborted(cause) => format!("aborted ({})", cause),
        }
    }

    pub fn summaries(data: &FlightData) -> Vec<FlightSummary> {
        data.branches.iter().map(FlightSummary::from_branch).collect()
    }

    /// Per-branch summary, event timeline and warnings.
    pub fn report(data: &FlightData) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = Self::write_report(&mut out, data);
        out
    }

    fn write_report(out: &mut String, data: &FlightData) -> std::fmt::Result {
        writeln!(
            out,
            "--- Flight Report: {} (modification {}) ---",
            data.configuration, data.modification_id
        )?;

        for branch in &data.branches {
            let summary = FlightSummary::from_branch(branch);
            writeln!(out)?;
            match branch.parent {
                Some(parent) => writeln!(
                    out,
                    "--- Branch {} '{}' (from {} at {}) ---",
                    branch.id,
                    branch.name,
                    parent,
                    Self::format_time(branch.spawn_time)
                )?,
                None => writeln!(out, "--- Branch {} '{}' ---", branch.id, branch.name)?,
            }
            writeln!(out, "Status: {}", Self::format_status(branch.status()))?;
            writeln!(out, "Samples: {}", branch.len())?;
            if branch.is_empty() {
                continue;
            }
            writeln!(out, "Max Altitude: {}", Self::format_altitude(summary.max_altitude))?;
            if let Some(apogee) = summary.time_to_apogee {
                writeln!(out, "Time to Apogee: {}", Self::format_time(apogee))?;
            }
            writeln!(out, "Max Velocity: {:.2} m/s (Mach {:.2})", summary.max_velocity, summary.max_mach)?;
            writeln!(out, "Max Acceleration: {:.2} m/s²", summary.max_acceleration)?;
            writeln!(
                out,
                "Launch Rod Clearance Velocity: {}",
                Self::format_velocity(summary.launch_rod_velocity)
            )?;
            writeln!(
                out,
                "Deployment Velocity: {}",
                Self::format_velocity(summary.deployment_velocity)
            )?;
            writeln!(
                out,
                "Ground Hit Velocity: {}",
                Self::format_velocity(summary.ground_hit_velocity)
            )?;
            if let Some(delay) = summary.optimum_delay {
                writeln!(out, "Optimum Delay: {:.2}s", delay)?;
            }
            writeln!(out, "Flight Time: {}", Self::format_time(summary.flight_time))?;

            writeln!(out, "\n--- Events ---")?;
            for event in branch.events() {
                writeln!(out, "{} at: {}", event.kind, Self::format_time(event.time))?;
            }
        }

        if !data.warnings.is_empty() {
            writeln!(out, "\n--- Warnings ---")?;
            for warning in data.warnings.iter() {
                writeln!(out, "{}", warning)?;
            }
        }
        writeln!(out, "--- End of Report ---")
    }

    pub fn display_data(data: &FlightData) {
        print!("{}", Self::report(data));
    }
}

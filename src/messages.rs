// Message types exchanged with the tracker, the operator and display/logging

use serde::{Deserialize, Serialize};

use crate::context::{CommandFrame, DeviceFeedback, HostContext, LinkHealth, Telemetry};
use crate::state::SystemState;

// Tracker -> runtime, one per successful marker detection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerSample {
    pub position_mm: [f32; 3],
    pub timestamp_s: f64,
}

// Runtime -> display/logging, once per tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryReport {
    pub tick: u64,
    pub state: SystemState,
    pub tension_only: bool,
    pub telemetry: Telemetry,
    pub command: CommandFrame,
    pub feedback: DeviceFeedback,
    pub link: LinkHealth,
}

impl From<&HostContext> for TelemetryReport {
    fn from(ctx: &HostContext) -> Self {
        Self {
            tick: ctx.tick,
            state: ctx.state,
            tension_only: ctx.tension_only,
            telemetry: ctx.telemetry,
            command: ctx.command,
            feedback: ctx.feedback,
            link: ctx.link,
        }
    }
}

/// Link status published by the runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LinkHealthStatus {
    Ok,
    NotResponding,
    PortClosed,
}

impl From<&LinkHealth> for LinkHealthStatus {
    fn from(link: &LinkHealth) -> Self {
        if !link.port_open {
            LinkHealthStatus::PortClosed
        } else if link.responding {
            LinkHealthStatus::Ok
        } else {
            LinkHealthStatus::NotResponding
        }
    }
}

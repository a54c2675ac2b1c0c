// Host/device control loop for a cable-actuated haptic ring

pub mod command;
pub mod config;
pub mod context;
pub mod control;
pub mod device;
pub mod estimator;
pub mod host;
pub mod link;
pub mod messages;
pub mod protocol;
pub mod runtime;
pub mod state;

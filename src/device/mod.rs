// Device side: the embedded amplifier controller's two loops
//
// `amplifier` is the fixed-period interrupt body, `link` the main-loop serial
// service. They meet only through the `mailbox` double buffers.

pub mod amplifier;
pub mod link;
pub mod mailbox;
pub mod sim;

pub use amplifier::{AmplifierDriver, AmplifierHal, DeviceShared, DeviceTelemetry, DriveCommand};
pub use link::DeviceLink;
pub use mailbox::DoubleBuffer;
pub use sim::{SimulatedAmplifier, SimulatedDevice, spawn_simulated_device};

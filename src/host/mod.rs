// Host side of the control loop: state machine and serial driver

pub mod machine;
pub mod serial;

pub use machine::HostStateMachine;
pub use serial::HostSerial;

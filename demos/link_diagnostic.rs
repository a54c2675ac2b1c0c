// Link diagnostic: check the amplifier controller answers, without driving it
//
// Sends Idle packets only (zero drive, amplifier disabled) for a few seconds
// and prints every telemetry frame that comes back.
//
// Usage: cargo run --example link_diagnostic -- [port|sim]
// Example: cargo run --example link_diagnostic -- /dev/ttyACM0

use std::io::Write;
use std::thread;
use std::time::Duration;

use haptic_ring_runtime::config::{COUNTER_MODULUS, DeviceConfig, SERIAL_BAUDRATE, SERIAL_PORT};
use haptic_ring_runtime::device::spawn_simulated_device;
use haptic_ring_runtime::link::{self, MemoryPort, Transport};
use haptic_ring_runtime::protocol::{FrameDecoder, PacketKind, PacketPayload, PacketType, encode_frame};

const PACKETS: u32 = 300;
const PERIOD: Duration = Duration::from_millis(10);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let target = std::env::args().nth(1).unwrap_or_else(|| SERIAL_PORT.to_string());

    println!("Haptic ring link diagnostic (idle packets only, no drive)");
    println!("Target: {}", target);
    println!();

    // Keep the simulated device alive for the whole run
    let mut _device = None;
    let mut port: Box<dyn Transport> = if target == "sim" {
        let (host, device) = MemoryPort::pair();
        _device = Some(spawn_simulated_device(device, DeviceConfig::default())?);
        Box::new(host)
    } else {
        match link::open_serial(&target, SERIAL_BAUDRATE) {
            Ok(port) => Box::new(port),
            Err(e) => {
                println!("Failed to open serial port: {}", e);
                println!();
                println!("Troubleshooting:");
                println!("  - Check the port path is correct");
                println!("  - Verify the amplifier controller is powered and connected");
                return Err(e.into());
            }
        }
    };

    let idle = PacketType::command(PacketKind::Idle);
    let mut decoder = FrameDecoder::new();
    let mut rx = Vec::new();
    let mut received = 0u32;

    for i in 0..PACKETS {
        let counter = (i % u32::from(COUNTER_MODULUS)) as u8;
        let payload = PacketPayload::new(idle, counter);
        port.write_all(&encode_frame(idle, &payload))?;
        port.flush()?;

        thread::sleep(PERIOD);

        rx.clear();
        link::read_available(&mut port, &mut rx)?;
        decoder.extend(&rx);
        while let Some((_, reply)) = decoder.decode() {
            received += 1;
            println!("  {} -> {}", payload, reply);
        }
    }

    let stats = decoder.stats();
    println!();
    println!("Sent:      {}", PACKETS);
    println!("Received:  {}", received);
    println!(
        "Discarded: {} bytes ({} checksum failures, {} malformed)",
        stats.bytes_discarded, stats.checksum_failures, stats.malformed_frames
    );

    if received == 0 {
        println!("No telemetry received. Check wiring, baud rate and firmware.");
    }
    Ok(())
}

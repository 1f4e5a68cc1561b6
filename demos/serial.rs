use std::env;

use e3631_psud::{
    config::Config,
    psu::{E3631, Measurements},
    serial::SerialPortLine,
    types::{Milli, Terminal},
};
use inquire::Select;

// Configuration constants - adjust these for your setup
const BAUD_RATE: u32 = 9600;
const OUTPUT_VOLTAGE: Milli = Milli::from_thousandths(5500); // 5.5V
const CURRENT_LIMIT: Milli = Milli::from_thousandths(100); // 0.1A
const STABILIZATION_DELAY_MS: u64 = 1000;

fn main() {
    // Get serial port from command line arg or interactive selection
    let port_name = env::args().nth(1).unwrap_or_else(|| {
        let ports = serialport::available_ports().expect("Failed to enumerate serial ports");

        if ports.is_empty() {
            eprintln!("No serial ports found!");
            std::process::exit(1);
        }

        let port_names: Vec<String> = ports.iter().map(|p| p.port_name.clone()).collect();

        Select::new("Select a serial port:", port_names)
            .prompt()
            .expect("Failed to select port")
    });

    println!("Using port: {}", port_name);

    let line = SerialPortLine::open(&port_name, BAUD_RATE).expect("Failed to open serial port");

    // Connecting identifies the device and applies the default set points.
    let config = Config {
        port: port_name,
        terminal: Terminal::P6V,
        ..Config::default()
    };
    let mut psu: E3631<SerialPortLine> = E3631::connect(line, &config).unwrap();

    println!("SCPI version: {}", psu.version().unwrap());
    println!("{:#?}", psu.state().unwrap());

    let volts = psu.set_voltage(OUTPUT_VOLTAGE).unwrap();
    println!("Set output voltage to {}V", volts);

    let amps = psu.set_current_limit(CURRENT_LIMIT).unwrap();
    println!("Set current limit to {}A", amps);

    psu.set_power(true).unwrap();
    println!("Output enabled");

    // Wait for output to stabilize
    std::thread::sleep(std::time::Duration::from_millis(STABILIZATION_DELAY_MS));

    println!("Measured output voltage: {}V", Measurements::voltage(&mut psu).unwrap());
    println!("Measured output current: {}A", Measurements::current(&mut psu).unwrap());

    println!("\n--- Recent transactions ---");
    for record in psu.transactions().iter() {
        println!("{:?}  {:<20} {:?}", record.elapsed, record.command, record.response);
    }

    psu.set_power(false).unwrap();
    println!("Output disabled");
}

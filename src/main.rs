//! Host simulator: runs the store against a file backed EEPROM image.
//!
//! ```text
//! nvstore-sim [run [cycles]]   simulate a flight and log it
//! nvstore-sim calibrate        measure and store a new bias
//! nvstore-sim serve            answer commands read from stdin
//! nvstore-sim <command>        run a single command, e.g. get_status
//! ```

use std::io;
use std::process::ExitCode;

use embassy_futures::block_on;
use embassy_time::{Duration, Ticker};
use log::{error, info, warn};

use nvstore::calibration::{self, RangeClass};
use nvstore::command;
use nvstore::layout::DEFAULT_CAPACITY;
use nvstore::platform::{Accelerometer, AccelerometerType, EepromType};
use nvstore::recorder::Recorder;
use nvstore::{AppendOutcome, GateOutcome, Store, StoreConfig};

const DEFAULT_CYCLES: u32 = 300;
const CALIBRATION_SAMPLES: usize = 32;
const SAMPLE_RATE_HZ: u64 = 50;
const WRITE_TIMEOUT_MS: u64 = 50;

struct Stdout(io::Stdout);

impl embedded_io_async::ErrorType for Stdout {
    type Error = io::Error;
}

impl embedded_io_async::Write for Stdout {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, io::Error> {
        io::Write::write(&mut self.0, buf)
    }

    async fn flush(&mut self) -> Result<(), io::Error> {
        io::Write::flush(&mut self.0)
    }
}

struct Stdin(io::Stdin);

impl embedded_io_async::ErrorType for Stdin {
    type Error = io::Error;
}

impl embedded_io_async::Read for Stdin {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, io::Error> {
        io::Read::read(&mut self.0, buf)
    }
}

/// Rest, boost, coast and descent, in counts of `range`, with the sensor
/// offset the calibration has to remove.
fn flight_profile(range: RangeClass, offset: [i16; 3]) -> Vec<[i16; 3]> {
    let g = range.counts_per_g();
    let phases: [(u32, [i16; 3]); 4] = [(50, [0, 0, g]), (40, [g / 4, 0, 6 * g]), (60, [0, g / 8, 0]), (150, [0, 0, g])];
    let mut samples = Vec::new();
    for (i, (len, base)) in phases.into_iter().enumerate() {
        for n in 0..len {
            // a little deterministic jitter
            let jitter = ((n as i16 * 7 + i as i16 * 3) % 9) - 4;
            samples.push([
                base[0] + offset[0] + jitter,
                base[1] + offset[1] - jitter,
                base[2] + offset[2] + jitter / 2,
            ]);
        }
    }
    samples
}

fn rest_profile(range: RangeClass, offset: [i16; 3]) -> Vec<[i16; 3]> {
    let g = range.counts_per_g();
    (0..8_i16)
        .map(|n| [offset[0] + n % 3 - 1, offset[1] - n % 3 + 1, offset[2] + g])
        .collect()
}

async fn fly(store: &mut Store<EepromType>, acc: &mut AccelerometerType, cycles: u32) -> Result<(), String> {
    let record = calibration::apply_calibration(store, acc)
        .await
        .map_err(|e| format!("applying calibration failed: {:?}", e))?;
    let mut recorder = Recorder::new(record.range_class());
    let mut ticker = Ticker::every(Duration::from_hz(SAMPLE_RATE_HZ));

    for _ in 0..cycles {
        ticker.next().await;
        let counts = match acc.read_counts().await {
            Ok(counts) => counts,
            Err(_) => {
                error!("Could not get accel measurement");
                continue;
            }
        };
        match recorder.record(store, counts).map_err(|e| e.to_string())? {
            AppendOutcome::Exhausted => {
                warn!("log full, stopping");
                break;
            }
            AppendOutcome::Accepted | AppendOutcome::Busy => {}
        }
    }

    recorder.finish(store).map_err(|e| e.to_string())?;
    Ok(())
}

fn dispatch(store: &mut Store<EepromType>, outcome: GateOutcome, args: &[String]) -> Result<(), String> {
    let range = RangeClass::from_code(store.configured_range().map_err(|e| e.to_string())?).unwrap_or(RangeClass::DEFAULT);
    let offset = [12, -5, 44];
    let mut out = Stdout(io::stdout());

    let mode = args.first().map(String::as_str).unwrap_or("run");
    match mode {
        "run" | "calibrate" => {
            if mode == "calibrate" || outcome == GateOutcome::Reinitialized {
                info!("calibrating");
                let mut acc = AccelerometerType::new(rest_profile(range, offset));
                block_on(calibration::calibrate(store, &mut acc, CALIBRATION_SAMPLES))
                    .map_err(|e| format!("calibration failed: {:?}", e))?;
            }
            if mode == "run" {
                let cycles = match args.get(1) {
                    Some(arg) => arg.parse().map_err(|_| format!("invalid cycle count {}", arg))?,
                    None => DEFAULT_CYCLES,
                };
                let mut acc = AccelerometerType::new(flight_profile(range, offset));
                block_on(fly(store, &mut acc, cycles))?;
            }
            block_on(command::handle_command(store, b"get_status", &mut out)).map_err(|e| e.to_string())
        }
        "serve" => {
            let mut input = Stdin(io::stdin());
            block_on(command::serve(store, &mut input, &mut out)).map_err(|e| e.to_string())
        }
        line => block_on(command::handle_command(store, line.as_bytes(), &mut out)).map_err(|e| e.to_string()),
    }
}

fn run(args: &[String]) -> Result<(), String> {
    let path = EepromType::default_image_path();
    let eeprom = EepromType::load(&path, DEFAULT_CAPACITY).map_err(|e| format!("loading {}: {}", path.display(), e))?;
    let mut store = Store::new(
        eeprom,
        StoreConfig::default().with_write_timeout(Duration::from_millis(WRITE_TIMEOUT_MS)),
    );

    let result = match store.init() {
        Ok(outcome) => dispatch(&mut store, outcome, args),
        Err(e) => Err(e.to_string()),
    };

    // keep whatever was written, even after a failure
    let mut eeprom = store.release();
    eeprom
        .save(&path)
        .map_err(|e| format!("saving {}: {}", path.display(), e))?;
    result
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

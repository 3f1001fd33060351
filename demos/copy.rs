use std::io::{self, Cursor};
use std::sync::Arc;
use std::time::Duration;

use flowmeter::io::{Reader, Writer};
use flowmeter::{Config, FastClock, Monitor};
use tracing_subscriber::EnvFilter;

fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let clock = quanta::Clock::new();
    // Updates at 1Khz
    let _quanta_thread = quanta::Upkeep::new_with_clock(Duration::from_millis(1), clock.clone())
        .start()
        .unwrap();
    let clock = FastClock::new(clock);

    let source = Cursor::new(vec![42u8; 256 * 1024]);
    let read_side = Arc::new(Monitor::with_clock(Config::default(), clock.clone()));
    let mut reader = Reader::with_monitor(source, 128 * 1024, Arc::clone(&read_side));

    // the writer only measures, reads set the pace
    let write_side = Arc::new(Monitor::with_clock(
        Config::default().with_sample_period(Duration::from_millis(200)),
        clock,
    ));
    let mut writer = Writer::with_monitor(io::sink(), 0, Arc::clone(&write_side));

    println!("copying 256kB at 128kB/s...");
    let copied = io::copy(&mut reader, &mut writer)?;
    reader.finish();
    writer.finish();

    let read = read_side.snapshot();
    let written = write_side.snapshot();
    println!(
        "copied {copied} bytes in {:?}: read avg={}B/s peak={}B/s, write avg={}B/s",
        read.duration, read.avg_rate, read.peak_rate, written.avg_rate
    );
    Ok(())
}

use std::sync::Arc;
use std::time::Duration;

use flowmeter::futures::AsyncReader;
use flowmeter::{Config, Monitor, TokioClock};
use tokio::task::JoinSet;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> std::io::Result<()> {
    // one monitor shared by every transfer, so the ceiling is global
    let monitor = Arc::new(Monitor::with_clock(Config::default(), TokioClock::default()));
    let start = tokio::time::Instant::now();

    let mut handles = JoinSet::new();
    for i in 1..=4 {
        let monitor = Arc::clone(&monitor);
        handles.spawn(async move {
            let data = vec![i as u8; 16 * 1024];
            let mut reader = AsyncReader::with_monitor(data.as_slice(), 32 * 1024, monitor);
            let copied = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
            println!("[transfer={i}] copied {copied} bytes, elapsed={:?}", start.elapsed());
            Ok::<_, std::io::Error>(copied)
        });
    }

    let reporter = tokio::spawn({
        let monitor = Arc::clone(&monitor);
        async move {
            while monitor.is_active() {
                tokio::time::sleep(Duration::from_millis(500)).await;
                let status = monitor.snapshot();
                println!("{} bytes, current={}B/s", status.bytes, status.cur_rate);
            }
        }
    });

    for copied in handles.join_all().await {
        copied?;
    }
    let total = monitor.finalize();
    let _ = reporter.await;
    println!("Completed {total} bytes in {:?}", start.elapsed());
    Ok(())
}

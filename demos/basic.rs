use flowmeter::Monitor;

fn main() {
    let monitor = Monitor::new();
    let payload = vec![0u8; 8 * 1024];
    let mut sent = 0;
    // 16kB/s, so half a second for the whole payload
    while sent < payload.len() {
        let n = monitor.limit(payload.len() - sent, 16 * 1024, true);
        sent += monitor.update(n);
    }
    let status = monitor.snapshot();
    println!(
        "sent {} bytes in {:?}, current={}B/s peak={}B/s",
        status.bytes, status.duration, status.cur_rate, status.peak_rate
    );
    assert_eq!(payload.len() as u64, monitor.finalize());
}

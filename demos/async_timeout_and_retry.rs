#![cfg(feature = "tokio")]

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use try_error::async_result::{retry, with_timeout};
use try_error::{create_error, reset_config, Result};

async fn slow_download() -> Result<&'static str> {
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok("downloaded")
}

#[tokio::main]
async fn main() {
    reset_config();

    println!("--- with_timeout races a slow future against a deadline ---\n");
    let result = with_timeout(slow_download(), Duration::from_millis(50), None).await;
    match result {
        Ok(value) => println!("unreachable: {value}"),
        Err(err) => println!("1. {} / {}", err.error_type(), err.message()),
    }

    println!("\n--- retry recovers after transient failures ---\n");
    let calls = AtomicU32::new(0);
    let outcome: Result<&str> = retry(
        4,
        Duration::from_millis(5),
        Duration::from_millis(100),
        2.0,
        || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt < 3 {
                    Err(create_error("TransientError", "upstream unavailable"))
                } else {
                    Ok("ok")
                }
            }
        },
        |_err, _attempt| true,
    )
    .await;

    println!("2. retry result: {:?}, calls made: {}", outcome.map_err(|e| e.error_type().to_string()), calls.load(Ordering::SeqCst));
}

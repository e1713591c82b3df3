//! NSQ Worker Service
//!
//! Binary entry point for the NSQ consumer service.

#[tokio::main]
async fn main() {
    if let Err(e) = zerg_nsq_worker::run().await {
        eprintln!("Fatal error: {:?}", e);
        std::process::exit(1);
    }
}

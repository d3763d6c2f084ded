/*
[INPUT]:  Host of a trading backend and optional bearer token (env)
[OUTPUT]: Logged prices, trades and connection state
[POS]:    Examples - reconnecting stream usage
[UPDATE]: When the TradeStream API changes
*/

use std::env;

use tokio::time::{Duration, sleep};
use tradestream_client::*;

/// Example: one reconnecting stream with handlers
///
/// TRADESTREAM_HOST   backend host, e.g. "api.example.com"
/// TRADESTREAM_TOKEN  optional bearer token
#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Trade Stream Example ===\n");

    let host = env::var("TRADESTREAM_HOST").unwrap_or_else(|_| "localhost:8080".to_string());
    let secure = !host.starts_with("localhost");
    let config = StreamConfig::new(Endpoint::new(host, secure, StreamPath::Trading));

    let stream = TradeStream::new(config)?;
    println!("✓ Stream created");

    stream.on(EventKind::PriceUpdate, |event| {
        if let InboundEvent::PriceUpdate(entry) = event {
            println!("  price {} = {}", entry.symbol, entry.price);
        }
        Ok(())
    });
    stream.on(EventKind::TradeUpdate, |event| {
        if let InboundEvent::TradeUpdate(trade) = event {
            println!("  trade {} {}", trade.id, trade.status);
        }
        Ok(())
    });

    stream.subscribe(["prices", "trades"]);
    stream.connect(env::var("TRADESTREAM_TOKEN").ok());
    println!("✓ Connecting\n");

    let mut status = stream.watch_status();
    for _ in 0..10 {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("  state: {}", status.borrow().state);
            }
            _ = sleep(Duration::from_secs(3)) => {}
        }
    }

    println!("\nKnown prices: {}", stream.prices().len());
    println!("Recent trades: {}", stream.recent_trades().len());

    stream.disconnect();
    stream.shutdown().await;
    println!("\n✓ Stream example complete");
    Ok(())
}

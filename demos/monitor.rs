use lennox_s30::{Config, S30Client, S30ClientBuilder};
use std::env;
use std::time::Duration;

const USAGE: &str = "usage: monitor <ip> [--http] | monitor --config <file.toml>";

#[tokio::main]
async fn main() -> lennox_s30::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1));

    let builder = match config_path {
        Some(path) => S30ClientBuilder::from_config(&Config::load(path)?)?,
        None => {
            let ip = args.get(1).filter(|a| !a.starts_with("--")).expect(USAGE);
            let mut builder = S30Client::builder(ip);
            if args.iter().any(|a| a == "--http") {
                builder = builder.protocol("http");
            }
            builder
        }
    };

    let mut client = builder
        .on_event(|system_id, event| {
            println!("[{system_id}] {event:?}");
        })
        .on_snapshot(|system| {
            for zone in &system.zones {
                if let Some(temp) = zone.temperature {
                    println!(
                        "[{}/{}] {:.1}\u{00b0}C / {:.1}\u{00b0}F | mode: {:?} | fan: {:?}{}{}",
                        system.id,
                        zone.name,
                        temp.celsius(),
                        temp.fahrenheit(),
                        zone.mode(),
                        zone.fan_mode(),
                        if zone.aux_heat { " | AUX" } else { "" },
                        if zone.is_override_active() { " | HOLD" } else { "" },
                    );
                }
            }
            if let Some(outdoor) = system.outdoor_temperature {
                println!(
                    "[{}] Outdoor: {:.1}\u{00b0}C / {:.1}\u{00b0}F",
                    system.id,
                    outdoor.celsius(),
                    outdoor.fahrenheit(),
                );
            }
        })
        .build()?;

    println!("Connecting...");
    client.connect().await?;
    println!(
        "Connected to {} system(s). Polling for updates...",
        client.systems().len()
    );

    loop {
        if let Err(e) = client.poll().await {
            eprintln!("Poll error: {e}");
            tokio::time::sleep(Duration::from_secs(5)).await;
            println!("Reconnecting...");
            client.connect().await?;
        }
    }
}

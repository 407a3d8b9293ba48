use lennox_s30::{Event, MessageLogMode, S30Client, TARGET_LCC, Temperature, Zone};
use std::env;
use std::io::{self, BufRead, Write as _};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One reversible command against the live controller.
#[derive(Debug, Clone, Copy)]
enum Step {
    Away(bool),
    ScheduleHold(u8, bool),
    Setpoints(u8, Temperature, Temperature),
    CirculateTime(u8),
}

async fn run(client: &mut S30Client, system_id: &str, step: Step) -> lennox_s30::Result<()> {
    match step {
        Step::Away(away) => client.set_away(system_id, away).await,
        Step::ScheduleHold(zone, hold) => client.set_schedule_hold(system_id, zone, hold).await,
        Step::Setpoints(zone, heat, cool) => client.set_setpoints(system_id, zone, heat, cool).await,
        Step::CirculateTime(percent) => client.set_circulate_time(system_id, percent).await,
    }
}

type Captured = Arc<Mutex<Vec<(String, Event)>>>;

#[tokio::main]
async fn main() -> lennox_s30::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let ip = args
        .get(1)
        .expect("usage: validate_commands <ip> [--http] [--zone <id>] [--no-log]");
    let use_http = args.iter().any(|a| a == "--http");
    let no_log = args.iter().any(|a| a == "--no-log");
    let zone_id: u8 = args
        .iter()
        .position(|a| a == "--zone")
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let events: Captured = Arc::new(Mutex::new(vec![]));
    let events_clone = events.clone();

    let mut builder = S30Client::builder(ip).on_event(move |system_id, event| {
        events_clone
            .lock()
            .unwrap()
            .push((system_id.to_string(), event.clone()));
    });

    if use_http {
        builder = builder.protocol("http");
    }

    let log_path = if !no_log {
        let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = format!("logs/validate_{ts}.ndjson");
        std::fs::create_dir_all("logs")?;
        println!("Logging all requests/responses to {path}");
        builder = builder.message_log(MessageLogMode::Full, path.clone());
        Some(path)
    } else {
        None
    };

    let mut client = builder.build()?;

    println!("Connecting to {ip}...");
    client.connect().await?;
    println!("Connected. Draining initial state...");

    for i in 0..15 {
        client.poll().await?;
        if current_zone(&client, zone_id).is_some_and(|z| z.has_data()) {
            println!("Got zone data after {} polls", i + 1);
            break;
        }
    }

    let zone = current_zone(&client, zone_id).unwrap_or_else(|| panic!("zone {zone_id} not found"));
    println!("\n=== Current State (zone {zone_id}: {}) ===", zone.name);
    print_state(&client, zone_id);
    println!();

    let orig_heat = zone.heat_setpoint();
    let orig_cool = zone.cool_setpoint();
    let system = client.system(TARGET_LCC).expect("LAN system after connect");
    let orig_away = system.manual_away;
    let orig_circulate = system.circulate_time;

    let mut cases: Vec<(&'static str, Step, Step)> = vec![
        ("Away Mode", Step::Away(!orig_away), Step::Away(orig_away)),
        (
            "Schedule Hold",
            Step::ScheduleHold(zone_id, true),
            Step::ScheduleHold(zone_id, false),
        ),
    ];

    if let (Some(heat), Some(cool)) = (orig_heat, orig_cool) {
        cases.push((
            "Atomic Setpoints",
            Step::Setpoints(
                zone_id,
                Temperature::from_celsius(heat.celsius() + 1.0),
                Temperature::from_celsius(cool.celsius() + 1.0),
            ),
            Step::Setpoints(zone_id, heat, cool),
        ));
    } else {
        println!("⚠ Skipping setpoints test (no current heat+cool setpoints)");
    }

    if let Some(percent) = orig_circulate {
        let test = if percent >= 50 { percent - 10 } else { percent + 10 };
        cases.push((
            "Circulate Time",
            Step::CirculateTime(test),
            Step::CirculateTime(percent),
        ));
    }

    let total = cases.len();
    for (i, (name, apply, revert)) in cases.into_iter().enumerate() {
        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        println!("Test {}/{total}: {name}", i + 1);
        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        println!("\n  → Will execute: {apply:?}");
        wait_for_enter("Press Enter to apply (Ctrl-C to abort)...")?;

        events.lock().unwrap().clear();
        run(&mut client, TARGET_LCC, apply).await?;
        println!("  ✓ Command sent");

        println!("  Waiting for thermostat response...");
        wait_for_events(&mut client, &events, 30).await;

        print_state(&client, zone_id);
        wait_for_enter("Verify at thermostat, then press Enter to revert...")?;

        events.lock().unwrap().clear();
        run(&mut client, TARGET_LCC, revert).await?;
        println!("  ✓ Revert sent ({revert:?})");

        println!("  Waiting for revert confirmation...");
        wait_for_events(&mut client, &events, 30).await;

        print_state(&client, zone_id);
        println!("  ✓ Reverted\n");
    }

    println!("All tests complete.");
    client.disconnect().await?;
    if let Some(path) = log_path {
        println!("Full request/response log: {path}");
    }
    Ok(())
}

fn current_zone(client: &S30Client, zone_id: u8) -> Option<&Zone> {
    client.system(TARGET_LCC).and_then(|s| s.zone(zone_id))
}

fn print_state(client: &S30Client, zone_id: u8) {
    if let Some(zone) = current_zone(client, zone_id) {
        println!(
            "  Zone {}: {} | temp: {} | heat_sp: {} | cool_sp: {} | mode: {:?} | schedule: {:?} | hold: {}",
            zone.id,
            zone.name,
            fmt_temp(zone.temperature),
            fmt_temp(zone.heat_setpoint()),
            fmt_temp(zone.cool_setpoint()),
            zone.mode(),
            zone.schedule_id,
            zone.is_override_active(),
        );
    }
    if let Some(system) = client.system(TARGET_LCC) {
        println!(
            "  Away: {} (manual_away={}) | circulate: {:?}",
            system.is_away(),
            system.manual_away,
            system.circulate_time
        );
    }
}

fn fmt_temp(t: Option<Temperature>) -> String {
    t.map(|t| format!("{:.1}°C/{:.0}°F", t.celsius(), t.fahrenheit()))
        .unwrap_or_else(|| "-".into())
}

fn wait_for_enter(prompt: &str) -> io::Result<()> {
    print!("  {prompt} ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(())
}

async fn wait_for_events(client: &mut S30Client, events: &Captured, timeout_s: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_s);
    while tokio::time::Instant::now() < deadline {
        if let Err(e) = client.poll().await {
            println!("  ⚠ poll failed: {e}");
        }
        let captured = events.lock().unwrap();
        if !captured.is_empty() {
            for (system_id, e) in captured.iter() {
                println!("  ← [{system_id}] {e:?}");
            }
            return;
        }
    }
    println!("  ⚠ Timed out waiting for events ({timeout_s}s)");
}

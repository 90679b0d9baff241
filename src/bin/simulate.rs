//! Sensor simulator
//!
//! Posts randomized readings to a running server and prints how each one was
//! decided. Values drift around a baseline and now and then spike past the
//! default thresholds, so the hysteresis and cooldown gates get exercised.
//!
//! Usage: simulate [readings] [interval_ms] [scope]

use rand::Rng;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// (metric, baseline, spread, spike value)
const SENSORS: &[(&str, f64, f64, f64)] = &[
    ("temperature", 24.0, 4.0, 43.5),
    ("humidity", 55.0, 15.0, 96.0),
    ("aqi", 90.0, 40.0, 380.0),
    ("uv", 4.0, 2.0, 9.8),
    ("pressure", 1010.0, 8.0, 972.0),
    ("rain", 2.0, 2.0, 64.0),
];

/// Chance that a sensor starts a spike run
const SPIKE_PROBABILITY: f64 = 0.08;

fn generate_reading(rng: &mut impl Rng, spiking: &mut BTreeMap<&'static str, u32>) -> Value {
    let mut reading = serde_json::Map::new();
    reading.insert(
        "timestamp".to_string(),
        json!(chrono::Utc::now().timestamp_millis()),
    );

    for &(metric, baseline, spread, spike) in SENSORS {
        let remaining = spiking.entry(metric).or_insert(0);
        if *remaining == 0 && rng.gen_bool(SPIKE_PROBABILITY) {
            *remaining = rng.gen_range(2..5);
        }

        let value = if *remaining > 0 {
            *remaining -= 1;
            spike + rng.gen_range(-0.5..0.5)
        } else {
            baseline + rng.gen_range(-spread..spread)
        };
        reading.insert(metric.to_string(), json!((value * 10.0).round() / 10.0));
    }

    Value::Object(reading)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    let count: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(100);
    let interval_ms: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(200);
    let scope = args.get(3).cloned().unwrap_or_else(|| "default".to_string());
    let host = std::env::var("SKYWATCH_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port = std::env::var("SKYWATCH_PORT").unwrap_or_else(|_| "8080".to_string());
    let base_url = format!("http://{}:{}", host, port);

    println!("Skywatch Simulator");
    println!("==================");
    println!("Target:    {}", base_url);
    println!("Scope:     {}", scope);
    println!("Readings:  {}", count);
    println!("Interval:  {} ms", interval_ms);
    println!();

    let client = Client::new();
    let mut rng = rand::thread_rng();
    let mut spiking = BTreeMap::new();
    let mut outcomes: BTreeMap<String, usize> = BTreeMap::new();
    let mut latencies = Vec::with_capacity(count);
    let start = Instant::now();

    for _ in 0..count {
        let reading = generate_reading(&mut rng, &mut spiking);

        let request_start = Instant::now();
        let response = client
            .post(format!("{}/readings", base_url))
            .query(&[("scope", scope.as_str())])
            .json(&reading)
            .send()
            .await?;

        if !response.status().is_success() {
            eprintln!("Error: {}", response.text().await?);
            return Ok(());
        }
        latencies.push(request_start.elapsed());

        let body: Value = response.json().await?;
        let key = match body["outcome"].as_str() {
            Some("triggered") => {
                println!("ALERT  {}", body["message"].as_str().unwrap_or("?"));
                "triggered".to_string()
            }
            _ => body["reason"].as_str().unwrap_or("unknown").to_string(),
        };
        *outcomes.entry(key).or_insert(0) += 1;

        tokio::time::sleep(Duration::from_millis(interval_ms)).await;
    }

    println!();
    println!("Outcomes after {:?}:", start.elapsed());
    for (outcome, n) in &outcomes {
        println!("  {:<28} {}", outcome, n);
    }

    if !latencies.is_empty() {
        latencies.sort();
        let sum: Duration = latencies.iter().sum();
        println!(
            "  Latency: avg={:?} p50={:?} max={:?}",
            sum / latencies.len() as u32,
            latencies[latencies.len() / 2],
            latencies[latencies.len() - 1]
        );
    }

    let alarms: Value = client
        .get(format!("{}/alarms", base_url))
        .query(&[("scope", scope.as_str())])
        .send()
        .await?
        .json()
        .await?;

    println!();
    println!("Alarm table:");
    if let Some(alarms) = alarms["alarms"].as_array() {
        for alarm in alarms {
            println!(
                "  {:<12} alarming={} count={}",
                alarm["metric_id"].as_str().unwrap_or("?"),
                alarm["is_alarming"],
                alarm["consecutive_count"]
            );
        }
    }

    Ok(())
}

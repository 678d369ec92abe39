use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config.host(host).port(port).dbname("campsite").user("campsite");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn day(offset: u64) -> NaiveDate {
    chrono::Local::now()
        .date_naive()
        .checked_add_days(Days::new(offset))
        .unwrap()
}

fn insert_sql(guest: usize, arrival: NaiveDate, departure: NaiveDate) -> String {
    format!(
        "INSERT INTO reservations (email, first_name, last_name, arrival_date, departure_date) \
         VALUES ('guest{guest}@bench.io', 'Bench', 'Guest', '{arrival}', '{departure}')"
    )
}

fn update_sql(id: &str, guest: usize, arrival: NaiveDate, departure: NaiveDate) -> String {
    format!(
        "UPDATE reservations SET email = 'guest{guest}@bench.io', first_name = 'Bench', \
         last_name = 'Guest', arrival_date = '{arrival}', departure_date = '{departure}' \
         WHERE id = '{id}'"
    )
}

/// Run an INSERT or UPDATE and return the reservation id it produced.
async fn write(client: &tokio_postgres::Client, sql: &str) -> Result<String, tokio_postgres::Error> {
    let messages = client.simple_query(sql).await?;
    Ok(messages
        .into_iter()
        .find_map(|m| match m {
            SimpleQueryMessage::Row(row) => row.get("id").map(str::to_string),
            _ => None,
        })
        .unwrap_or_default())
}

async fn delete(client: &tokio_postgres::Client, id: &str) {
    client
        .batch_execute(&format!("DELETE FROM reservations WHERE id = '{id}'"))
        .await
        .unwrap();
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    let n = 1000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let arrival = day(1 + (i as u64 % 20));
        let t = Instant::now();
        let id = write(&client, &insert_sql(i, arrival, arrival + Days::new(1)))
            .await
            .unwrap();
        latencies.push(t.elapsed());
        delete(&client, &id).await;
    }

    let elapsed = start.elapsed();
    let ops = (2 * n) as f64 / elapsed.as_secs_f64();
    println!("  {n} create+delete cycles in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("create latency", &mut latencies);
}

async fn phase2_create_contention(host: &str, port: u16) {
    let rounds = 50;
    let contenders = 16;
    let mut wins = 0;
    let mut losses = 0;
    let start = Instant::now();

    for round in 0..rounds {
        let arrival = day(1 + (round as u64 % 20));
        let mut handles = Vec::new();
        for c in 0..contenders {
            let host = host.to_string();
            handles.push(tokio::spawn(async move {
                let client = connect(&host, port).await;
                write(&client, &insert_sql(c, arrival, arrival + Days::new(2))).await
            }));
        }
        let mut winners = Vec::new();
        for h in handles {
            match h.await.unwrap() {
                Ok(id) => winners.push(id),
                Err(_) => losses += 1,
            }
        }
        assert_eq!(winners.len(), 1, "round {round}: {} winners", winners.len());
        wins += 1;
        let client = connect(host, port).await;
        delete(&client, &winners[0]).await;
    }

    println!(
        "  {rounds} rounds x {contenders} contenders: {wins} wins, {losses} rejected in {:.2}s",
        start.elapsed().as_secs_f64()
    );
}

async fn phase3_update_contention(host: &str, port: u16) {
    let writers = 8;
    let updates_per_writer = 50;
    let client = connect(host, port).await;
    let id = write(&client, &insert_sql(0, day(20), day(21))).await.unwrap();

    let ok = Arc::new(AtomicUsize::new(0));
    let gave_up = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();
    for w in 0..writers {
        let host = host.to_string();
        let id = id.clone();
        let ok = ok.clone();
        let gave_up = gave_up.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for i in 0..updates_per_writer {
                let nights = 1 + ((w + i) as u64 % 2);
                match write(&client, &update_sql(&id, w, day(20), day(20) + Days::new(nights))).await {
                    Ok(_) => ok.fetch_add(1, Ordering::Relaxed),
                    Err(_) => gave_up.fetch_add(1, Ordering::Relaxed),
                };
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
    delete(&client, &id).await;

    println!(
        "  {writers} writers x {updates_per_writer} updates on one reservation: {} applied, {} gave up in {:.2}s",
        ok.load(Ordering::Relaxed),
        gave_up.load(Ordering::Relaxed),
        start.elapsed().as_secs_f64()
    );
}

async fn phase4_read_under_load(host: &str, port: u16) {
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..4u64 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut i = 0usize;
            while !stop.load(Ordering::Relaxed) {
                let arrival = day(1 + w * 6 + (i as u64 % 4));
                if let Ok(id) = write(&client, &insert_sql(i, arrival, arrival + Days::new(1))).await {
                    delete(&client, &id).await;
                }
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .simple_query("SELECT * FROM availability")
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability query", &mut all_latencies);
}

#[tokio::main]
async fn main() {
    let host = std::env::var("CAMPSITE_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("CAMPSITE_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid CAMPSITE_PORT");

    println!("=== campsite stress benchmark ===");
    println!("target: {host}:{port} (expects an empty calendar)\n");

    println!("[phase 1] sequential create/delete throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] concurrent creates for the same stay");
    phase2_create_contention(&host, port).await;

    println!("\n[phase 3] concurrent updates of one reservation");
    phase3_update_contention(&host, port).await;

    println!("\n[phase 4] read latency under write load");
    phase4_read_under_load(&host, port).await;

    println!("\n=== done ===");
}

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const SLOTS: &str = "08:00,09:00,10:00,11:00,12:00,13:00,14:00,15:00,16:00,17:00,18:00";

async fn connect(host: &str, port: u16, user: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("allocd")
        .user(user)
        .password("allocd");

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
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn day(offset: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 1).expect("valid date") + Days::new(offset)
}

async fn create_facility(admin: &tokio_postgres::Client, name: &str) -> Ulid {
    let id = Ulid::new();
    admin
        .batch_execute(&format!(
            "INSERT INTO facilities (id, name, slots) VALUES ('{id}', '{name}', '{SLOTS}')"
        ))
        .await
        .unwrap();
    id
}

async fn request(
    client: &tokio_postgres::Client,
    facility: Ulid,
    date: NaiveDate,
    start: &str,
    end: &str,
) -> Result<Ulid, tokio_postgres::Error> {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO reservations (id, facility_id, date, start_time, end_time, purpose) \
             VALUES ('{id}', '{facility}', '{date}', '{start}', '{end}', 'bench')"
        ))
        .await?;
    Ok(id)
}

async fn phase1_sequential_requests(host: &str, port: u16) {
    let admin = connect(host, port, "admin").await;
    let member = connect(host, port, "member-seq").await;
    let facility = create_facility(&admin, "Sequential Hall").await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        request(&member, facility, day(i as u64), "09:00", "10:00").await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} requests in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("request latency", &mut latencies);
}

/// Several members request the same block; several admins race to approve
/// every request. Exactly one approval per block may win.
async fn phase2_contended_approvals(host: &str, port: u16) {
    let n_members = 8;
    let n_admins = 4;
    let n_days = 50;

    let admin = connect(host, port, "admin").await;
    let facility = create_facility(&admin, "Contended Court").await;

    let mut ids = Vec::new();
    for m in 0..n_members {
        let member = connect(host, port, &format!("member-{m}")).await;
        for d in 0..n_days {
            ids.push(request(&member, facility, day(d), "14:00", "16:00").await.unwrap());
        }
    }
    let ids = Arc::new(ids);

    let approved = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_admins {
        let host = host.to_string();
        let ids = ids.clone();
        let approved = approved.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, "admin").await;
            let mut latencies = Vec::with_capacity(ids.len());
            for id in ids.iter() {
                let t = Instant::now();
                let result = client
                    .batch_execute(&format!(
                        "INSERT INTO reservation_decisions (id, decision) VALUES ('{id}', 'approve')"
                    ))
                    .await;
                latencies.push(t.elapsed());
                match result {
                    Ok(()) => {
                        approved.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) if e.code().map(|c| c.code()) == Some("23P01") => {
                        conflicts.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(_) => {}
                }
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in handles {
        all_latencies.extend(h.await.unwrap());
    }

    let elapsed = start.elapsed();
    let approved = approved.load(Ordering::Relaxed);
    println!(
        "  {n_admins} admins x {} decisions in {:.2}s: {approved} approved, {} conflicts",
        ids.len(),
        elapsed.as_secs_f64(),
        conflicts.load(Ordering::Relaxed),
    );
    if approved != n_days as usize {
        println!("  !! expected exactly {n_days} approvals, got {approved}");
    }
    print_latency("approve latency", &mut all_latencies);
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let admin = connect(host, port, "admin").await;
    let facility = create_facility(&admin, "Busy Gym").await;
    for d in 0..30 {
        let id = request(&admin, facility, day(d), "10:00", "12:00").await.unwrap();
        admin
            .batch_execute(&format!(
                "INSERT INTO reservation_decisions (id, decision) VALUES ('{id}', 'approve')"
            ))
            .await
            .unwrap();
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &format!("writer-{w}")).await;
            let mut i = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let _ = request(&client, facility, day(i % 30), "13:00", "14:00").await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for r in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &format!("reader-{r}")).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let date = day((i % 30) as u64);
                let t = Instant::now();
                client
                    .simple_query(&format!(
                        "SELECT * FROM availability WHERE facility_id = '{facility}' AND date = '{date}'"
                    ))
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

async fn phase4_stock_race(host: &str, port: u16) {
    let total = 20;
    let n_requests = 100;

    let admin = connect(host, port, "admin").await;
    let member = connect(host, port, "member-rent").await;
    let item = Ulid::new();
    admin
        .batch_execute(&format!("INSERT INTO items (id, name, total) VALUES ('{item}', 'Projector', {total})"))
        .await
        .unwrap();

    let mut ids = Vec::with_capacity(n_requests);
    for _ in 0..n_requests {
        let id = Ulid::new();
        member
            .batch_execute(&format!(
                "INSERT INTO rentals (id, item_id, quantity, rental_date, return_date) \
                 VALUES ('{id}', '{item}', 1, '2030-01-01', '2030-01-05')"
            ))
            .await
            .unwrap();
        ids.push(id);
    }

    let approved = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();
    for chunk in ids.chunks(10) {
        let host = host.to_string();
        let chunk = chunk.to_vec();
        let approved = approved.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, "admin").await;
            for id in chunk {
                let result = client
                    .batch_execute(&format!(
                        "INSERT INTO rental_decisions (id, decision) VALUES ('{id}', 'approve')"
                    ))
                    .await;
                if result.is_ok() {
                    approved.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }
    for h in handles {
        let _ = h.await;
    }

    let approved = approved.load(Ordering::Relaxed);
    println!(
        "  {n_requests} approvals against total {total}: {approved} granted in {:.2}s",
        start.elapsed().as_secs_f64()
    );
    if approved != total {
        println!("  !! expected exactly {total} grants, got {approved}");
    }
}

#[tokio::main]
async fn main() {
    let host = std::env::var("ALLOCD_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("ALLOCD_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid ALLOCD_PORT");

    println!("=== allocd stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential request throughput");
    phase1_sequential_requests(&host, port).await;

    println!("\n[phase 2] contended approvals");
    phase2_contended_approvals(&host, port).await;

    println!("\n[phase 3] availability latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] stock race");
    phase4_stock_race(&host, port).await;

    println!("\n=== done ===");
}

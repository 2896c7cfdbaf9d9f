//! Fixture loading and seed data generation.
//!
//! Fixtures are either SQL scripts on disk (`*init*.sql`, run in name order) or a
//! deterministic data set generated here. The generated schema is the one the built-in
//! catalog queries: `client`, `order` and `order_detail`.

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backends::Connection;
use crate::engine::Engine;
use crate::error::{Error, Result};

/// Rows per multi-row INSERT. SQL Server accepts at most 1000.
const INSERT_BATCH_SIZE: usize = 1000;

/// Scale factor for generated data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Scale {
    /// 100 clients. Use for smoke tests.
    Tiny,
    /// 1,000 clients.
    Small,
    /// 10,000 clients, enough for every built-in lookup to hit a row.
    Medium,
    /// 100,000 clients.
    Large,
}

impl Scale {
    /// Number of clients at this scale.
    pub fn clients(&self) -> usize {
        match self {
            Scale::Tiny => 100,
            Scale::Small => 1_000,
            Scale::Medium => 10_000,
            Scale::Large => 100_000,
        }
    }

    /// Orders per client.
    pub fn orders_per_client(&self) -> usize {
        match self {
            Scale::Tiny => 2,
            Scale::Small => 3,
            Scale::Medium => 5,
            Scale::Large => 5,
        }
    }

    /// Detail lines per order.
    pub fn details_per_order(&self) -> usize {
        match self {
            Scale::Tiny => 2,
            Scale::Small => 3,
            Scale::Medium => 4,
            Scale::Large => 4,
        }
    }
}

impl Default for Scale {
    fn default() -> Self {
        Scale::Medium
    }
}

/// Client row.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientData {
    pub id: i64,
    pub name: String,
    pub country: &'static str,
}

/// Order row.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderData {
    pub id: i64,
    pub client_id: i64,
}

/// Order detail row.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDetailData {
    pub id: i64,
    pub order_id: i64,
    pub product: String,
    pub quantity: i32,
}

/// Pick a country with a skewed distribution: `US` dominates, `FR` is common and
/// `CY` is rare, so equality filters range from scans to selective seeks.
fn pick_country(rng: &mut StdRng) -> &'static str {
    const OTHERS: [&str; 5] = ["DE", "GB", "IT", "ES", "NL"];
    match rng.gen_range(0..1000usize) {
        0..=499 => "US",
        500..=599 => "FR",
        600..=601 => "CY",
        n => OTHERS[n % OTHERS.len()],
    }
}

/// Generate clients with ids `0..count`.
pub fn generate_clients(count: usize) -> Vec<ClientData> {
    const SEED: u64 = 12345;
    let mut rng = StdRng::seed_from_u64(SEED);

    let name_prefixes = [
        "Alice", "Bob", "Charlie", "David", "Eve", "Frank", "Grace", "Henry", "Ivy", "Jack",
    ];

    (0..count)
        .map(|i| ClientData {
            id: i as i64,
            name: format!("{}_{}", name_prefixes[i % name_prefixes.len()], i),
            country: pick_country(&mut rng),
        })
        .collect()
}

/// Generate orders spread across clients.
pub fn generate_orders(count: usize, client_count: usize) -> Vec<OrderData> {
    const SEED: u64 = 54321;
    let mut rng = StdRng::seed_from_u64(SEED);

    (0..count)
        .map(|i| OrderData {
            id: i as i64,
            client_id: rng.gen_range(0..client_count.max(1)) as i64,
        })
        .collect()
}

/// Generate order detail lines, `per_order` for every order.
pub fn generate_order_details(order_count: usize, per_order: usize) -> Vec<OrderDetailData> {
    const SEED: u64 = 67890;
    let mut rng = StdRng::seed_from_u64(SEED);

    let products = ["keyboard", "mouse", "monitor", "dock", "cable", "headset"];

    (0..order_count * per_order)
        .map(|i| OrderDetailData {
            id: i as i64,
            order_id: (i / per_order.max(1)) as i64,
            product: products[rng.gen_range(0..products.len())].to_string(),
            quantity: rng.gen_range(1..=20),
        })
        .collect()
}

/// Statements that create and populate the fixture schema for an engine.
pub fn generate_statements(engine: Engine, scale: Scale) -> Vec<String> {
    let order = engine.quote_ident("order");

    let clients = generate_clients(scale.clients());
    let orders = generate_orders(scale.clients() * scale.orders_per_client(), clients.len());
    let details = generate_order_details(orders.len(), scale.details_per_order());

    let mut statements = vec![
        "DROP TABLE IF EXISTS order_detail".to_string(),
        format!("DROP TABLE IF EXISTS {}", order),
        "DROP TABLE IF EXISTS client".to_string(),
        "CREATE TABLE client (id INT NOT NULL PRIMARY KEY, name VARCHAR(100) NOT NULL, country CHAR(2) NOT NULL)"
            .to_string(),
        "CREATE INDEX ix_client_country ON client (country)".to_string(),
        format!("CREATE TABLE {} (id INT NOT NULL PRIMARY KEY, client_id INT NOT NULL)", order),
        "CREATE TABLE order_detail (id INT NOT NULL PRIMARY KEY, order_id INT NOT NULL, product VARCHAR(50) NOT NULL, quantity INT NOT NULL)"
            .to_string(),
        "CREATE INDEX ix_order_detail_order_id ON order_detail (order_id)".to_string(),
    ];

    for chunk in clients.chunks(INSERT_BATCH_SIZE) {
        let values: Vec<String> = chunk
            .iter()
            .map(|c| format!("({}, '{}', '{}')", c.id, c.name, c.country))
            .collect();
        statements.push(format!(
            "INSERT INTO client (id, name, country) VALUES {}",
            values.join(", ")
        ));
    }

    for chunk in orders.chunks(INSERT_BATCH_SIZE) {
        let values: Vec<String> = chunk
            .iter()
            .map(|o| format!("({}, {})", o.id, o.client_id))
            .collect();
        statements.push(format!(
            "INSERT INTO {} (id, client_id) VALUES {}",
            order,
            values.join(", ")
        ));
    }

    for chunk in details.chunks(INSERT_BATCH_SIZE) {
        let values: Vec<String> = chunk
            .iter()
            .map(|d| format!("({}, {}, '{}', {})", d.id, d.order_id, d.product, d.quantity))
            .collect();
        statements.push(format!(
            "INSERT INTO order_detail (id, order_id, product, quantity) VALUES {}",
            values.join(", ")
        ));
    }

    statements
}

/// Generate the fixture data set and load it through a live connection.
pub async fn load_generated(conn: &dyn Connection, scale: Scale) -> Result<()> {
    let statements = generate_statements(conn.engine(), scale);
    tracing::info!(
        engine = %conn.engine(),
        ?scale,
        statements = statements.len(),
        "loading generated fixtures"
    );
    for statement in &statements {
        conn.execute_script(statement).await?;
    }
    Ok(())
}

/// Find `*init*.sql` files in a directory, sorted by file name.
///
/// If the directory has a subdirectory named after the engine (e.g. `postgres/`),
/// scripts are taken from there instead, so dialect-specific fixtures can live side
/// by side.
pub fn discover_init_scripts(dir: &Path, engine: Engine) -> Result<Vec<PathBuf>> {
    let engine_dir = dir.join(engine.id());
    let dir = if engine_dir.is_dir() {
        engine_dir
    } else {
        dir.to_path_buf()
    };

    let mut scripts = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.contains("init") && name.ends_with(".sql") {
            scripts.push(entry.path());
        }
    }

    scripts.sort();
    Ok(scripts)
}

/// Execute a script file against a live connection.
pub async fn load_script(conn: &dyn Connection, path: &Path) -> Result<()> {
    let script = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
    tracing::info!(engine = %conn.engine(), script = %path.display(), "loading fixture script");
    conn.execute_script(&script).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_is_deterministic() {
        assert_eq!(generate_clients(500), generate_clients(500));
        assert_eq!(generate_orders(100, 10), generate_orders(100, 10));
        assert_eq!(
            generate_statements(Engine::Postgres, Scale::Tiny),
            generate_statements(Engine::Postgres, Scale::Tiny)
        );
    }

    #[test]
    fn test_client_ids_are_dense() {
        let clients = generate_clients(Scale::Medium.clients());
        assert_eq!(clients.first().unwrap().id, 0);
        assert_eq!(clients.last().unwrap().id, 9999);
    }

    #[test]
    fn test_country_skew() {
        let clients = generate_clients(10_000);
        let count = |code: &str| clients.iter().filter(|c| c.country == code).count();
        assert!(count("US") > count("FR"));
        assert!(count("FR") > count("CY"));
        assert!(count("CY") > 0);
    }

    #[test]
    fn test_details_reference_orders() {
        let details = generate_order_details(10, 3);
        assert_eq!(details.len(), 30);
        assert!(details.iter().all(|d| d.order_id < 10));
        assert_eq!(details.iter().filter(|d| d.order_id == 1).count(), 3);
    }

    #[test]
    fn test_statements_quote_order_per_dialect() {
        let mysql = generate_statements(Engine::MySql, Scale::Tiny);
        assert!(mysql.iter().any(|s| s.starts_with("CREATE TABLE `order`")));

        let postgres = generate_statements(Engine::Postgres, Scale::Tiny);
        assert!(postgres.iter().any(|s| s.starts_with("INSERT INTO \"order\"")));

        let mssql = generate_statements(Engine::MsSql2019, Scale::Tiny);
        assert!(mssql.iter().any(|s| s == "DROP TABLE IF EXISTS [order]"));
    }

    #[test]
    fn test_inserts_respect_batch_limit() {
        let statements = generate_statements(Engine::MsSql2022, Scale::Small);
        let client_inserts: Vec<_> = statements
            .iter()
            .filter(|s| s.starts_with("INSERT INTO client"))
            .collect();
        assert_eq!(client_inserts.len(), 1);

        // 1,000 clients * 3 orders * 3 details = 9,000 detail rows.
        let detail_inserts = statements
            .iter()
            .filter(|s| s.starts_with("INSERT INTO order_detail"))
            .count();
        assert_eq!(detail_inserts, 9);
    }

    #[test]
    fn test_discover_init_scripts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("q1_init.sql"), "select 1;").unwrap();
        std::fs::write(dir.path().join("init_db.sql"), "select 1;").unwrap();
        std::fs::write(dir.path().join("notes.sql"), "select 1;").unwrap();
        std::fs::write(dir.path().join("init.txt"), "").unwrap();

        let scripts = discover_init_scripts(dir.path(), Engine::MySql).unwrap();
        let names: Vec<_> = scripts
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["init_db.sql", "q1_init.sql"]);
    }

    #[test]
    fn test_discover_prefers_engine_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("init_db.sql"), "").unwrap();
        std::fs::create_dir(dir.path().join("postgres")).unwrap();
        std::fs::write(dir.path().join("postgres").join("init_pg.sql"), "").unwrap();

        let pg = discover_init_scripts(dir.path(), Engine::Postgres).unwrap();
        assert_eq!(pg.len(), 1);
        assert!(pg[0].ends_with("postgres/init_pg.sql"));

        let mysql = discover_init_scripts(dir.path(), Engine::MySql).unwrap();
        assert!(mysql[0].ends_with("init_db.sql"));
    }
}

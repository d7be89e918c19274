use sea_orm_migration::prelude::*;

/// Standalone migration runner, e.g. `cargo run -p migration -- status`.
#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    cli::run_cli(migration::Migrator).await;
}

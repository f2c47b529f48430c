mod platform;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    platform::run_agent(std::env::args().nth(1)).await
}

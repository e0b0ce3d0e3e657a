#[tokio::main]
async fn main() {
    umbra::server::run().await;
}

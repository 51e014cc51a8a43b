#[tokio::main]
async fn main() {
    if let Err(e) = photo_restore_lib::run().await {
        eprintln!("photo-restore: {e}");
        std::process::exit(1);
    }
}

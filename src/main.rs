#[tokio::main]
async fn main() {
    match linkscout::app::run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("linkscout: {err:#}");
            std::process::exit(2);
        }
    }
}

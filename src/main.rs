use log::error;

#[tokio::main]
async fn main() {
    if let Err(e) = neptun_bridge::app().await {
        // logging may not be up yet if the config failed to load
        error!("{:?}", e);
        eprintln!("neptun-bridge: {:?}", e);
        std::process::exit(255);
    }
}

use exo_pool::ExoClient;
use std::env;

#[tokio::main]
async fn main() -> exo_pool::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let serial = args
        .get(1)
        .expect("usage: monitor <serial> (EXO_EMAIL and EXO_PASSWORD in the environment)");
    let email = env::var("EXO_EMAIL").expect("EXO_EMAIL not set");
    let password = env::var("EXO_PASSWORD").expect("EXO_PASSWORD not set");

    let client = ExoClient::builder(email, password, serial)
        .on_event(|event| {
            println!("{event:?}");
        })
        .on_update(|snapshot| {
            if let Some(orp) = snapshot.orp_setpoint() {
                println!("ORP setpoint: {orp} mV");
            }
            if let Some(ph) = snapshot.ph_setpoint() {
                println!("pH setpoint: {ph:.1}");
            }
            if let Some(on) = snapshot.chlorinator_on() {
                println!("Chlorinator: {}", if on { "on" } else { "off" });
            }
            if let Some(error) = snapshot.error_code() {
                println!("Device status: {error}");
            }
        })
        .build();

    println!("Polling {serial}...");
    loop {
        if let Err(e) = client.refresh().await {
            eprintln!("Poll error: {e}");
        }
        tokio::time::sleep(client.poll_interval()).await;
    }
}

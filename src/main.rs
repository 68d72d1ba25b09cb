#[cfg(target_os = "espidf")]
#[embassy_executor::main]
async fn main(spawner: embassy_executor::Spawner) {
    // It is necessary to call this function once. Otherwise some patches to the runtime
    // implemented by esp-idf-sys might not link properly. See https://github.com/esp-rs/esp-idf-template/issues/71
    esp_idf_svc::sys::link_patches();

    // Bind the log crate to the ESP Logging facilities
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("🚀 Starting relay-link firmware");

    if let Err(e) = relay_link::firmware::start(spawner) {
        log::error!("❌ Startup failed: {:?}", e);
        esp_idf_svc::hal::reset::restart();
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    // Host builds carry the pipeline core and its tests only. With
    // `harness = false` this also runs under `cargo test`, so exit cleanly.
    eprintln!("relay-link firmware runs on ESP-IDF targets only");
}

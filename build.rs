fn main() {
    // ESP-IDF link arguments are only meaningful for the device build;
    // host builds run the protocol core tests.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}

pub mod channel;
pub mod envelope;
pub mod errors;
pub mod log;
pub mod partition;
pub mod pow;
pub mod telemetry;
pub mod types;

pub fn timestamp() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

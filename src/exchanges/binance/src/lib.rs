use serde::Serialize;

mod protocol;

pub use protocol::BinanceProtocol;

fn serialize_to_json<S: Serialize>(value: &S) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}

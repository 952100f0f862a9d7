pub mod keypair;

pub use keypair::{parse_key, Keypair, ParsedKey};

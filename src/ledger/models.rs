use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Amount in the ledger's smallest unit.
///
/// Serialized as a decimal string, which is how the node reports balances.
/// Plain JSON numbers are accepted when decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(pub u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn checked_mul(self, rhs: u64) -> Option<Amount> {
        self.0.checked_mul(rhs).map(Amount)
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Amount)
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Amount(value)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text.parse().map_err(de::Error::custom),
            Raw::Number(n) => Ok(Amount(n)),
        }
    }
}

/// Account state as reported by the node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub address: String,
    pub balance: Amount,
    pub sequence_number: u64,
}

/// Confirmed transaction as reported by the node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub ledger: Option<u64>,
}

/// Response body of a successful submission
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub hash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_accepts_string_and_number() {
        let from_text: Amount = serde_json::from_str("\"1000000\"").unwrap();
        let from_number: Amount = serde_json::from_str("1000000").unwrap();
        assert_eq!(from_text, Amount(1_000_000));
        assert_eq!(from_number, Amount(1_000_000));
        assert_eq!(serde_json::to_string(&from_text).unwrap(), "\"1000000\"");
    }

    #[test]
    fn test_amount_rejects_negative() {
        assert!(serde_json::from_str::<Amount>("\"-5\"").is_err());
        assert!("abc".parse::<Amount>().is_err());
    }

    #[test]
    fn test_account_record_decodes_node_payload() {
        let body = r#"{"address":"abc","balance":"250","sequence_number":7}"#;
        let record: AccountRecord = serde_json::from_str(body).unwrap();
        assert_eq!(record.balance, Amount(250));
        assert_eq!(record.sequence_number, 7);
    }
}
